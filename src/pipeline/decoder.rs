//! Message body decoding: base64url transport encoding, then
//! quoted-printable content encoding.
//!
//! Both stages are lenient. Bytes that cannot be decoded are skipped and
//! invalid UTF-8 sequences are dropped, so [`decode_body`] always returns
//! some text and never fails.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use tracing::debug;

use crate::error::DecodeError;
use crate::mail::MailMessage;

/// URL-safe alphabet, padding optional, trailing bits ignored.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decode a transport-encoded body into best-effort plain text.
pub fn decode_body(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let bytes = match decode_base64_strict(raw) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "Body is not clean base64url, decoding leniently");
            decode_base64_lenient(raw)
        }
    };
    let text = utf8_ignoring_invalid(&bytes);

    let (decoded, malformed) = decode_quoted_printable(text.as_bytes());
    if let Some(e) = malformed {
        debug!(error = %e, "Malformed quoted-printable escape kept literally");
    }
    utf8_ignoring_invalid(&decoded)
}

/// Decode the top-level body and every text part, joined by newlines.
pub fn decode_message(message: &MailMessage) -> String {
    std::iter::once(message.raw_body.as_str())
        .chain(message.part_bodies.iter().map(String::as_str))
        .map(decode_body)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_base64_strict(raw: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(URL_SAFE_LENIENT.decode(raw.trim())?)
}

/// Keep only alphabet characters (standard `+`/`/` mapped to their
/// URL-safe forms) and drop a final lone character, which cannot encode a
/// whole byte.
fn decode_base64_lenient(raw: &str) -> Vec<u8> {
    let mut cleaned: Vec<u8> = raw
        .bytes()
        .filter_map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => Some(b),
            b'+' => Some(b'-'),
            b'/' => Some(b'_'),
            _ => None,
        })
        .collect();
    if cleaned.len() % 4 == 1 {
        cleaned.pop();
    }
    URL_SAFE_LENIENT.decode(&cleaned).unwrap_or_else(|e| {
        debug!(error = %e, "Discarding undecodable base64 body");
        Vec::new()
    })
}

/// Decode quoted-printable content (RFC 2045). Soft line breaks are
/// removed and `=XX` escapes decoded; malformed escapes are copied through
/// unchanged. The first malformed escape, if any, is returned alongside
/// the output.
pub fn decode_quoted_printable(input: &[u8]) -> (Vec<u8>, Option<DecodeError>) {
    let mut out = Vec::with_capacity(input.len());
    let mut malformed = None;
    let mut i = 0;

    while i < input.len() {
        let byte = input[i];
        if byte != b'=' {
            out.push(byte);
            i += 1;
            continue;
        }

        match (input.get(i + 1), input.get(i + 2)) {
            // Soft line breaks
            (Some(b'\r'), Some(b'\n')) => i += 3,
            (Some(b'\n'), _) => i += 2,
            (Some(&hi), Some(&lo)) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                out.push((hex_value(hi) << 4) | hex_value(lo));
                i += 3;
            }
            _ => {
                malformed.get_or_insert(DecodeError::QuotedPrintable { offset: i });
                out.push(b'=');
                i += 1;
            }
        }
    }

    (out, malformed)
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

fn utf8_ignoring_invalid(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}
