//! Labeling pipeline.
//!
//! Every listed message flows through:
//! 1. `decoder::decode_message()`: base64url, then quoted-printable
//! 2. `KeywordMatcher::evaluate()`: case-insensitive substring match
//! 3. `Labeler::label_message()`: ensure each matching label, apply it and
//!    take the message out of the inbox

pub mod decoder;
pub mod labeler;
pub mod matcher;

pub use labeler::{Labeler, PassSummary};
pub use matcher::{KeywordMatcher, LabelMatch, matching_labels};
