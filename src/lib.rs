//! Mail labeler: keyword rules in a local database, applied as Gmail labels.

pub mod config;
pub mod error;
pub mod mail;
pub mod pipeline;
pub mod rules;
pub mod store;
