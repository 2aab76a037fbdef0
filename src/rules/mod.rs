//! Keyword-to-label rules: model, store, loader, import and REST routes.

pub mod import;
pub mod loader;
pub mod model;
pub mod routes;
pub mod store;

pub use loader::load_mapping;
pub use model::{KeywordMapping, Rule};
pub use store::{CreateOutcome, RuleStore};
