//! Database layer: models and SQLite store.

mod models;
mod store;

pub use models::*;
pub use store::*;
