//! Database module.
//!
//! Provides SQLite storage for entities, realms, sinks and the timeseries
//! retention table, with embedded migrations.

mod models;
mod store;

pub use models::*;
pub use store::*;
