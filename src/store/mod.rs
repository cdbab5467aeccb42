//! Persistence layer: libSQL-backed storage for cities, generated content
//! and onboarding runs.

pub mod libsql_backend;
pub mod migrations;
pub mod seed;
#[cfg(test)]
pub mod testing;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use seed::seed_module_catalog;
pub use traits::{Database, ModuleRecord};
