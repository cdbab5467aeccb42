//! Module catalog seeding.

use tracing::info;

use crate::catalog::ModuleSlug;
use crate::error::DatabaseError;

use super::traits::{Database, ModuleRecord};

/// Upsert one row per catalog module. Safe to run on every start.
pub async fn seed_module_catalog(db: &dyn Database) -> Result<Vec<ModuleRecord>, DatabaseError> {
    let mut records = Vec::with_capacity(ModuleSlug::ALL.len());
    for slug in ModuleSlug::ALL {
        records.push(db.upsert_module(slug.as_str(), slug.display_name()).await?);
    }
    info!(count = records.len(), "Module catalog seeded");
    Ok(records)
}
