//! `Database` trait: the single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::city::model::{City, CityStats};
use crate::content::model::{Hotspot, QuickWin};
use crate::error::DatabaseError;
use crate::onboarding::state::OnboardingRun;

/// A row of the module catalog table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRecord {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Backend-agnostic database trait covering cities, the module catalog,
/// generated content and onboarding runs.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Cities ──────────────────────────────────────────────────────

    /// Insert a new city. Fails with `Constraint` if name+country exists.
    async fn insert_city(&self, city: &City) -> Result<(), DatabaseError>;

    async fn get_city(&self, id: Uuid) -> Result<Option<City>, DatabaseError>;

    /// Look up a city by its exact name and country.
    async fn find_city_by_name(
        &self,
        name: &str,
        country: &str,
    ) -> Result<Option<City>, DatabaseError>;

    /// Overwrite the denormalized stats summary on a city.
    async fn update_city_stats(&self, id: Uuid, stats: &CityStats) -> Result<(), DatabaseError>;

    // ── Module catalog ──────────────────────────────────────────────

    /// Insert or rename a module row keyed by slug. Returns the row.
    async fn upsert_module(&self, slug: &str, name: &str) -> Result<ModuleRecord, DatabaseError>;

    async fn get_module_by_slug(&self, slug: &str) -> Result<Option<ModuleRecord>, DatabaseError>;

    async fn list_modules(&self) -> Result<Vec<ModuleRecord>, DatabaseError>;

    // ── Generated content ───────────────────────────────────────────

    /// Insert a batch of hotspots in one transaction.
    async fn insert_hotspots(&self, hotspots: &[Hotspot]) -> Result<(), DatabaseError>;

    async fn list_hotspots_by_city(&self, city_id: Uuid) -> Result<Vec<Hotspot>, DatabaseError>;

    /// Insert a batch of quick wins in one transaction.
    async fn insert_quick_wins(&self, quick_wins: &[QuickWin]) -> Result<(), DatabaseError>;

    /// Active quick wins for a city, ordered by module then sort order.
    async fn list_quick_wins_by_city(&self, city_id: Uuid)
    -> Result<Vec<QuickWin>, DatabaseError>;

    // ── Onboarding runs ─────────────────────────────────────────────

    /// Insert or overwrite a run snapshot.
    async fn save_onboarding_run(&self, run: &OnboardingRun) -> Result<(), DatabaseError>;

    /// The most recently started run for a city.
    async fn get_onboarding_run(
        &self,
        city_id: Uuid,
    ) -> Result<Option<OnboardingRun>, DatabaseError>;

    /// Runs still `pending` or `generating`.
    async fn list_unfinished_onboarding_runs(&self) -> Result<Vec<OnboardingRun>, DatabaseError>;
}
