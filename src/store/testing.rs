//! Test double: a libSQL database whose writes can be made to fail.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use crate::city::model::{City, CityStats};
use crate::content::model::{Hotspot, QuickWin};
use crate::error::DatabaseError;
use crate::onboarding::state::OnboardingRun;

use super::libsql_backend::LibSqlBackend;
use super::traits::{Database, ModuleRecord};

/// Delegates to an in-memory backend; each flag makes one kind of write fail.
pub struct FlakyDatabase {
    pub inner: LibSqlBackend,
    pub fail_run_saves: AtomicBool,
    pub fail_hotspot_inserts: AtomicBool,
    pub fail_stats_updates: AtomicBool,
}

impl FlakyDatabase {
    pub async fn new() -> Self {
        Self {
            inner: LibSqlBackend::new_memory().await.unwrap(),
            fail_run_saves: AtomicBool::new(false),
            fail_hotspot_inserts: AtomicBool::new(false),
            fail_stats_updates: AtomicBool::new(false),
        }
    }

    fn check(flag: &AtomicBool, op: &str) -> Result<(), DatabaseError> {
        if flag.load(Ordering::SeqCst) {
            return Err(DatabaseError::Pool(format!("{op}: connection lost")));
        }
        Ok(())
    }
}

#[async_trait]
impl Database for FlakyDatabase {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        self.inner.init_schema().await
    }

    async fn insert_city(&self, city: &City) -> Result<(), DatabaseError> {
        self.inner.insert_city(city).await
    }

    async fn get_city(&self, id: Uuid) -> Result<Option<City>, DatabaseError> {
        self.inner.get_city(id).await
    }

    async fn find_city_by_name(
        &self,
        name: &str,
        country: &str,
    ) -> Result<Option<City>, DatabaseError> {
        self.inner.find_city_by_name(name, country).await
    }

    async fn update_city_stats(&self, id: Uuid, stats: &CityStats) -> Result<(), DatabaseError> {
        Self::check(&self.fail_stats_updates, "update_city_stats")?;
        self.inner.update_city_stats(id, stats).await
    }

    async fn upsert_module(&self, slug: &str, name: &str) -> Result<ModuleRecord, DatabaseError> {
        self.inner.upsert_module(slug, name).await
    }

    async fn get_module_by_slug(&self, slug: &str) -> Result<Option<ModuleRecord>, DatabaseError> {
        self.inner.get_module_by_slug(slug).await
    }

    async fn list_modules(&self) -> Result<Vec<ModuleRecord>, DatabaseError> {
        self.inner.list_modules().await
    }

    async fn insert_hotspots(&self, hotspots: &[Hotspot]) -> Result<(), DatabaseError> {
        Self::check(&self.fail_hotspot_inserts, "insert_hotspots")?;
        self.inner.insert_hotspots(hotspots).await
    }

    async fn list_hotspots_by_city(&self, city_id: Uuid) -> Result<Vec<Hotspot>, DatabaseError> {
        self.inner.list_hotspots_by_city(city_id).await
    }

    async fn insert_quick_wins(&self, quick_wins: &[QuickWin]) -> Result<(), DatabaseError> {
        self.inner.insert_quick_wins(quick_wins).await
    }

    async fn list_quick_wins_by_city(
        &self,
        city_id: Uuid,
    ) -> Result<Vec<QuickWin>, DatabaseError> {
        self.inner.list_quick_wins_by_city(city_id).await
    }

    async fn save_onboarding_run(&self, run: &OnboardingRun) -> Result<(), DatabaseError> {
        Self::check(&self.fail_run_saves, "save_onboarding_run")?;
        self.inner.save_onboarding_run(run).await
    }

    async fn get_onboarding_run(
        &self,
        city_id: Uuid,
    ) -> Result<Option<OnboardingRun>, DatabaseError> {
        self.inner.get_onboarding_run(city_id).await
    }

    async fn list_unfinished_onboarding_runs(&self) -> Result<Vec<OnboardingRun>, DatabaseError> {
        self.inner.list_unfinished_onboarding_runs().await
    }
}
