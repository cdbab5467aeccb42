//! Record writer: persists sanitized drafts and refreshes city stats.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::city::model::CityStats;
use crate::city::stats::compute_city_stats;
use crate::error::DatabaseError;
use crate::store::Database;

use super::model::{Hotspot, HotspotDraft, QuickWin, QuickWinDraft};

pub struct RecordWriter {
    db: Arc<dyn Database>,
}

impl RecordWriter {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Insert hotspots for a city+module. No dedup against earlier runs.
    pub async fn write_hotspots(
        &self,
        city_id: Uuid,
        module_id: Uuid,
        drafts: Vec<HotspotDraft>,
    ) -> Result<Vec<Uuid>, DatabaseError> {
        let now = Utc::now();
        let records: Vec<Hotspot> = drafts
            .into_iter()
            .map(|draft| Hotspot::from_draft(city_id, module_id, draft, now))
            .collect();

        self.db.insert_hotspots(&records).await?;
        debug!(%city_id, %module_id, count = records.len(), "Hotspots written");
        Ok(records.into_iter().map(|h| h.id).collect())
    }

    pub async fn write_quick_wins(
        &self,
        city_id: Uuid,
        module_id: Uuid,
        drafts: Vec<QuickWinDraft>,
    ) -> Result<Vec<Uuid>, DatabaseError> {
        let now = Utc::now();
        let records: Vec<QuickWin> = drafts
            .into_iter()
            .map(|draft| QuickWin::from_draft(city_id, module_id, draft, now))
            .collect();

        self.db.insert_quick_wins(&records).await?;
        debug!(%city_id, %module_id, count = records.len(), "Quick wins written");
        Ok(records.into_iter().map(|q| q.id).collect())
    }

    /// Rebuild the city's stats summary from its current rows and store it.
    pub async fn recompute_city_stats(&self, city_id: Uuid) -> Result<CityStats, DatabaseError> {
        let hotspots = self.db.list_hotspots_by_city(city_id).await?;
        let quick_wins = self.db.list_quick_wins_by_city(city_id).await?;
        let stats = compute_city_stats(&hotspots, &quick_wins);
        self.db.update_city_stats(city_id, &stats).await?;
        debug!(
            %city_id,
            hotspots = stats.total_hotspots,
            quick_wins = stats.total_quick_wins,
            "City stats recomputed"
        );
        Ok(stats)
    }
}
