//! Progress tracker: the live state record for one onboarding run.
//!
//! Every update is validated by the run's transition table, persisted, and
//! only then committed in memory and broadcast to subscribers. Commit and
//! broadcast happen under the same write guard, so broadcast order matches
//! commit order.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DatabaseError, OnboardingError};
use crate::store::Database;

use super::state::OnboardingRun;

/// Snapshots buffered per subscriber before it starts lagging.
const DEFAULT_BROADCAST_CAPACITY: usize = 64;

pub struct ProgressTracker {
    db: Arc<dyn Database>,
    run_id: Uuid,
    city_id: Uuid,
    run: RwLock<OnboardingRun>,
    tx: broadcast::Sender<OnboardingRun>,
}

impl ProgressTracker {
    /// Create and persist a pending run for `city_id`.
    pub async fn create(db: Arc<dyn Database>, city_id: Uuid) -> Result<Arc<Self>, DatabaseError> {
        let run = OnboardingRun::new(city_id);
        db.save_onboarding_run(&run).await?;
        debug!(run_id = %run.id, %city_id, "Onboarding run created");

        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Ok(Arc::new(Self {
            db,
            run_id: run.id,
            city_id,
            run: RwLock::new(run),
            tx,
        }))
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn city_id(&self) -> Uuid {
        self.city_id
    }

    /// Receive every snapshot committed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<OnboardingRun> {
        self.tx.subscribe()
    }

    pub async fn snapshot(&self) -> OnboardingRun {
        self.run.read().await.clone()
    }

    /// Current snapshot plus a receiver for exactly the snapshots after it.
    pub async fn watch(&self) -> (OnboardingRun, broadcast::Receiver<OnboardingRun>) {
        let current = self.run.read().await;
        // No update can commit while the read guard is held.
        let rx = self.tx.subscribe();
        (current.clone(), rx)
    }

    /// Apply `mutate` to a copy of the run, persist it, then commit.
    ///
    /// A rejected transition or a failed write leaves the in-memory run and
    /// subscribers untouched.
    pub(super) async fn update<F>(&self, mutate: F) -> Result<OnboardingRun, OnboardingError>
    where
        F: FnOnce(&mut OnboardingRun) -> Result<(), OnboardingError>,
    {
        let mut current = self.run.write().await;
        let mut next = current.clone();
        mutate(&mut next)?;
        next.updated_at = Utc::now();

        self.db.save_onboarding_run(&next).await?;
        *current = next.clone();
        let _ = self.tx.send(next.clone());
        drop(current);

        debug!(
            run_id = %self.run_id,
            status = %next.status,
            stage = next.current_stage.map(|s| s.as_str()).unwrap_or("-"),
            progress = next.progress,
            "Onboarding progress"
        );
        Ok(next)
    }

    /// Mark the run failed.
    ///
    /// The failure is committed and broadcast before it is written, so
    /// subscribers see it even when the database is what failed. Returns the
    /// write error, if any.
    pub(super) async fn record_failure(&self, error: &str) -> Result<(), OnboardingError> {
        let snapshot = {
            let mut current = self.run.write().await;
            if current.is_terminal() {
                warn!(run_id = %self.run_id, status = %current.status, "Run already finished; failure not recorded");
                return Ok(());
            }
            current.fail(error, Utc::now())?;
            current.updated_at = Utc::now();
            let _ = self.tx.send(current.clone());
            current.clone()
        };

        self.db.save_onboarding_run(&snapshot).await?;
        Ok(())
    }
}
