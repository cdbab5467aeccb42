//! Onboarding service: fire-and-forget runs keyed by run id.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{DatabaseError, OnboardingError};
use crate::store::Database;

use super::orchestrator::{OnboardingOrchestrator, OnboardingRequest, RunOutcome};
use super::state::OnboardingRun;
use super::tracker::ProgressTracker;

/// Error recorded on runs left unfinished by a previous process.
pub const INTERRUPTED_ERROR: &str = "Onboarding was interrupted by a service restart";

/// Finished runs whose outcome and final snapshot stay available.
const DEFAULT_FINISHED_RETENTION: usize = 32;

/// Identifies a started run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunHandle {
    pub run_id: Uuid,
    pub city_id: Uuid,
}

/// Runs started by this process.
///
/// Running entries are never evicted. Finished ones (joined or not) are kept
/// up to the retention limit, oldest evicted first.
#[derive(Default)]
struct Registry {
    tasks: HashMap<Uuid, JoinHandle<RunOutcome>>,
    /// Latest tracker per city, kept after the run ends so late
    /// subscribers still get the terminal snapshot.
    trackers: HashMap<Uuid, Arc<ProgressTracker>>,
    /// Started runs, oldest first.
    started: VecDeque<RunHandle>,
}

impl Registry {
    fn is_finished(&self, run_id: &Uuid) -> bool {
        self.tasks.get(run_id).is_none_or(|task| task.is_finished())
    }

    fn prune(&mut self, retention: usize) {
        let finished: Vec<RunHandle> = self
            .started
            .iter()
            .filter(|h| self.is_finished(&h.run_id))
            .copied()
            .collect();
        let excess = finished.len().saturating_sub(retention);
        for handle in finished.into_iter().take(excess) {
            self.tasks.remove(&handle.run_id);
            if self
                .trackers
                .get(&handle.city_id)
                .is_some_and(|t| t.run_id() == handle.run_id)
            {
                self.trackers.remove(&handle.city_id);
            }
            self.started.retain(|h| h.run_id != handle.run_id);
            debug!(run_id = %handle.run_id, "Evicted finished onboarding run");
        }
    }
}

pub struct OnboardingService {
    db: Arc<dyn Database>,
    orchestrator: Arc<OnboardingOrchestrator>,
    registry: Mutex<Registry>,
    finished_retention: usize,
}

impl OnboardingService {
    pub fn new(db: Arc<dyn Database>, orchestrator: OnboardingOrchestrator) -> Arc<Self> {
        Self::with_finished_retention(db, orchestrator, DEFAULT_FINISHED_RETENTION)
    }

    /// Like `new`, keeping at most `retention` finished runs in memory.
    pub fn with_finished_retention(
        db: Arc<dyn Database>,
        orchestrator: OnboardingOrchestrator,
        retention: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            orchestrator: Arc::new(orchestrator),
            registry: Mutex::new(Registry::default()),
            finished_retention: retention,
        })
    }

    /// Create the run record and spawn the orchestrator.
    ///
    /// Returns once the pending run is persisted, so `get_run` sees it
    /// immediately. Does not guard against a second run for the same city.
    pub async fn start(&self, request: OnboardingRequest) -> Result<RunHandle, OnboardingError> {
        let tracker = ProgressTracker::create(self.db.clone(), request.city_id).await?;
        let handle = RunHandle {
            run_id: tracker.run_id(),
            city_id: request.city_id,
        };

        let mut registry = self.registry.lock().await;
        registry.prune(self.finished_retention);
        registry.trackers.insert(request.city_id, tracker.clone());

        let orchestrator = self.orchestrator.clone();
        let task = tokio::spawn(async move { orchestrator.run(&tracker, &request).await });
        registry.tasks.insert(handle.run_id, task);
        registry.started.push_back(handle);
        drop(registry);

        info!(run_id = %handle.run_id, city_id = %handle.city_id, "Onboarding run spawned");
        Ok(handle)
    }

    /// Wait for a spawned run.
    ///
    /// `None` if the id is unknown, already joined, or evicted past the
    /// finished-run retention.
    pub async fn join(&self, run_id: Uuid) -> Option<RunOutcome> {
        let task = self.registry.lock().await.tasks.remove(&run_id)?;
        match task.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(%run_id, error = %e, "Onboarding task panicked");
                Some(RunOutcome::failed(format!("Onboarding task aborted: {e}")))
            }
        }
    }

    /// The persisted state of the city's latest run.
    pub async fn get_run(&self, city_id: Uuid) -> Result<Option<OnboardingRun>, DatabaseError> {
        self.db.get_onboarding_run(city_id).await
    }

    /// Current snapshot plus a receiver for later ones.
    ///
    /// `None` when no run for the city was started by this process, or it
    /// has been evicted.
    pub async fn subscribe(
        &self,
        city_id: Uuid,
    ) -> Option<(OnboardingRun, broadcast::Receiver<OnboardingRun>)> {
        let tracker = self.registry.lock().await.trackers.get(&city_id).cloned()?;
        Some(tracker.watch().await)
    }

    /// Fail every run a previous process left pending or generating.
    ///
    /// Runs are not resumable; without this they would report progress
    /// forever.
    pub async fn recover_interrupted_runs(&self) -> Result<usize, DatabaseError> {
        let runs = self.db.list_unfinished_onboarding_runs().await?;
        let mut recovered = 0;
        for mut run in runs {
            if let Err(e) = run.fail(INTERRUPTED_ERROR, Utc::now()) {
                warn!(run_id = %run.id, error = %e, "Skipping unrecoverable run");
                continue;
            }
            run.updated_at = Utc::now();
            self.db.save_onboarding_run(&run).await?;
            recovered += 1;
        }
        if recovered > 0 {
            info!(count = recovered, "Marked interrupted onboarding runs as failed");
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::city::model::{City, CityProfile, Coordinates, UnitPreference};
    use crate::config::GenerationConfig;
    use crate::onboarding::state::RunStatus;
    use crate::store::LibSqlBackend;

    async fn setup() -> (Arc<LibSqlBackend>, Arc<OnboardingService>, OnboardingRequest) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let city = City::new(CityProfile {
            name: "Hobart".into(),
            country: "Australia".into(),
            coordinates: Coordinates::new(-42.8821, 147.3272),
            population: 250_000,
            unit_preference: UnitPreference::Metric,
        });
        db.insert_city(&city).await.unwrap();

        // No provider: runs fail fast, which is enough to exercise the plumbing.
        let orchestrator = OnboardingOrchestrator::new(db.clone(), None, GenerationConfig::default());
        let service = OnboardingService::new(db.clone(), orchestrator);
        let request = OnboardingRequest {
            city_id: city.id,
            profile: city.profile,
        };
        (db, service, request)
    }

    #[tokio::test]
    async fn start_then_join() {
        let (_db, service, request) = setup().await;
        let handle = service.start(request).await.unwrap();

        let outcome = service.join(handle.run_id).await.unwrap();
        assert!(!outcome.success);
        assert!(service.join(handle.run_id).await.is_none());

        let run = service.get_run(handle.city_id).await.unwrap().unwrap();
        assert_eq!(run.id, handle.run_id);
        assert_eq!(run.status, RunStatus::Failed);
    }

    async fn another_city(
        db: &LibSqlBackend,
        template: &OnboardingRequest,
        name: &str,
    ) -> OnboardingRequest {
        let city = City::new(CityProfile {
            name: name.into(),
            ..template.profile.clone()
        });
        db.insert_city(&city).await.unwrap();
        OnboardingRequest {
            city_id: city.id,
            profile: city.profile,
        }
    }

    async fn wait_until_finished(service: &OnboardingService, run_id: Uuid) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !service.registry.lock().await.is_finished(&run_id) {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn finished_run_can_be_joined_after_another_starts() {
        let (db, service, request) = setup().await;
        let first = service.start(request.clone()).await.unwrap();
        wait_until_finished(&service, first.run_id).await;

        let launceston = another_city(&db, &request, "Launceston").await;
        let second = service.start(launceston).await.unwrap();

        let outcome = service.join(first.run_id).await.unwrap();
        assert!(!outcome.success);
        assert!(service.join(second.run_id).await.is_some());
    }

    #[tokio::test]
    async fn oldest_finished_runs_are_evicted_past_retention() {
        let (db, _service, template) = setup().await;
        let orchestrator = OnboardingOrchestrator::new(db.clone(), None, GenerationConfig::default());
        let service = OnboardingService::with_finished_retention(db.clone(), orchestrator, 2);

        let mut handles = Vec::new();
        for name in ["Devonport", "Burnie", "Ulverstone"] {
            let request = another_city(&db, &template, name).await;
            let handle = service.start(request).await.unwrap();
            wait_until_finished(&service, handle.run_id).await;
            handles.push(handle);
        }
        // Pruning happens on start: three finished, retention two.
        let latest = service
            .start(another_city(&db, &template, "Queenstown").await)
            .await
            .unwrap();

        assert!(service.subscribe(handles[0].city_id).await.is_none());
        assert!(service.join(handles[0].run_id).await.is_none());
        for handle in &handles[1..] {
            assert!(service.subscribe(handle.city_id).await.is_some());
            assert!(service.join(handle.run_id).await.is_some());
        }
        assert!(service.join(latest.run_id).await.is_some());

        // Evicted runs are still readable from the store.
        let run = service.get_run(handles[0].city_id).await.unwrap().unwrap();
        assert!(run.is_terminal());
    }

    #[tokio::test]
    async fn join_unknown_run_is_none() {
        let (_db, service, _request) = setup().await;
        assert!(service.join(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn subscribe_after_finish_sees_terminal_snapshot() {
        let (_db, service, request) = setup().await;
        let city_id = request.city_id;
        assert!(service.subscribe(city_id).await.is_none());

        let handle = service.start(request).await.unwrap();
        service.join(handle.run_id).await;

        let (snapshot, _rx) = service.subscribe(city_id).await.unwrap();
        assert_eq!(snapshot.id, handle.run_id);
        assert!(snapshot.is_terminal());
    }

    #[tokio::test]
    async fn get_run_for_unknown_city_is_none() {
        let (_db, service, _request) = setup().await;
        assert!(service.get_run(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn interrupted_runs_are_failed_on_recovery() {
        let (db, service, request) = setup().await;
        let mut stale = OnboardingRun::new(request.city_id);
        stale.begin().unwrap();
        stale.set_progress(35).unwrap();
        db.save_onboarding_run(&stale).await.unwrap();

        assert_eq!(service.recover_interrupted_runs().await.unwrap(), 1);
        let run = service.get_run(request.city_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.progress, 35);
        assert_eq!(run.error.as_deref(), Some(INTERRUPTED_ERROR));

        assert_eq!(service.recover_interrupted_runs().await.unwrap(), 0);
    }
}
