//! Onboarding orchestrator: drives one run through the six catalog modules.
//!
//! Modules run strictly in catalog order. Anything that goes wrong inside a
//! module is recorded on that module and the loop moves on; only a missing
//! credential, a failed progress write or a failed finalization fails the run.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::{ModuleSlug, hotspot_prompt, quick_win_prompt};
use crate::city::model::CityProfile;
use crate::config::{API_KEY_ENV, GenerationConfig};
use crate::content::{ContentGenerator, RecordWriter};
use crate::error::{ConfigError, OnboardingError};
use crate::llm::LlmProvider;
use crate::store::Database;

use super::state::Stage;
use super::tracker::ProgressTracker;

const LOCATING_PROGRESS: u8 = 2;
const SETUP_PROGRESS: u8 = 5;
const MODULE_PROGRESS_BUDGET: u8 = 15;
const INSIGHTS_PROGRESS: u8 = 95;

/// Progress at which module `index` starts. `index == 6` is where the last
/// module ends.
pub fn module_start_progress(index: usize) -> u8 {
    let index = u8::try_from(index).unwrap_or(u8::MAX);
    SETUP_PROGRESS.saturating_add(index.saturating_mul(MODULE_PROGRESS_BUDGET))
}

/// Everything a run needs to know about the city.
#[derive(Debug, Clone)]
pub struct OnboardingRequest {
    pub city_id: Uuid,
    pub profile: CityProfile,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Records actually written for a module, kept even if it later fails.
#[derive(Debug, Default)]
struct ModuleTally {
    hotspots: u32,
    quick_wins: u32,
}

pub struct OnboardingOrchestrator {
    db: Arc<dyn Database>,
    generator: Option<ContentGenerator>,
    writer: RecordWriter,
}

impl OnboardingOrchestrator {
    /// `llm` is `None` when no completion credential is configured; every
    /// run then fails up front.
    pub fn new(
        db: Arc<dyn Database>,
        llm: Option<Arc<dyn LlmProvider>>,
        config: GenerationConfig,
    ) -> Self {
        Self {
            writer: RecordWriter::new(db.clone()),
            generator: llm.map(|llm| ContentGenerator::new(llm, config)),
            db,
        }
    }

    /// Execute a run to its terminal state.
    pub async fn run(&self, tracker: &ProgressTracker, request: &OnboardingRequest) -> RunOutcome {
        let city_id = request.city_id;
        let Some(generator) = &self.generator else {
            let message = ConfigError::MissingRequired {
                key: API_KEY_ENV.to_string(),
                hint: "Set it to enable city content generation.".to_string(),
            }
            .to_string();
            error!(%city_id, "Onboarding aborted: {message}");
            self.fail(tracker, &message).await;
            return RunOutcome::failed(message);
        };

        info!(%city_id, city = %request.profile.name, run_id = %tracker.run_id(), "Onboarding started");
        match self.execute(tracker, generator, request).await {
            Ok(()) => {
                info!(%city_id, "Onboarding completed");
                RunOutcome::succeeded()
            }
            Err(e) => {
                let message = e.to_string();
                error!(%city_id, error = %message, "Onboarding failed");
                self.fail(tracker, &message).await;
                RunOutcome::failed(message)
            }
        }
    }

    async fn execute(
        &self,
        tracker: &ProgressTracker,
        generator: &ContentGenerator,
        request: &OnboardingRequest,
    ) -> Result<(), OnboardingError> {
        let city_name = &request.profile.name;
        tracker
            .update(|run| {
                run.begin()?;
                run.set_stage(
                    Stage::Locating,
                    format!("Locating {city_name}"),
                    LOCATING_PROGRESS,
                )
            })
            .await?;

        for (index, slug) in ModuleSlug::ALL.into_iter().enumerate() {
            tracker
                .update(|run| {
                    run.set_stage(
                        Stage::Module(slug),
                        format!("Generating {}", slug.display_name()),
                        module_start_progress(index),
                    )?;
                    run.start_module(slug)
                })
                .await?;

            let mut tally = ModuleTally::default();
            let result = self
                .generate_module(generator, slug, request, &mut tally)
                .await;
            let end = module_start_progress(index + 1);

            match result {
                Ok(()) => {
                    info!(
                        city_id = %request.city_id,
                        module = %slug,
                        hotspots = tally.hotspots,
                        quick_wins = tally.quick_wins,
                        "Module completed"
                    );
                    tracker
                        .update(|run| {
                            run.complete_module(slug, tally.hotspots, tally.quick_wins)?;
                            run.set_progress(end)
                        })
                        .await?;
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(city_id = %request.city_id, module = %slug, error = %message, "Module failed");
                    tracker
                        .update(|run| {
                            run.fail_module(slug, message, tally.hotspots, tally.quick_wins)?;
                            run.set_progress(end)
                        })
                        .await?;
                }
            }
        }

        tracker
            .update(|run| {
                run.set_stage(Stage::Insights, "Computing city insights", INSIGHTS_PROGRESS)
            })
            .await?;
        let stats = self.writer.recompute_city_stats(request.city_id).await?;
        info!(
            city_id = %request.city_id,
            hotspots = stats.total_hotspots,
            quick_wins = stats.total_quick_wins,
            "City stats updated"
        );

        tracker.update(|run| run.complete(Utc::now())).await?;
        Ok(())
    }

    /// One module: catalog lookup, hotspots, then quick wins.
    async fn generate_module(
        &self,
        generator: &ContentGenerator,
        slug: ModuleSlug,
        request: &OnboardingRequest,
        tally: &mut ModuleTally,
    ) -> Result<(), OnboardingError> {
        let module = self
            .db
            .get_module_by_slug(slug.as_str())
            .await?
            .ok_or_else(|| OnboardingError::ModuleNotFound {
                slug: slug.to_string(),
            })?;

        let profile = &request.profile;
        let hotspots = generator
            .generate_hotspots(&hotspot_prompt(slug, profile), profile.coordinates)
            .await?;
        if hotspots.is_empty() {
            warn!(module = %slug, "No usable hotspots in completion");
        }
        let ids = self
            .writer
            .write_hotspots(request.city_id, module.id, hotspots)
            .await?;
        tally.hotspots = count(ids.len());

        let quick_wins = generator
            .generate_quick_wins(&quick_win_prompt(slug, &profile.name, &profile.country))
            .await?;
        if quick_wins.is_empty() {
            warn!(module = %slug, "No usable quick wins in completion");
        }
        let ids = self
            .writer
            .write_quick_wins(request.city_id, module.id, quick_wins)
            .await?;
        tally.quick_wins = count(ids.len());

        Ok(())
    }

    async fn fail(&self, tracker: &ProgressTracker, message: &str) {
        if let Err(e) = tracker.record_failure(message).await {
            warn!(run_id = %tracker.run_id(), error = %e, "Could not persist run failure");
        }
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
