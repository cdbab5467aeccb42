//! Onboarding run state machine.
//!
//! Run:    Pending → Generating → Completed
//!         Pending → Failed, Generating → Failed
//! Module: Pending → Generating → Completed | Failed
//!
//! The mutators are `pub(super)`: only the tracker and orchestrator in this
//! module change a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::catalog::ModuleSlug;
use crate::error::OnboardingError;

/// Highest progress a run may report before it completes.
pub const MAX_PROGRESS_WHILE_GENERATING: u8 = 99;

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Generating,
    Completed,
    Failed,
}

impl RunStatus {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, target),
            (Pending, Generating) | (Pending, Failed) | (Generating, Completed) | (Generating, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one module within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    #[default]
    Pending,
    Generating,
    Completed,
    Failed,
}

impl ModuleStatus {
    pub fn can_transition_to(&self, target: ModuleStatus) -> bool {
        use ModuleStatus::*;
        matches!(
            (self, target),
            (Pending, Generating) | (Generating, Completed) | (Generating, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// What the run is working on. Serialized as a plain string: a module slug,
/// `"locating"` or `"insights"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Locating,
    Module(ModuleSlug),
    Insights,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locating => "locating",
            Self::Module(slug) => slug.as_str(),
            Self::Insights => "insights",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "locating" => Ok(Self::Locating),
            "insights" => Ok(Self::Insights),
            other => other.parse().map(Self::Module),
        }
    }
}

impl Serialize for Stage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Stage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Per-module progress embedded in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleProgress {
    pub module_slug: ModuleSlug,
    pub status: ModuleStatus,
    pub hotspots_created: u32,
    pub quick_wins_created: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModuleProgress {
    fn pending(module_slug: ModuleSlug) -> Self {
        Self {
            module_slug,
            status: ModuleStatus::Pending,
            hotspots_created: 0,
            quick_wins_created: 0,
            error: None,
        }
    }
}

/// One execution of the onboarding pipeline for a city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingRun {
    pub id: Uuid,
    pub city_id: Uuid,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage_label: Option<String>,
    pub progress: u8,
    pub module_progress: Vec<ModuleProgress>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl OnboardingRun {
    /// A fresh pending run with every catalog module pending.
    pub fn new(city_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            city_id,
            status: RunStatus::Pending,
            current_stage: None,
            current_stage_label: None,
            progress: 0,
            module_progress: ModuleSlug::ALL.into_iter().map(ModuleProgress::pending).collect(),
            started_at: now,
            completed_at: None,
            error: None,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn module(&self, slug: ModuleSlug) -> Option<&ModuleProgress> {
        self.module_progress.iter().find(|m| m.module_slug == slug)
    }

    /// Pending → Generating.
    pub(super) fn begin(&mut self) -> Result<(), OnboardingError> {
        self.transition(RunStatus::Generating)
    }

    /// Move to a new stage. Progress never decreases and stays below 100.
    pub(super) fn set_stage(
        &mut self,
        stage: Stage,
        label: impl Into<String>,
        progress: u8,
    ) -> Result<(), OnboardingError> {
        self.require_generating(stage.as_str())?;
        self.current_stage = Some(stage);
        self.current_stage_label = Some(label.into());
        self.advance_progress(progress);
        Ok(())
    }

    /// Raise progress without changing stage.
    pub(super) fn set_progress(&mut self, progress: u8) -> Result<(), OnboardingError> {
        self.require_generating("progress")?;
        self.advance_progress(progress);
        Ok(())
    }

    pub(super) fn start_module(&mut self, slug: ModuleSlug) -> Result<(), OnboardingError> {
        self.require_generating(slug.as_str())?;
        self.transition_module(slug, ModuleStatus::Generating)?;
        Ok(())
    }

    pub(super) fn complete_module(
        &mut self,
        slug: ModuleSlug,
        hotspots_created: u32,
        quick_wins_created: u32,
    ) -> Result<(), OnboardingError> {
        let module = self.transition_module(slug, ModuleStatus::Completed)?;
        module.hotspots_created = hotspots_created;
        module.quick_wins_created = quick_wins_created;
        Ok(())
    }

    /// Generating → Failed for one module. Counts record what was written
    /// before the failure.
    pub(super) fn fail_module(
        &mut self,
        slug: ModuleSlug,
        error: impl Into<String>,
        hotspots_created: u32,
        quick_wins_created: u32,
    ) -> Result<(), OnboardingError> {
        let module = self.transition_module(slug, ModuleStatus::Failed)?;
        module.error = Some(error.into());
        module.hotspots_created = hotspots_created;
        module.quick_wins_created = quick_wins_created;
        Ok(())
    }

    /// Generating → Completed at 100%.
    pub(super) fn complete(&mut self, now: DateTime<Utc>) -> Result<(), OnboardingError> {
        self.transition(RunStatus::Completed)?;
        self.progress = 100;
        self.current_stage_label = Some("Onboarding complete".to_string());
        self.completed_at = Some(now);
        Ok(())
    }

    /// Pending | Generating → Failed. Progress is left where it was.
    pub(super) fn fail(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), OnboardingError> {
        self.transition(RunStatus::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(now);
        Ok(())
    }

    fn transition(&mut self, target: RunStatus) -> Result<(), OnboardingError> {
        if !self.status.can_transition_to(target) {
            return Err(OnboardingError::InvalidTransition {
                run_id: self.id,
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }
        self.status = target;
        Ok(())
    }

    fn transition_module(
        &mut self,
        slug: ModuleSlug,
        target: ModuleStatus,
    ) -> Result<&mut ModuleProgress, OnboardingError> {
        let run_id = self.id;
        let module = self
            .module_progress
            .iter_mut()
            .find(|m| m.module_slug == slug)
            .ok_or_else(|| OnboardingError::ModuleNotFound {
                slug: slug.to_string(),
            })?;
        if !module.status.can_transition_to(target) {
            return Err(OnboardingError::InvalidTransition {
                run_id,
                from: format!("{slug}:{}", module.status),
                to: format!("{slug}:{target}"),
            });
        }
        module.status = target;
        Ok(module)
    }

    fn require_generating(&self, what: &str) -> Result<(), OnboardingError> {
        if self.status != RunStatus::Generating {
            return Err(OnboardingError::InvalidTransition {
                run_id: self.id,
                from: self.status.to_string(),
                to: what.to_string(),
            });
        }
        Ok(())
    }

    fn advance_progress(&mut self, progress: u8) {
        let capped = progress.min(MAX_PROGRESS_WHILE_GENERATING);
        self.progress = self.progress.max(capped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generating_run() -> OnboardingRun {
        let mut run = OnboardingRun::new(Uuid::new_v4());
        run.begin().unwrap();
        run
    }

    #[test]
    fn valid_run_transitions() {
        use RunStatus::*;
        for (from, to) in [
            (Pending, Generating),
            (Pending, Failed),
            (Generating, Completed),
            (Generating, Failed),
        ] {
            assert!(from.can_transition_to(to), "{from} should transition to {to}");
        }
    }

    #[test]
    fn invalid_run_transitions() {
        use RunStatus::*;
        assert!(!Completed.can_transition_to(Generating));
        assert!(!Failed.can_transition_to(Generating));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Generating.can_transition_to(Generating));
        assert!(!Generating.can_transition_to(Pending));
    }

    #[test]
    fn module_transitions_never_regress() {
        use ModuleStatus::*;
        assert!(Pending.can_transition_to(Generating));
        assert!(Generating.can_transition_to(Completed));
        assert!(Generating.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Generating));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
    }

    #[test]
    fn new_run_has_all_modules_pending() {
        let run = OnboardingRun::new(Uuid::new_v4());
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.progress, 0);
        assert_eq!(run.module_progress.len(), 6);
        assert!(run
            .module_progress
            .iter()
            .all(|m| m.status == ModuleStatus::Pending));
    }

    #[test]
    fn progress_is_monotonic_and_capped() {
        let mut run = generating_run();
        run.set_progress(40).unwrap();
        run.set_progress(20).unwrap();
        assert_eq!(run.progress, 40);
        run.set_stage(Stage::Insights, "x", 150).unwrap();
        assert_eq!(run.progress, MAX_PROGRESS_WHILE_GENERATING);
    }

    #[test]
    fn completion_sets_full_progress() {
        let mut run = generating_run();
        run.complete(Utc::now()).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.progress, 100);
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn completed_run_rejects_further_updates() {
        let mut run = generating_run();
        run.complete(Utc::now()).unwrap();
        assert!(run.begin().is_err());
        assert!(run.set_progress(50).is_err());
        assert!(run.fail("late", Utc::now()).is_err());
        assert!(run.start_module(ModuleSlug::UrbanHeat).is_err());
    }

    #[test]
    fn pending_run_can_fail_directly() {
        let mut run = OnboardingRun::new(Uuid::new_v4());
        run.fail("OPENAI_API_KEY is not configured.", Utc::now())
            .unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.progress, 0);
        assert!(run
            .module_progress
            .iter()
            .all(|m| m.status == ModuleStatus::Pending));
    }

    #[test]
    fn module_lifecycle() {
        let mut run = generating_run();
        run.start_module(ModuleSlug::Biodiversity).unwrap();
        run.complete_module(ModuleSlug::Biodiversity, 5, 0).unwrap();
        let module = run.module(ModuleSlug::Biodiversity).unwrap();
        assert_eq!(module.status, ModuleStatus::Completed);
        assert_eq!(module.hotspots_created, 5);

        assert!(run.start_module(ModuleSlug::Biodiversity).is_err());
        assert!(run.complete_module(ModuleSlug::UrbanHeat, 1, 1).is_err());
    }

    #[test]
    fn failed_module_keeps_run_generating() {
        let mut run = generating_run();
        run.start_module(ModuleSlug::PortEmissions).unwrap();
        run.fail_module(ModuleSlug::PortEmissions, "module not registered", 0, 0)
            .unwrap();
        assert_eq!(run.status, RunStatus::Generating);
        assert_eq!(
            run.module(ModuleSlug::PortEmissions).unwrap().error.as_deref(),
            Some("module not registered")
        );
    }

    #[test]
    fn stage_serializes_as_plain_string() {
        let mut run = generating_run();
        run.set_stage(Stage::Module(ModuleSlug::CoastalPlastic), "Generating Coastal Plastic", 20)
            .unwrap();
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["currentStage"], "coastal-plastic");
        assert_eq!(json["status"], "generating");
        assert_eq!(json["moduleProgress"][0]["moduleSlug"], "urban-heat");

        let parsed: OnboardingRun = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, run);
    }

    #[test]
    fn stage_parse() {
        assert_eq!("locating".parse::<Stage>().unwrap(), Stage::Locating);
        assert_eq!(
            "air-quality".parse::<Stage>().unwrap(),
            Stage::Module(ModuleSlug::AirQuality)
        );
        assert!("lunch".parse::<Stage>().is_err());
    }
}
