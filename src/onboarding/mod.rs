//! City onboarding: the run state machine, its live tracker, the
//! orchestrator that drives generation, and the service and routes on top.

pub mod orchestrator;
pub mod routes;
pub mod service;
pub mod state;
pub mod tracker;

pub use orchestrator::{OnboardingOrchestrator, OnboardingRequest, RunOutcome};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use service::{OnboardingService, RunHandle};
pub use state::{ModuleProgress, ModuleStatus, OnboardingRun, RunStatus, Stage};
pub use tracker::ProgressTracker;
