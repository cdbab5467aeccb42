//! LLM integration.
//!
//! The onboarding pipeline talks to the completion service only through the
//! `LlmProvider` trait. `OpenAiProvider` is the production implementation; it
//! speaks the OpenAI chat-completions wire format over reqwest, so any
//! compatible gateway works by pointing `base_url` at it.

pub mod openai;
pub mod provider;

pub use openai::OpenAiProvider;
pub use provider::*;

use std::sync::Arc;

use crate::config::LlmSettings;
use crate::error::LlmError;

/// Create an LLM provider from settings.
///
/// Returns `Ok(None)` when no credential is configured; the orchestrator turns
/// that into a failed run instead of refusing to start.
pub fn create_provider(settings: &LlmSettings) -> Result<Option<Arc<dyn LlmProvider>>, LlmError> {
    let Some(api_key) = settings.api_key.clone() else {
        tracing::warn!("No completion-service credential configured; onboarding runs will fail");
        return Ok(None);
    };

    let provider = OpenAiProvider::new(
        api_key,
        &settings.model,
        &settings.base_url,
        settings.request_timeout,
    )?;
    tracing::info!("Using OpenAI-compatible provider (model: {})", settings.model);
    Ok(Some(Arc::new(provider)))
}
