//! Content generation: one completion call per content type, then sanitize.

use std::sync::Arc;

use tracing::{info, warn};

use crate::catalog::Prompt;
use crate::city::model::Coordinates;
use crate::config::GenerationConfig;
use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider};

use super::model::{HotspotDraft, QuickWinDraft};
use super::sanitize::{sanitize_hotspots, sanitize_quick_wins};

/// Generates hotspot and quick-win drafts through the completion service.
pub struct ContentGenerator {
    llm: Arc<dyn LlmProvider>,
    config: GenerationConfig,
}

impl ContentGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, config: GenerationConfig) -> Self {
        Self { llm, config }
    }

    /// Generate hotspots around `center`.
    ///
    /// Transport failures, non-success statuses and empty completions are
    /// errors. Malformed JSON is not: it yields an empty list.
    pub async fn generate_hotspots(
        &self,
        prompt: &Prompt,
        center: Coordinates,
    ) -> Result<Vec<HotspotDraft>, LlmError> {
        let response = self
            .complete(
                prompt,
                self.config.hotspot_temperature,
                self.config.hotspot_max_tokens,
            )
            .await?;

        let drafts = {
            let mut rng = rand::thread_rng();
            sanitize_hotspots(&response.content, center, &mut rng)
        };

        info!(
            count = drafts.len(),
            output_tokens = response.output_tokens,
            "Generated hotspots"
        );
        Ok(drafts)
    }

    /// Generate quick wins. Same error contract as `generate_hotspots`.
    pub async fn generate_quick_wins(
        &self,
        prompt: &Prompt,
    ) -> Result<Vec<QuickWinDraft>, LlmError> {
        let response = self
            .complete(
                prompt,
                self.config.quick_win_temperature,
                self.config.quick_win_max_tokens,
            )
            .await?;

        let drafts = sanitize_quick_wins(&response.content);
        info!(
            count = drafts.len(),
            output_tokens = response.output_tokens,
            "Generated quick wins"
        );
        Ok(drafts)
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<CompletionResponse, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(prompt.system.clone()),
            ChatMessage::user(prompt.user.clone()),
        ])
        .with_temperature(temperature)
        .with_max_tokens(max_tokens)
        .with_json_response();

        let response = self.llm.complete(request).await?;
        if response.content.trim().is_empty() {
            return Err(LlmError::EmptyCompletion {
                provider: self.llm.model_name().to_string(),
            });
        }
        if response.finish_reason == FinishReason::Length {
            warn!(
                model = self.llm.model_name(),
                max_tokens, "Completion hit the token limit; output may be truncated"
            );
        }
        Ok(response)
    }
}
