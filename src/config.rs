//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

/// Environment variable holding the completion-service credential.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Completion-service connection settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Provider credential. `None` means generation is not configured.
    pub api_key: Option<SecretString>,
    /// Model identifier sent with every request.
    pub model: String,
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    /// Per-request timeout. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: None,
        }
    }
}

impl LlmSettings {
    /// Read completion-service settings from the environment.
    pub fn from_env() -> Self {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(SecretString::from);

        let model =
            std::env::var("CLIMATE_LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let base_url = std::env::var("CLIMATE_LLM_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let request_timeout = std::env::var("CLIMATE_LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Self {
            api_key,
            model,
            base_url,
            request_timeout,
        }
    }
}

/// Sampling parameters per content type.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Hotspots use a higher temperature to vary placement and severity.
    pub hotspot_temperature: f32,
    pub hotspot_max_tokens: u32,
    /// Quick wins stay concrete with a lower temperature.
    pub quick_win_temperature: f32,
    pub quick_win_max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            hotspot_temperature: 0.8,
            hotspot_max_tokens: 4096,
            quick_win_temperature: 0.4,
            quick_win_max_tokens: 2048,
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub llm: LlmSettings,
    pub generation: GenerationConfig,
    /// Path to the libSQL database file.
    pub db_path: String,
    /// HTTP listen port.
    pub http_port: u16,
    /// Skip upserting the module catalog on startup.
    pub skip_module_seed: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            llm: LlmSettings::default(),
            generation: GenerationConfig::default(),
            db_path: "./data/climate-onboarding.db".to_string(),
            http_port: 8080,
            skip_module_seed: false,
        }
    }
}

impl ServiceConfig {
    /// Build configuration from process environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let db_path = std::env::var("CLIMATE_DB_PATH").unwrap_or(defaults.db_path);

        let http_port: u16 = std::env::var("CLIMATE_HTTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.http_port);

        let skip_module_seed = std::env::var("CLIMATE_SKIP_MODULE_SEED")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            llm: LlmSettings::from_env(),
            generation: GenerationConfig::default(),
            db_path,
            http_port,
            skip_module_seed,
        }
    }
}
