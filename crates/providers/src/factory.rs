//! Backend selection from configuration.

use coact_config::{AppConfig, BackendKind};
use coact_core::backend::Backend;
use coact_core::error::BackendError;

use crate::claude_cli::ClaudeCliBackend;
use crate::openai_compat::OpenAiCompatBackend;

/// Build the configured backend.
///
/// HTTP backends need an API key; its absence is reported here rather than
/// on the first turn.
pub fn build_from_config(config: &AppConfig) -> Result<Box<dyn Backend>, BackendError> {
    match config.backend {
        BackendKind::Openai => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                BackendError::NotConfigured(
                    "no API key: set COACT_API_KEY (or OPENROUTER_API_KEY / OPENAI_API_KEY) \
                     or api_key in ~/.coact/config.toml"
                        .into(),
                )
            })?;
            let base_url = config.effective_api_url();
            let backend = OpenAiCompatBackend::new(
                endpoint_name(base_url),
                base_url,
                api_key,
                config.effective_model(),
            )
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens);
            Ok(Box::new(backend))
        }
        BackendKind::ClaudeCli => Ok(Box::new(ClaudeCliBackend::new(config.effective_model()))),
    }
}

/// Short name for well-known endpoints.
fn endpoint_name(base_url: &str) -> &'static str {
    if base_url.contains("openrouter.ai") {
        "openrouter"
    } else if base_url.contains("api.openai.com") {
        "openai"
    } else if base_url.contains("localhost:11434") {
        "ollama"
    } else {
        "openai-compat"
    }
}
