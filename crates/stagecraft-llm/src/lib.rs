pub mod providers;
pub mod repair;
pub mod retry;
pub mod streaming;
pub mod structured;

use std::sync::Arc;

use stagecraft_core::config::{ModelConfig, RetryConfig};
use stagecraft_core::traits::LlmClient;

pub use providers::presets;
pub use providers::OpenAiClient;
pub use retry::RetryingClient;
pub use structured::LlmInvoker;

/// Create an LLM client for a model config. Every supported provider speaks
/// the OpenAI-compatible protocol; presets only change URL and headers.
pub fn create_client(config: &ModelConfig) -> Box<dyn LlmClient> {
    tracing::debug!(provider = %config.provider, model = %config.model_id, "Creating LLM client");
    Box::new(OpenAiClient::new())
}

/// Build the client chain for a primary model plus fallbacks: retries and
/// fallbacks are only layered on when configured.
pub fn build_client(primary: &ModelConfig, fallbacks: &[ModelConfig]) -> Arc<dyn LlmClient> {
    let client = create_client(primary);
    if fallbacks.is_empty() && primary.retry.is_none() {
        return Arc::from(client);
    }

    let retry_config = primary.retry.clone().unwrap_or_else(RetryConfig::default);
    let fallbacks = fallbacks
        .iter()
        .map(|mc| {
            let resolved = presets::resolve(mc);
            let client = create_client(&resolved);
            (resolved, client)
        })
        .collect();
    Arc::new(RetryingClient::new(client, fallbacks, retry_config))
}
