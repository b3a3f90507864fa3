use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::{info, warn};

use stagecraft_core::config::{ModelConfig, RetryConfig};
use stagecraft_core::error::{Result, StagecraftError};
use stagecraft_core::traits::LlmClient;
use stagecraft_core::types::*;

/// What to do after a request to one model failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Pause, then send the same request to the same model again.
    Retry,
    /// Give up on this model and move to the next one.
    NextModel,
}

/// Classify a failed request. HTTP failures are judged by status code,
/// other transport failures by their message.
pub fn classify(err: &StagecraftError) -> Disposition {
    match err {
        StagecraftError::LlmStream(_) => Disposition::Retry,
        StagecraftError::LlmRequest(msg) => match http_status(msg) {
            Some(status) if is_transient_status(status) => Disposition::Retry,
            Some(_) => Disposition::NextModel,
            None if is_network_failure(msg) => Disposition::Retry,
            None => Disposition::NextModel,
        },
        _ => Disposition::NextModel,
    }
}

/// Status code of a message shaped like `HTTP 503 Service Unavailable: ...`.
fn http_status(msg: &str) -> Option<u16> {
    let rest = msg.trim_start().strip_prefix("HTTP")?.trim_start();
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.len() != 3 {
        return None;
    }
    digits.parse().ok()
}

fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 425 | 429) || ((500..600).contains(&status) && status != 501)
}

fn is_network_failure(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    ["error sending request", "connection", "timed out", "timeout", "dns"]
        .iter()
        .any(|needle| msg.contains(needle))
}

/// Delay before retry number `retry` (0-based): capped exponential growth,
/// drawn uniformly from the upper half so concurrent callers spread out.
pub fn backoff_delay(config: &RetryConfig, retry: u32) -> Duration {
    let ceiling = 1u64
        .checked_shl(retry)
        .map_or(u64::MAX, |factor| config.initial_backoff_ms.saturating_mul(factor))
        .min(config.max_backoff_ms);
    let half = ceiling / 2;
    let spread = ((ceiling - half) as f64 * rand::random::<f64>()) as u64;
    Duration::from_millis(half + spread)
}

/// An LLM client that retries transient failures and then moves through a
/// list of fallback models.
///
/// Every model, fallbacks included, gets `max_retries` retries for transient
/// failures. A permanent failure (bad key, unknown model) skips straight to
/// the next model. Once a stream is handed out nothing is retried; mid-stream
/// failures reach the caller. This is the only place retries happen.
pub struct RetryingClient {
    primary: Box<dyn LlmClient>,
    fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Box<dyn LlmClient>,
        fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }

    /// Open a stream on one model, retrying while failures stay transient.
    async fn open<'a>(
        &'a self,
        client: &'a dyn LlmClient,
        config: &ModelConfig,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<BoxStream<'a, Result<StreamDelta>>> {
        let max_retries = self.retry_config.max_retries;
        let mut retries = 0;
        loop {
            let err = match client.chat_stream(config, messages.to_vec(), tools).await {
                Ok(stream) => return Ok(stream),
                Err(err) => err,
            };
            if classify(&err) == Disposition::NextModel || retries >= max_retries {
                return Err(err);
            }

            let delay = backoff_delay(&self.retry_config, retries);
            retries += 1;
            warn!(
                model = %config.model_id,
                retry = retries,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient LLM failure"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl LlmClient for RetryingClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let mut last_err = match self.open(self.primary.as_ref(), &config, &messages, &tools).await {
                Ok(stream) => return Ok(stream),
                Err(err) => err,
            };
            let mut failed = config.model_id.clone();

            for (fb_config, fb_client) in &self.fallbacks {
                warn!(
                    failed = %failed,
                    next = %fb_config.model_id,
                    provider = %fb_config.provider,
                    error = %last_err,
                    "Switching to fallback model"
                );
                match self.open(fb_client.as_ref(), fb_config, &messages, &tools).await {
                    Ok(stream) => {
                        info!(model = %fb_config.model_id, "Fallback model accepted the request");
                        return Ok(stream);
                    }
                    Err(err) => {
                        last_err = err;
                        failed = fb_config.model_id.clone();
                    }
                }
            }

            Err(last_err)
        })
    }
}
