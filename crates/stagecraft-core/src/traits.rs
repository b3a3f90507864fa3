use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::{Result, StructuralError};
use crate::schema::{Schema, TypedValue};
use crate::types::*;

/// LLM client — streaming chat completions.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// Bridges an untrusted, free-text producer into a schema-valid value.
///
/// Implementations either return a value satisfying every required field of
/// `schema`, or a `StructuralError`. Partial objects are never returned.
/// Timeouts and retries are the implementation's concern; callers only see
/// success or failure.
pub trait StructuredInvoker: Send + Sync + 'static {
    fn invoke<'a>(
        &'a self,
        schema: &'a Schema,
        prompt: &'a Prompt,
    ) -> BoxFuture<'a, std::result::Result<TypedValue, StructuralError>>;
}
