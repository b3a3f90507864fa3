use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::StreamExt;
use tracing::{debug, warn};

use stagecraft_core::config::ModelConfig;
use stagecraft_core::error::StructuralError;
use stagecraft_core::schema::{Schema, TypedValue};
use stagecraft_core::traits::{LlmClient, StructuredInvoker};
use stagecraft_core::types::{Prompt, StopReason, StreamDelta, ToolDefinition};

use crate::repair::parse_json_output;

/// Structured invoker backed by a chat-completions LLM.
///
/// The schema is offered as the single, forced function the model must call;
/// the call's arguments are the raw output. Models that answer in plain text
/// anyway have their text used instead. Either way the output is repaired,
/// parsed and validated before it is returned.
pub struct LlmInvoker {
    llm: Arc<dyn LlmClient>,
    config: ModelConfig,
    timeout: Option<Duration>,
}

impl LlmInvoker {
    pub fn new(llm: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self {
            llm,
            config,
            timeout: None,
        }
    }

    /// Fail with a transport error if a single invocation takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn raw_output(&self, schema: &Schema, prompt: &Prompt) -> Result<String, StructuralError> {
        let tools = [schema_tool(schema)];
        let mut stream = self
            .llm
            .chat_stream(&self.config, prompt.to_messages(), &tools)
            .await
            .map_err(|e| StructuralError::Transport(e.to_string()))?;

        let mut text = String::new();
        let mut arguments = String::new();
        let mut called: Option<String> = None;
        let mut stop: Option<StopReason> = None;

        while let Some(delta) = stream.next().await {
            match delta.map_err(|e| StructuralError::Transport(e.to_string()))? {
                StreamDelta::TextDelta(t) => text.push_str(&t),
                StreamDelta::ToolUseStart { index: 0, name, .. } => called = Some(name),
                StreamDelta::ToolInputDelta { index: 0, delta } => arguments.push_str(&delta),
                StreamDelta::Usage {
                    input_tokens,
                    output_tokens,
                } => debug!(input_tokens, output_tokens, "LLM usage"),
                StreamDelta::Stop(reason) => stop = Some(reason),
                _ => {}
            }
        }

        // Output cut off at the token limit is never repaired.
        if stop == Some(StopReason::MaxTokens) {
            return Err(StructuralError::Malformed(format!(
                "output truncated at the token limit after {} bytes",
                arguments.len().max(text.len())
            )));
        }

        if let Some(name) = &called {
            if *name != tools[0].name {
                warn!(expected = %tools[0].name, got = %name, "Model called an unexpected function");
            }
        }

        if !arguments.trim().is_empty() {
            Ok(arguments)
        } else if !text.trim().is_empty() {
            Ok(text)
        } else {
            Err(StructuralError::EmptyResponse)
        }
    }

    async fn invoke_inner(&self, schema: &Schema, prompt: &Prompt) -> Result<TypedValue, StructuralError> {
        let raw = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.raw_output(schema, prompt))
                .await
                .map_err(|_| {
                    StructuralError::Transport(format!("timed out after {}s", limit.as_secs_f64()))
                })??,
            None => self.raw_output(schema, prompt).await?,
        };

        debug!(schema = %schema.name(), bytes = raw.len(), "Received raw structured output");
        let value = parse_json_output(&raw)?;
        schema.validate(value)
    }
}

impl StructuredInvoker for LlmInvoker {
    fn invoke<'a>(
        &'a self,
        schema: &'a Schema,
        prompt: &'a Prompt,
    ) -> BoxFuture<'a, Result<TypedValue, StructuralError>> {
        Box::pin(async move {
            let result = self.invoke_inner(schema, prompt).await;
            if let Err(e) = &result {
                warn!(schema = %schema.name(), kind = ?e.kind(), error = %e, "Structured invocation failed");
            }
            result
        })
    }
}

/// The function definition that carries `schema` to the model.
pub fn schema_tool(schema: &Schema) -> ToolDefinition {
    let name: String = schema
        .name()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    let description = schema
        .description()
        .map(str::to_string)
        .unwrap_or_else(|| format!("Return the result as a {} object.", schema.name()));
    ToolDefinition {
        name,
        description,
        input_schema: schema.describe(),
    }
}
