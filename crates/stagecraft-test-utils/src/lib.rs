//! Shared test utilities: scripted LLM clients, scripted structured invokers,
//! and plan fixtures.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::{json, Value};

use stagecraft_core::config::ModelConfig;
use stagecraft_core::error::{Result, StagecraftError, StructuralError};
use stagecraft_core::schema::{Schema, TypedValue};
use stagecraft_core::traits::{LlmClient, StructuredInvoker};
use stagecraft_core::types::*;

/// One canned reply from a `ScriptedLlm`.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Stream the text as a single delta.
    Text(String),
    /// Stream a tool call whose arguments arrive in two chunks.
    ToolCall { name: String, arguments: String },
    /// Stream a tool call whose arguments are cut off by the token limit.
    Truncated { name: String, arguments: String },
    /// Stream part of a tool call, then fail mid-stream.
    Interrupted { name: String, arguments: String, error: String },
    /// Stream nothing but a stop marker.
    Empty,
    /// Fail the request before any stream is returned.
    Fail(String),
}

/// A request seen by a scripted client.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// Shared handle to the calls a scripted collaborator received.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    inner: Arc<Mutex<Vec<RecordedCall>>>,
}

impl CallLog {
    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<RecordedCall> {
        self.inner.lock().unwrap().last().cloned()
    }

    fn push(&self, call: RecordedCall) {
        self.inner.lock().unwrap().push(call);
    }
}

/// LLM client replaying a fixed script, one reply per request.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: CallLog,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: CallLog::default(),
        }
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }
}

impl LlmClient for ScriptedLlm {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        self.calls.push(RecordedCall {
            messages,
            tools: tools.to_vec(),
        });
        let reply = self.replies.lock().unwrap().pop_front();

        Box::pin(async move {
            let deltas: Vec<Result<StreamDelta>> = match reply {
                None => {
                    return Err(StagecraftError::LlmRequest("script exhausted".into()));
                }
                Some(ScriptedReply::Fail(msg)) => return Err(StagecraftError::LlmRequest(msg)),
                Some(ScriptedReply::Text(text)) => vec![
                    Ok(StreamDelta::TextDelta(text)),
                    Ok(StreamDelta::Stop(StopReason::EndTurn)),
                ],
                Some(ScriptedReply::ToolCall { name, arguments }) => {
                    let mut deltas = tool_call_deltas(name, &arguments);
                    deltas.push(Ok(StreamDelta::Stop(StopReason::ToolUse)));
                    deltas
                }
                Some(ScriptedReply::Truncated { name, arguments }) => {
                    let mut deltas = tool_call_deltas(name, &arguments);
                    deltas.push(Ok(StreamDelta::Stop(StopReason::MaxTokens)));
                    deltas
                }
                Some(ScriptedReply::Interrupted {
                    name,
                    arguments,
                    error,
                }) => {
                    let mut deltas = tool_call_deltas(name, &arguments);
                    deltas.push(Err(StagecraftError::LlmStream(error)));
                    deltas
                }
                Some(ScriptedReply::Empty) => vec![Ok(StreamDelta::Stop(StopReason::EndTurn))],
            };
            let stream = futures::stream::iter(deltas);
            Ok(Box::pin(stream) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

/// A tool call start followed by its arguments in two chunks.
fn tool_call_deltas(name: String, arguments: &str) -> Vec<Result<StreamDelta>> {
    let mid = arguments.len() / 2;
    let split = (0..=mid).rev().find(|i| arguments.is_char_boundary(*i)).unwrap_or(0);
    vec![
        Ok(StreamDelta::ToolUseStart {
            index: 0,
            id: "call_0".into(),
            name,
        }),
        Ok(StreamDelta::ToolInputDelta {
            index: 0,
            delta: arguments[..split].to_string(),
        }),
        Ok(StreamDelta::ToolInputDelta {
            index: 0,
            delta: arguments[split..].to_string(),
        }),
    ]
}

/// Structured invoker answering by schema name, without any LLM.
///
/// Replies are validated against the requested schema, so a scripted value
/// that does not fit surfaces as a real `SchemaMismatch`.
#[derive(Default)]
pub struct ScriptedInvoker {
    replies: HashMap<String, std::result::Result<Value, StructuralError>>,
    invoked: Arc<Mutex<Vec<(String, Prompt)>>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, schema: impl Into<String>, value: Value) -> Self {
        self.replies.insert(schema.into(), Ok(value));
        self
    }

    pub fn fail(mut self, schema: impl Into<String>, err: StructuralError) -> Self {
        self.replies.insert(schema.into(), Err(err));
        self
    }

    /// Shared handle to `(schema name, prompt)` pairs, in invocation order.
    pub fn invocations(&self) -> Arc<Mutex<Vec<(String, Prompt)>>> {
        Arc::clone(&self.invoked)
    }
}

impl StructuredInvoker for ScriptedInvoker {
    fn invoke<'a>(
        &'a self,
        schema: &'a Schema,
        prompt: &'a Prompt,
    ) -> BoxFuture<'a, std::result::Result<TypedValue, StructuralError>> {
        Box::pin(async move {
            self.invoked
                .lock()
                .unwrap()
                .push((schema.name().to_string(), prompt.clone()));
            match self.replies.get(schema.name()) {
                Some(Ok(value)) => schema.validate(value.clone()),
                Some(Err(err)) => Err(err.clone()),
                None => Err(StructuralError::Transport(format!(
                    "no scripted reply for schema '{}'",
                    schema.name()
                ))),
            }
        })
    }
}

/// A model config pointing nowhere, for clients that never hit the network.
pub fn model_config() -> ModelConfig {
    ModelConfig {
        provider: "openai".into(),
        model_id: "test-model".into(),
        api_key: None,
        base_url: Some("http://127.0.0.1:9/v1/chat/completions".into()),
        max_tokens: 1024,
        temperature: 0.0,
        extra_headers: HashMap::new(),
        retry: None,
    }
}

/// A plan for "create a simple calculator web application".
pub fn calculator_plan() -> Value {
    json!({
        "name": "Simple Calculator",
        "description": "A browser calculator supporting the four basic operations.",
        "techstack": "HTML, CSS, JavaScript",
        "features": ["addition", "subtraction", "multiplication", "division", "clear"],
        "files": [
            {"path": "index.html", "purpose": "Calculator markup and button grid"},
            {"path": "style.css", "purpose": "Layout and button styling"},
            {"path": "script.js", "purpose": "Input handling and arithmetic"}
        ]
    })
}

/// Implementation steps matching `calculator_plan`.
pub fn calculator_task_plan() -> Value {
    json!({
        "implementation_steps": [
            {
                "filepath": "index.html",
                "task_description": "Create the display and a 4x5 button grid; load style.css and script.js."
            },
            {
                "filepath": "style.css",
                "task_description": "Style the grid with CSS grid and highlight operator buttons."
            },
            {
                "filepath": "script.js",
                "task_description": "Wire button clicks to an expression buffer and evaluate on '='."
            }
        ]
    })
}
