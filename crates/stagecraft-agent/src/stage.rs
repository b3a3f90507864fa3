use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use stagecraft_core::error::StageError;
use stagecraft_core::schema::Schema;
use stagecraft_core::state::{StateContainer, StateUpdate};
use stagecraft_core::traits::StructuredInvoker;

use crate::prompts::{ContextPrompt, PromptBuilder};

/// One unit of work in a graph.
///
/// A stage sees the state by shared reference and describes its writes as a
/// `StateUpdate`; only the engine merges updates into the state.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Keys that must be present before the stage runs.
    fn input_keys(&self) -> &[String];

    /// Keys the stage is allowed to write.
    fn output_keys(&self) -> &[String];

    fn run<'a>(&'a self, state: &'a StateContainer)
        -> BoxFuture<'a, Result<StateUpdate, StageError>>;
}

/// A stage that asks a structured invoker for a value of its schema and
/// writes the result under a single output key.
pub struct StructuredStage {
    name: String,
    schema: Arc<Schema>,
    invoker: Arc<dyn StructuredInvoker>,
    prompt: Box<dyn PromptBuilder>,
    input_keys: Vec<String>,
    output_keys: Vec<String>,
    carries: Vec<(String, String)>,
}

impl StructuredStage {
    pub fn builder(
        name: impl Into<String>,
        schema: impl Into<Arc<Schema>>,
        invoker: Arc<dyn StructuredInvoker>,
    ) -> StructuredStageBuilder {
        StructuredStageBuilder {
            name: name.into(),
            schema: schema.into(),
            invoker,
            prompt: None,
            input_keys: Vec::new(),
            output_key: None,
            carries: Vec::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// `(state key, extension field)` pairs attached to every result.
    pub fn carries(&self) -> &[(String, String)] {
        &self.carries
    }
}

impl Stage for StructuredStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_keys(&self) -> &[String] {
        &self.input_keys
    }

    fn output_keys(&self) -> &[String] {
        &self.output_keys
    }

    fn run<'a>(
        &'a self,
        state: &'a StateContainer,
    ) -> BoxFuture<'a, Result<StateUpdate, StageError>> {
        Box::pin(async move {
            for key in &self.input_keys {
                state.require(key)?;
            }

            let prompt = self.prompt.build(state)?;
            debug!(stage = %self.name, schema = %self.schema.name(), "Invoking structured model");
            let mut result = self.invoker.invoke(&self.schema, &prompt).await?;

            for (state_key, field) in &self.carries {
                let value: Value = state.require(state_key)?.clone();
                result.attach(field.clone(), value)?;
            }

            // `build` always declares exactly one output key.
            Ok(StateUpdate::single(self.output_keys[0].clone(), result.into_value()))
        })
    }
}

pub struct StructuredStageBuilder {
    name: String,
    schema: Arc<Schema>,
    invoker: Arc<dyn StructuredInvoker>,
    prompt: Option<Box<dyn PromptBuilder>>,
    input_keys: Vec<String>,
    output_key: Option<String>,
    carries: Vec<(String, String)>,
}

impl StructuredStageBuilder {
    /// Declare a state key the stage reads.
    pub fn input(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.input_keys.contains(&key) {
            self.input_keys.push(key);
        }
        self
    }

    /// Write the result under `key` instead of the stage name.
    pub fn output(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn prompt(mut self, prompt: impl PromptBuilder + 'static) -> Self {
        self.prompt = Some(Box::new(prompt));
        self
    }

    /// Copy `state_key` from the incoming state into the result's extension
    /// slot under `field`. The key becomes a required input.
    pub fn carry(mut self, state_key: impl Into<String>, field: impl Into<String>) -> Self {
        let state_key = state_key.into();
        self = self.input(state_key.clone());
        self.carries.push((state_key, field.into()));
        self
    }

    pub fn build(self) -> StructuredStage {
        let prompt = self.prompt.unwrap_or_else(|| {
            Box::new(
                ContextPrompt::new(format!("Produce a {} for the context above.", self.schema.name()))
                    .with_inputs(self.input_keys.clone()),
            )
        });
        let output_key = self.output_key.unwrap_or_else(|| self.name.clone());
        StructuredStage {
            name: self.name,
            schema: self.schema,
            invoker: self.invoker,
            prompt,
            input_keys: self.input_keys,
            output_keys: vec![output_key],
            carries: self.carries,
        }
    }
}

/// A stage backed by a plain function. Useful for glue steps that need no model.
pub struct FnStage<F> {
    name: String,
    input_keys: Vec<String>,
    output_keys: Vec<String>,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StateContainer) -> Result<StateUpdate, StageError> + Send + Sync,
{
    pub fn new(
        name: impl Into<String>,
        input_keys: &[&str],
        output_keys: &[&str],
        func: F,
    ) -> Self {
        Self {
            name: name.into(),
            input_keys: input_keys.iter().map(|k| k.to_string()).collect(),
            output_keys: output_keys.iter().map(|k| k.to_string()).collect(),
            func,
        }
    }
}

impl<F> Stage for FnStage<F>
where
    F: Fn(&StateContainer) -> Result<StateUpdate, StageError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn input_keys(&self) -> &[String] {
        &self.input_keys
    }

    fn output_keys(&self) -> &[String] {
        &self.output_keys
    }

    fn run<'a>(
        &'a self,
        state: &'a StateContainer,
    ) -> BoxFuture<'a, Result<StateUpdate, StageError>> {
        let result = (self.func)(state);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stagecraft_core::error::StructuralError;
    use stagecraft_core::schema::FieldType;
    use stagecraft_core::types::Prompt;
    use stagecraft_test_utils::ScriptedInvoker;

    fn summary_schema() -> Schema {
        Schema::builder("Summary")
            .required("headline", FieldType::String)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_structured_stage_writes_output_key() {
        let invoker = Arc::new(ScriptedInvoker::new().reply("Summary", json!({"headline": "hi"})));
        let stage = StructuredStage::builder("summarize", summary_schema(), invoker)
            .input("text")
            .output("summary")
            .build();

        let state = StateContainer::seeded("text", "some text");
        let update = stage.run(&state).await.unwrap();
        assert_eq!(update.get("summary"), Some(&json!({"headline": "hi"})));
        assert_eq!(stage.output_keys(), ["summary".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_input_skips_invoker() {
        let invoker = ScriptedInvoker::new().reply("Summary", json!({"headline": "hi"}));
        let invocations = invoker.invocations();
        let stage = StructuredStage::builder("summarize", summary_schema(), Arc::new(invoker))
            .input("text")
            .build();

        let err = stage.run(&StateContainer::new()).await.unwrap_err();
        assert!(matches!(err, StageError::MissingInput(ref k) if k == "text"));
        assert!(invocations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_carry_attaches_extension() {
        let invoker = Arc::new(ScriptedInvoker::new().reply("Summary", json!({"headline": "hi"})));
        let stage = StructuredStage::builder("summarize", summary_schema(), invoker)
            .input("text")
            .carry("source", "source")
            .build();
        assert_eq!(stage.input_keys(), ["text".to_string(), "source".to_string()]);

        let mut state = StateContainer::seeded("text", "t");
        state.set("source", json!({"url": "https://example.com"}));
        let update = stage.run(&state).await.unwrap();
        assert_eq!(
            update.get("summarize"),
            Some(&json!({"headline": "hi", "source": {"url": "https://example.com"}}))
        );
    }

    #[tokio::test]
    async fn test_carry_over_declared_field_conflicts() {
        let invoker = Arc::new(ScriptedInvoker::new().reply("Summary", json!({"headline": "hi"})));
        let stage = StructuredStage::builder("summarize", summary_schema(), invoker)
            .carry("text", "headline")
            .build();

        let err = stage.run(&StateContainer::seeded("text", "t")).await.unwrap_err();
        assert!(matches!(err, StageError::ExtensionConflict(ref f) if f == "headline"));
    }

    #[tokio::test]
    async fn test_structural_failure_propagates() {
        let invoker = Arc::new(
            ScriptedInvoker::new().fail("Summary", StructuralError::Transport("down".into())),
        );
        let stage = StructuredStage::builder("summarize", summary_schema(), invoker).build();

        let err = stage.run(&StateContainer::new()).await.unwrap_err();
        assert!(matches!(err, StageError::Structural(StructuralError::Transport(_))));
    }

    #[tokio::test]
    async fn test_custom_prompt_builder() {
        let invoker = ScriptedInvoker::new().reply("Summary", json!({"headline": "hi"}));
        let invocations = invoker.invocations();
        let stage = StructuredStage::builder("summarize", summary_schema(), Arc::new(invoker))
            .input("text")
            .prompt(|state: &StateContainer| -> Result<Prompt, StageError> {
                let text = state.get_str("text").unwrap_or_default();
                Ok(Prompt::new(format!("Summarize: {text}")).with_system("Be brief."))
            })
            .build();

        stage.run(&StateContainer::seeded("text", "long story")).await.unwrap();
        let recorded = invocations.lock().unwrap();
        assert_eq!(recorded[0].0, "Summary");
        assert_eq!(recorded[0].1.user, "Summarize: long story");
        assert_eq!(recorded[0].1.system.as_deref(), Some("Be brief."));
    }

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("upper", &["text"], &["upper"], |state| {
            let text = state.require("text")?.as_str().unwrap_or_default().to_uppercase();
            Ok(StateUpdate::single("upper", json!(text)))
        });
        let update = stage.run(&StateContainer::seeded("text", "abc")).await.unwrap();
        assert_eq!(update.get("upper"), Some(&json!("ABC")));
    }
}
