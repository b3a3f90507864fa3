//! Prompt builders: how a stage turns the current state into a model request.

use serde_json::Value;

use stagecraft_core::error::StageError;
use stagecraft_core::state::StateContainer;
use stagecraft_core::types::Prompt;

pub trait PromptBuilder: Send + Sync {
    fn build(&self, state: &StateContainer) -> Result<Prompt, StageError>;
}

impl<F> PromptBuilder for F
where
    F: Fn(&StateContainer) -> Result<Prompt, StageError> + Send + Sync,
{
    fn build(&self, state: &StateContainer) -> Result<Prompt, StageError> {
        self(state)
    }
}

/// Render a state value for inclusion in prompt text. Strings are used as-is.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// An instruction preceded by a "Context Data" section listing input keys.
#[derive(Debug, Clone)]
pub struct ContextPrompt {
    instruction: String,
    system: Option<String>,
    input_keys: Vec<String>,
}

impl ContextPrompt {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            system: None,
            input_keys: Vec::new(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_inputs(mut self, keys: Vec<String>) -> Self {
        self.input_keys = keys;
        self
    }
}

impl PromptBuilder for ContextPrompt {
    fn build(&self, state: &StateContainer) -> Result<Prompt, StageError> {
        let mut text = String::new();

        if !self.input_keys.is_empty() {
            text.push_str("## Context Data\n\n");
            for key in &self.input_keys {
                let value = state.require(key)?;
                text.push_str(&format!("**{}**: {}\n", key, render_value(value)));
            }
            text.push_str("\n---\n\n");
        }
        text.push_str(&self.instruction);

        let prompt = Prompt::new(text);
        Ok(match &self.system {
            Some(system) => prompt.with_system(system.clone()),
            None => prompt,
        })
    }
}

/// Instruction for turning a one-line request into a project plan.
pub fn planner_prompt(user_prompt: &str) -> String {
    format!(
        "You are the PLANNER agent. Convert the user prompt into a COMPLETE engineering \
         project plan.\n\n\
         Give the project a short name and a one-paragraph description, pick a tech stack, \
         list the user-facing features, and list every file the project needs with the \
         purpose of each file.\n\n\
         User request:\n{user_prompt}"
    )
}

/// Instruction for breaking a project plan into ordered implementation steps.
pub fn architect_prompt(plan: &str) -> String {
    format!(
        "You are the ARCHITECT agent. Given this project plan, break it down into explicit \
         engineering tasks.\n\n\
         RULES:\n\
         - For each file in the plan, create one or more implementation steps.\n\
         - In each step, name the variables, functions and classes to define, and how they \
           depend on earlier steps.\n\
         - Order the steps so that dependencies are implemented first.\n\
         - Each step must be self-contained but also carry forward the relevant context.\n\n\
         Project Plan:\n{plan}"
    )
}

/// Prompt for the planner stage: reads the user's request from one state key.
#[derive(Debug, Clone)]
pub struct PlannerPrompt {
    input_key: String,
    system: Option<String>,
}

impl PlannerPrompt {
    pub fn new(input_key: impl Into<String>) -> Self {
        Self {
            input_key: input_key.into(),
            system: None,
        }
    }

    pub fn with_system(mut self, system: Option<String>) -> Self {
        self.system = system;
        self
    }
}

impl PromptBuilder for PlannerPrompt {
    fn build(&self, state: &StateContainer) -> Result<Prompt, StageError> {
        let request = render_value(state.require(&self.input_key)?);
        let prompt = Prompt::new(planner_prompt(&request));
        Ok(match &self.system {
            Some(system) => prompt.with_system(system.clone()),
            None => prompt,
        })
    }
}

/// Prompt for the architect stage: reads the plan from one state key.
#[derive(Debug, Clone)]
pub struct ArchitectPrompt {
    input_key: String,
    system: Option<String>,
}

impl ArchitectPrompt {
    pub fn new(input_key: impl Into<String>) -> Self {
        Self {
            input_key: input_key.into(),
            system: None,
        }
    }

    pub fn with_system(mut self, system: Option<String>) -> Self {
        self.system = system;
        self
    }
}

impl PromptBuilder for ArchitectPrompt {
    fn build(&self, state: &StateContainer) -> Result<Prompt, StageError> {
        let plan = render_value(state.require(&self.input_key)?);
        let prompt = Prompt::new(architect_prompt(&plan));
        Ok(match &self.system {
            Some(system) => prompt.with_system(system.clone()),
            None => prompt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_prompt_renders_inputs() {
        let mut state = StateContainer::seeded("topic", "Rust async patterns");
        state.set("style", json!({"tone": "tutorial"}));

        let prompt = ContextPrompt::new("Write an article.")
            .with_inputs(vec!["topic".into(), "style".into()])
            .build(&state)
            .unwrap();
        assert!(prompt.user.starts_with("## Context Data"));
        assert!(prompt.user.contains("**topic**: Rust async patterns"));
        assert!(prompt.user.contains("\"tone\": \"tutorial\""));
        assert!(prompt.user.ends_with("Write an article."));
        assert!(prompt.system.is_none());
    }

    #[test]
    fn test_context_prompt_without_inputs() {
        let prompt = ContextPrompt::new("Do something.")
            .with_system("sys")
            .build(&StateContainer::new())
            .unwrap();
        assert_eq!(prompt.user, "Do something.");
        assert_eq!(prompt.system.as_deref(), Some("sys"));
    }

    #[test]
    fn test_context_prompt_missing_key() {
        let err = ContextPrompt::new("x")
            .with_inputs(vec!["topic".into()])
            .build(&StateContainer::new())
            .unwrap_err();
        assert!(matches!(err, StageError::MissingInput(ref k) if k == "topic"));
    }

    #[test]
    fn test_planner_prompt_includes_request() {
        let state = StateContainer::seeded("user_prompt", "create a simple calculator web application");
        let prompt = PlannerPrompt::new("user_prompt").build(&state).unwrap();
        assert!(prompt.user.contains("PLANNER"));
        assert!(prompt.user.ends_with("create a simple calculator web application"));
    }

    #[test]
    fn test_architect_prompt_includes_plan() {
        let state = StateContainer::seeded("plan", json!({"name": "Calc"}));
        let prompt = ArchitectPrompt::new("plan")
            .with_system(Some("You are precise.".into()))
            .build(&state)
            .unwrap();
        assert!(prompt.user.contains("\"name\": \"Calc\""));
        assert_eq!(prompt.system.as_deref(), Some("You are precise."));
    }
}
