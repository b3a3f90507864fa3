//! The planner → architect pipeline.
//!
//! The planner turns the user's request into a `Plan`; the architect turns the
//! plan into a `TaskPlan` and carries the plan forward in its result, so the
//! final state holds `user_prompt`, `plan` and `task_plan` with
//! `task_plan.plan` equal to `plan`.

use std::sync::Arc;

use stagecraft_core::config::PipelineConfig;
use stagecraft_core::error::{PipelineError, Result};
use stagecraft_core::schema::Schema;
use stagecraft_core::state::StateContainer;
use stagecraft_core::traits::StructuredInvoker;

use crate::graph::{CompiledGraph, ExecutionResult, StateGraph};
use crate::plan::{Plan, TaskPlan};
use crate::prompts::{ArchitectPrompt, PlannerPrompt};
use crate::stage::StructuredStage;

pub const USER_PROMPT_KEY: &str = "user_prompt";
pub const PLAN_KEY: &str = "plan";
pub const TASK_PLAN_KEY: &str = "task_plan";

pub const PLANNER: &str = "planner";
pub const ARCHITECT: &str = "architect";

/// Build the pipeline with default settings.
pub fn build_pipeline(invoker: Arc<dyn StructuredInvoker>) -> Result<CompiledGraph> {
    build_pipeline_with(invoker, &PipelineConfig::default())
}

/// Build the pipeline. The planner reads `config.seed_key`; both stages share
/// the configured system prompt.
pub fn build_pipeline_with(
    invoker: Arc<dyn StructuredInvoker>,
    config: &PipelineConfig,
) -> Result<CompiledGraph> {
    let plan_schema = Arc::new(Schema::from_type::<Plan>()?);
    let task_plan_schema = Arc::new(Schema::from_type::<TaskPlan>()?);

    let planner = StructuredStage::builder(PLANNER, plan_schema, Arc::clone(&invoker))
        .input(config.seed_key.clone())
        .output(PLAN_KEY)
        .prompt(PlannerPrompt::new(config.seed_key.clone()).with_system(config.system_prompt.clone()))
        .build();

    let architect = StructuredStage::builder(ARCHITECT, task_plan_schema, invoker)
        .input(PLAN_KEY)
        .output(TASK_PLAN_KEY)
        .prompt(ArchitectPrompt::new(PLAN_KEY).with_system(config.system_prompt.clone()))
        .carry(PLAN_KEY, PLAN_KEY)
        .build();

    let graph = StateGraph::new()
        .add_node(PLANNER, planner)?
        .add_node(ARCHITECT, architect)?
        .add_edge(PLANNER, ARCHITECT)?
        .set_entry_point(PLANNER)?
        .compile()?;
    Ok(graph)
}

/// The key the entry stage reads the request from: its first declared input,
/// or `user_prompt` if it declares none.
pub fn seed_key(graph: &CompiledGraph) -> String {
    graph
        .nodes()
        .find(|node| node.name == graph.entry_point())
        .and_then(|node| node.input_keys().first().cloned())
        .unwrap_or_else(|| USER_PROMPT_KEY.to_string())
}

/// Seed the entry stage's input with `user_prompt` and run to completion,
/// returning the final state.
pub async fn run(
    graph: &mut CompiledGraph,
    user_prompt: &str,
) -> std::result::Result<StateContainer, PipelineError> {
    let key = seed_key(graph);
    graph.invoke(StateContainer::seeded(key, user_prompt)).await
}

/// Seed `config.seed_key` and run to completion, keeping per-node results.
pub async fn execute(
    graph: &mut CompiledGraph,
    config: &PipelineConfig,
    user_prompt: &str,
) -> std::result::Result<ExecutionResult, PipelineError> {
    graph
        .execute(StateContainer::seeded(config.seed_key.clone(), user_prompt))
        .await
}
