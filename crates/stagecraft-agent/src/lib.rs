pub mod graph;
pub mod pipeline;
pub mod plan;
pub mod prompts;
pub mod stage;

pub use graph::{CompiledGraph, Edge, EdgeCondition, ExecutionResult, NodeResult, RunStatus, StateGraph};
pub use plan::{File, ImplementationTask, Plan, TaskPlan};
pub use prompts::{ContextPrompt, PromptBuilder};
pub use stage::{FnStage, Stage, StructuredStage};
