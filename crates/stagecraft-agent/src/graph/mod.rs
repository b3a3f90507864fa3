//! Graph execution engine.
//!
//! A pipeline is a directed, acyclic graph of named stages connected by
//! edges. `StateGraph` assembles and checks the graph; `CompiledGraph` walks
//! it from the entry point, running one stage at a time against a shared
//! `StateContainer` and following the first matching outgoing edge.

pub mod builder;
pub mod edge;
pub mod executor;
pub mod node;

pub use builder::StateGraph;
pub use edge::{Edge, EdgeCondition};
pub use executor::{CompiledGraph, ExecutionResult, NodeResult, RunStatus};
pub use node::Node;
