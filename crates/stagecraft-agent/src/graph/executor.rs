use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use stagecraft_core::error::PipelineError;
use stagecraft_core::state::StateContainer;

use super::edge::Edge;
use super::node::Node;

/// Lifecycle of a compiled graph. A graph may be executed again after it
/// completes or fails; each run starts from `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Built,
    Running,
    Completed,
    Failed,
}

/// Result of executing a single node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeResult {
    /// Which node was executed.
    pub node_id: String,
    /// Keys the node's update wrote into the state.
    pub written_keys: Vec<String>,
    /// Execution time in milliseconds.
    pub elapsed_ms: u64,
}

/// Result of executing an entire graph.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    /// The final state with every update merged.
    pub state: StateContainer,
    /// Per-node results in execution order.
    pub node_results: Vec<NodeResult>,
    /// Total execution time in milliseconds.
    pub total_elapsed_ms: u64,
}

/// An immutable, validated graph ready to run.
///
/// Starting from the entry node, the executor checks the node's declared
/// inputs, runs its stage, checks the update only touches declared outputs,
/// merges it, and follows the first outgoing edge whose condition holds.
/// A node with no matching edge ends the run.
pub struct CompiledGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    /// `(from, to)` node indices, parallel to `edges`.
    links: Vec<(usize, usize)>,
    entry: usize,
    status: RunStatus,
}

impl CompiledGraph {
    pub(crate) fn new(
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        links: Vec<(usize, usize)>,
        entry: usize,
    ) -> Self {
        Self {
            nodes,
            edges,
            links,
            entry,
            status: RunStatus::Built,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn entry_point(&self) -> &str {
        &self.nodes[self.entry].name
    }

    /// Nodes in registration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Run the graph over `initial`. On failure the working state is dropped
    /// and only the error is returned.
    pub async fn execute(
        &mut self,
        initial: StateContainer,
    ) -> Result<ExecutionResult, PipelineError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        self.status = RunStatus::Running;
        info!(run_id = %run_id, entry = %self.entry_point(), "Starting graph run");

        match self.walk(&run_id, initial).await {
            Ok((state, node_results)) => {
                self.status = RunStatus::Completed;
                let total_elapsed_ms = start.elapsed().as_millis() as u64;
                info!(
                    run_id = %run_id,
                    nodes = node_results.len(),
                    total_elapsed_ms,
                    "Graph run complete"
                );
                Ok(ExecutionResult {
                    run_id,
                    started_at,
                    state,
                    node_results,
                    total_elapsed_ms,
                })
            }
            Err(e) => {
                self.status = RunStatus::Failed;
                error!(run_id = %run_id, node_id = %e.stage(), error = %e, "Graph run failed");
                Err(e)
            }
        }
    }

    /// Run the graph and return only the final state.
    pub async fn invoke(&mut self, initial: StateContainer) -> Result<StateContainer, PipelineError> {
        Ok(self.execute(initial).await?.state)
    }

    async fn walk(
        &self,
        run_id: &str,
        initial: StateContainer,
    ) -> Result<(StateContainer, Vec<NodeResult>), PipelineError> {
        let mut state = initial;
        let mut node_results = Vec::new();
        let mut current = self.entry;

        loop {
            let node = &self.nodes[current];
            info!(run_id, node_id = %node.name, "Executing graph node");

            if let Some(key) = node.input_keys().iter().find(|k| !state.contains(k.as_str())) {
                return Err(PipelineError::MissingInput {
                    stage: node.name.clone(),
                    key: key.clone(),
                });
            }

            let node_start = Instant::now();
            let update = node
                .stage
                .run(&state)
                .await
                .map_err(|e| PipelineError::from_stage(&node.name, e))?;

            let declared = node.output_keys();
            if let Some(key) = update.keys().find(|k| !declared.iter().any(|d| d == k)) {
                return Err(PipelineError::UndeclaredOutput {
                    stage: node.name.clone(),
                    key: key.to_string(),
                });
            }

            let written_keys: Vec<String> = update.keys().map(str::to_string).collect();
            state.apply(update);
            let elapsed_ms = node_start.elapsed().as_millis() as u64;
            debug!(run_id, node_id = %node.name, ?written_keys, elapsed_ms, "Node execution complete");

            node_results.push(NodeResult {
                node_id: node.name.clone(),
                written_keys,
                elapsed_ms,
            });

            let next = self
                .edges
                .iter()
                .zip(&self.links)
                .filter(|(_, (from, _))| *from == current)
                .find(|(edge, _)| edge.matches(&state))
                .map(|(_, (_, to))| *to);

            match next {
                Some(next) => current = next,
                None => {
                    debug!(run_id, node_id = %node.name, "No matching outgoing edge, graph complete");
                    break;
                }
            }
        }

        Ok((state, node_results))
    }
}

impl fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.nodes)
            .field("edges", &self.edges)
            .field("entry", &self.entry_point())
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;
    use stagecraft_core::error::{StageError, StructuralError};
    use stagecraft_core::state::StateUpdate;

    use crate::graph::StateGraph;
    use crate::stage::FnStage;

    use super::*;

    fn writer(output: &'static str, value: serde_json::Value) -> FnStage<impl Fn(&StateContainer) -> Result<StateUpdate, StageError> + Send + Sync> {
        FnStage::new(output, &[], &[output], move |_: &StateContainer| {
            Ok(StateUpdate::single(output, value.clone()))
        })
    }

    #[tokio::test]
    async fn test_sequential_run_merges_updates() {
        let mut graph = StateGraph::new()
            .add_node("first", writer("a", json!(1)))
            .and_then(|g| {
                g.add_node(
                    "second",
                    FnStage::new("second", &["a"], &["b"], |state: &StateContainer| {
                        let a = state.require("a")?.as_i64().unwrap_or_default();
                        Ok(StateUpdate::single("b", json!(a + 1)))
                    }),
                )
            })
            .and_then(|g| g.add_edge("first", "second"))
            .and_then(|g| g.set_entry_point("first"))
            .and_then(|g| g.compile())
            .unwrap();
        assert_eq!(graph.status(), RunStatus::Built);

        let result = graph
            .execute(StateContainer::seeded("seed", "x"))
            .await
            .unwrap();
        assert_eq!(graph.status(), RunStatus::Completed);
        assert_eq!(result.state.get("seed"), Some(&json!("x")));
        assert_eq!(result.state.get("a"), Some(&json!(1)));
        assert_eq!(result.state.get("b"), Some(&json!(2)));
        let order: Vec<&str> = result.node_results.iter().map(|r| r.node_id.as_str()).collect();
        assert_eq!(order, ["first", "second"]);
        assert_eq!(result.node_results[1].written_keys, ["b"]);
    }

    #[tokio::test]
    async fn test_missing_input_never_runs_stage() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut graph = StateGraph::new()
            .add_node(
                "needs_plan",
                FnStage::new("needs_plan", &["plan"], &["out"], move |_: &StateContainer| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(StateUpdate::single("out", json!(null)))
                }),
            )
            .and_then(|g| g.set_entry_point("needs_plan"))
            .and_then(|g| g.compile())
            .unwrap();

        let err = graph.execute(StateContainer::new()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingInput { ref stage, ref key } if stage == "needs_plan" && key == "plan"
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(graph.status(), RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_undeclared_output_rejected() {
        let mut graph = StateGraph::new()
            .add_node(
                "sneaky",
                FnStage::new("sneaky", &[], &["allowed"], |_: &StateContainer| {
                    Ok(StateUpdate::single("allowed", json!(1)).with("other", json!(2)))
                }),
            )
            .and_then(|g| g.set_entry_point("sneaky"))
            .and_then(|g| g.compile())
            .unwrap();

        let err = graph.invoke(StateContainer::new()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UndeclaredOutput { ref key, .. } if key == "other"
        ));
    }

    #[tokio::test]
    async fn test_stage_failure_halts_run() {
        let downstream = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&downstream);
        let mut graph = StateGraph::new()
            .add_node(
                "flaky",
                FnStage::new("flaky", &[], &["x"], |_: &StateContainer| {
                    Err(StageError::Structural(StructuralError::Malformed("not json".into())))
                }),
            )
            .and_then(|g| {
                g.add_node(
                    "after",
                    FnStage::new("after", &[], &["y"], move |_: &StateContainer| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(StateUpdate::new())
                    }),
                )
            })
            .and_then(|g| g.add_edge("flaky", "after"))
            .and_then(|g| g.set_entry_point("flaky"))
            .and_then(|g| g.compile())
            .unwrap();

        let err = graph.execute(StateContainer::new()).await.unwrap_err();
        match err {
            PipelineError::StageFailure { stage, cause } => {
                assert_eq!(stage, "flaky");
                assert!(matches!(cause, StructuralError::Malformed(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(downstream.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_first_matching_edge_wins() {
        let build = || {
            StateGraph::new()
                .add_node("route", FnStage::new("route", &["kind"], &[], |_: &StateContainer| Ok(StateUpdate::new())))
                .and_then(|g| g.add_node("web", writer("web", json!(true))))
                .and_then(|g| g.add_node("cli", writer("cli", json!(true))))
                .and_then(|g| g.add_conditional_edge("route", "web", r#"kind == "web""#))
                .and_then(|g| g.add_edge("route", "cli"))
                .and_then(|g| g.set_entry_point("route"))
                .and_then(|g| g.compile())
                .unwrap()
        };

        let mut graph = build();
        let state = graph.invoke(StateContainer::seeded("kind", "web")).await.unwrap();
        assert!(state.contains("web"));
        assert!(!state.contains("cli"));

        let state = graph.invoke(StateContainer::seeded("kind", "cli")).await.unwrap();
        assert!(state.contains("cli"));
        assert!(!state.contains("web"));
    }

    #[tokio::test]
    async fn test_runs_get_distinct_ids() {
        let mut graph = StateGraph::new()
            .add_node("only", writer("a", json!(1)))
            .and_then(|g| g.set_entry_point("only"))
            .and_then(|g| g.compile())
            .unwrap();

        let first = graph.execute(StateContainer::new()).await.unwrap();
        let second = graph.execute(StateContainer::new()).await.unwrap();
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(first.state, second.state);
    }
}
