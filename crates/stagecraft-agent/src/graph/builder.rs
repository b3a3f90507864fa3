use tracing::{debug, warn};

use stagecraft_core::error::GraphError;

use super::edge::Edge;
use super::executor::CompiledGraph;
use super::node::Node;
use crate::stage::Stage;

/// Assembles a graph of named stages.
///
/// Every method consumes the builder and hands it back only on success, so a
/// misuse leaves nothing half-built to run.
#[derive(Debug, Default)]
pub struct StateGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    entry: Option<String>,
}

impl StateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `stage` under `name`.
    pub fn add_node(
        mut self,
        name: impl Into<String>,
        stage: impl Stage + 'static,
    ) -> Result<Self, GraphError> {
        let name = name.into();
        if self.index_of(&name).is_some() {
            return Err(GraphError::DuplicateNode(name));
        }
        debug!(node_id = %name, stage = %stage.name(), "Registered graph node");
        self.nodes.push(Node::new(name, stage));
        Ok(self)
    }

    /// Connect two registered nodes unconditionally.
    pub fn add_edge(
        self,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Result<Self, GraphError> {
        self.push_edge(Edge::always(from, to))
    }

    /// Connect two registered nodes, traversed only when `expr` holds.
    /// Outgoing edges are tried in the order they were added.
    pub fn add_conditional_edge(
        self,
        from: impl Into<String>,
        to: impl Into<String>,
        expr: impl Into<String>,
    ) -> Result<Self, GraphError> {
        self.push_edge(Edge::conditional(from, to, expr))
    }

    pub fn set_entry_point(mut self, name: impl Into<String>) -> Result<Self, GraphError> {
        let name = name.into();
        if self.index_of(&name).is_none() {
            return Err(GraphError::UnknownNode(name));
        }
        self.entry = Some(name);
        Ok(self)
    }

    /// Freeze the graph. Fails without an entry point or if any cycle exists.
    pub fn compile(self) -> Result<CompiledGraph, GraphError> {
        let entry_name = self.entry.as_deref().ok_or(GraphError::NoEntryPoint)?;
        let entry = self
            .index_of(entry_name)
            .ok_or_else(|| GraphError::UnknownNode(entry_name.to_string()))?;

        let mut links = Vec::with_capacity(self.edges.len());
        for edge in &self.edges {
            let from = self
                .index_of(&edge.from)
                .ok_or_else(|| GraphError::UnknownNode(edge.from.clone()))?;
            let to = self
                .index_of(&edge.to)
                .ok_or_else(|| GraphError::UnknownNode(edge.to.clone()))?;
            links.push((from, to));
        }

        if let Some(node) = find_cycle(self.nodes.len(), &links) {
            return Err(GraphError::CycleDetected(self.nodes[node].name.clone()));
        }

        let reachable = reachable_from(entry, self.nodes.len(), &links);
        for (idx, node) in self.nodes.iter().enumerate() {
            if !reachable[idx] {
                warn!(node_id = %node.name, "Node is unreachable from the entry point");
            }
        }

        Ok(CompiledGraph::new(self.nodes, self.edges, links, entry))
    }

    fn push_edge(mut self, edge: Edge) -> Result<Self, GraphError> {
        for name in [&edge.from, &edge.to] {
            if self.index_of(name).is_none() {
                return Err(GraphError::UnknownNode(name.clone()));
            }
        }
        self.edges.push(edge);
        Ok(self)
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }
}

/// Depth-first search for a back edge. Returns the node that closes a cycle.
fn find_cycle(count: usize, links: &[(usize, usize)]) -> Option<usize> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; count];
    for start in 0..count {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        // (node, next link index to examine)
        let mut stack = vec![(start, 0usize)];
        marks[start] = Mark::InProgress;

        while let Some((node, cursor)) = stack.pop() {
            let next = links[cursor..]
                .iter()
                .position(|(from, _)| *from == node)
                .map(|offset| cursor + offset);

            match next {
                Some(link) => {
                    stack.push((node, link + 1));
                    let target = links[link].1;
                    match marks[target] {
                        Mark::InProgress => return Some(target),
                        Mark::Unvisited => {
                            marks[target] = Mark::InProgress;
                            stack.push((target, 0));
                        }
                        Mark::Done => {}
                    }
                }
                None => marks[node] = Mark::Done,
            }
        }
    }
    None
}

fn reachable_from(entry: usize, count: usize, links: &[(usize, usize)]) -> Vec<bool> {
    let mut seen = vec![false; count];
    let mut queue = vec![entry];
    while let Some(node) = queue.pop() {
        if std::mem::replace(&mut seen[node], true) {
            continue;
        }
        queue.extend(links.iter().filter(|(from, _)| *from == node).map(|(_, to)| *to));
    }
    seen
}
