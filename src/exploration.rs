//! Depth-first traversal of a [`StateGraph`] with on-the-fly
//! invariant checking and O(depth) path reconstruction.
//!
//! The traversal tree is built out of [`ExplorationNode`]s linked by
//! `Rc` parent pointers: a naive DFS that copies the path and context
//! at every branch costs `O(branching^depth * depth)` memory, while
//! walking parent pointers on demand costs `O(total_expanded_nodes)`
//! to hold the tree and `O(depth)` to reconstruct any one path.

use std::collections::HashSet;
use std::rc::Rc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::context::{ActionResponse, Context};
use crate::error::GraphError;
use crate::state_graph::{ResetState, Severity, StateGraph};

/// A single invariant failing at a single visited node.
#[derive(Debug, Clone)]
pub struct InvariantViolation {
    pub invariant_name: String,
    pub description: String,
    pub severity: Severity,
    pub node_id: String,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The outcome of executing one edge during traversal.
#[derive(Debug, Clone)]
pub struct EdgeResult {
    pub edge_name: String,
    pub success: bool,
    pub response_json: Option<serde_json::Value>,
    pub duration_ms: f64,
    pub error: Option<String>,
    pub violations: Vec<InvariantViolation>,
}

/// The outcome of one DFS path from the root to a terminal
/// exploration node.
#[derive(Debug, Clone)]
pub struct PathResult {
    pub path: Vec<String>,
    pub edges: Vec<String>,
    pub edge_results: Vec<EdgeResult>,
    pub success: bool,
    pub violations: Vec<InvariantViolation>,
}

/// A node in the traversal tree. Holds a parent pointer rather than a
/// copy of its ancestors' data; path, edge list, and context are all
/// reconstructed on demand by walking that pointer chain.
pub struct ExplorationNode {
    state_node_id: String,
    parent: Option<Rc<ExplorationNode>>,
    edge_name: Option<String>,
    response: Option<Box<dyn ActionResponse>>,
    duration_ms: f64,
    error: Option<String>,
    depth: usize,
    violations: std::cell::RefCell<Vec<InvariantViolation>>,
}

impl ExplorationNode {
    fn root(state_node_id: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            state_node_id: state_node_id.into(),
            parent: None,
            edge_name: None,
            response: None,
            duration_ms: 0.0,
            error: None,
            depth: 0,
            violations: std::cell::RefCell::new(Vec::new()),
        })
    }

    fn child(
        parent: &Rc<ExplorationNode>,
        state_node_id: impl Into<String>,
        edge_name: impl Into<String>,
        response: Option<Box<dyn ActionResponse>>,
        duration_ms: f64,
        error: Option<String>,
    ) -> Rc<Self> {
        Rc::new(Self {
            state_node_id: state_node_id.into(),
            depth: parent.depth + 1,
            parent: Some(parent.clone()),
            edge_name: Some(edge_name.into()),
            response,
            duration_ms,
            error,
            violations: std::cell::RefCell::new(Vec::new()),
        })
    }

    pub fn state_node_id(&self) -> &str {
        &self.state_node_id
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Walks parent pointers, collecting ancestors root-first.
    fn lineage(self: &Rc<Self>) -> Vec<Rc<ExplorationNode>> {
        let mut chain = Vec::new();
        let mut current = Some(self.clone());
        while let Some(node) = current {
            current = node.parent.clone();
            chain.push(node);
        }
        chain.reverse();
        chain
    }

    /// Node-id path from the root to this node.
    pub fn path(self: &Rc<Self>) -> Vec<String> {
        self.lineage().iter().map(|n| n.state_node_id.clone()).collect()
    }

    /// Edge names taken from the root to this node.
    pub fn edges(self: &Rc<Self>) -> Vec<String> {
        self.lineage()
            .iter()
            .filter_map(|n| n.edge_name.clone())
            .collect()
    }

    /// Reconstructs the context by walking parent pointers and
    /// accumulating response bindings keyed by edge name.
    pub fn context(self: &Rc<Self>) -> Context {
        let mut ctx = Context::new();
        for node in self.lineage() {
            if let (Some(edge_name), Some(response)) = (&node.edge_name, &node.response) {
                ctx.bind_response(edge_name, response.as_ref());
            }
        }
        ctx
    }

    fn edge_results(self: &Rc<Self>) -> Vec<EdgeResult> {
        self.lineage()
            .into_iter()
            .filter_map(|n| {
                let edge_name = n.edge_name.clone()?;
                Some(EdgeResult {
                    edge_name,
                    success: n.error.is_none(),
                    response_json: n.response.as_ref().and_then(|r| r.json()),
                    duration_ms: n.duration_ms,
                    error: n.error.clone(),
                    violations: n.violations.borrow().clone(),
                })
            })
            .collect()
    }

    fn accumulated_violations(self: &Rc<Self>) -> Vec<InvariantViolation> {
        self.lineage()
            .into_iter()
            .flat_map(|n| n.violations.borrow().clone())
            .collect()
    }

    /// Materializes this node as a terminal [`PathResult`].
    pub fn to_path_result(self: &Rc<Self>) -> PathResult {
        let edge_results = self.edge_results();
        let violations = self.accumulated_violations();
        let success = self.error.is_none() && violations.is_empty();
        PathResult {
            path: self.path(),
            edges: self.edges(),
            edge_results,
            success,
            violations,
        }
    }
}

/// The aggregate of every [`PathResult`] produced by one `explore`
/// call.
#[derive(Debug, Clone)]
pub struct ExplorationResult {
    pub graph_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub paths: Vec<PathResult>,
    pub visited_nodes: HashSet<String>,
    pub executed_edges: HashSet<String>,
    pub violations: Vec<InvariantViolation>,
}

impl ExplorationResult {
    pub fn total_paths(&self) -> usize {
        self.paths.len()
    }

    pub fn successful_paths(&self) -> usize {
        self.paths.iter().filter(|p| p.success).count()
    }

    pub fn failed_paths(&self) -> usize {
        self.paths.iter().filter(|p| !p.success).count()
    }

    pub fn broken_nodes(&self) -> HashSet<String> {
        self.violations.iter().map(|v| v.node_id.clone()).collect()
    }

    pub fn broken_edges(&self) -> HashSet<String> {
        self.paths
            .iter()
            .flat_map(|p| p.edge_results.iter())
            .filter(|r| !r.violations.is_empty())
            .map(|r| r.edge_name.clone())
            .collect()
    }
}

/// Streaming DFS iterator. Memory footprint is `O(depth)` for the
/// working stack plus `O(expanded_nodes)` for the retained tree;
/// exactly one [`PathResult`] is materialized per `next()` call.
pub struct Exploration<'a, C, D> {
    graph: &'a StateGraph<C, D>,
    client: &'a C,
    store: Option<&'a D>,
    max_depth: usize,
    stop_on_violation: bool,
    reset_state: Option<&'a dyn ResetState>,
    stack: Vec<Rc<ExplorationNode>>,
    pending: Vec<PathResult>,
}

impl<'a, C, D> Exploration<'a, C, D> {
    fn new(
        graph: &'a StateGraph<C, D>,
        client: &'a C,
        store: Option<&'a D>,
        max_depth: usize,
        stop_on_violation: bool,
        reset_state: Option<&'a dyn ResetState>,
    ) -> Result<Self, GraphError> {
        let initial = graph.initial().ok_or(GraphError::Uninitialized)?;
        Ok(Self {
            graph,
            client,
            store,
            max_depth,
            stop_on_violation,
            reset_state,
            stack: vec![ExplorationNode::root(initial)],
            pending: Vec::new(),
        })
    }

    fn evaluate_invariants(&self, node: &Rc<ExplorationNode>, context: &mut Context) {
        let mut violations = Vec::new();
        for invariant in self.graph.invariants() {
            let outcome = invariant.check(self.client, self.store, context);
            match outcome {
                Ok(true) => {}
                Ok(false) => violations.push(InvariantViolation {
                    invariant_name: invariant.name().to_string(),
                    description: invariant.description().to_string(),
                    severity: invariant.severity(),
                    node_id: node.state_node_id().to_string(),
                    error_message: None,
                    timestamp: Utc::now(),
                }),
                Err(message) => violations.push(InvariantViolation {
                    invariant_name: invariant.name().to_string(),
                    description: invariant.description().to_string(),
                    severity: invariant.severity(),
                    node_id: node.state_node_id().to_string(),
                    error_message: Some(message),
                    timestamp: Utc::now(),
                }),
            }
        }
        *node.violations.borrow_mut() = violations;
    }
}

impl<'a, C, D> Iterator for Exploration<'a, C, D> {
    type Item = PathResult;

    fn next(&mut self) -> Option<PathResult> {
        loop {
            if let Some(path) = self.pending.pop() {
                return Some(path);
            }
            let node = self.stack.pop()?;

            if node.error.is_some() {
                return Some(node.to_path_result());
            }

            let mut context = node.context();
            self.evaluate_invariants(&node, &mut context);

            let has_violations = !node.violations.borrow().is_empty();
            if has_violations && self.stop_on_violation {
                return Some(node.to_path_result());
            }

            let edges = self.graph.edges_from(node.state_node_id());
            if edges.is_empty() || node.depth() == self.max_depth {
                return Some(node.to_path_result());
            }

            let is_root = node.depth() == 0;
            for edge in edges {
                if is_root {
                    if let Some(reset) = self.reset_state {
                        if let Err(message) = reset.reset() {
                            tracing::warn!(error = %message, "reset_state failed before expanding root edge");
                        }
                    }
                }

                let mut action_context = node.context();
                let start = Instant::now();
                let outcome = edge.run(self.client, &mut action_context);
                let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

                let child = match outcome {
                    Ok(response) => ExplorationNode::child(
                        &node,
                        edge.target().to_string(),
                        edge.name().to_string(),
                        Some(response),
                        duration_ms,
                        None,
                    ),
                    Err(message) => ExplorationNode::child(
                        &node,
                        edge.target().to_string(),
                        edge.name().to_string(),
                        None,
                        duration_ms,
                        Some(message),
                    ),
                };

                if child.error.is_some() {
                    self.pending.push(child.to_path_result());
                } else {
                    self.stack.push(child);
                }
            }
        }
    }
}

/// Streaming entry point: yields one [`PathResult`] per completed
/// DFS path, in visit order.
pub fn explore_iter<'a, C, D>(
    graph: &'a StateGraph<C, D>,
    client: &'a C,
    store: Option<&'a D>,
    max_depth: usize,
    stop_on_violation: bool,
    reset_state: Option<&'a dyn ResetState>,
) -> Result<Exploration<'a, C, D>, GraphError> {
    Exploration::new(graph, client, store, max_depth, stop_on_violation, reset_state)
}

/// Accumulating entry point: drains the streaming iterator into one
/// [`ExplorationResult`].
pub fn explore<C, D>(
    graph: &StateGraph<C, D>,
    client: &C,
    store: Option<&D>,
    max_depth: usize,
    stop_on_violation: bool,
    reset_state: Option<&dyn ResetState>,
) -> Result<ExplorationResult, GraphError> {
    let started_at = Utc::now();
    let iter = explore_iter(graph, client, store, max_depth, stop_on_violation, reset_state)?;

    let mut paths = Vec::new();
    let mut visited_nodes = HashSet::new();
    let mut executed_edges = HashSet::new();
    let mut violations = Vec::new();

    for path in iter {
        visited_nodes.extend(path.path.iter().cloned());
        executed_edges.extend(path.edges.iter().cloned());
        violations.extend(path.violations.iter().cloned());
        paths.push(path);
    }

    tracing::debug!(
        graph = graph.name(),
        paths = paths.len(),
        violations = violations.len(),
        "exploration finished"
    );

    Ok(ExplorationResult {
        graph_name: graph.name().to_string(),
        started_at,
        finished_at: Utc::now(),
        paths,
        visited_nodes,
        executed_edges,
        violations,
    })
}
