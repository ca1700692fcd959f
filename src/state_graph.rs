//! A typed graph of application states and the actions that move
//! between them.
//!
//! Internally backed by a `petgraph::stable_graph::StableGraph`, with
//! a `HashMap` layer mapping the author-chosen string node ids onto
//! petgraph's own indices -- the same split this crate uses
//! elsewhere between a stable external identity and an internal
//! index-based store.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::context::{ActionResponse, Context};
use crate::error::GraphError;

/// Severity of an invariant violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// `(client, context) -> response` capability executed for an edge or
/// a node's entry actions.
pub trait Action<C>: Send + Sync {
    fn run(&self, client: &C, context: &mut Context) -> Result<Box<dyn ActionResponse>, String>;
}

impl<C, F> Action<C> for F
where
    F: Fn(&C, &mut Context) -> Result<Box<dyn ActionResponse>, String> + Send + Sync,
{
    fn run(&self, client: &C, context: &mut Context) -> Result<Box<dyn ActionResponse>, String> {
        self(client, context)
    }
}

/// `(client, store, mutable context) -> bool` capability deciding
/// whether a node's state-checker currently matches. Mutable so a
/// composite checker built by the combinatorial builder can inject
/// `"_current_combination"` before delegating to the author's own
/// checker.
pub trait StateChecker<C, D>: Send + Sync {
    fn check(&self, client: &C, store: Option<&D>, context: &mut Context) -> bool;
}

impl<C, D, F> StateChecker<C, D> for F
where
    F: Fn(&C, Option<&D>, &mut Context) -> bool + Send + Sync,
{
    fn check(&self, client: &C, store: Option<&D>, context: &mut Context) -> bool {
        self(client, store, context)
    }
}

/// `(client, store, context) -> bool` capability for an invariant
/// check. `Err` is equivalent to the Python source's "exception
/// raised inside a check", recorded as a violation carrying the
/// message rather than propagated.
pub trait InvariantCheck<C, D>: Send + Sync {
    fn check(&self, client: &C, store: Option<&D>, context: &Context) -> Result<bool, String>;
}

impl<C, D, F> InvariantCheck<C, D> for F
where
    F: Fn(&C, Option<&D>, &Context) -> Result<bool, String> + Send + Sync,
{
    fn check(&self, client: &C, store: Option<&D>, context: &Context) -> Result<bool, String> {
        self(client, store, context)
    }
}

/// `() -> ()` capability invoked before expanding each outgoing edge
/// of the root. Failures are logged and ignored.
pub trait ResetState: Send + Sync {
    fn reset(&self) -> Result<(), String>;
}

impl<F> ResetState for F
where
    F: Fn() -> Result<(), String> + Send + Sync,
{
    fn reset(&self) -> Result<(), String> {
        self()
    }
}

/// A labelled application state.
///
/// Entry actions are reference-counted rather than boxed: the same
/// registered setup action is typically the entry action of many
/// nodes (every node whose combination carries that dimension/value
/// pair), so the combinatorial builder shares one instance instead of
/// cloning closures.
pub struct StateNode<C, D> {
    id: String,
    description: String,
    checker: Option<Box<dyn StateChecker<C, D>>>,
    entry_actions: Vec<Rc<dyn Action<C>>>,
}

impl<C, D> fmt::Debug for StateNode<C, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateNode")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("has_checker", &self.checker.is_some())
            .field("entry_actions", &self.entry_actions.len())
            .finish()
    }
}

impl<C, D> StateNode<C, D> {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            checker: None,
            entry_actions: Vec::new(),
        }
    }

    pub fn with_checker(mut self, checker: Box<dyn StateChecker<C, D>>) -> Self {
        self.checker = Some(checker);
        self
    }

    pub fn with_entry_action(mut self, action: Rc<dyn Action<C>>) -> Self {
        self.entry_actions.push(action);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn entry_actions(&self) -> &[Rc<dyn Action<C>>] {
        &self.entry_actions
    }

    /// A node with no checker always matches. Not invoked by the
    /// exploration engine itself -- it exists for callers (and the
    /// combinatorial builder) that want to ask "is the system under
    /// test currently in this state" independently of a DFS step.
    pub fn matches(&self, client: &C, store: Option<&D>, context: &mut Context) -> bool {
        match &self.checker {
            Some(checker) => checker.check(client, store, context),
            None => true,
        }
    }
}

/// A directed, named transition between two node ids.
pub struct Edge<C> {
    name: String,
    source: String,
    target: String,
    description: String,
    action: Box<dyn Action<C>>,
}

impl<C> fmt::Debug for Edge<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("target", &self.target)
            .finish()
    }
}

impl<C> Edge<C> {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        description: impl Into<String>,
        action: Box<dyn Action<C>>,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            target: target.into(),
            description: description.into(),
            action,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn run(&self, client: &C, context: &mut Context) -> Result<Box<dyn ActionResponse>, String> {
        self.action.run(client, context)
    }
}

/// A named boolean assertion expected to hold at every visited node.
pub struct Invariant<C, D> {
    name: String,
    description: String,
    severity: Severity,
    check: Box<dyn InvariantCheck<C, D>>,
    sql: Option<String>,
}

impl<C, D> fmt::Debug for Invariant<C, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invariant")
            .field("name", &self.name)
            .field("severity", &self.severity)
            .finish()
    }
}

impl<C, D> Invariant<C, D> {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
        check: Box<dyn InvariantCheck<C, D>>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            severity,
            check,
            sql: None,
        }
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    pub fn check(&self, client: &C, store: Option<&D>, context: &Context) -> Result<bool, String> {
        self.check.check(client, store, context)
    }
}

/// A typed graph of states (nodes) and the actions (edges) that
/// transition between them, plus the invariants checked at every
/// visited node.
pub struct StateGraph<C, D> {
    name: String,
    graph: StableGraph<StateNode<C, D>, Edge<C>>,
    index: HashMap<String, NodeIndex>,
    edge_names: HashMap<String, ()>,
    invariants: Vec<Invariant<C, D>>,
    initial: Option<String>,
}

impl<C, D> StateGraph<C, D> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            graph: StableGraph::new(),
            index: HashMap::new(),
            edge_names: HashMap::new(),
            invariants: Vec::new(),
            initial: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_node(&mut self, node: StateNode<C, D>) -> Result<(), GraphError> {
        if self.index.contains_key(node.id()) {
            return Err(GraphError::DuplicateNode { id: node.id().to_string() });
        }
        let id = node.id().to_string();
        let idx = self.graph.add_node(node);
        self.index.insert(id, idx);
        Ok(())
    }

    pub fn add_edge(&mut self, edge: Edge<C>) -> Result<(), GraphError> {
        if self.edge_names.contains_key(edge.name()) {
            return Err(GraphError::DuplicateEdge { name: edge.name().to_string() });
        }
        let source_idx = *self
            .index
            .get(edge.source())
            .ok_or_else(|| GraphError::UnknownNode {
                edge: edge.name().to_string(),
                node: edge.source().to_string(),
            })?;
        let target_idx = *self
            .index
            .get(edge.target())
            .ok_or_else(|| GraphError::UnknownNode {
                edge: edge.name().to_string(),
                node: edge.target().to_string(),
            })?;
        self.edge_names.insert(edge.name().to_string(), ());
        self.graph.add_edge(source_idx, target_idx, edge);
        Ok(())
    }

    pub fn add_invariant(&mut self, invariant: Invariant<C, D>) -> Result<(), GraphError> {
        if self.invariants.iter().any(|i| i.name() == invariant.name()) {
            return Err(GraphError::DuplicateInvariant { name: invariant.name().to_string() });
        }
        self.invariants.push(invariant);
        Ok(())
    }

    pub fn set_initial(&mut self, id: impl Into<String>) -> Result<(), GraphError> {
        let id = id.into();
        if !self.index.contains_key(&id) {
            return Err(GraphError::UnknownInitialNode { id });
        }
        self.initial = Some(id);
        Ok(())
    }

    pub fn initial(&self) -> Option<&str> {
        self.initial.as_deref()
    }

    pub fn node(&self, id: &str) -> Option<&StateNode<C, D>> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    pub fn invariants(&self) -> &[Invariant<C, D>] {
        &self.invariants
    }

    /// Outgoing edges of `id`, in insertion order.
    pub fn edges_from(&self, id: &str) -> Vec<&Edge<C>> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| e.weight())
            .collect();
        edges.reverse(); // petgraph yields most-recently-added first.
        edges
    }

    /// A textual state-diagram: every node with its description, a
    /// pseudo-edge from a synthetic "start" marker to the initial
    /// node, and every edge as `source --> target : name`.
    pub fn to_diagram(&self) -> String {
        let mut lines = Vec::new();
        for id in self.index.keys() {
            let node = self.node(id).expect("id came from this graph's index");
            lines.push(format!("{id} : {}", node.description()));
        }
        lines.sort();
        if let Some(initial) = &self.initial {
            lines.push(format!("start --> {initial}"));
        }
        let mut edge_lines: Vec<String> = self
            .graph
            .edge_weights()
            .map(|e| format!("{} --> {} : {}", e.source(), e.target(), e.name()))
            .collect();
        edge_lines.sort();
        lines.extend(edge_lines);
        lines.join("\n")
    }
}

impl<C, D> fmt::Debug for StateGraph<C, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateGraph")
            .field("name", &self.name)
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .field("initial", &self.initial)
            .finish()
    }
}
