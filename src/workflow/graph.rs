//! Workflow graph: nodes, edge conditions, the builder and the compiled graph.
//!
//! Graphs are assembled with [`WorkflowBuilder`] and validated once by
//! [`WorkflowBuilder::compile`]. The resulting [`CompiledWorkflow`] is
//! immutable and cheap to clone, so the same graph can back many concurrent
//! runs or be inlined into other graphs as a subgraph.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use super::errors::{NodeError, WorkflowError};
use super::state::{StatePatch, WorkflowState};

/// Terminal sentinel: an edge to `END` finishes the run.
pub const END: &str = "__end__";

/// Separator between a subgraph's name and its inlined node names.
pub const SUBGRAPH_SEPARATOR: char = '/';

// ─── Nodes ──────────────────────────────────────────────────────────────────

/// One unit of work. Reads the state, returns a patch.
#[async_trait]
pub trait WorkflowNode: Send + Sync {
    async fn execute(&self, state: &WorkflowState) -> Result<StatePatch, NodeError>;
}

/// Adapts a closure into a [`WorkflowNode`].
///
/// The closure receives a snapshot of the state so its future can be `'static`.
pub struct FnNode<F> {
    f: F,
}

#[async_trait]
impl<F> WorkflowNode for FnNode<F>
where
    F: Fn(WorkflowState) -> BoxFuture<'static, Result<StatePatch, NodeError>> + Send + Sync,
{
    async fn execute(&self, state: &WorkflowState) -> Result<StatePatch, NodeError> {
        (self.f)(state.clone()).await
    }
}

/// Build an `Arc<dyn WorkflowNode>` from an async closure.
pub fn node_fn<F, Fut>(f: F) -> Arc<dyn WorkflowNode>
where
    F: Fn(WorkflowState) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StatePatch, NodeError>> + Send + 'static,
{
    Arc::new(FnNode {
        f: move |state| -> BoxFuture<'static, Result<StatePatch, NodeError>> { Box::pin(f(state)) },
    })
}

// ─── Edge Conditions ────────────────────────────────────────────────────────

/// Custom edge predicate. Must be pure: same state, same answer.
pub trait EdgePredicate: Send + Sync {
    fn evaluate(&self, state: &WorkflowState) -> bool;

    fn describe(&self) -> String {
        "custom".to_string()
    }
}

impl<F> EdgePredicate for F
where
    F: Fn(&WorkflowState) -> bool + Send + Sync,
{
    fn evaluate(&self, state: &WorkflowState) -> bool {
        self(state)
    }
}

/// Data-described transition condition.
#[derive(Clone)]
pub enum EdgeCondition {
    Always,
    /// A step output with this key exists.
    KeyExists(String),
    /// A step output equals the given value.
    KeyEquals(String, Value),
    /// A step output exists and is not null/false/0/""/[]/{}.
    KeyTruthy(String),
    /// `state.error` is set.
    HasError,
    /// The node's recorded confidence is at least `min`.
    ConfidenceAtLeast { node: String, min: f32 },
    Not(Box<EdgeCondition>),
    All(Vec<EdgeCondition>),
    Any(Vec<EdgeCondition>),
    Custom(Arc<dyn EdgePredicate>),
}

impl EdgeCondition {
    pub fn custom<P: EdgePredicate + 'static>(predicate: P) -> Self {
        EdgeCondition::Custom(Arc::new(predicate))
    }

    pub fn key_equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        EdgeCondition::KeyEquals(key.into(), value.into())
    }

    pub fn evaluate(&self, state: &WorkflowState) -> bool {
        match self {
            EdgeCondition::Always => true,
            EdgeCondition::KeyExists(key) => state.contains(key),
            EdgeCondition::KeyEquals(key, expected) => state.get(key) == Some(expected),
            EdgeCondition::KeyTruthy(key) => state.get(key).is_some_and(is_truthy),
            EdgeCondition::HasError => state.error.is_some(),
            EdgeCondition::ConfidenceAtLeast { node, min } => {
                state.confidence(node).is_some_and(|c| c >= *min)
            }
            EdgeCondition::Not(inner) => !inner.evaluate(state),
            EdgeCondition::All(all) => all.iter().all(|c| c.evaluate(state)),
            EdgeCondition::Any(any) => any.iter().any(|c| c.evaluate(state)),
            EdgeCondition::Custom(p) => p.evaluate(state),
        }
    }

    /// `self AND other`, flattening `Always`.
    fn and(self, other: EdgeCondition) -> EdgeCondition {
        match (self, other) {
            (EdgeCondition::Always, c) | (c, EdgeCondition::Always) => c,
            (a, b) => EdgeCondition::All(vec![a, b]),
        }
    }
}

impl std::fmt::Debug for EdgeCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeCondition::Always => write!(f, "Always"),
            EdgeCondition::KeyExists(k) => write!(f, "KeyExists({k})"),
            EdgeCondition::KeyEquals(k, v) => write!(f, "KeyEquals({k}, {v})"),
            EdgeCondition::KeyTruthy(k) => write!(f, "KeyTruthy({k})"),
            EdgeCondition::HasError => write!(f, "HasError"),
            EdgeCondition::ConfidenceAtLeast { node, min } => {
                write!(f, "ConfidenceAtLeast({node}, {min})")
            }
            EdgeCondition::Not(inner) => write!(f, "Not({inner:?})"),
            EdgeCondition::All(all) => f.debug_tuple("All").field(all).finish(),
            EdgeCondition::Any(any) => f.debug_tuple("Any").field(any).finish(),
            EdgeCondition::Custom(p) => write!(f, "Custom({})", p.describe()),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// A transition between two nodes.
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub condition: EdgeCondition,
}

// ─── Builder ────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct NodeEntry {
    node: Arc<dyn WorkflowNode>,
    /// Keys the node may write; `None` means unrestricted.
    outputs: Option<BTreeSet<String>>,
    error_handler: Option<String>,
}

/// Inlined subgraph awaiting edge rewiring at compile time.
struct SubgraphLink {
    name: String,
    entry: String,
    /// Inner transitions that left the subgraph (`from`, condition).
    exits: Vec<(String, EdgeCondition)>,
}

/// Assembles a workflow graph. Validation is deferred to [`compile`](Self::compile).
pub struct WorkflowBuilder {
    name: String,
    nodes: Vec<(String, NodeEntry)>,
    edges: Vec<Edge>,
    entry: Option<String>,
    error_handler: Option<String>,
    subgraphs: Vec<SubgraphLink>,
    problems: Vec<String>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            entry: None,
            error_handler: None,
            subgraphs: Vec::new(),
            problems: Vec::new(),
        }
    }

    fn name_taken(&self, name: &str) -> bool {
        self.nodes.iter().any(|(n, _)| n == name) || self.subgraphs.iter().any(|s| s.name == name)
    }

    fn push_node(&mut self, name: String, entry: NodeEntry) {
        if name == END {
            self.problems.push(format!("'{END}' is reserved"));
        } else if self.name_taken(&name) {
            self.problems.push(format!("duplicate node '{name}'"));
        } else {
            self.nodes.push((name, entry));
        }
    }

    pub fn add_node(mut self, name: impl Into<String>, node: Arc<dyn WorkflowNode>) -> Self {
        self.push_node(
            name.into(),
            NodeEntry {
                node,
                outputs: None,
                error_handler: None,
            },
        );
        self
    }

    /// Add a node that may only write the listed keys.
    pub fn add_node_with_outputs<I, S>(
        mut self,
        name: impl Into<String>,
        node: Arc<dyn WorkflowNode>,
        outputs: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_node(
            name.into(),
            NodeEntry {
                node,
                outputs: Some(outputs.into_iter().map(Into::into).collect()),
                error_handler: None,
            },
        );
        self
    }

    /// Unconditional edge.
    pub fn add_edge(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.add_conditional_edge(from, to, EdgeCondition::Always)
    }

    /// Conditional edge. Edges out of a node are tried in declaration order.
    pub fn add_conditional_edge(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: EdgeCondition,
    ) -> Self {
        self.edges.push(Edge {
            from: from.into(),
            to: to.into(),
            condition,
        });
        self
    }

    pub fn set_entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    /// Graph-wide error handler.
    pub fn set_error_handler(mut self, name: impl Into<String>) -> Self {
        self.error_handler = Some(name.into());
        self
    }

    /// Per-node error handler; overrides the graph-wide one for `node`.
    pub fn on_error(mut self, node: impl Into<String>, handler: impl Into<String>) -> Self {
        let node = node.into();
        match self.nodes.iter_mut().find(|(n, _)| *n == node) {
            Some((_, entry)) => entry.error_handler = Some(handler.into()),
            None => self
                .problems
                .push(format!("on_error for unknown node '{node}'")),
        }
        self
    }

    /// Inline a compiled graph under `name`.
    ///
    /// Its nodes become `name/<node>`; edges to `name` enter the subgraph and
    /// edges declared out of `name` are taken when the subgraph finishes.
    pub fn add_subgraph(mut self, name: impl Into<String>, graph: &CompiledWorkflow) -> Self {
        let name = name.into();
        if name == END || self.name_taken(&name) {
            self.problems.push(format!("duplicate node '{name}'"));
            return self;
        }

        let prefixed = |node: &str| format!("{name}{SUBGRAPH_SEPARATOR}{node}");
        let inner = &graph.inner;
        let mut exits = Vec::new();

        for node_name in &inner.order {
            let Some(entry) = inner.nodes.get(node_name) else {
                continue;
            };
            let handler = entry
                .error_handler
                .as_ref()
                .or(inner.error_handler.as_ref())
                .filter(|h| *h != node_name)
                .map(|h| prefixed(h.as_str()));
            self.nodes.push((
                prefixed(node_name),
                NodeEntry {
                    node: Arc::clone(&entry.node),
                    outputs: entry.outputs.clone(),
                    error_handler: handler,
                },
            ));

            let out = inner.edges.get(node_name).map(Vec::as_slice).unwrap_or(&[]);
            if out.is_empty() {
                exits.push((prefixed(node_name), EdgeCondition::Always));
            }
            for edge in out {
                if edge.to == END {
                    exits.push((prefixed(node_name), edge.condition.clone()));
                } else {
                    self.edges.push(Edge {
                        from: prefixed(node_name),
                        to: prefixed(&edge.to),
                        condition: edge.condition.clone(),
                    });
                }
            }
        }

        self.subgraphs.push(SubgraphLink {
            entry: prefixed(&inner.entry),
            name,
            exits,
        });
        self
    }

    /// Validate and freeze the graph.
    pub fn compile(self) -> Result<CompiledWorkflow, WorkflowError> {
        let malformed = |reason: String| WorkflowError::MalformedGraph { reason };

        if let Some(problem) = self.problems.first() {
            return Err(malformed(problem.clone()));
        }
        if self.nodes.is_empty() {
            return Err(malformed("workflow has no nodes".into()));
        }

        let subgraph_entries: HashMap<&str, &str> = self
            .subgraphs
            .iter()
            .map(|s| (s.name.as_str(), s.entry.as_str()))
            .collect();
        let resolve = |target: &str| -> String {
            subgraph_entries
                .get(target)
                .map(|e| e.to_string())
                .unwrap_or_else(|| target.to_string())
        };

        // Edges declared out of a subgraph placeholder become its exits' edges.
        let (subgraph_out, mut edges): (Vec<Edge>, Vec<Edge>) = self
            .edges
            .into_iter()
            .partition(|e| subgraph_entries.contains_key(e.from.as_str()));

        for link in &self.subgraphs {
            let outs: Vec<&Edge> = subgraph_out.iter().filter(|e| e.from == link.name).collect();
            for (from, exit_condition) in &link.exits {
                if outs.is_empty() {
                    edges.push(Edge {
                        from: from.clone(),
                        to: END.to_string(),
                        condition: exit_condition.clone(),
                    });
                }
                for out in &outs {
                    edges.push(Edge {
                        from: from.clone(),
                        to: out.to.clone(),
                        condition: exit_condition.clone().and(out.condition.clone()),
                    });
                }
            }
        }

        let names: HashSet<String> = self.nodes.iter().map(|(n, _)| n.clone()).collect();
        let check = |what: &str, target: &str| -> Result<(), WorkflowError> {
            if target == END || names.contains(target) {
                Ok(())
            } else {
                Err(malformed(format!("{what} references unknown node '{target}'")))
            }
        };

        let mut by_source: HashMap<String, Vec<Edge>> = HashMap::new();
        for mut edge in edges {
            edge.to = resolve(&edge.to);
            if edge.from == END {
                return Err(malformed(format!("edge cannot start at '{END}'")));
            }
            check("edge source", &edge.from)?;
            check(&format!("edge from '{}'", edge.from), &edge.to)?;
            by_source.entry(edge.from.clone()).or_default().push(edge);
        }

        let entry = self
            .entry
            .as_deref()
            .map(resolve)
            .ok_or_else(|| malformed("entry node not set".into()))?;
        if entry == END || !names.contains(entry.as_str()) {
            return Err(malformed(format!("entry references unknown node '{entry}'")));
        }

        let error_handler = self.error_handler.as_deref().map(resolve);
        if let Some(handler) = &error_handler {
            if handler == END || !names.contains(handler.as_str()) {
                return Err(malformed(format!("error handler references unknown node '{handler}'")));
            }
        }

        let mut nodes = HashMap::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        for (name, mut entry_def) in self.nodes {
            if let Some(handler) = entry_def.error_handler.take() {
                let handler = resolve(&handler);
                if handler == END || !names.contains(handler.as_str()) {
                    return Err(malformed(format!(
                        "error handler for '{name}' references unknown node '{handler}'"
                    )));
                }
                entry_def.error_handler = Some(handler);
            }
            order.push(name.clone());
            nodes.insert(name, entry_def);
        }

        tracing::debug!(workflow = %self.name, nodes = order.len(), "workflow: graph compiled");

        Ok(CompiledWorkflow {
            inner: Arc::new(GraphInner {
                name: self.name,
                nodes,
                order,
                edges: by_source,
                entry,
                error_handler,
            }),
        })
    }
}

// ─── CompiledWorkflow ───────────────────────────────────────────────────────

struct GraphInner {
    name: String,
    nodes: HashMap<String, NodeEntry>,
    /// Declaration order.
    order: Vec<String>,
    /// Outgoing edges per node, in declaration order.
    edges: HashMap<String, Vec<Edge>>,
    entry: String,
    error_handler: Option<String>,
}

/// A validated, immutable workflow graph.
#[derive(Clone)]
pub struct CompiledWorkflow {
    inner: Arc<GraphInner>,
}

impl std::fmt::Debug for CompiledWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledWorkflow")
            .field("name", &self.inner.name)
            .field("entry", &self.inner.entry)
            .field("nodes", &self.inner.order)
            .finish()
    }
}

impl CompiledWorkflow {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn entry(&self) -> &str {
        &self.inner.entry
    }

    /// Node names in declaration order.
    pub fn node_names(&self) -> &[String] {
        &self.inner.order
    }

    pub fn contains(&self, node: &str) -> bool {
        self.inner.nodes.contains_key(node)
    }

    pub fn edges_from(&self, node: &str) -> &[Edge] {
        self.inner.edges.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn node(&self, name: &str) -> Option<&Arc<dyn WorkflowNode>> {
        self.inner.nodes.get(name).map(|e| &e.node)
    }

    pub(crate) fn declared_outputs(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.inner.nodes.get(name).and_then(|e| e.outputs.as_ref())
    }

    /// Handler for a failing node: per-node first, then graph-wide.
    /// A handler never handles its own failure.
    pub fn error_handler_for(&self, node: &str) -> Option<&str> {
        self.inner
            .nodes
            .get(node)
            .and_then(|e| e.error_handler.as_deref())
            .or(self.inner.error_handler.as_deref())
            .filter(|h| *h != node)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
