//! Algorithm-graph node model.
//!
//! A graph is an immutable DAG of [`Node`]s describing a deferred remote
//! computation:
//! - **Constant**: terminal JSON-compatible value (number, string, array, map)
//! - **Variable**: placeholder bound by a mapped function (`@var` analogue)
//! - **Reference**: wire-level pointer to a scope entry by id
//! - **Invocation**: "call algorithm A with these named arguments"
//! - **Containers**: lists and maps whose entries may themselves be nodes
//!
//! Children are shared via `Arc` — a node may appear as an argument of
//! multiple parent invocations without copying. Nothing is ever mutated
//! after construction, so sharing needs no locking.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{GraphError, Result};

// =============================================================================
// CORE NODE TYPE
// =============================================================================

/// A single node in an algorithm graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal value - sent to the service as-is
    Constant(Value),

    /// Placeholder bound by a mapped function; resolved server-side
    Variable(String),

    /// Wire-level reference to a scope entry. Produced by the decoder;
    /// hand-built graphs normally never contain these.
    Reference(u64),

    /// Call a server-side algorithm with named arguments
    Invocation {
        algorithm: String,
        /// Canonically ordered parameter-name → argument mapping
        args: BTreeMap<String, Arc<Node>>,
    },

    /// List whose items may be graph nodes: [a, b, c]
    List(Vec<Arc<Node>>),

    /// Map whose values may be graph nodes: {key: value}
    Dict(BTreeMap<String, Arc<Node>>),
}

impl Node {
    /// Wrap a plain JSON value as a constant node.
    pub fn constant(value: impl Into<Value>) -> Arc<Node> {
        Arc::new(Node::Constant(value.into()))
    }

    /// A variable placeholder with the given binding name.
    pub fn variable(name: impl Into<String>) -> Arc<Node> {
        Arc::new(Node::Variable(name.into()))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Node::Constant(_))
    }

    pub fn is_invocation(&self) -> bool {
        matches!(self, Node::Invocation { .. })
    }

    /// Algorithm name if this node is an invocation.
    pub fn algorithm(&self) -> Option<&str> {
        match self {
            Node::Invocation { algorithm, .. } => Some(algorithm),
            _ => None,
        }
    }

    /// Argument node for `name` if this node is an invocation.
    pub fn arg(&self, name: &str) -> Option<&Arc<Node>> {
        match self {
            Node::Invocation { args, .. } => args.get(name),
            _ => None,
        }
    }

    /// Short human-readable label, used in error messages.
    pub(crate) fn label(&self) -> String {
        match self {
            Node::Constant(v) => format!("constant {}", v),
            Node::Variable(name) => format!("variable {}", name),
            Node::Reference(id) => format!("reference {}", id),
            Node::Invocation { algorithm, .. } => algorithm.clone(),
            Node::List(items) => format!("list[{}]", items.len()),
            Node::Dict(entries) => format!("dict[{}]", entries.len()),
        }
    }
}

// =============================================================================
// LITERAL AUTO-WRAPPING
// =============================================================================

/// Conversion into a graph node.
///
/// Plain host literals (numbers, strings, booleans, sequences, mappings)
/// become `Constant` nodes; graph wrappers contribute their root node
/// directly, enabling composition.
pub trait IntoNode {
    fn into_node(self) -> Arc<Node>;
}

impl IntoNode for Arc<Node> {
    fn into_node(self) -> Arc<Node> {
        self
    }
}

impl IntoNode for &Arc<Node> {
    fn into_node(self) -> Arc<Node> {
        Arc::clone(self)
    }
}

impl IntoNode for Node {
    fn into_node(self) -> Arc<Node> {
        Arc::new(self)
    }
}

impl IntoNode for Value {
    fn into_node(self) -> Arc<Node> {
        Arc::new(Node::Constant(self))
    }
}

macro_rules! into_node_via_value {
    ($($ty:ty),*) => {
        $(impl IntoNode for $ty {
            fn into_node(self) -> Arc<Node> {
                Arc::new(Node::Constant(Value::from(self)))
            }
        })*
    };
}

into_node_via_value!(bool, i32, i64, u32, u64, f32, f64, &str, String);

impl<T: IntoNode> IntoNode for Vec<T> {
    fn into_node(self) -> Arc<Node> {
        let items: Vec<Arc<Node>> = self.into_iter().map(IntoNode::into_node).collect();
        collapse_list(items)
    }
}

impl<T: IntoNode> IntoNode for BTreeMap<String, T> {
    fn into_node(self) -> Arc<Node> {
        let entries: BTreeMap<String, Arc<Node>> = self
            .into_iter()
            .map(|(k, v)| (k, v.into_node()))
            .collect();
        collapse_dict(entries)
    }
}

/// Containers holding only constants collapse to a single constant.
/// Resolves the host-literal vs graph-node distinction once, at
/// construction time; nothing downstream re-inspects types.
fn collapse_list(items: Vec<Arc<Node>>) -> Arc<Node> {
    if items.iter().all(|n| n.is_constant()) {
        let values: Vec<Value> = items
            .iter()
            .map(|n| match n.as_ref() {
                Node::Constant(v) => v.clone(),
                _ => unreachable!(),
            })
            .collect();
        Arc::new(Node::Constant(Value::Array(values)))
    } else {
        Arc::new(Node::List(items))
    }
}

fn collapse_dict(entries: BTreeMap<String, Arc<Node>>) -> Arc<Node> {
    if entries.values().all(|n| n.is_constant()) {
        let map: serde_json::Map<String, Value> = entries
            .iter()
            .map(|(k, n)| match n.as_ref() {
                Node::Constant(v) => (k.clone(), v.clone()),
                _ => unreachable!(),
            })
            .collect();
        Arc::new(Node::Constant(Value::Object(map)))
    } else {
        Arc::new(Node::Dict(entries))
    }
}

// =============================================================================
// ARGUMENT SET
// =============================================================================

/// Ordered named-argument set for an invocation.
///
/// Arguments set to `None` via [`Args::opt`] are omitted entirely so that
/// optional parameters are fully absent from the wire form — never
/// serialized as a null placeholder.
#[derive(Debug, Clone, Default)]
pub struct Args {
    entries: BTreeMap<String, Arc<Node>>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a named argument.
    pub fn set(mut self, name: impl Into<String>, value: impl IntoNode) -> Self {
        self.entries.insert(name.into(), value.into_node());
        self
    }

    /// Set a named argument only when a value is present.
    pub fn opt(self, name: impl Into<String>, value: Option<impl IntoNode>) -> Self {
        match value {
            Some(v) => self.set(name, v),
            None => self,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn into_map(self) -> BTreeMap<String, Arc<Node>> {
        self.entries
    }
}

// =============================================================================
// INVOCATION CONSTRUCTION
// =============================================================================

/// Build an invocation node calling `algorithm` with `args`.
///
/// Pure construction — nothing is executed. The algorithm name is treated
/// as an opaque identifier from the remote catalog; it must be non-empty
/// and contain only identifier characters (`A-Z a-z 0-9 . _ / -`).
pub fn invoke(algorithm: &str, args: Args) -> Result<Arc<Node>> {
    if !valid_algorithm_name(algorithm) {
        return Err(GraphError::construction(format!(
            "invalid algorithm name '{}'",
            algorithm
        )));
    }
    Ok(Arc::new(Node::Invocation {
        algorithm: algorithm.to_string(),
        args: args.into_map(),
    }))
}

fn valid_algorithm_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-'))
}

// =============================================================================
// Tests
// =============================================================================
