//! Canonical graph serialization.
//!
//! Algorithm:
//!   1. Walk the graph post-order, computing a SHA-256 fingerprint per
//!      node (algorithm name + ordered argument fingerprints, or the
//!      canonical JSON of the literal).
//!   2. The first time an invocation fingerprint is seen, allocate the
//!      next scope id (starting at 0) and append a scope entry whose
//!      nested invocations are replaced by references. Later occurrences
//!      reuse the existing id — structurally identical subgraphs are
//!      deduplicated even when built separately.
//!   3. Emit `{"scope": [[id, node], ...], "value": <root ref or literal>}`.
//!
//! The canonical string form is byte-identical for structurally equal
//! graphs (object keys sorted throughout); the remote service uses it as
//! a cache/idempotency key, so determinism here is load-bearing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::node::Node;

// =============================================================================
// SERIALIZED FORM
// =============================================================================

/// Deduplicated, reference-based wire encoding of one algorithm graph.
///
/// Invariant: every reference inside a scope entry points to an entry
/// with a strictly smaller id (no forward references).
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedGraph {
    scope: Vec<(u64, Value)>,
    value: Value,
}

impl SerializedGraph {
    /// Ordered `(id, encoded node)` scope entries.
    pub fn scope(&self) -> &[(u64, Value)] {
        &self.scope
    }

    /// Root value: a `ValueRef` object, or a bare literal for trivial graphs.
    pub fn root(&self) -> &Value {
        &self.value
    }

    /// Scope id the root points at, if the root is a reference.
    pub fn root_id(&self) -> Option<u64> {
        ref_id(&self.value)
    }

    /// Full wire payload as a JSON value.
    pub fn to_value(&self) -> Value {
        let scope: Vec<Value> = self
            .scope
            .iter()
            .map(|(id, node)| json!([id, node]))
            .collect();
        json!({ "scope": scope, "value": self.value })
    }

    /// Canonical single-line JSON. Byte-identical for structurally equal
    /// input graphs.
    pub fn to_canonical_string(&self) -> String {
        serde_json::to_string(&self.to_value()).unwrap_or_default()
    }
}

/// Extract the id from a `{"type": "ValueRef", "value": id}` object.
fn ref_id(value: &Value) -> Option<u64> {
    let obj = value.as_object()?;
    if obj.get("type").and_then(Value::as_str) == Some("ValueRef") {
        obj.get("value").and_then(Value::as_u64)
    } else {
        None
    }
}

// =============================================================================
// ENCODER
// =============================================================================

/// Serialize a graph into its deduplicated wire form.
pub fn serialize(root: &Arc<Node>) -> Result<SerializedGraph> {
    let mut encoder = Encoder::default();
    let (_, value) = encoder.encode(root)?;
    debug!(
        scope_entries = encoder.scope.len(),
        "serialized algorithm graph"
    );
    Ok(SerializedGraph {
        scope: encoder.scope,
        value,
    })
}

#[derive(Default)]
struct Encoder {
    /// fingerprint → assigned scope id
    ids: HashMap<String, u64>,
    scope: Vec<(u64, Value)>,
    /// Nodes on the current traversal path, by pointer identity.
    visiting: HashSet<usize>,
    /// Finished nodes, by pointer identity. Keeps shared subgraphs from
    /// being re-hashed once per parent.
    done: HashMap<usize, (String, Value)>,
}

impl Encoder {
    /// Encode one node, returning its fingerprint and its in-argument
    /// wire form (a reference for invocations, inline otherwise).
    fn encode(&mut self, node: &Arc<Node>) -> Result<(String, Value)> {
        let key = Arc::as_ptr(node) as usize;
        if let Some(hit) = self.done.get(&key) {
            return Ok(hit.clone());
        }
        if !self.visiting.insert(key) {
            return Err(GraphError::CyclicGraph(node.label()));
        }
        let result = self.encode_inner(node);
        self.visiting.remove(&key);
        let out = result?;
        self.done.insert(key, out.clone());
        Ok(out)
    }

    fn encode_inner(&mut self, node: &Arc<Node>) -> Result<(String, Value)> {
        match node.as_ref() {
            Node::Constant(value) => {
                let fp = fingerprint("const", &canonical_json(value));
                Ok((fp, value.clone()))
            }
            Node::Variable(name) => {
                let fp = fingerprint("var", name);
                Ok((fp, json!({ "type": "ArgumentRef", "value": name })))
            }
            Node::Reference(id) => {
                // Only valid when it points at an already-emitted entry.
                if !self.ids.values().any(|assigned| assigned == id) {
                    return Err(GraphError::DanglingReference(*id));
                }
                let fp = fingerprint("ref", &id.to_string());
                Ok((fp, json!({ "type": "ValueRef", "value": id })))
            }
            Node::List(items) => {
                let mut digest = String::from("[");
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let (fp, value) = self.encode(item)?;
                    digest.push_str(&fp);
                    digest.push(',');
                    values.push(value);
                }
                Ok((fingerprint("list", &digest), Value::Array(values)))
            }
            Node::Dict(entries) => {
                let mut digest = String::from("{");
                let mut map = Map::new();
                for (key, child) in entries {
                    let (fp, value) = self.encode(child)?;
                    digest.push_str(key);
                    digest.push('=');
                    digest.push_str(&fp);
                    digest.push(',');
                    map.insert(key.clone(), value);
                }
                Ok((fingerprint("dict", &digest), Value::Object(map)))
            }
            Node::Invocation { algorithm, args } => {
                let mut digest = algorithm.clone();
                let mut encoded_args = Map::new();
                for (name, child) in args {
                    let (fp, value) = self.encode(child)?;
                    digest.push(';');
                    digest.push_str(name);
                    digest.push('=');
                    digest.push_str(&fp);
                    encoded_args.insert(name.clone(), value);
                }
                let fp = fingerprint("invoke", &digest);
                let id = match self.ids.get(&fp) {
                    Some(id) => *id,
                    None => {
                        let id = self.scope.len() as u64;
                        self.ids.insert(fp.clone(), id);
                        self.scope.push((
                            id,
                            json!({
                                "type": "Invocation",
                                "algorithm": algorithm,
                                "args": encoded_args,
                            }),
                        ));
                        id
                    }
                };
                Ok((fp, json!({ "type": "ValueRef", "value": id })))
            }
        }
    }
}

/// Hex SHA-256 over a tagged payload, one tag per node kind so that e.g.
/// the constant `"x"` and the variable `x` can never collide.
fn fingerprint(tag: &str, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tag.as_bytes());
    hasher.update(b":");
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Canonical JSON for a literal (serde_json sorts object keys).
fn canonical_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

// =============================================================================
// READABLE FORM
// =============================================================================

/// Human-readable encoding that inlines nested nodes instead of using
/// references. Debug/display only: no deduplication guarantee, never sent
/// over the wire, and shared subgraphs are expanded once per parent.
pub fn to_readable_value(node: &Node) -> Value {
    match node {
        Node::Constant(value) => value.clone(),
        Node::Variable(name) => json!({ "type": "ArgumentRef", "value": name }),
        Node::Reference(id) => json!({ "type": "ValueRef", "value": id }),
        Node::List(items) => Value::Array(
            items
                .iter()
                .map(|item| to_readable_value(item))
                .collect(),
        ),
        Node::Dict(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, child)| (key.clone(), to_readable_value(child)))
                .collect(),
        ),
        Node::Invocation { algorithm, args } => {
            let encoded: Map<String, Value> = args
                .iter()
                .map(|(name, child)| (name.clone(), to_readable_value(child)))
                .collect();
            json!({ "type": "Invocation", "algorithm": algorithm, "args": encoded })
        }
    }
}

/// Pretty-printed readable form.
pub fn to_readable_string(node: &Node) -> String {
    serde_json::to_string_pretty(&to_readable_value(node)).unwrap_or_default()
}

// =============================================================================
// DECODER
// =============================================================================

/// Reconstruct a graph from its wire payload.
///
/// References are resolved into shared `Arc`s, so
/// `deserialize(serialize(g))` is structurally equal to `g`.
pub fn deserialize(payload: &Value) -> Result<Arc<Node>> {
    let obj = payload
        .as_object()
        .ok_or_else(|| GraphError::malformed("payload is not a JSON object"))?;

    let mut by_id: HashMap<u64, Arc<Node>> = HashMap::new();
    if let Some(scope) = obj.get("scope") {
        let entries = scope
            .as_array()
            .ok_or_else(|| GraphError::malformed("scope is not an array"))?;
        for entry in entries {
            let pair = entry
                .as_array()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| GraphError::malformed("scope entry is not an [id, node] pair"))?;
            let id = pair[0]
                .as_u64()
                .ok_or_else(|| GraphError::malformed("scope entry id is not an integer"))?;
            // Forward references fail inside decode_value: the target id
            // is not in `by_id` yet.
            let node = decode_value(&pair[1], &by_id)?;
            if by_id.insert(id, node).is_some() {
                return Err(GraphError::malformed(format!("duplicate scope id {}", id)));
            }
        }
    }

    let root = obj
        .get("value")
        .ok_or_else(|| GraphError::malformed("payload has no value"))?;
    decode_value(root, &by_id)
}

fn decode_value(value: &Value, scope: &HashMap<u64, Arc<Node>>) -> Result<Arc<Node>> {
    match value {
        Value::Object(map) => match map.get("type").and_then(Value::as_str) {
            Some("ValueRef") => {
                let id = map
                    .get("value")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| GraphError::malformed("ValueRef without integer value"))?;
                scope
                    .get(&id)
                    .cloned()
                    .ok_or(GraphError::DanglingReference(id))
            }
            Some("ArgumentRef") => {
                let name = map
                    .get("value")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GraphError::malformed("ArgumentRef without name"))?;
                Ok(Node::variable(name))
            }
            Some("Invocation") => {
                let algorithm = map
                    .get("algorithm")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GraphError::malformed("Invocation without algorithm"))?;
                let empty = Map::new();
                let raw_args = match map.get("args") {
                    Some(args) => args
                        .as_object()
                        .ok_or_else(|| GraphError::malformed("Invocation args is not an object"))?,
                    None => &empty,
                };
                let mut args = std::collections::BTreeMap::new();
                for (name, raw) in raw_args {
                    args.insert(name.clone(), decode_value(raw, scope)?);
                }
                Ok(Arc::new(Node::Invocation {
                    algorithm: algorithm.to_string(),
                    args,
                }))
            }
            _ => {
                // Plain object: a constant unless some entry decodes to a
                // graph node.
                let mut entries = std::collections::BTreeMap::new();
                for (key, raw) in map {
                    entries.insert(key.clone(), decode_value(raw, scope)?);
                }
                if entries.values().all(|n| n.is_constant()) {
                    Ok(Arc::new(Node::Constant(value.clone())))
                } else {
                    Ok(Arc::new(Node::Dict(entries)))
                }
            }
        },
        Value::Array(items) => {
            let decoded: Vec<Arc<Node>> = items
                .iter()
                .map(|item| decode_value(item, scope))
                .collect::<Result<_>>()?;
            if decoded.iter().all(|n| n.is_constant()) {
                Ok(Arc::new(Node::Constant(value.clone())))
            } else {
                Ok(Arc::new(Node::List(decoded)))
            }
        }
        _ => Ok(Arc::new(Node::Constant(value.clone()))),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{invoke, Args, IntoNode};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn add(a: impl IntoNode, b: impl IntoNode) -> Arc<Node> {
        invoke("Add", Args::new().set("a", a).set("b", b)).unwrap()
    }

    #[test]
    fn test_nested_invocations_serialize_inner_first() {
        let graph = add(1, add(2, 3));
        let out = serialize(&graph).unwrap();

        assert_eq!(out.scope().len(), 2);
        let (inner_id, inner) = &out.scope()[0];
        let (outer_id, outer) = &out.scope()[1];
        assert_eq!(*inner_id, 0);
        assert_eq!(*outer_id, 1);
        assert_eq!(inner["args"]["a"], json!(2));
        assert_eq!(inner["args"]["b"], json!(3));
        assert_eq!(outer["args"]["a"], json!(1));
        assert_eq!(outer["args"]["b"], json!({ "type": "ValueRef", "value": 0 }));
        assert_eq!(out.root_id(), Some(1));
    }

    #[test]
    fn test_shared_subgraph_deduplicated() {
        let shared = invoke("Const", Args::new().set("v", 5)).unwrap();
        let graph = add(&shared, &shared);
        let out = serialize(&graph).unwrap();

        let const_entries: Vec<_> = out
            .scope()
            .iter()
            .filter(|(_, node)| node["algorithm"] == json!("Const"))
            .collect();
        assert_eq!(const_entries.len(), 1);
        let (_, root) = out.scope().last().unwrap();
        assert_eq!(root["args"]["a"], root["args"]["b"]);
    }

    #[test]
    fn test_structurally_equal_subgraphs_deduplicated() {
        // Built separately, not shared - dedup must still apply.
        let x1 = invoke("Const", Args::new().set("v", 5)).unwrap();
        let x2 = invoke("Const", Args::new().set("v", 5)).unwrap();
        let out = serialize(&add(&x1, &x2)).unwrap();
        assert_eq!(out.scope().len(), 2);
    }

    #[test]
    fn test_deterministic_bytes_across_builds() {
        let g1 = add(1, add(2, 3));
        let g2 = add(1, add(2, 3));
        assert_eq!(
            serialize(&g1).unwrap().to_canonical_string(),
            serialize(&g2).unwrap().to_canonical_string()
        );
    }

    #[test]
    fn test_references_point_strictly_backwards() {
        let base = invoke("Const", Args::new().set("v", 1)).unwrap();
        let mid = add(&base, 2);
        let graph = add(&mid, &base);
        let out = serialize(&graph).unwrap();

        for (id, node) in out.scope() {
            for (_, arg) in node["args"].as_object().unwrap() {
                if let Some(target) = ref_id(arg) {
                    assert!(target < *id, "entry {} references {}", id, target);
                }
            }
        }
        assert!(out.root_id().is_some());
    }

    #[test]
    fn test_trivial_constant_root_inlines() {
        let graph = Node::constant(42);
        let out = serialize(&graph).unwrap();
        assert!(out.scope().is_empty());
        assert_eq!(out.root(), &json!(42));
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let graph = Arc::new(Node::Reference(3));
        let err = serialize(&graph).unwrap_err();
        assert!(matches!(err, GraphError::DanglingReference(3)));
    }

    #[test]
    fn test_roundtrip_structural_equality() {
        let shared = invoke("Const", Args::new().set("v", 5)).unwrap();
        let graph = add(&shared, add(&shared, 1));
        let out = serialize(&graph).unwrap();
        let back = deserialize(&out.to_value()).unwrap();
        assert_eq!(back.as_ref(), graph.as_ref());

        // Re-serializing the reconstruction reproduces the same bytes.
        assert_eq!(
            serialize(&back).unwrap().to_canonical_string(),
            out.to_canonical_string()
        );
    }

    #[test]
    fn test_decode_rejects_forward_reference() {
        let payload = json!({
            "scope": [
                [0, { "type": "Invocation", "algorithm": "Add",
                      "args": { "a": { "type": "ValueRef", "value": 1 } } }],
            ],
            "value": { "type": "ValueRef", "value": 0 },
        });
        let err = deserialize(&payload).unwrap_err();
        assert!(matches!(err, GraphError::DanglingReference(1)));
    }

    #[test]
    fn test_decode_rejects_non_object_payload() {
        assert!(deserialize(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_readable_form_inlines_everything() {
        let graph = add(1, add(2, 3));
        let readable = to_readable_value(&graph);
        assert_eq!(readable["args"]["b"]["algorithm"], json!("Add"));
        assert_eq!(readable["args"]["b"]["args"]["a"], json!(2));
    }

    #[test]
    fn test_variable_encodes_as_argument_ref() {
        let body = add(Node::variable("_MAPPING_VAR_0"), 1);
        let out = serialize(&body).unwrap();
        let (_, entry) = &out.scope()[0];
        assert_eq!(
            entry["args"]["a"],
            json!({ "type": "ArgumentRef", "value": "_MAPPING_VAR_0" })
        );
    }
}
