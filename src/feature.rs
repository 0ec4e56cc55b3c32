//! Feature wrapper.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::node::{invoke, Args, IntoNode, Node};
use crate::serializer;

/// A single feature: geometry plus metadata, as a graph wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    root: Arc<Node>,
}

impl Feature {
    /// Build a feature from a GeoJSON geometry and optional properties.
    pub fn new(geometry: Value, properties: Option<Value>) -> Result<Self> {
        invoke(
            "Feature",
            Args::new()
                .set("geometry", geometry)
                .opt("metadata", properties),
        )
        .map(Self::from_root)
    }

    /// Wrap a raw JSON description.
    pub fn from_value(description: Value) -> Self {
        Self::from_root(Node::constant(description))
    }

    pub(crate) fn from_root(root: Arc<Node>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    /// Extract a property of this feature as a graph node.
    pub fn get(&self, property: &str) -> Result<Arc<Node>> {
        invoke(
            "Feature.get",
            Args::new()
                .set("feature", &self.root)
                .set("property", property),
        )
    }
}

impl IntoNode for Feature {
    fn into_node(self) -> Arc<Node> {
        self.root
    }
}

impl IntoNode for &Feature {
    fn into_node(self) -> Arc<Node> {
        Arc::clone(&self.root)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Feature({})", serializer::to_readable_string(&self.root))
    }
}
