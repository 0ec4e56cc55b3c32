//! Image wrapper.
//!
//! An image is a graph wrapper over a single root node. Constructors
//! mirror the service's accepted descriptions (asset id, constant value,
//! raw JSON description, arbitrary image-producing invocation); building
//! methods return a new wrapper threading the current root as the
//! implicit input argument.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::node::{invoke, Args, IntoNode, Node};
use crate::serializer;

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    root: Arc<Node>,
}

impl Image {
    /// Reference an asset by id, e.g. `"MOD09GA/MOD09GA_005_2012_10_11"`.
    pub fn from_id(id: &str) -> Self {
        let mut description = Map::new();
        description.insert("type".into(), Value::from("Image"));
        description.insert("id".into(), Value::from(id));
        Self::from_root(Node::constant(Value::Object(description)))
    }

    /// A constant-valued image.
    pub fn constant(value: f64) -> Result<Self> {
        invoke("Constant", Args::new().set("value", value)).map(Self::from_root)
    }

    /// Wrap a raw JSON description.
    pub fn from_value(description: Value) -> Self {
        Self::from_root(Node::constant(description))
    }

    /// Wrap the result of an arbitrary image-producing algorithm, e.g.
    /// `Image::from_invocation("DrawVector", ...)`.
    pub fn from_invocation(algorithm: &str, args: Args) -> Result<Self> {
        invoke(algorithm, args).map(Self::from_root)
    }

    pub(crate) fn from_root(root: Arc<Node>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    /// Select bands by name or index, optionally renaming them.
    pub fn select(&self, bands: Vec<&str>, new_names: Option<Vec<&str>>) -> Result<Self> {
        invoke(
            "Image.select",
            Args::new()
                .set("input", &self.root)
                .set("bandSelectors", bands)
                .opt("newNames", new_names),
        )
        .map(Self::from_root)
    }
}

impl IntoNode for Image {
    fn into_node(self) -> Arc<Node> {
        self.root
    }
}

impl IntoNode for &Image {
    fn into_node(self) -> Arc<Node> {
        Arc::clone(&self.root)
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Image({})", serializer::to_readable_string(&self.root))
    }
}
