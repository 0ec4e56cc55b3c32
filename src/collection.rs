//! Collection capability and the per-element map combinator.
//!
//! A collection holds one root node plus the element flavor (Feature vs
//! Image) used when materializing result items. The flavor wrappers
//! ([`FeatureCollection`], [`ImageCollection`]) delegate to the shared
//! [`Collection`] capability instead of subclassing it; every building
//! call returns a new wrapper over a new invocation that nests the
//! previous root as its `collection` argument.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::feature::Feature;
use crate::image::Image;
use crate::node::{invoke, Args, IntoNode, Node};
use crate::serializer;

// =============================================================================
// SHARED CAPABILITY
// =============================================================================

/// Element flavor a collection materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Feature,
    Image,
}

/// Shared collection capability: one immutable root node + element flavor.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    root: Arc<Node>,
    kind: ElementKind,
}

/// Options for mapping a server-known algorithm over a collection.
#[derive(Debug, Clone, Default)]
pub struct MapOptions {
    /// Algorithm parameter → element selector. Only valid with a named
    /// algorithm; a client-side closure already binds its own variable.
    pub dynamic_args: Option<BTreeMap<String, String>>,
    /// Fixed arguments passed unchanged to every per-element call.
    pub constant_args: Option<BTreeMap<String, Value>>,
    /// Property name the mapped result is stored under.
    pub destination: Option<String>,
}

// Names for capture variables come from the nesting depth, not a global
// counter, so separately built but structurally identical mapped graphs
// serialize to identical bytes.
thread_local! {
    static CAPTURE_DEPTH: Cell<u32> = const { Cell::new(0) };
}

impl Collection {
    pub(crate) fn from_root(root: Arc<Node>, kind: ElementKind) -> Self {
        Self { root, kind }
    }

    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Apply a filter node to this collection.
    pub fn filter(&self, filter: impl IntoNode) -> Result<Collection> {
        let node = invoke(
            "Collection.filter",
            Args::new().set("collection", &self.root).set("filter", filter),
        )?;
        Ok(Self::from_root(node, self.kind))
    }

    /// Filter to elements within a date range. `end` may be omitted for
    /// an open-ended range.
    pub fn filter_date(&self, start: &str, end: Option<&str>) -> Result<Collection> {
        let date = invoke("Filter.date", Args::new().set("start", start).opt("end", end))?;
        self.filter(date)
    }

    /// Filter on a metadata property (`operator` is a service-side
    /// comparison name such as `equals` or `less_than`).
    pub fn filter_metadata(&self, name: &str, operator: &str, value: Value) -> Result<Collection> {
        let metadata = invoke(
            "Filter.metadata",
            Args::new()
                .set("name", name)
                .set("operator", operator)
                .set("value", value),
        )?;
        self.filter(metadata)
    }

    /// Filter to elements intersecting a geometry (GeoJSON).
    pub fn filter_bounds(&self, geometry: Value) -> Result<Collection> {
        let bounds = invoke("Filter.bounds", Args::new().set("geometry", geometry))?;
        self.filter(bounds)
    }

    /// Limit the collection, optionally ordering by a property first.
    pub fn limit(
        &self,
        max: u64,
        property: Option<&str>,
        ascending: Option<bool>,
    ) -> Result<Collection> {
        self.limit_internal(Some(max), property, ascending)
    }

    /// Sort the collection by a property.
    pub fn sort(&self, property: &str, ascending: bool) -> Result<Collection> {
        self.limit_internal(None, Some(property), Some(ascending))
    }

    // limit and sort are the same server-side algorithm; unset arguments
    // are omitted from the wire form.
    fn limit_internal(
        &self,
        max: Option<u64>,
        property: Option<&str>,
        ascending: Option<bool>,
    ) -> Result<Collection> {
        let node = invoke(
            "Collection.limit",
            Args::new()
                .set("collection", &self.root)
                .opt("limit", max)
                .opt("key", property)
                .opt("ascending", ascending),
        )?;
        Ok(Self::from_root(node, self.kind))
    }

    /// Map a server-known algorithm (by name) over every element.
    pub fn map_algorithm(&self, algorithm: &str, opts: MapOptions) -> Result<Collection> {
        let node = invoke(
            "MapAlgorithm",
            Args::new()
                .set("collection", &self.root)
                .set("baseAlgorithm", algorithm)
                .opt("dynamicArgs", opts.dynamic_args.map(string_map_value))
                .opt("constantArgs", opts.constant_args.map(object_value))
                .opt("destination", opts.destination),
        )?;
        Ok(Self::from_root(node, self.kind))
    }

    /// Capture a client-side function symbolically and map its graph over
    /// every element.
    ///
    /// `body` is invoked exactly once, with a placeholder variable node —
    /// never with real per-element data. The graph it returns becomes the
    /// `baseAlgorithm` of the map invocation. The function must be pure
    /// with respect to graph construction; side effects during the single
    /// symbolic invocation are a caller contract violation.
    pub(crate) fn map_symbolic<F>(&self, opts: MapOptions, body: F) -> Result<Collection>
    where
        F: FnOnce(Arc<Node>) -> Result<Arc<Node>>,
    {
        if opts.dynamic_args.is_some() {
            return Err(GraphError::construction(
                "dynamic_args cannot be combined with a client-side mapped function",
            ));
        }

        let depth = CAPTURE_DEPTH.with(Cell::get);
        let variable = format!("_MAPPING_VAR_{}", depth);
        CAPTURE_DEPTH.with(|d| d.set(depth + 1));
        let captured = body(Node::variable(&variable));
        CAPTURE_DEPTH.with(|d| d.set(depth));
        let captured = captured?;
        debug!(variable = %variable, body = %captured.label(), "captured mapped function");

        let node = invoke(
            "MapAlgorithm",
            Args::new()
                .set("collection", &self.root)
                .set("baseAlgorithm", captured)
                .set("variable", variable)
                .opt("constantArgs", opts.constant_args.map(object_value))
                .opt("destination", opts.destination),
        )?;
        Ok(Self::from_root(node, self.kind))
    }
}

fn string_map_value(map: BTreeMap<String, String>) -> Value {
    Value::Object(
        map.into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect::<Map<String, Value>>(),
    )
}

fn object_value(map: BTreeMap<String, Value>) -> Value {
    Value::Object(map.into_iter().collect())
}

// =============================================================================
// FEATURE COLLECTION
// =============================================================================

/// A collection of features.
///
/// Constructors mirror the service's accepted descriptions: a collection
/// id string, a numeric table id (each with an optional geometry column),
/// one feature, a vector of features, or a raw JSON description.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureCollection {
    inner: Collection,
}

impl FeatureCollection {
    /// Reference a named collection, e.g. `"TIGER/2018/States"`.
    pub fn from_id(id: &str, geo_column: Option<&str>) -> Self {
        let mut description = Map::new();
        description.insert("type".into(), Value::from("FeatureCollection"));
        description.insert("id".into(), Value::from(id));
        if let Some(column) = geo_column {
            description.insert("geo_column".into(), Value::from(column));
        }
        Self::wrap(Node::constant(Value::Object(description)))
    }

    /// Reference an uploaded table by numeric id.
    pub fn from_table(table_id: i64, geo_column: Option<&str>) -> Self {
        let mut description = Map::new();
        description.insert("type".into(), Value::from("FeatureCollection"));
        description.insert("table_id".into(), Value::from(table_id));
        if let Some(column) = geo_column {
            description.insert("geo_column".into(), Value::from(column));
        }
        Self::wrap(Node::constant(Value::Object(description)))
    }

    /// Build a collection from client-side features.
    pub fn from_features(features: Vec<Feature>) -> Self {
        let items: Vec<Arc<Node>> = features.into_iter().map(IntoNode::into_node).collect();
        let mut entries = BTreeMap::new();
        entries.insert("type".to_string(), "FeatureCollection".into_node());
        entries.insert("features".to_string(), items.into_node());
        Self::wrap(entries.into_node())
    }

    /// Single-feature collection.
    pub fn from_feature(feature: Feature) -> Self {
        Self::from_features(vec![feature])
    }

    /// Wrap a raw JSON description.
    pub fn from_value(description: Value) -> Self {
        Self::wrap(Node::constant(description))
    }

    pub(crate) fn wrap(root: Arc<Node>) -> Self {
        Self {
            inner: Collection::from_root(root, ElementKind::Feature),
        }
    }

    pub fn root(&self) -> &Arc<Node> {
        self.inner.root()
    }

    pub fn collection(&self) -> &Collection {
        &self.inner
    }

    pub fn filter(&self, filter: impl IntoNode) -> Result<Self> {
        self.inner.filter(filter).map(Self::rewrap)
    }

    pub fn filter_date(&self, start: &str, end: Option<&str>) -> Result<Self> {
        self.inner.filter_date(start, end).map(Self::rewrap)
    }

    pub fn filter_metadata(&self, name: &str, operator: &str, value: Value) -> Result<Self> {
        self.inner
            .filter_metadata(name, operator, value)
            .map(Self::rewrap)
    }

    pub fn filter_bounds(&self, geometry: Value) -> Result<Self> {
        self.inner.filter_bounds(geometry).map(Self::rewrap)
    }

    pub fn limit(&self, max: u64, property: Option<&str>, ascending: Option<bool>) -> Result<Self> {
        self.inner.limit(max, property, ascending).map(Self::rewrap)
    }

    pub fn sort(&self, property: &str, ascending: bool) -> Result<Self> {
        self.inner.sort(property, ascending).map(Self::rewrap)
    }

    pub fn map_algorithm(&self, algorithm: &str, opts: MapOptions) -> Result<Self> {
        self.inner.map_algorithm(algorithm, opts).map(Self::rewrap)
    }

    /// Map a client-side function over every feature. See
    /// [`Collection::map_symbolic`] for the purity contract.
    pub fn map<F, R>(&self, f: F) -> Result<Self>
    where
        F: FnOnce(Feature) -> R,
        R: IntoNode,
    {
        self.map_with(f, MapOptions::default())
    }

    pub fn map_with<F, R>(&self, f: F, opts: MapOptions) -> Result<Self>
    where
        F: FnOnce(Feature) -> R,
        R: IntoNode,
    {
        self.inner
            .map_symbolic(opts, |var| Ok(f(Feature::from_root(var)).into_node()))
            .map(Self::rewrap)
    }

    fn rewrap(inner: Collection) -> Self {
        Self { inner }
    }
}

impl IntoNode for FeatureCollection {
    fn into_node(self) -> Arc<Node> {
        Arc::clone(self.inner.root())
    }
}

impl IntoNode for &FeatureCollection {
    fn into_node(self) -> Arc<Node> {
        Arc::clone(self.inner.root())
    }
}

impl fmt::Display for FeatureCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FeatureCollection({})",
            serializer::to_readable_string(self.inner.root())
        )
    }
}

// =============================================================================
// IMAGE COLLECTION
// =============================================================================

/// A collection of images.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageCollection {
    inner: Collection,
}

impl ImageCollection {
    /// Reference a named collection, e.g. `"MOD09GA"`.
    pub fn from_id(id: &str) -> Self {
        let mut description = Map::new();
        description.insert("type".into(), Value::from("ImageCollection"));
        description.insert("id".into(), Value::from(id));
        Self::wrap(Node::constant(Value::Object(description)))
    }

    /// Wrap a raw JSON description.
    pub fn from_value(description: Value) -> Self {
        Self::wrap(Node::constant(description))
    }

    pub(crate) fn wrap(root: Arc<Node>) -> Self {
        Self {
            inner: Collection::from_root(root, ElementKind::Image),
        }
    }

    pub fn root(&self) -> &Arc<Node> {
        self.inner.root()
    }

    pub fn collection(&self) -> &Collection {
        &self.inner
    }

    pub fn filter(&self, filter: impl IntoNode) -> Result<Self> {
        self.inner.filter(filter).map(Self::rewrap)
    }

    pub fn filter_date(&self, start: &str, end: Option<&str>) -> Result<Self> {
        self.inner.filter_date(start, end).map(Self::rewrap)
    }

    pub fn filter_metadata(&self, name: &str, operator: &str, value: Value) -> Result<Self> {
        self.inner
            .filter_metadata(name, operator, value)
            .map(Self::rewrap)
    }

    pub fn filter_bounds(&self, geometry: Value) -> Result<Self> {
        self.inner.filter_bounds(geometry).map(Self::rewrap)
    }

    pub fn limit(&self, max: u64, property: Option<&str>, ascending: Option<bool>) -> Result<Self> {
        self.inner.limit(max, property, ascending).map(Self::rewrap)
    }

    pub fn sort(&self, property: &str, ascending: bool) -> Result<Self> {
        self.inner.sort(property, ascending).map(Self::rewrap)
    }

    pub fn map_algorithm(&self, algorithm: &str, opts: MapOptions) -> Result<Self> {
        self.inner.map_algorithm(algorithm, opts).map(Self::rewrap)
    }

    /// Map a client-side function over every image. See
    /// [`Collection::map_symbolic`] for the purity contract.
    pub fn map<F, R>(&self, f: F) -> Result<Self>
    where
        F: FnOnce(Image) -> R,
        R: IntoNode,
    {
        self.map_with(f, MapOptions::default())
    }

    pub fn map_with<F, R>(&self, f: F, opts: MapOptions) -> Result<Self>
    where
        F: FnOnce(Image) -> R,
        R: IntoNode,
    {
        self.inner
            .map_symbolic(opts, |var| Ok(f(Image::from_root(var)).into_node()))
            .map(Self::rewrap)
    }

    fn rewrap(inner: Collection) -> Self {
        Self { inner }
    }
}

impl IntoNode for ImageCollection {
    fn into_node(self) -> Arc<Node> {
        Arc::clone(self.inner.root())
    }
}

impl IntoNode for &ImageCollection {
    fn into_node(self) -> Arc<Node> {
        Arc::clone(self.inner.root())
    }
}

impl fmt::Display for ImageCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ImageCollection({})",
            serializer::to_readable_string(self.inner.root())
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_from_id_description() {
        let fc = FeatureCollection::from_id("TIGER/2018/States", None);
        assert_eq!(
            fc.root().as_ref(),
            &Node::Constant(json!({ "type": "FeatureCollection", "id": "TIGER/2018/States" }))
        );
    }

    #[test]
    fn test_from_table_with_geo_column() {
        let fc = FeatureCollection::from_table(42, Some("geometry"));
        assert_eq!(
            fc.root().as_ref(),
            &Node::Constant(json!({
                "type": "FeatureCollection",
                "table_id": 42,
                "geo_column": "geometry",
            }))
        );
    }

    #[test]
    fn test_filter_nests_previous_root() {
        let fc = FeatureCollection::from_id("TIGER/2018/States", None);
        let filtered = fc
            .filter_metadata("STATEFP", "equals", json!("06"))
            .unwrap();
        let root = filtered.root();
        assert_eq!(root.algorithm(), Some("Collection.filter"));
        assert!(Arc::ptr_eq(root.arg("collection").unwrap(), fc.root()));
        assert_eq!(
            root.arg("filter").unwrap().algorithm(),
            Some("Filter.metadata")
        );
    }

    #[test]
    fn test_sort_is_limit_without_max() {
        let ic = ImageCollection::from_id("MOD09GA");
        let sorted = ic.sort("system:time_start", true).unwrap();
        let root = sorted.root();
        assert_eq!(root.algorithm(), Some("Collection.limit"));
        assert!(root.arg("limit").is_none());
        assert_eq!(
            root.arg("key").unwrap().as_ref(),
            &Node::Constant(json!("system:time_start"))
        );
    }

    #[test]
    fn test_map_captures_function_once() {
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        let ic = ImageCollection::from_id("MOD09GA");

        let mapped = ic
            .map(move |img| {
                seen.set(seen.get() + 1);
                img.select(vec!["B1"], None).unwrap()
            })
            .unwrap();

        assert_eq!(calls.get(), 1);
        let root = mapped.root();
        assert_eq!(root.algorithm(), Some("MapAlgorithm"));
        assert!(Arc::ptr_eq(root.arg("collection").unwrap(), ic.root()));
        assert_eq!(
            root.arg("variable").unwrap().as_ref(),
            &Node::Constant(json!("_MAPPING_VAR_0"))
        );

        // Body is a single symbolic graph over the variable, never a
        // per-element expansion.
        let body = root.arg("baseAlgorithm").unwrap();
        assert_eq!(body.algorithm(), Some("Image.select"));
        assert_eq!(
            body.arg("input").unwrap().as_ref(),
            &Node::Variable("_MAPPING_VAR_0".to_string())
        );
    }

    #[test]
    fn test_nested_map_uses_distinct_variables() {
        let outer = FeatureCollection::from_id("outer", None);
        let inner = FeatureCollection::from_id("inner", None);

        let mapped = outer
            .map(|feature| {
                let nested = inner
                    .map(|inner_feature| inner_feature)
                    .unwrap();
                // Combine so both variables appear in the outer body.
                invoke(
                    "Pair",
                    Args::new().set("a", feature).set("b", &nested),
                )
                .unwrap()
            })
            .unwrap();

        let body = mapped.root().arg("baseAlgorithm").unwrap();
        assert_eq!(
            body.arg("a").unwrap().as_ref(),
            &Node::Variable("_MAPPING_VAR_0".to_string())
        );
        let nested_map = body.arg("b").unwrap();
        assert_eq!(
            nested_map.arg("variable").unwrap().as_ref(),
            &Node::Constant(json!("_MAPPING_VAR_1"))
        );
    }

    #[test]
    fn test_map_depth_resets_after_capture() {
        let fc = FeatureCollection::from_id("a", None);
        fc.map(|f| f).unwrap();
        let again = fc.map(|f| f).unwrap();
        assert_eq!(
            again.root().arg("variable").unwrap().as_ref(),
            &Node::Constant(json!("_MAPPING_VAR_0"))
        );
    }

    #[test]
    fn test_map_algorithm_by_name() {
        let mut constant_args = BTreeMap::new();
        constant_args.insert("scale".to_string(), json!(30));
        let ic = ImageCollection::from_id("MOD09GA");
        let mapped = ic
            .map_algorithm(
                "Image.normalizedDifference",
                MapOptions {
                    constant_args: Some(constant_args),
                    destination: Some("nd".to_string()),
                    ..MapOptions::default()
                },
            )
            .unwrap();

        let root = mapped.root();
        assert_eq!(
            root.arg("baseAlgorithm").unwrap().as_ref(),
            &Node::Constant(json!("Image.normalizedDifference"))
        );
        assert_eq!(
            root.arg("constantArgs").unwrap().as_ref(),
            &Node::Constant(json!({ "scale": 30 }))
        );
        assert_eq!(
            root.arg("destination").unwrap().as_ref(),
            &Node::Constant(json!("nd"))
        );
        assert!(root.arg("variable").is_none());
    }

    #[test]
    fn test_dynamic_args_rejected_with_closure() {
        let mut dynamic_args = BTreeMap::new();
        dynamic_args.insert("image".to_string(), "element".to_string());
        let ic = ImageCollection::from_id("MOD09GA");
        let err = ic
            .map_with(
                |img| img,
                MapOptions {
                    dynamic_args: Some(dynamic_args),
                    ..MapOptions::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::Construction(_)));
    }

    #[test]
    fn test_display_uses_readable_form() {
        let fc = FeatureCollection::from_id("TIGER/2018/States", None);
        let rendered = fc.to_string();
        assert!(rendered.starts_with("FeatureCollection("));
        assert!(rendered.contains("TIGER/2018/States"));
    }
}
