//! geoexpr: client-side algorithm-graph builder for a remote geospatial
//! analysis service.
//!
//! This crate contains pure graph construction with NO compute:
//! - Node model (Constant, Variable, Reference, Invocation, containers)
//! - Fluent wrappers (Image, Feature, FeatureCollection, ImageCollection)
//! - Canonical, deduplicated serialization (and the matching decoder)
//! - Per-element map combinator with symbolic function capture
//! - Explicit session configuration and the transport port
//!
//! Everything an `invoke` call builds is a description of a deferred
//! remote computation; execution happens entirely on the service side.
//! The serialized form is canonical — the service uses the bytes as a
//! cache/idempotency key.

pub mod client;
pub mod collection;
pub mod error;
pub mod feature;
pub mod image;
pub mod node;
pub mod serializer;

// Re-export commonly used types
pub use client::{Client, ClientConfig, Transport};
pub use collection::{Collection, ElementKind, FeatureCollection, ImageCollection, MapOptions};
pub use error::{GraphError, Result};
pub use feature::Feature;
pub use image::Image;
pub use node::{invoke, Args, IntoNode, Node};
pub use serializer::{
    deserialize, serialize, to_readable_string, to_readable_value, SerializedGraph,
};
