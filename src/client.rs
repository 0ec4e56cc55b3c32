//! Explicit session configuration and the transport port.
//!
//! Graph construction itself needs no session state; the client exists
//! for the one asynchronous boundary in the system — submitting a
//! serialized graph for remote evaluation. The concrete transport
//! (HTTP, auth, retries) lives behind the [`Transport`] trait and is out
//! of scope here; this crate never inspects credentials or interprets
//! remote failures.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::collection::{FeatureCollection, ImageCollection};
use crate::error::Result;
use crate::image::Image;
use crate::node::Node;
use crate::serializer::{self, SerializedGraph};

/// Session configuration, passed explicitly instead of a global
/// initialization singleton.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the remote evaluation API.
    pub api_base: String,
    /// Optional per-request deadline, seconds.
    pub deadline_secs: Option<u64>,
}

impl ClientConfig {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            deadline_secs: None,
        }
    }

    pub fn with_deadline_secs(mut self, secs: u64) -> Self {
        self.deadline_secs = Some(secs);
        self
    }
}

/// Transport port: submits a serialized graph and returns the service's
/// JSON result, or an opaque remote error. Implemented outside this
/// crate.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn submit(&self, config: &ClientConfig, payload: &SerializedGraph) -> Result<Value>;
}

/// Handle combining a session configuration with a transport.
#[derive(Clone)]
pub struct Client {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
}

impl Client {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ── Wrapper factories ──────────────────────────────────────────

    pub fn image(&self, id: &str) -> Image {
        Image::from_id(id)
    }

    pub fn image_collection(&self, id: &str) -> ImageCollection {
        ImageCollection::from_id(id)
    }

    pub fn feature_collection(&self, id: &str, geo_column: Option<&str>) -> FeatureCollection {
        FeatureCollection::from_id(id, geo_column)
    }

    // ── Remote evaluation ──────────────────────────────────────────

    /// Serialize a graph and submit it for evaluation. Construction and
    /// serialization errors surface synchronously before anything is
    /// sent; remote errors come back opaquely from the transport.
    pub async fn get_info(&self, root: &Arc<Node>) -> Result<Value> {
        let payload = serializer::serialize(root)?;
        debug!(
            scope_entries = payload.scope().len(),
            api_base = %self.config.api_base,
            "submitting algorithm graph"
        );
        self.transport.submit(&self.config, &payload).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
