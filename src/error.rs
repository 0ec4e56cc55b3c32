use thiserror::Error;

/// Errors raised while building or encoding algorithm graphs.
///
/// Construction and serialization failures are synchronous and fail fast
/// at the call that triggered them. Remote failures are surfaced opaquely
/// from the transport port; this crate never interprets them.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("construction: {0}")]
    Construction(String),

    #[error("cyclic graph detected while serializing (node '{0}')")]
    CyclicGraph(String),

    #[error("dangling reference to scope id {0}")]
    DanglingReference(u64),

    #[error("malformed graph payload: {0}")]
    MalformedGraph(String),

    #[error("remote: {0}")]
    Remote(#[from] anyhow::Error),
}

impl GraphError {
    /// Shorthand for a construction failure.
    pub fn construction(msg: impl Into<String>) -> Self {
        Self::Construction(msg.into())
    }

    /// Shorthand for a malformed-payload failure during decode.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedGraph(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
