//! Error taxonomy shared by every node
//!
//! Errors are surfaced to the caller immediately. Nothing in the workspace
//! retries: sampling is a deterministic function of its request, so reissuing
//! the same request fails the same way.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across burn-nodes
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors raised by nodes, the sampler and the file boundaries
#[derive(Debug, Error)]
pub enum NodeError {
    /// Unknown policy, algorithm, method or choice name
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Numeric input outside its accepted range, or a missing input
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Batch or spatial dimensions that broadcasting cannot reconcile
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Compute resources insufficient for the request; fatal
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Filesystem failure at a loader or saver boundary
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Image decode or encode failure
    #[error("image error at {path}: {message}")]
    Image { path: PathBuf, message: String },
}

impl NodeError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn shape_mismatch(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn image(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Image {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
