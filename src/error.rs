//! Error types surfaced by the router, the factory and the stores.

use crate::response::Body;
use std::collections::HashMap;

/// Errors produced while resolving a request.
#[derive(Debug, thiserror::Error)]
pub enum MockError {
    /// A resolved response carried a non-2xx status.
    #[error(transparent)]
    Status(#[from] StatusError),

    /// The responder itself failed.
    #[error("responder failed: {0}")]
    Handler(#[source] anyhow::Error),

    /// A rule, template or mock definition is malformed.
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// The pass-through handler failed.
    #[error("pass-through handler failed: {0}")]
    PassThrough(#[source] anyhow::Error),

    /// A streaming responder failed mid-stream.
    #[error("stream failed: {0}")]
    Stream(String),
}

impl MockError {
    /// The status error, if this is a simulated HTTP failure.
    pub fn as_status(&self) -> Option<&StatusError> {
        match self {
            MockError::Status(err) => Some(err),
            _ => None,
        }
    }
}

/// A non-success response converted into an error.
///
/// Carries everything the original response had so callers can inspect
/// it exactly as they would a transport-level failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("HTTP {status} {status_text} - url: {url}")]
pub struct StatusError {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Body,
    pub url: String,
}

/// Programming errors in rule or mock definitions. These are never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("parameter `{name}` already bound to `{existing}`, cannot rebind to `{conflicting}`")]
    ConflictingParam {
        name: String,
        existing: String,
        conflicting: String,
    },

    #[error("empty parameter name in template `{0}`")]
    EmptyParamName(String),

    #[error("invalid count pattern `{pattern}`: {reason}")]
    InvalidCountPattern { pattern: String, reason: String },

    #[error("mock generation produced no record")]
    EmptyGeneration,

    #[error("generated record does not fit the target type: {0}")]
    Shape(String),
}
