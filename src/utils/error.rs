//! Error types shared across the router, transport and bridge layers.
//!
//! Routing failures are deliberately non-fatal: a bad frame is dropped, an
//! unreachable target is bounced back as a `no_route` message, and the node
//! keeps running. `RouterError` therefore only surfaces at API boundaries
//! (subscribe, config load, transport setup), never as a panic.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("authentication rejected for selfId {0}")]
    AuthRejected(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}
