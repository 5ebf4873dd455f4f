//! Error types shared across the session pipeline.
//!
//! The `Display` text of these errors is what clients read in the `message`
//! field of an error envelope, so it stays short and human readable.

use thiserror::Error;

/// Failures while opening a session. Fatal: no background task is started.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SetupError {
    /// The caller may not view the requested target.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The cluster, namespace, resource or group does not exist.
    #[error("{kind} {name} not found")]
    NotFound {
        /// What was looked up (`cluster`, `pod`, `group`, ...).
        kind: String,
        /// The name that failed to resolve.
        name: String,
    },

    /// An explicitly selected instance does not belong to the requested group.
    #[error("{instance} not in group {group}")]
    NotInGroup {
        /// Name of the selected instance.
        instance: String,
        /// Name of the group it was checked against.
        group: String,
    },

    /// The request itself is malformed (missing namespace and so on).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The informer for the target namespace could not be acquired.
    #[error("get event informer: {0}")]
    Informer(#[from] CacheError),
}

/// Errors raised by the event cache collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The informer for this cluster/namespace is not available.
    #[error("informer unavailable for {cluster}/{namespace}")]
    Unavailable {
        /// Cluster name.
        cluster: String,
        /// Namespace name.
        namespace: String,
    },

    /// The informer was stopped while a session still held it.
    #[error("informer for {0} has been stopped")]
    Stopped(String),

    /// Listing the current cache contents failed.
    #[error("list events: {0}")]
    List(String),
}

/// Errors raised by the connection halves.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Writing a frame failed.
    #[error("ws write: {0}")]
    Write(String),

    /// Reading the next frame failed.
    #[error("ws read: {0}")]
    Read(String),

    /// The connection is already closed.
    #[error("ws connection closed")]
    Closed,
}

/// A single failed push attempt. Always transient: counted by the failure
/// governor and reported to the client, never propagated further.
#[derive(Debug, Error)]
pub enum PushError {
    /// The informer could not be listed.
    #[error(transparent)]
    List(#[from] CacheError),

    /// The snapshot could not be encoded.
    #[error("encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    /// The frame could not be written.
    #[error(transparent)]
    Write(#[from] TransportError),
}
