//! # lib_events
//!
//! Streams a filtered, deduplicated and time-ordered view of cluster events to
//! long-lived WebSocket clients. Every push is a full snapshot re-read from a
//! shared informer cache, never a delta.
//!
//! ## Layout
//!
//! - **`model`**: the event record, the response envelope and subscription targets.
//! - **`core`**: the per-session pipeline (timestamp resolution, relevance
//!   filtering, snapshot building, the failure governor, the push scheduler and
//!   the session lifecycle controller).
//! - **`services`**: collaborator seams (authorization, target resolution,
//!   group filters, informer cache) and their in-memory implementations.
//! - **`http`**: axum routes that upgrade requests and hand sockets to sessions.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod error;
pub mod model;
pub mod core;
pub mod services;
#[cfg(feature = "http")]
pub mod http;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export the pieces callers touch most.
pub use error::{CacheError, PushError, SetupError, TransportError};
pub use model::{Event, ObjectRef, SubscriptionTarget, WsResponse};
pub use crate::core::session::{CloseReason, EventStreamService, SessionConfig, SessionReport, SessionState};
