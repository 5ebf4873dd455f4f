//! # Session Pipeline
//!
//! Everything between a cache change and a frame on the wire, for one session.
//!
//! ## Contained Modules:
//! - **`timestamp`**: picks the instant an event is ordered by.
//! - **`filter`**: decides whether an event belongs to the session.
//! - **`snapshot`**: filters, deduplicates and orders the informer contents.
//! - **`governor`**: counts failed pushes, imposes the cooldown and watches
//!   the failure ceiling.
//! - **`scheduler`**: the single sender task that owns the connection writer.
//! - **`session`**: opens sessions, runs their tasks and tears them down.
//! - **`transport`**: the frame type and sink/stream seams sessions run over.

pub mod filter;
pub mod governor;
pub mod scheduler;
pub mod session;
pub mod snapshot;
pub mod timestamp;
pub mod transport;
