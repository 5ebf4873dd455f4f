//! Data carried through the pipeline: events, targets and the wire envelope.

pub mod envelope;
pub mod event;
pub mod target;

pub use envelope::{WsResponse, WsResponseType};
pub use event::{Event, EventMeta, EventSource, ObjectRef};
pub use target::{Caller, GroupRef, GroupTarget, ResolvedInstance, ResourceTarget, SubscriptionTarget};
