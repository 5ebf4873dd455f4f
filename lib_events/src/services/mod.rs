//! # Collaborator Seams
//!
//! The session pipeline depends on four collaborators it does not implement
//! itself: an authorizer, a target resolver, a group-filter factory and the
//! informer cache. Each is a trait object so the HTTP layer can be wired to
//! real cluster clients or to the in-memory versions in this module.
//!
//! ## Contained Modules:
//! - **`access`**: a static bearer-token authorizer.
//! - **`inventory`**: an in-memory cluster inventory that resolves targets and
//!   builds group filters.
//! - **`informer`**: an in-memory event cache with typed change fan-out and
//!   per-namespace subscriber reference counting.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::broadcast;

use crate::core::filter::RelevanceFilter;
use crate::error::{CacheError, SetupError};
use crate::model::{Caller, Event, GroupRef, ResolvedInstance, SubscriptionTarget};

pub mod access;
pub mod informer;
pub mod inventory;

pub use access::StaticAuthorizer;
pub use informer::MemoryEventCache;
pub use inventory::{InventoryFile, MemoryInventory};

/// Decides whether a caller may open a stream for a target.
pub trait Authorizer: Send + Sync {
    fn can_view<'a>(
        &'a self,
        caller: &'a Caller,
        target: &'a SubscriptionTarget,
    ) -> BoxFuture<'a, Result<(), SetupError>>;
}

/// Looks up the concrete objects a request names.
pub trait TargetResolver: Send + Sync {
    /// Fails with [`SetupError::NotFound`] when the cluster is unknown.
    fn resolve_cluster<'a>(&'a self, cluster: &'a str) -> BoxFuture<'a, Result<(), SetupError>>;

    /// Resolves one instance (a pod) by namespace and name.
    fn resolve_instance<'a>(
        &'a self,
        cluster: &'a str,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<ResolvedInstance, SetupError>>;

    /// Resolves a group. A missing namespace falls back to the resolver's default.
    fn resolve_group<'a>(
        &'a self,
        cluster: &'a str,
        namespace: Option<&'a str>,
        group: &'a str,
    ) -> BoxFuture<'a, Result<GroupRef, SetupError>>;
}

/// Knows which events belong to which group.
pub trait GroupFilterFactory: Send + Sync {
    /// Builds the membership filter for `group`. The session applies the
    /// instance override itself; `instance` is passed for factories that want
    /// to narrow further.
    fn make_filter<'a>(
        &'a self,
        group: &'a GroupRef,
        instance: Option<&'a ResolvedInstance>,
    ) -> BoxFuture<'a, Result<RelevanceFilter, SetupError>>;

    /// Whether `instance` is a member of `group`.
    fn owns_instance(&self, group: &GroupRef, instance: &ResolvedInstance) -> bool;
}

/// Read access to an informer's current contents.
pub trait EventLister: Send + Sync {
    /// Current best-known events, in no particular order.
    fn list(&self) -> Result<Vec<Arc<Event>>, CacheError>;
}

/// Source of per-namespace event informers.
pub trait EventCache: Send + Sync {
    fn subscribe<'a>(
        &'a self,
        cluster: &'a str,
        namespace: &'a str,
    ) -> BoxFuture<'a, Result<CacheSubscription, CacheError>>;
}

/// A typed informer notification.
#[derive(Debug, Clone)]
pub enum CacheChange {
    Added(Arc<Event>),
    Updated { old: Arc<Event>, new: Arc<Event> },
    Deleted(Arc<Event>),
}

impl CacheChange {
    /// The event the change is about (the new version for updates).
    pub fn object(&self) -> &Event {
        match self {
            CacheChange::Added(e) | CacheChange::Deleted(e) => e,
            CacheChange::Updated { new, .. } => new,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            CacheChange::Added(_) => "added",
            CacheChange::Updated { .. } => "updated",
            CacheChange::Deleted(_) => "deleted",
        }
    }
}

/// Releases a cache subscription exactly once, on [`release`](Self::release)
/// or on drop, whichever comes first.
pub struct SubscriptionGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A guard with nothing to release.
    pub fn noop() -> Self {
        Self { release: None }
    }

    pub fn release(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// One session's handle on an informer.
pub struct CacheSubscription {
    pub lister: Arc<dyn EventLister>,
    pub changes: broadcast::Receiver<CacheChange>,
    pub guard: SubscriptionGuard,
}

impl CacheSubscription {
    pub fn new(
        lister: Arc<dyn EventLister>,
        changes: broadcast::Receiver<CacheChange>,
        guard: SubscriptionGuard,
    ) -> Self {
        Self { lister, changes, guard }
    }
}
