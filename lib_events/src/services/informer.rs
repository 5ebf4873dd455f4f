//! # In-Memory Event Informer
//!
//! One store per `(cluster, namespace)`, shared by every session watching that
//! namespace. Each store keeps the current events keyed by record name and
//! fans typed [`CacheChange`]s out over a `broadcast` channel. Subscriptions
//! are reference counted so callers can see which informers are in use.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use tokio::sync::broadcast;

use super::{CacheChange, CacheSubscription, EventCache, EventLister, SubscriptionGuard};
use crate::error::CacheError;
use crate::model::Event;

/// Buffered notifications per namespace before slow subscribers start lagging.
const CHANGE_BUFFER: usize = 256;

type StoreKey = (String, String);

/// Current contents of one namespace.
pub struct NamespaceStore {
    name: String,
    events: RwLock<BTreeMap<String, Arc<Event>>>,
    changes: broadcast::Sender<CacheChange>,
    stopped: AtomicBool,
}

impl NamespaceStore {
    fn new(cluster: &str, namespace: &str) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            name: format!("{}/{}", cluster, namespace),
            events: RwLock::new(BTreeMap::new()),
            changes,
            stopped: AtomicBool::new(false),
        }
    }

    fn apply(&self, change: &CacheChange) {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        match change {
            CacheChange::Added(e) => {
                events.insert(e.key().to_string(), Arc::clone(e));
            }
            CacheChange::Updated { new, .. } => {
                events.insert(new.key().to_string(), Arc::clone(new));
            }
            CacheChange::Deleted(e) => {
                events.remove(e.key());
            }
        }
    }

    /// Inserts `event` and reports what it replaced, under one write lock.
    fn upsert(&self, event: Arc<Event>) -> CacheChange {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        match events.insert(event.key().to_string(), Arc::clone(&event)) {
            Some(old) => CacheChange::Updated { old, new: event },
            None => CacheChange::Added(event),
        }
    }

    fn publish(&self, change: CacheChange) {
        log::debug!("informer {} {} {}", self.name, change.verb(), change.object().key());
        // No receivers is fine: nobody is watching this namespace yet.
        let _ = self.changes.send(change);
    }
}

impl EventLister for NamespaceStore {
    fn list(&self) -> Result<Vec<Arc<Event>>, CacheError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(CacheError::Stopped(self.name.clone()));
        }
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        Ok(events.values().cloned().collect())
    }
}

/// # Memory Event Cache
///
/// Cheap to clone; clones share the same stores.
#[derive(Clone, Default)]
pub struct MemoryEventCache {
    clusters: Arc<RwLock<HashSet<String>>>,
    stores: Arc<RwLock<HashMap<StoreKey, Arc<NamespaceStore>>>>,
    subscribers: Arc<Mutex<HashMap<StoreKey, u32>>>,
}

impl MemoryEventCache {
    pub fn new<I, S>(clusters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cache = Self::default();
        {
            let mut known = cache.clusters.write().unwrap_or_else(PoisonError::into_inner);
            known.extend(clusters.into_iter().map(Into::into));
        }
        cache
    }

    pub fn add_cluster(&self, cluster: impl Into<String>) {
        let mut known = self.clusters.write().unwrap_or_else(PoisonError::into_inner);
        known.insert(cluster.into());
    }

    pub fn has_cluster(&self, cluster: &str) -> bool {
        let known = self.clusters.read().unwrap_or_else(PoisonError::into_inner);
        known.contains(cluster)
    }

    fn store(&self, cluster: &str, namespace: &str) -> Arc<NamespaceStore> {
        let key = (cluster.to_string(), namespace.to_string());
        {
            let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(store) = stores.get(&key) {
                return Arc::clone(store);
            }
        }
        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            stores
                .entry(key)
                .or_insert_with(|| Arc::new(NamespaceStore::new(cluster, namespace))),
        )
    }

    /// Applies a change to the namespace named by the event and notifies
    /// every subscriber of that namespace.
    pub fn apply(&self, cluster: &str, change: CacheChange) -> Result<(), CacheError> {
        let namespace = change.object().metadata.namespace.clone();
        if !self.has_cluster(cluster) {
            return Err(CacheError::Unavailable {
                cluster: cluster.to_string(),
                namespace,
            });
        }

        let store = self.store(cluster, &namespace);
        store.apply(&change);
        store.publish(change);
        Ok(())
    }

    /// Adds or replaces an event, emitting `Added` or `Updated` as appropriate.
    pub fn upsert(&self, cluster: &str, event: Event) -> Result<(), CacheError> {
        if !self.has_cluster(cluster) {
            return Err(CacheError::Unavailable {
                cluster: cluster.to_string(),
                namespace: event.metadata.namespace,
            });
        }
        let store = self.store(cluster, &event.metadata.namespace);
        let change = store.upsert(Arc::new(event));
        store.publish(change);
        Ok(())
    }

    /// Removes an event if present.
    pub fn remove(&self, cluster: &str, event: Event) -> Result<(), CacheError> {
        self.apply(cluster, CacheChange::Deleted(Arc::new(event)))
    }

    /// Stops the informer of a namespace; further lists fail.
    pub fn stop(&self, cluster: &str, namespace: &str) {
        self.store(cluster, namespace).stopped.store(true, Ordering::Release);
    }

    /// Number of live subscriptions on a namespace.
    pub fn subscriber_count(&self, cluster: &str, namespace: &str) -> u32 {
        let subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subs.get(&(cluster.to_string(), namespace.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn acquire(&self, cluster: &str, namespace: &str) -> Result<CacheSubscription, CacheError> {
        if !self.has_cluster(cluster) {
            return Err(CacheError::Unavailable {
                cluster: cluster.to_string(),
                namespace: namespace.to_string(),
            });
        }

        let store = self.store(cluster, namespace);
        let changes = store.changes.subscribe();
        let key = (cluster.to_string(), namespace.to_string());

        {
            let mut subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            let count = subs.entry(key.clone()).or_insert(0);
            *count += 1;
            log::info!("informer {} subscribed ({} active)", store.name, count);
        }

        let subscribers = Arc::clone(&self.subscribers);
        let guard = SubscriptionGuard::new(move || {
            let mut subs = subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(count) = subs.get_mut(&key) {
                *count = count.saturating_sub(1);
                log::info!("informer {}/{} released ({} active)", key.0, key.1, count);
                if *count == 0 {
                    subs.remove(&key);
                }
            }
        });

        Ok(CacheSubscription::new(store, changes, guard))
    }
}

impl EventCache for MemoryEventCache {
    fn subscribe<'a>(
        &'a self,
        cluster: &'a str,
        namespace: &'a str,
    ) -> BoxFuture<'a, Result<CacheSubscription, CacheError>> {
        future::ready(self.acquire(cluster, namespace)).boxed()
    }
}
