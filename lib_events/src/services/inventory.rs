//! # In-Memory Cluster Inventory
//!
//! Resolves request targets against a fixed picture of each cluster and
//! decides group membership. An instance belongs to a group when it lives in
//! the group's namespace and its `group_label` label names the group.
//!
//! The inventory can be seeded from a JSON file shaped like [`InventoryFile`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};

use super::{GroupFilterFactory, MemoryEventCache, TargetResolver};
use crate::core::filter::RelevanceFilter;
use crate::error::{CacheError, SetupError};
use crate::model::{Event, GroupRef, ResolvedInstance};

pub const DEFAULT_GROUP_LABEL: &str = "app";
pub const DEFAULT_NAMESPACE: &str = "default";

fn default_group_kind() -> String {
    "Deployment".to_string()
}

/// A group as written in an inventory file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub namespace: String,
    pub name: String,
    #[serde(default = "default_group_kind")]
    pub kind: String,
    #[serde(default)]
    pub uid: String,
}

/// One cluster in an inventory file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub name: String,
    #[serde(default)]
    pub instances: Vec<ResolvedInstance>,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
    /// Events to preload into the informer cache.
    #[serde(default)]
    pub events: Vec<Event>,
}

/// Top level of an inventory file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryFile {
    #[serde(default)]
    pub clusters: Vec<ClusterSpec>,
}

#[derive(Debug, Default)]
struct ClusterInventory {
    /// Keyed by uid.
    instances: HashMap<String, ResolvedInstance>,
    /// Keyed by `(namespace, name)`.
    groups: HashMap<(String, String), GroupSpec>,
}

type Clusters = Arc<RwLock<HashMap<String, ClusterInventory>>>;

/// Cheap to clone; clones share the same inventory.
#[derive(Debug, Clone)]
pub struct MemoryInventory {
    clusters: Clusters,
    group_label: String,
    default_namespace: String,
}

impl Default for MemoryInventory {
    fn default() -> Self {
        Self::new(DEFAULT_GROUP_LABEL, DEFAULT_NAMESPACE)
    }
}

impl MemoryInventory {
    pub fn new(group_label: impl Into<String>, default_namespace: impl Into<String>) -> Self {
        Self {
            clusters: Arc::new(RwLock::new(HashMap::new())),
            group_label: group_label.into(),
            default_namespace: default_namespace.into(),
        }
    }

    /// Adds every cluster, instance and group of `file`. Events are ignored
    /// here; they belong to the informer cache.
    pub fn load(&self, file: &InventoryFile) {
        for cluster in &file.clusters {
            self.add_cluster(&cluster.name);
            for instance in &cluster.instances {
                self.upsert_instance(&cluster.name, instance.clone());
            }
            for group in &cluster.groups {
                self.upsert_group(&cluster.name, group.clone());
            }
        }
    }

    pub fn add_cluster(&self, cluster: &str) {
        let mut clusters = self.clusters.write().unwrap_or_else(PoisonError::into_inner);
        clusters.entry(cluster.to_string()).or_default();
    }

    pub fn upsert_instance(&self, cluster: &str, instance: ResolvedInstance) {
        let mut clusters = self.clusters.write().unwrap_or_else(PoisonError::into_inner);
        clusters
            .entry(cluster.to_string())
            .or_default()
            .instances
            .insert(instance.object.uid.clone(), instance);
    }

    pub fn upsert_group(&self, cluster: &str, group: GroupSpec) {
        let mut clusters = self.clusters.write().unwrap_or_else(PoisonError::into_inner);
        clusters
            .entry(cluster.to_string())
            .or_default()
            .groups
            .insert((group.namespace.clone(), group.name.clone()), group);
    }

    pub fn cluster_names(&self) -> Vec<String> {
        let clusters = self.clusters.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = clusters.keys().cloned().collect();
        names.sort();
        names
    }

    fn find_instance(&self, cluster: &str, namespace: &str, name: &str) -> Result<ResolvedInstance, SetupError> {
        let clusters = self.clusters.read().unwrap_or_else(PoisonError::into_inner);
        let inventory = clusters.get(cluster).ok_or_else(|| not_found("cluster", cluster))?;
        inventory
            .instances
            .values()
            .find(|i| i.object.namespace == namespace && i.object.name == name)
            .cloned()
            .ok_or_else(|| not_found("instance", &format!("{}/{}", namespace, name)))
    }

    fn find_group(&self, cluster: &str, namespace: Option<&str>, group: &str) -> Result<GroupRef, SetupError> {
        let namespace = namespace.unwrap_or(&self.default_namespace);
        let clusters = self.clusters.read().unwrap_or_else(PoisonError::into_inner);
        let inventory = clusters.get(cluster).ok_or_else(|| not_found("cluster", cluster))?;
        let spec = inventory
            .groups
            .get(&(namespace.to_string(), group.to_string()))
            .ok_or_else(|| not_found("group", &format!("{}/{}", namespace, group)))?;
        Ok(GroupRef {
            cluster: cluster.to_string(),
            namespace: spec.namespace.clone(),
            name: spec.name.clone(),
            kind: spec.kind.clone(),
            uid: spec.uid.clone(),
        })
    }
}

/// Loads `file` into both the inventory and the informer cache. Returns the
/// number of events preloaded.
pub fn seed(file: &InventoryFile, inventory: &MemoryInventory, cache: &MemoryEventCache) -> Result<usize, CacheError> {
    inventory.load(file);
    let mut loaded = 0;
    for cluster in &file.clusters {
        cache.add_cluster(cluster.name.clone());
        for event in &cluster.events {
            cache.upsert(&cluster.name, event.clone())?;
            loaded += 1;
        }
    }
    log::info!(
        "inventory seeded: {} clusters, {} events",
        file.clusters.len(),
        loaded
    );
    Ok(loaded)
}

fn not_found(kind: &str, name: &str) -> SetupError {
    SetupError::NotFound {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

/// Membership test evaluated against the live inventory, so instances added
/// after the session opened are picked up.
fn group_predicate(clusters: Clusters, group: GroupRef, label: String) -> impl Fn(&Event) -> bool + Send + Sync {
    move |event: &Event| {
        let object = &event.involved_object;
        if object.kind == group.kind && object.uid == group.uid {
            return true;
        }
        if object.namespace != group.namespace {
            return false;
        }
        let clusters = clusters.read().unwrap_or_else(PoisonError::into_inner);
        clusters
            .get(&group.cluster)
            .and_then(|inventory| inventory.instances.get(&object.uid))
            .is_some_and(|instance| {
                instance.object.kind == object.kind
                    && instance.labels.get(&label).map(String::as_str) == Some(group.name.as_str())
            })
    }
}

impl TargetResolver for MemoryInventory {
    fn resolve_cluster<'a>(&'a self, cluster: &'a str) -> BoxFuture<'a, Result<(), SetupError>> {
        let clusters = self.clusters.read().unwrap_or_else(PoisonError::into_inner);
        let result = if clusters.contains_key(cluster) {
            Ok(())
        } else {
            Err(not_found("cluster", cluster))
        };
        future::ready(result).boxed()
    }

    fn resolve_instance<'a>(
        &'a self,
        cluster: &'a str,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<ResolvedInstance, SetupError>> {
        future::ready(self.find_instance(cluster, namespace, name)).boxed()
    }

    fn resolve_group<'a>(
        &'a self,
        cluster: &'a str,
        namespace: Option<&'a str>,
        group: &'a str,
    ) -> BoxFuture<'a, Result<GroupRef, SetupError>> {
        future::ready(self.find_group(cluster, namespace, group)).boxed()
    }
}

impl GroupFilterFactory for MemoryInventory {
    fn make_filter<'a>(
        &'a self,
        group: &'a GroupRef,
        _instance: Option<&'a ResolvedInstance>,
    ) -> BoxFuture<'a, Result<RelevanceFilter, SetupError>> {
        let predicate = group_predicate(Arc::clone(&self.clusters), group.clone(), self.group_label.clone());
        let filter = RelevanceFilter::from_fn(format!("group:{}/{}", group.namespace, group.name), predicate);
        future::ready(Ok(filter)).boxed()
    }

    fn owns_instance(&self, group: &GroupRef, instance: &ResolvedInstance) -> bool {
        instance.object.namespace == group.namespace
            && instance.labels.get(&self.group_label).map(String::as_str) == Some(group.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectRef;

    const INVENTORY: &str = r#"{
        "clusters": [{
            "name": "alpha",
            "instances": [
                {"object": {"kind": "Pod", "namespace": "prod", "name": "web-1", "uid": "p-1"}, "labels": {"app": "web"}},
                {"object": {"kind": "Pod", "namespace": "prod", "name": "db-1", "uid": "p-9"}, "labels": {"app": "db"}}
            ],
            "groups": [{"namespace": "prod", "name": "web", "uid": "d-1"}],
            "events": [{
                "metadata": {"name": "e1", "namespace": "prod"},
                "involvedObject": {"kind": "Pod", "namespace": "prod", "name": "web-1", "uid": "p-1"},
                "message": "pulled"
            }]
        }]
    }"#;

    fn loaded() -> MemoryInventory {
        let file: InventoryFile = serde_json::from_str(INVENTORY).unwrap();
        let inventory = MemoryInventory::default();
        inventory.load(&file);
        inventory
    }

    #[tokio::test]
    async fn test_resolves_known_targets() {
        let inventory = loaded();
        assert!(inventory.resolve_cluster("alpha").await.is_ok());
        assert!(matches!(
            inventory.resolve_cluster("beta").await,
            Err(SetupError::NotFound { .. })
        ));

        let pod = inventory.resolve_instance("alpha", "prod", "web-1").await.unwrap();
        assert_eq!(pod.object.uid, "p-1");

        let group = inventory.resolve_group("alpha", Some("prod"), "web").await.unwrap();
        assert_eq!(group.kind, "Deployment");
        assert!(inventory.owns_instance(&group, &pod));

        let db = inventory.resolve_instance("alpha", "prod", "db-1").await.unwrap();
        assert!(!inventory.owns_instance(&group, &db));
    }

    #[tokio::test]
    async fn test_missing_group_namespace_uses_default() {
        let inventory = loaded();
        let err = inventory.resolve_group("alpha", None, "web").await.unwrap_err();
        assert_eq!(err.to_string(), "group default/web not found");
    }

    #[tokio::test]
    async fn test_group_filter_follows_labels() {
        let inventory = loaded();
        let group = inventory.resolve_group("alpha", Some("prod"), "web").await.unwrap();
        let filter = inventory.make_filter(&group, None).await.unwrap();

        let on_pod = Event::new("e1", ObjectRef::new("Pod", "prod", "web-1", "p-1"), "pulled");
        let on_group = Event::new("e2", ObjectRef::new("Deployment", "prod", "web", "d-1"), "scaled");
        let on_db = Event::new("e3", ObjectRef::new("Pod", "prod", "db-1", "p-9"), "pulled");
        assert!(filter.matches(&on_pod));
        assert!(filter.matches(&on_group));
        assert!(!filter.matches(&on_db));

        // Instances added later join the group without a new filter.
        let mut labels = std::collections::BTreeMap::new();
        labels.insert("app".to_string(), "web".to_string());
        inventory.upsert_instance(
            "alpha",
            ResolvedInstance {
                object: ObjectRef::new("Pod", "prod", "web-2", "p-2"),
                labels,
            },
        );
        let on_new_pod = Event::new("e4", ObjectRef::new("Pod", "prod", "web-2", "p-2"), "started");
        assert!(filter.matches(&on_new_pod));
    }

    #[tokio::test]
    async fn test_seed_preloads_cache() {
        let file: InventoryFile = serde_json::from_str(INVENTORY).unwrap();
        let inventory = MemoryInventory::default();
        let cache = MemoryEventCache::default();

        assert_eq!(seed(&file, &inventory, &cache).unwrap(), 1);
        assert_eq!(inventory.cluster_names(), vec!["alpha".to_string()]);
        assert!(cache.has_cluster("alpha"));
    }
}
