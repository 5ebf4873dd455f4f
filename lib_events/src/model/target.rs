use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::event::ObjectRef;

/// Identity of whoever opened the stream, as far as the authorizer cares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    /// Bearer token taken from the upgrade request, if any.
    pub token: Option<String>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self { token: None }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self { token: Some(token.into()) }
    }
}

/// A single resource, or a whole namespace when `name` is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTarget {
    pub cluster: String,
    pub namespace: String,
    pub name: Option<String>,
}

/// A logical group of resources, optionally narrowed to one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupTarget {
    pub cluster: String,
    /// Namespace of the group; the resolver picks a default when absent.
    pub namespace: Option<String>,
    pub group: String,
    /// Instance selector. When present it overrides group membership.
    pub instance: Option<String>,
}

/// What a session subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionTarget {
    Resource(ResourceTarget),
    Group(GroupTarget),
}

impl SubscriptionTarget {
    pub fn cluster(&self) -> &str {
        match self {
            SubscriptionTarget::Resource(t) => &t.cluster,
            SubscriptionTarget::Group(t) => &t.cluster,
        }
    }
}

impl fmt::Display for SubscriptionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionTarget::Resource(t) => match &t.name {
                Some(name) => write!(f, "{}/{}/{}", t.cluster, t.namespace, name),
                None => write!(f, "{}/{}", t.cluster, t.namespace),
            },
            SubscriptionTarget::Group(t) => {
                write!(f, "{}/group:{}", t.cluster, t.group)?;
                if let Some(instance) = &t.instance {
                    write!(f, "/{}", instance)?;
                }
                Ok(())
            }
        }
    }
}

/// A concrete object returned by the target resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedInstance {
    pub object: ObjectRef,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A group as resolved in a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    pub cluster: String,
    pub namespace: String,
    pub name: String,
    /// Kind of the group object itself, e.g. `Deployment`.
    pub kind: String,
    pub uid: String,
}
