//! # Relevance Filter
//!
//! Decides whether an event belongs to a session's subscription. Built once
//! when the session opens and consulted by both the change listener (to skip
//! irrelevant notifications) and the snapshot builder.

use std::fmt;
use std::sync::Arc;

use crate::model::{Event, ObjectRef};

type Predicate = dyn Fn(&Event) -> bool + Send + Sync;

#[derive(Clone)]
enum Scope {
    /// Every event in the subscribed namespace.
    All,
    /// Events whose involved object has this kind and uid.
    Object { kind: String, uid: String },
    /// Membership test supplied by a group-filter collaborator.
    Custom { label: String, predicate: Arc<Predicate> },
}

/// Cheap to clone; clones share the same predicate.
#[derive(Clone)]
pub struct RelevanceFilter {
    scope: Scope,
}

impl RelevanceFilter {
    pub fn all() -> Self {
        Self { scope: Scope::All }
    }

    /// Matches events recorded against exactly one object.
    pub fn object(kind: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            scope: Scope::Object {
                kind: kind.into(),
                uid: uid.into(),
            },
        }
    }

    pub fn for_object(object: &ObjectRef) -> Self {
        Self::object(object.kind.clone(), object.uid.clone())
    }

    /// Wraps an arbitrary predicate. `label` only shows up in logs.
    pub fn from_fn<F>(label: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self {
            scope: Scope::Custom {
                label: label.into(),
                predicate: Arc::new(predicate),
            },
        }
    }

    /// Group scope with the instance selector applied. A selected instance
    /// replaces the group predicate entirely.
    pub fn narrowed(group_filter: RelevanceFilter, instance: Option<&ObjectRef>, instance_kind: &str) -> Self {
        match instance {
            Some(instance) => Self::object(instance_kind, instance.uid.clone()),
            None => group_filter,
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        match &self.scope {
            Scope::All => true,
            Scope::Object { kind, uid } => {
                event.involved_object.kind == *kind && event.involved_object.uid == *uid
            }
            Scope::Custom { predicate, .. } => predicate(event),
        }
    }
}

impl fmt::Debug for RelevanceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::All => write!(f, "RelevanceFilter(all)"),
            Scope::Object { kind, uid } => write!(f, "RelevanceFilter({}:{})", kind, uid),
            Scope::Custom { label, .. } => write!(f, "RelevanceFilter({})", label),
        }
    }
}
