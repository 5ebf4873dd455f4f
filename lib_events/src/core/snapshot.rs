//! # Dedup & Order Engine
//!
//! Turns the informer's unordered contents into the snapshot a session pushes:
//!
//! 1. keep only events the session's [`RelevanceFilter`] accepts;
//! 2. for group sessions, collapse events sharing the same message text;
//! 3. stable-sort ascending by [`resolve`](super::timestamp::resolve).
//!
//! The result is always a full snapshot. Events with equal timestamps keep
//! the relative order the informer listed them in.
//!
//! The dedup key is the free-text message, which is coarse: two distinct
//! events with identical text collapse into the first one listed.

use std::collections::HashSet;
use std::sync::Arc;

use super::filter::RelevanceFilter;
use super::timestamp::resolve;
use crate::model::Event;

/// Messages a group session has already delivered.
///
/// Owned by the session's sender task, so it needs no locking.
#[derive(Debug, Default)]
pub struct SeenSet {
    delivered: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, message: &str) -> bool {
        self.delivered.contains(message)
    }

    /// Records every message of a snapshot that reached the client.
    pub fn mark_delivered(&mut self, snapshot: &Snapshot) {
        for event in &snapshot.events {
            if !self.delivered.contains(&event.message) {
                self.delivered.insert(event.message.clone());
            }
        }
    }
}

/// An ordered snapshot ready to be written.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub events: Vec<Arc<Event>>,
    /// How many events the client has not been sent before. Equal to
    /// `events.len()` for sessions without a seen-set.
    pub fresh: usize,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Filters, deduplicates and orders `raw` into a snapshot.
pub fn build(raw: Vec<Arc<Event>>, filter: &RelevanceFilter, seen: Option<&SeenSet>) -> Snapshot {
    let mut messages: HashSet<&str> = HashSet::new();
    let mut kept: Vec<Arc<Event>> = Vec::with_capacity(raw.len());

    for event in &raw {
        if !filter.matches(event) {
            continue;
        }
        if seen.is_some() && !messages.insert(event.message.as_str()) {
            continue;
        }
        kept.push(Arc::clone(event));
    }

    let fresh = match seen {
        Some(seen) => kept.iter().filter(|e| !seen.contains(&e.message)).count(),
        None => kept.len(),
    };

    // Keys are computed once so an event without timestamps gets a single
    // "now" for the whole sort. `sort_by_cached_key` is stable.
    kept.sort_by_cached_key(|event| resolve(event));

    Snapshot { events: kept, fresh }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectRef;
    use chrono::{TimeZone, Utc};

    fn ev(name: &str, uid: &str, message: &str, secs: i64) -> Arc<Event> {
        Arc::new(
            Event::new(name, ObjectRef::new("Pod", "ns", "pod", uid), message)
                .with_last_timestamp(Utc.timestamp_opt(secs, 0).unwrap()),
        )
    }

    fn names(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.events.iter().map(|e| e.key()).collect()
    }

    #[test]
    fn test_orders_ascending_by_resolved_time() {
        let raw = vec![ev("e1", "a", "one", 5), ev("e2", "a", "two", 3), ev("e3", "a", "three", 4)];
        let snapshot = build(raw, &RelevanceFilter::all(), None);
        assert_eq!(names(&snapshot), vec!["e2", "e3", "e1"]);
    }

    #[test]
    fn test_filter_runs_before_ordering() {
        let raw = vec![ev("e1", "a", "one", 5), ev("e2", "b", "two", 3)];
        let snapshot = build(raw.clone(), &RelevanceFilter::object("Pod", "a"), None);
        assert_eq!(names(&snapshot), vec!["e1"]);

        let nothing = build(raw, &RelevanceFilter::object("Job", "a"), None);
        assert!(nothing.is_empty());
        assert_eq!(nothing.fresh, 0);
    }

    #[test]
    fn test_equal_timestamps_keep_listing_order() {
        let raw = vec![
            ev("x", "a", "m1", 7),
            ev("y", "a", "m2", 7),
            ev("z", "a", "m3", 7),
            ev("w", "a", "m4", 1),
        ];
        let first = build(raw.clone(), &RelevanceFilter::all(), None);
        let second = build(raw, &RelevanceFilter::all(), None);
        assert_eq!(names(&first), vec!["w", "x", "y", "z"]);
        assert_eq!(names(&first), names(&second));
    }

    #[test]
    fn test_seen_set_collapses_identical_messages() {
        let raw = vec![ev("e1", "a", "Back-off restarting", 5), ev("e2", "a", "Back-off restarting", 6)];
        let seen = SeenSet::new();

        let with_seen = build(raw.clone(), &RelevanceFilter::all(), Some(&seen));
        assert_eq!(names(&with_seen), vec!["e1"]);

        let without_seen = build(raw, &RelevanceFilter::all(), None);
        assert_eq!(without_seen.len(), 2);
    }

    #[test]
    fn test_fresh_counts_only_undelivered_messages() {
        let mut seen = SeenSet::new();
        let first = build(vec![ev("e1", "a", "one", 5), ev("e2", "a", "two", 3)], &RelevanceFilter::all(), Some(&seen));
        assert_eq!(first.fresh, 2);
        seen.mark_delivered(&first);

        let second = build(
            vec![ev("e1", "a", "one", 5), ev("e2", "a", "two", 3), ev("e3", "a", "three", 4)],
            &RelevanceFilter::all(),
            Some(&seen),
        );
        assert_eq!(names(&second), vec!["e2", "e3", "e1"]);
        assert_eq!(second.fresh, 1);
    }
}
