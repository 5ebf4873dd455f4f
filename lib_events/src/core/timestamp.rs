//! # Timestamp Resolution
//!
//! Events carry up to three timestamps and producers fill them in
//! inconsistently. Ordering uses the first one present, in this order:
//! explicit event time, last observed, first observed. An event with none of
//! them sorts as "now", which differs from call to call.

use chrono::{DateTime, Utc};

use crate::model::Event;

/// Best available ordering instant for `event`.
pub fn resolve(event: &Event) -> DateTime<Utc> {
    event
        .event_time
        .or(event.last_timestamp)
        .or(event.first_timestamp)
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectRef;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn bare() -> Event {
        Event::new("e", ObjectRef::new("Pod", "ns", "p", "uid"), "msg")
    }

    #[test]
    fn test_event_time_wins() {
        let e = bare()
            .with_event_time(at(30))
            .with_last_timestamp(at(20))
            .with_first_timestamp(at(10));
        assert_eq!(resolve(&e), at(30));
    }

    #[test]
    fn test_last_observed_before_first_observed() {
        let e = bare().with_last_timestamp(at(20)).with_first_timestamp(at(10));
        assert_eq!(resolve(&e), at(20));
    }

    #[test]
    fn test_only_first_observed() {
        let e = bare().with_first_timestamp(at(10));
        assert_eq!(resolve(&e), at(10));
    }

    #[test]
    fn test_no_timestamps_resolves_to_now() {
        let e = bare();
        let before = Utc::now();
        let resolved = resolve(&e);
        let after = Utc::now();
        assert!(resolved >= before && resolved <= after);
    }
}
