//! Bounded memory of processed webhook event IDs.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use cellar_core::Clock;

struct Seen {
    order: VecDeque<(String, DateTime<Utc>)>,
    ids: HashSet<String>,
}

/// Remembers event IDs for at most `max_age`, and no more than `capacity`
/// of them; the oldest are forgotten first.
pub struct EventDeduper {
    seen: Mutex<Seen>,
    capacity: usize,
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl EventDeduper {
    pub fn new(capacity: usize, max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            seen: Mutex::new(Seen {
                order: VecDeque::new(),
                ids: HashSet::new(),
            }),
            capacity: capacity.max(1),
            max_age,
            clock,
        }
    }

    /// Record `id`. Returns `false` if it was already seen within the window.
    pub fn check_and_record(&self, id: &str) -> bool {
        let now = self.clock.now();
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());

        let cutoff = now
            .checked_sub_signed(self.max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        while let Some((_, at)) = seen.order.front() {
            if *at > cutoff {
                break;
            }
            if let Some((old, _)) = seen.order.pop_front() {
                seen.ids.remove(&old);
            }
        }

        if seen.ids.contains(id) {
            return false;
        }

        while seen.order.len() >= self.capacity {
            match seen.order.pop_front() {
                Some((old, _)) => {
                    seen.ids.remove(&old);
                }
                None => break,
            }
        }
        seen.ids.insert(id.to_owned());
        seen.order.push_back((id.to_owned(), now));
        true
    }

    /// Drop `id` so a redelivery is processed again.
    pub fn forget(&self, id: &str) {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        if seen.ids.remove(id) {
            seen.order.retain(|(seen_id, _)| seen_id != id);
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_core::ManualClock;
    use chrono::TimeZone;

    fn deduper(capacity: usize) -> (EventDeduper, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap(),
        ));
        let dedupe = EventDeduper::new(capacity, Duration::hours(1), clock.clone());
        (dedupe, clock)
    }

    #[test]
    fn second_sighting_is_a_duplicate() {
        let (dedupe, _) = deduper(10);
        assert!(dedupe.check_and_record("WH-1"));
        assert!(!dedupe.check_and_record("WH-1"));
        assert!(dedupe.check_and_record("WH-2"));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let (dedupe, _) = deduper(2);
        assert!(dedupe.check_and_record("a"));
        assert!(dedupe.check_and_record("b"));
        assert!(dedupe.check_and_record("c"));
        assert_eq!(dedupe.len(), 2);
        assert!(dedupe.check_and_record("a"), "a was evicted");
        assert!(!dedupe.check_and_record("c"));
    }

    #[test]
    fn ids_expire_after_max_age() {
        let (dedupe, clock) = deduper(10);
        assert!(dedupe.check_and_record("WH-1"));
        clock.advance(Duration::minutes(59));
        assert!(!dedupe.check_and_record("WH-1"));
        clock.advance(Duration::minutes(2));
        assert!(dedupe.check_and_record("WH-1"));
    }

    #[test]
    fn forget_allows_reprocessing() {
        let (dedupe, _) = deduper(10);
        assert!(dedupe.check_and_record("WH-1"));
        dedupe.forget("WH-1");
        assert!(dedupe.is_empty());
        assert!(dedupe.check_and_record("WH-1"));
    }
}
