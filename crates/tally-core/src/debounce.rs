//! Rate limiting of repeat sightings of the same unknown face.

use crate::types::IdentityKey;
use chrono::{Duration as TimeDelta, NaiveDateTime};
use std::collections::HashMap;
use std::time::Duration;

/// Time-windowed map of identity key → last accepted log time.
///
/// Entries older than `retain_windows` debounce windows are evicted
/// whenever a new sighting is marked, so the map stays proportional to
/// the number of unknown faces seen recently.
#[derive(Debug)]
pub struct DebounceCache {
    window: TimeDelta,
    retain: TimeDelta,
    last_logged: HashMap<IdentityKey, NaiveDateTime>,
}

impl DebounceCache {
    pub fn new(window: Duration, retain_windows: u32) -> Self {
        let window = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
        let retain = window
            .checked_mul(retain_windows.max(1) as i32)
            .unwrap_or(TimeDelta::MAX);
        Self {
            window,
            retain,
            last_logged: HashMap::new(),
        }
    }

    /// True if `key` was accepted less than one window before `now`.
    ///
    /// A clock that moved backwards also suppresses.
    pub fn is_suppressed(&self, key: &IdentityKey, now: NaiveDateTime) -> bool {
        self.last_logged
            .get(key)
            .is_some_and(|&last| now - last < self.window)
    }

    /// Record `now` as the last accepted time for `key`.
    ///
    /// Returns the previous value so a failed write can be rolled back
    /// with [`restore`](Self::restore).
    pub fn mark(&mut self, key: IdentityKey, now: NaiveDateTime) -> Option<NaiveDateTime> {
        let retain = self.retain;
        let before = self.last_logged.len();
        self.last_logged.retain(|_, &mut last| now - last <= retain);
        let evicted = before - self.last_logged.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.last_logged.len(), "evicted stale debounce entries");
        }
        self.last_logged.insert(key, now)
    }

    /// Undo a [`mark`](Self::mark).
    pub fn restore(&mut self, key: IdentityKey, previous: Option<NaiveDateTime>) {
        match previous {
            Some(at) => {
                self.last_logged.insert(key, at);
            }
            None => {
                self.last_logged.remove(&key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.last_logged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_logged.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(secs: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            + TimeDelta::seconds(secs as i64)
    }

    fn key(n: i64) -> IdentityKey {
        IdentityKey::from_raw(vec![n])
    }

    #[test]
    fn test_within_window_is_suppressed() {
        let mut cache = DebounceCache::new(Duration::from_secs(5), 4);
        assert!(!cache.is_suppressed(&key(1), at(0)));
        cache.mark(key(1), at(0));
        assert!(cache.is_suppressed(&key(1), at(3)));
        assert!(!cache.is_suppressed(&key(1), at(5)));
        assert!(!cache.is_suppressed(&key(1), at(6)));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut cache = DebounceCache::new(Duration::from_secs(5), 4);
        cache.mark(key(1), at(0));
        assert!(!cache.is_suppressed(&key(2), at(1)));
    }

    #[test]
    fn test_stale_entries_are_evicted() {
        let mut cache = DebounceCache::new(Duration::from_secs(5), 2);
        cache.mark(key(1), at(0));
        cache.mark(key(2), at(8));
        assert_eq!(cache.len(), 2);
        // key(1) is 11s old > 2 windows; key(2) is 3s old
        cache.mark(key(3), at(11));
        assert_eq!(cache.len(), 2);
        assert!(!cache.is_suppressed(&key(1), at(11)));
        assert!(cache.is_suppressed(&key(2), at(11)));
    }

    #[test]
    fn test_restore_rolls_back_mark() {
        let mut cache = DebounceCache::new(Duration::from_secs(5), 4);
        let prev = cache.mark(key(1), at(0));
        cache.restore(key(1), prev);
        assert!(cache.is_empty());

        cache.mark(key(1), at(0));
        let prev = cache.mark(key(1), at(10));
        cache.restore(key(1), prev);
        assert!(cache.is_suppressed(&key(1), at(2)));
    }
}
