//! In-memory latest-state cache, one slot per user per stream.
//!
//! Sync cycles can deliver readings out of order across reconnects, so a
//! slot only moves forward in time: an update older than the cached entry is
//! ignored.

use std::collections::HashMap;

use crate::store::batteries::BatteryRecord;
use crate::store::locations::LocationRecord;

#[derive(Default)]
pub struct LatestCache {
    locations: HashMap<i64, LocationRecord>,
    batteries: HashMap<i64, BatteryRecord>,
}

impl LatestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the record is older than the cached one.
    pub fn update_location(&mut self, record: LocationRecord) -> bool {
        match self.locations.get(&record.user_id) {
            Some(cached) if cached.timestamp > record.timestamp => false,
            _ => {
                self.locations.insert(record.user_id, record);
                true
            }
        }
    }

    pub fn update_battery(&mut self, record: BatteryRecord) -> bool {
        match self.batteries.get(&record.user_id) {
            Some(cached) if cached.timestamp > record.timestamp => false,
            _ => {
                self.batteries.insert(record.user_id, record);
                true
            }
        }
    }

    pub fn location(&self, user_id: i64) -> Option<&LocationRecord> {
        self.locations.get(&user_id)
    }

    pub fn battery(&self, user_id: i64) -> Option<&BatteryRecord> {
        self.batteries.get(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(user_id: i64, timestamp: i64) -> LocationRecord {
        LocationRecord {
            user_id,
            latitude: 52.0,
            longitude: 4.0,
            address: String::new(),
            accuracy: 5.0,
            timestamp,
        }
    }

    #[test]
    fn stale_update_does_not_regress_cache() {
        let mut cache = LatestCache::new();
        assert!(cache.update_location(location(1, 200)));
        // A late-arriving older reading is dropped.
        assert!(!cache.update_location(location(1, 100)));
        assert_eq!(cache.location(1).unwrap().timestamp, 200);
        // Equal timestamps overwrite (re-delivery of the same reading).
        assert!(cache.update_location(location(1, 200)));
    }

    #[test]
    fn slots_are_per_user() {
        let mut cache = LatestCache::new();
        cache.update_location(location(1, 500));
        cache.update_location(location(2, 100));
        assert_eq!(cache.location(1).unwrap().timestamp, 500);
        assert_eq!(cache.location(2).unwrap().timestamp, 100);
        assert!(cache.location(3).is_none());
    }
}
