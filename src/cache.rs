//! Short-lived per-lot snapshot cache for bid reconciliation.
//!
//! Exists for one purpose: after a locally-placed bid, a concurrent REST
//! re-fetch of the same lot must not redisplay a price read *before* the bid
//! command went out. The entry for a lot is invalidated pre-emptively when a
//! bid is sent, forcing the next read to miss and re-fetch fresh data.
//!
//! Never a source of truth — the session controller's applied-event state
//! always wins when both are available.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::protocol::{LotId, LotSnapshot};

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

/// A TTL'd map of lot snapshots keyed by lot id.
///
/// Time is injected (`now: Instant`) rather than read internally so expiry
/// behavior is testable without real clocks.
#[derive(Debug)]
pub struct ReconciliationCache {
    ttl: Duration,
    entries: HashMap<LotId, (LotSnapshot, Instant)>,
}

impl Default for ReconciliationCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ReconciliationCache {
    /// Create a cache whose entries expire `ttl` after insertion.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Store a snapshot for a lot, stamped at `now`. Replaces any prior entry.
    pub fn insert(&mut self, lot_id: LotId, snapshot: LotSnapshot, now: Instant) {
        self.entries.insert(lot_id, (snapshot, now));
    }

    /// The cached snapshot for a lot, if present and not expired.
    ///
    /// Expired entries are removed on access.
    pub fn get(&mut self, lot_id: &str, now: Instant) -> Option<&LotSnapshot> {
        if let Some((_, stored_at)) = self.entries.get(lot_id) {
            if now.saturating_duration_since(*stored_at) >= self.ttl {
                self.entries.remove(lot_id);
                return None;
            }
        }
        self.entries.get(lot_id).map(|(snap, _)| snap)
    }

    /// Force the next [`get`](Self::get) for this lot to miss.
    pub fn invalidate(&mut self, lot_id: &str) {
        if self.entries.remove(lot_id).is_some() {
            tracing::debug!(lot_id, "reconciliation cache entry invalidated");
        }
    }

    /// Drop every entry. Used on session teardown.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::Lot;

    fn snapshot(lot_id: &str, price: u64) -> LotSnapshot {
        LotSnapshot {
            lot: Lot {
                lot_id: lot_id.into(),
                lot_number: 1,
                current_price: price,
                bid_count: 0,
                reserve_price: None,
                is_reserve_met: false,
                min_pre_bid: 0,
            },
            details: None,
        }
    }

    #[test]
    fn hit_within_ttl() {
        let now = Instant::now();
        let mut cache = ReconciliationCache::new(Duration::from_secs(5));
        cache.insert("L1".into(), snapshot("L1", 5_000), now);

        let hit = cache.get("L1", now + Duration::from_secs(4)).unwrap();
        assert_eq!(hit.lot.current_price, 5_000);
    }

    #[test]
    fn miss_after_ttl() {
        let now = Instant::now();
        let mut cache = ReconciliationCache::new(Duration::from_secs(5));
        cache.insert("L1".into(), snapshot("L1", 5_000), now);

        assert!(cache.get("L1", now + Duration::from_secs(5)).is_none());
        // The expired entry is gone, not resurrected by an earlier `now`.
        assert!(cache.get("L1", now).is_none());
    }

    #[test]
    fn invalidate_forces_miss_before_ttl() {
        let now = Instant::now();
        let mut cache = ReconciliationCache::default();
        cache.insert("L1".into(), snapshot("L1", 5_000), now);

        cache.invalidate("L1");
        assert!(cache.get("L1", now).is_none());
    }

    #[test]
    fn invalidate_unknown_lot_is_a_noop() {
        let mut cache = ReconciliationCache::default();
        cache.invalidate("never-seen");
    }

    #[test]
    fn insert_replaces_stale_entry_and_timestamp() {
        let now = Instant::now();
        let mut cache = ReconciliationCache::new(Duration::from_secs(5));
        cache.insert("L1".into(), snapshot("L1", 5_000), now);
        cache.insert("L1".into(), snapshot("L1", 5_500), now + Duration::from_secs(4));

        // Fresh timestamp: still live 8s after the original insert.
        let hit = cache.get("L1", now + Duration::from_secs(8)).unwrap();
        assert_eq!(hit.lot.current_price, 5_500);
    }

    #[test]
    fn entries_are_per_lot() {
        let now = Instant::now();
        let mut cache = ReconciliationCache::default();
        cache.insert("L1".into(), snapshot("L1", 5_000), now);
        cache.insert("L2".into(), snapshot("L2", 9_000), now);

        cache.invalidate("L1");
        assert!(cache.get("L1", now).is_none());
        assert_eq!(cache.get("L2", now).unwrap().lot.current_price, 9_000);
    }

    #[test]
    fn clear_drops_everything() {
        let now = Instant::now();
        let mut cache = ReconciliationCache::default();
        cache.insert("L1".into(), snapshot("L1", 1), now);
        cache.insert("L2".into(), snapshot("L2", 2), now);
        cache.clear();
        assert!(cache.get("L1", now).is_none());
        assert!(cache.get("L2", now).is_none());
    }
}
