//! Bounded key → lane table with least-recently-used eviction.
//!
//! Hits are served from a sharded concurrent map and refresh recency with an
//! atomic logical clock, so a hot key never waits on a lock. Inserts and
//! evictions are serialized by an admission mutex: a miss at capacity evicts
//! before it inserts, so the table never holds more than `capacity` keys.
//!
//! The recency index maps stamp → key and may lag behind refreshes. Eviction
//! pops the oldest indexed stamp; a key refreshed since it was indexed is
//! re-indexed under its current stamp instead of being evicted.

use dashmap::DashMap;
use ferrogram_core::AffinityKey;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

struct Slot {
    lane: usize,
    last_used: AtomicU64,
}

/// Sticky assignment of affinity keys to lanes.
pub struct AffinityTable {
    entries: DashMap<AffinityKey, Slot>,
    /// stamp → key, oldest first. Only touched under the lock.
    index: Mutex<BTreeMap<u64, AffinityKey>>,
    size: AtomicUsize,
    capacity: usize,
    clock: AtomicU64,
}

impl AffinityTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            index: Mutex::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lane currently assigned to `key`, without refreshing it.
    pub fn peek(&self, key: &AffinityKey) -> Option<usize> {
        self.entries.get(key).map(|slot| slot.lane)
    }

    /// Returns the lane for `key`, refreshing its recency. On a miss the
    /// least-recently-used entry makes room if the table is full, then the
    /// lane chosen by `assign` is stored.
    ///
    /// `assign` runs under the admission lock and must not touch the table.
    pub fn get_or_assign(&self, key: &AffinityKey, assign: impl FnOnce() -> usize) -> usize {
        if let Some(lane) = self.refresh(key) {
            return lane;
        }

        let mut index = self.index.lock();
        // Another submitter may have admitted the key meanwhile.
        if let Some(lane) = self.refresh(key) {
            return lane;
        }
        while self.len() >= self.capacity {
            if !self.evict_oldest(&mut index) {
                break;
            }
        }

        let lane = assign();
        let stamp = self.tick();
        self.entries.insert(
            key.clone(),
            Slot {
                lane,
                last_used: AtomicU64::new(stamp),
            },
        );
        index.insert(stamp, key.clone());
        self.size.fetch_add(1, Ordering::AcqRel);
        lane
    }

    fn refresh(&self, key: &AffinityKey) -> Option<usize> {
        let slot = self.entries.get(key)?;
        slot.last_used.store(self.tick(), Ordering::Release);
        Some(slot.lane)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Removes the least-recently-used key. Returns `false` if the index is
    /// empty.
    fn evict_oldest(&self, index: &mut BTreeMap<u64, AffinityKey>) -> bool {
        while let Some((stamp, key)) = index.pop_first() {
            let removed = self
                .entries
                .remove_if(&key, |_, slot| slot.last_used.load(Ordering::Acquire) == stamp);
            if removed.is_some() {
                self.size.fetch_sub(1, Ordering::AcqRel);
                tracing::trace!(key = %key, "evicted affinity entry");
                return true;
            }
            // Refreshed since it was indexed.
            if let Some(current) = self
                .entries
                .get(&key)
                .map(|slot| slot.last_used.load(Ordering::Acquire))
            {
                index.insert(current, key);
            }
        }
        false
    }
}
