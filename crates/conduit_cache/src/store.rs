//! Concurrent get-or-compute store.
//!
//! Every key owns a slot in a sharded map. A slot moves through
//! `Vacant -> Computing -> Ready`, and ends `Retired` when it is evicted,
//! invalidated, or its computation fails or is abandoned. Only the caller
//! that moves a slot into `Computing` runs the computation; concurrent callers
//! for the same key wait on that slot (condvar for blocking callers, notify
//! for async ones). Callers for other keys never touch the slot, so unrelated
//! keys are not serialized.
//!
//! Failed computations are not cached. The slot is retired and unlinked,
//! waiters restart, and exactly one of them claims a fresh slot.
//!
//! Expired entries are recomputed in place when read. Entries that are never
//! read again are swept every [`PURGE_INTERVAL`] admissions under a TTL
//! policy, or on demand with [`CacheStore::purge_expired`].
//!
//! Lock order: recency index, then map shard, then slot. No path holds a
//! slot lock while touching the map or the recency index. Removing a key from
//! the map and forgetting it in the recency index happen under one hold of
//! the recency lock, so an admission never observes half of the pair.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ahash::{AHashMap, RandomState};
use conduit_core::ConduitResult;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::policy::EvictionPolicy;
use crate::stats::{CacheStats, Counters};

/// Admissions between sweeps of expired entries under a TTL policy
pub const PURGE_INTERVAL: u64 = 64;

struct Entry<V> {
    value: V,
    inserted: Instant,
}

enum SlotState<V> {
    Vacant,
    Computing,
    Ready(Entry<V>),
    Retired,
}

struct Slot<V> {
    state: Mutex<SlotState<V>>,
    ready: Condvar,
    notify: Notify,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Vacant),
            ready: Condvar::new(),
            notify: Notify::new(),
        }
    }

    fn wake_all(&self) {
        self.ready.notify_all();
        self.notify.notify_waiters();
    }

    /// Retire a ready slot; in-flight computations are left alone
    fn retire_if_ready(&self) -> bool {
        let mut state = self.state.lock();
        if matches!(*state, SlotState::Ready(_)) {
            *state = SlotState::Retired;
            true
        } else {
            false
        }
    }

    fn retire_if_expired(&self, ttl: Duration) -> bool {
        let mut state = self.state.lock();
        if matches!(&*state, SlotState::Ready(entry) if entry.inserted.elapsed() >= ttl) {
            *state = SlotState::Retired;
            true
        } else {
            false
        }
    }
}

enum Claim<V> {
    Hit(V),
    Wait,
    Compute,
    Restart,
}

/// Access order of capacity-bounded keys
struct Recency<K> {
    ticks: AHashMap<K, u64>,
    order: BTreeMap<u64, K>,
    clock: u64,
}

impl<K> Recency<K>
where
    K: Eq + Hash + Clone,
{
    fn new() -> Self {
        Self {
            ticks: AHashMap::new(),
            order: BTreeMap::new(),
            clock: 0,
        }
    }

    /// Promote `key` to most recently used if it is tracked
    fn touch(&mut self, key: &K) -> bool {
        match self.ticks.get_mut(key) {
            Some(tick) => {
                self.order.remove(&*tick);
                self.clock += 1;
                *tick = self.clock;
                self.order.insert(self.clock, key.clone());
                true
            }
            None => false,
        }
    }

    fn insert(&mut self, key: &K) {
        if !self.touch(key) {
            self.clock += 1;
            self.ticks.insert(key.clone(), self.clock);
            self.order.insert(self.clock, key.clone());
        }
    }

    fn forget(&mut self, key: &K) {
        if let Some(tick) = self.ticks.remove(key) {
            self.order.remove(&tick);
        }
    }

    fn pop_oldest(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.ticks.remove(&key);
        Some(key)
    }

    fn len(&self) -> usize {
        self.ticks.len()
    }

    fn clear(&mut self) {
        self.ticks.clear();
        self.order.clear();
    }
}

/// Shared, concurrent memo table
pub struct CacheStore<K, V> {
    slots: DashMap<K, Arc<Slot<V>>, RandomState>,
    recency: Mutex<Recency<K>>,
    policy: EvictionPolicy,
    counters: Counters,
    admissions: AtomicU64,
}

impl<K, V> CacheStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty store
    #[must_use]
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            slots: DashMap::with_hasher(RandomState::new()),
            recency: Mutex::new(Recency::new()),
            policy,
            counters: Counters::default(),
            admissions: AtomicU64::new(0),
        }
    }

    /// Eviction policy in force
    #[must_use]
    pub const fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    fn is_expired(&self, entry: &Entry<V>) -> bool {
        self.policy
            .time_to_live()
            .is_some_and(|ttl| entry.inserted.elapsed() >= ttl)
    }

    fn slot_for(&self, key: &K) -> Arc<Slot<V>> {
        if let Some(slot) = self.slots.get(key) {
            return Arc::clone(slot.value());
        }
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Slot::new()));
        Arc::clone(slot.value())
    }

    /// Advance a locked slot for one caller
    fn step(&self, state: &mut SlotState<V>) -> Claim<V> {
        if let SlotState::Ready(entry) = state {
            if !self.is_expired(entry) {
                Counters::bump(&self.counters.hits);
                return Claim::Hit(entry.value.clone());
            }
            Counters::bump(&self.counters.expirations);
            tracing::debug!("cache entry expired, recomputing");
            *state = SlotState::Computing;
            Counters::bump(&self.counters.misses);
            return Claim::Compute;
        }
        match state {
            SlotState::Computing => Claim::Wait,
            SlotState::Retired => Claim::Restart,
            _ => {
                *state = SlotState::Computing;
                Counters::bump(&self.counters.misses);
                Claim::Compute
            }
        }
    }

    /// Drop `slot` from the map if it is still the one stored under `key`
    fn unlink(&self, key: &K, slot: &Arc<Slot<V>>) {
        let mut recency = self.recency.lock();
        if self
            .slots
            .remove_if(key, |_, current| Arc::ptr_eq(current, slot))
            .is_some()
        {
            recency.forget(key);
        }
    }

    fn touch(&self, key: &K) {
        if self.policy.capacity().is_some() {
            self.recency.lock().touch(key);
        }
    }

    /// Track a freshly computed entry and enforce the capacity bound
    fn admit(&self, key: &K, slot: &Arc<Slot<V>>) {
        if self.policy.time_to_live().is_some() {
            let admitted = self.admissions.fetch_add(1, Ordering::Relaxed) + 1;
            if admitted % PURGE_INTERVAL == 0 {
                self.purge_expired();
            }
        }
        let Some(capacity) = self.policy.capacity() else {
            return;
        };

        let mut recency = self.recency.lock();
        let current = self
            .slots
            .get(key)
            .is_some_and(|stored| Arc::ptr_eq(stored.value(), slot));
        if !current {
            return;
        }
        recency.insert(key);
        while recency.len() > capacity {
            let Some(victim) = recency.pop_oldest() else {
                break;
            };
            self.evict(&victim);
        }
    }

    fn evict(&self, victim: &K) {
        let Some(slot) = self.slots.get(victim).map(|stored| Arc::clone(stored.value())) else {
            return;
        };
        if slot.retire_if_ready() {
            self.slots.remove_if(victim, |_, current| Arc::ptr_eq(current, &slot));
            Counters::bump(&self.counters.evictions);
            tracing::debug!("evicted least recently used cache entry");
        }
    }

    /// Return the cached value for `key`, computing it with `compute` at most
    /// once across concurrent callers.
    ///
    /// Blocks while another caller computes the same key. Do not call this
    /// from an async task that shares its thread with the computing task.
    ///
    /// # Errors
    ///
    /// Returns the failure of `compute` when this caller ran it.
    pub fn get_or_compute_blocking<F>(&self, key: K, compute: F) -> ConduitResult<V>
    where
        F: FnOnce() -> ConduitResult<V>,
    {
        let slot = loop {
            let slot = self.slot_for(&key);
            let claim = {
                let mut state = slot.state.lock();
                loop {
                    match self.step(&mut state) {
                        Claim::Wait => slot.ready.wait(&mut state),
                        claim => break claim,
                    }
                }
            };
            match claim {
                Claim::Hit(value) => {
                    tracing::trace!("cache hit");
                    self.touch(&key);
                    return Ok(value);
                }
                Claim::Compute => break slot,
                Claim::Restart => self.unlink(&key, &slot),
                Claim::Wait => {}
            }
        };

        tracing::trace!("cache miss");
        let pending = Pending::new(self, &key, &slot);
        let value = compute()?;
        pending.complete(value.clone());
        Ok(value)
    }

    /// Async form of [`CacheStore::get_or_compute_blocking`]
    ///
    /// Waiting suspends instead of blocking. Dropping the future while it
    /// computes releases the key so another caller can take over.
    ///
    /// # Errors
    ///
    /// Returns the failure of `compute` when this caller ran it.
    pub async fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> ConduitResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ConduitResult<V>>,
    {
        let slot = loop {
            let slot = self.slot_for(&key);
            let notified = slot.notify.notified();
            let claim = {
                let mut state = slot.state.lock();
                self.step(&mut state)
            };
            match claim {
                Claim::Hit(value) => {
                    tracing::trace!("cache hit");
                    self.touch(&key);
                    return Ok(value);
                }
                Claim::Compute => {
                    drop(notified);
                    break slot;
                }
                Claim::Restart => self.unlink(&key, &slot),
                Claim::Wait => notified.await,
            }
        };

        tracing::trace!("cache miss");
        let pending = Pending::new(self, &key, &slot);
        let value = compute().await?;
        pending.complete(value.clone());
        Ok(value)
    }

    /// Live value for `key` without computing
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<V> {
        let slot = self.slots.get(key).map(|stored| Arc::clone(stored.value()))?;
        let state = slot.state.lock();
        match &*state {
            SlotState::Ready(entry) if !self.is_expired(entry) => Some(entry.value.clone()),
            _ => None,
        }
    }

    /// Drop the entry for `key`; returns whether a live entry was dropped
    pub fn invalidate(&self, key: &K) -> bool {
        let mut recency = self.recency.lock();
        let Some((_, slot)) = self.slots.remove(key) else {
            return false;
        };
        recency.forget(key);
        drop(recency);
        slot.retire_if_ready()
    }

    /// Drop every expired entry; returns how many were dropped
    ///
    /// Entries being recomputed are left alone. A no-op without a TTL.
    pub fn purge_expired(&self) -> usize {
        let Some(ttl) = self.policy.time_to_live() else {
            return 0;
        };
        let expired: Vec<(K, Arc<Slot<V>>)> = self
            .slots
            .iter()
            .filter(|stored| stored.value().retire_if_expired(ttl))
            .map(|stored| (stored.key().clone(), Arc::clone(stored.value())))
            .collect();
        for (key, slot) in &expired {
            self.unlink(key, slot);
            Counters::bump(&self.counters.expirations);
        }
        if !expired.is_empty() {
            tracing::debug!(purged = expired.len(), "purged expired cache entries");
        }
        expired.len()
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut recency = self.recency.lock();
        let slots: Vec<Arc<Slot<V>>> = self
            .slots
            .iter()
            .map(|stored| Arc::clone(stored.value()))
            .collect();
        self.slots.clear();
        recency.clear();
        drop(recency);
        for slot in slots {
            slot.retire_if_ready();
        }
    }

    /// Number of live entries
    ///
    /// Visits every slot, so this is linear in the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|stored| {
                matches!(&*stored.value().state.lock(), SlotState::Ready(entry) if !self.is_expired(entry))
            })
            .count()
    }

    /// Whether no live entries exist
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.len())
    }
}

impl<K: Eq + Hash, V> fmt::Debug for CacheStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("policy", &self.policy)
            .field("slots", &self.slots.len())
            .finish_non_exhaustive()
    }
}

/// Claimed computation; releases the slot unless completed
struct Pending<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    store: &'a CacheStore<K, V>,
    key: &'a K,
    slot: &'a Arc<Slot<V>>,
    settled: bool,
}

impl<'a, K, V> Pending<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn new(store: &'a CacheStore<K, V>, key: &'a K, slot: &'a Arc<Slot<V>>) -> Self {
        Self {
            store,
            key,
            slot,
            settled: false,
        }
    }

    fn complete(mut self, value: V) {
        self.settled = true;
        *self.slot.state.lock() = SlotState::Ready(Entry {
            value,
            inserted: Instant::now(),
        });
        self.slot.wake_all();
        self.store.admit(self.key, self.slot);
    }
}

impl<K, V> Drop for Pending<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        tracing::debug!("cache computation failed or was abandoned");
        *self.slot.state.lock() = SlotState::Retired;
        self.slot.wake_all();
        self.store.unlink(self.key, self.slot);
    }
}
