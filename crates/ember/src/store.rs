//! Unified key space: one map from key to entry, the entry's `expire_at`
//! being the authoritative deadline. Every accessor runs atomic lazy
//! expiry, so a due entry can never be observed by a client regardless of
//! how far behind the active sweep is.

use std::collections::{HashMap, hash_map::Entry as Slot};

use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    clock::MonoMs,
    entry::{Entry, Key, Value, ValueKind},
    expire::{ExpireQueue, SWEEP_QUOTA},
    reclaim::ReclaimHandle,
    zset::SortedSet,
};

/// The key holds a value of a different kind than the operation expects.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("operation against a key holding the wrong kind of value")]
pub struct WrongKind;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IntUpdateError {
    #[error(transparent)]
    WrongKind(#[from] WrongKind),
    #[error("value is not an integer or out of range")]
    NotAnInteger,
    #[error("increment or decrement would overflow")]
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Missing,
    Persistent,
    Remaining(u64),
}

pub struct Store {
    map: HashMap<Key, Entry>,
    expirations: ExpireQueue,
    reclaim: ReclaimHandle,
}

impl Store {
    pub fn new(reclaim: ReclaimHandle) -> Self {
        Self { map: HashMap::new(), expirations: ExpireQueue::default(), reclaim }
    }

    /// Number of entries, counting ones that are due but not yet swept.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Removes the entry now if its deadline has passed. Runs under the same
    /// borrow as the access that follows, which is what makes lazy expiry
    /// atomic with respect to the caller.
    fn evict_if_expired(&mut self, key: &[u8], now: MonoMs) {
        if self.map.get(key).is_some_and(|e| e.is_expired(now)) {
            if let Some(entry) = self.map.remove(key) {
                trace!(key = %String::from_utf8_lossy(key), "store: lazily expired");
                self.reclaim.dispose(entry.value);
            }
        }
    }

    fn live(&mut self, key: &[u8], now: MonoMs) -> Option<&mut Entry> {
        self.evict_if_expired(key, now);
        self.map.get_mut(key)
    }

    pub fn get(&mut self, key: &[u8], now: MonoMs) -> Option<&Value> {
        self.live(key, now).map(|e| &e.value)
    }

    /// Absent and expired collapse to `None`; a live value of another kind
    /// is `WrongKind`.
    pub fn get_typed(
        &mut self,
        key: &[u8],
        kind: ValueKind,
        now: MonoMs,
    ) -> Result<Option<&Value>, WrongKind> {
        match self.live(key, now) {
            None => Ok(None),
            Some(e) if e.value.kind() == kind => Ok(Some(&e.value)),
            Some(_) => Err(WrongKind),
        }
    }

    pub fn zset(&mut self, key: &[u8], now: MonoMs) -> Result<Option<&SortedSet>, WrongKind> {
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry { value: Value::Zset(zs), .. }) => Ok(Some(zs)),
            Some(_) => Err(WrongKind),
        }
    }

    pub fn zset_mut(
        &mut self,
        key: &[u8],
        now: MonoMs,
    ) -> Result<Option<&mut SortedSet>, WrongKind> {
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry { value: Value::Zset(zs), .. }) => Ok(Some(zs)),
            Some(_) => Err(WrongKind),
        }
    }

    /// Sorted set under `key`, created persistent when absent. An existing
    /// set keeps its TTL; a live value of another kind is `WrongKind`.
    pub fn zset_mut_or_create(
        &mut self,
        key: &[u8],
        now: MonoMs,
    ) -> Result<&mut SortedSet, WrongKind> {
        self.evict_if_expired(key, now);
        let entry = self
            .map
            .entry(key.to_vec())
            .or_insert_with(|| Entry::new(Value::Zset(SortedSet::new())));
        match &mut entry.value {
            Value::Zset(zs) => Ok(zs),
            _ => Err(WrongKind),
        }
    }

    /// Full overwrite: value, kind, and expiration (new entry is
    /// persistent). The displaced value goes through the reclaimer.
    pub fn set(&mut self, key: &[u8], value: Value) {
        if let Some(old) = self.map.insert(key.to_vec(), Entry::new(value)) {
            self.reclaim.dispose(old.value);
        }
    }

    /// Replaces the value but keeps the entry's deadline when one exists.
    pub fn set_preserving_ttl(&mut self, key: &[u8], value: Value, now: MonoMs) {
        self.evict_if_expired(key, now);
        match self.map.entry(key.to_vec()) {
            Slot::Occupied(mut occupied) => {
                let old = std::mem::replace(&mut occupied.get_mut().value, value);
                self.reclaim.dispose(old);
            }
            Slot::Vacant(vacant) => {
                vacant.insert(Entry::new(value));
            }
        }
    }

    pub fn remove(&mut self, key: &[u8], now: MonoMs) -> bool {
        self.evict_if_expired(key, now);
        match self.map.remove(key) {
            Some(entry) => {
                self.reclaim.dispose(entry.value);
                true
            }
            None => false,
        }
    }

    pub fn exists(&mut self, key: &[u8], now: MonoMs) -> bool {
        self.live(key, now).is_some()
    }

    /// Snapshot of all keys. May include entries that will lazily expire on
    /// their next access; the active sweep keeps that window one iteration
    /// wide.
    pub fn keys(&self) -> Vec<Key> {
        self.map.keys().cloned().collect()
    }

    /// Adds `delta` to the integer stored at `key`, creating the entry at
    /// `delta` when absent. A string value that parses as i64 is converted
    /// to the inline integer form; the TTL is untouched either way.
    pub fn incr_by(&mut self, key: &[u8], delta: i64, now: MonoMs) -> Result<i64, IntUpdateError> {
        self.evict_if_expired(key, now);
        match self.map.entry(key.to_vec()) {
            Slot::Vacant(vacant) => {
                vacant.insert(Entry::new(Value::Int(delta)));
                Ok(delta)
            }
            Slot::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let current = match &entry.value {
                    Value::Int(n) => *n,
                    Value::Str(raw) => std::str::from_utf8(raw)
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .ok_or(IntUpdateError::NotAnInteger)?,
                    Value::Null | Value::Float(_) | Value::Zset(_) => {
                        return Err(IntUpdateError::WrongKind(WrongKind));
                    }
                };
                let next = current.checked_add(delta).ok_or(IntUpdateError::Overflow)?;
                entry.value = Value::Int(next);
                Ok(next)
            }
        }
    }

    /// Arms a TTL of `delta_ms` from `now`. Returns false when the key is
    /// absent. Re-arming never touches older heap entries; they surface at
    /// the root eventually and are discarded there.
    pub fn set_expire(&mut self, key: &[u8], delta_ms: i64, now: MonoMs) -> bool {
        self.evict_if_expired(key, now);
        let at = now.offset(delta_ms);
        let Some(entry) = self.map.get_mut(key) else { return false };
        entry.expire_at = Some(at);
        self.expirations.push(at, key.to_vec());
        true
    }

    /// Makes the key persistent. True iff a deadline was actually cleared.
    pub fn clear_expire(&mut self, key: &[u8], now: MonoMs) -> bool {
        self.live(key, now).is_some_and(|e| e.expire_at.take().is_some())
    }

    pub fn ttl(&mut self, key: &[u8], now: MonoMs) -> Ttl {
        match self.live(key, now) {
            None => Ttl::Missing,
            Some(Entry { expire_at: None, .. }) => Ttl::Persistent,
            Some(Entry { expire_at: Some(at), .. }) => Ttl::Remaining(at.ms_until(now)),
        }
    }

    pub fn next_expire_deadline_ms(&self, now: MonoMs) -> u64 {
        self.expirations.next_deadline_ms(now)
    }

    /// Active sweep: pops due heap entries and removes the ones whose
    /// priority still matches the authoritative deadline; everything else is
    /// stale garbage from re-arms and overwrites. At most [`SWEEP_QUOTA`]
    /// pops per call; leftovers wake the loop again immediately.
    pub fn sweep_expired(&mut self, now: MonoMs) -> usize {
        let mut removed = 0;
        for _ in 0..SWEEP_QUOTA {
            let Some((at, key)) = self.expirations.pop_due(now) else { break };
            let authoritative = self.map.get(&key).and_then(|e| e.expire_at);
            if authoritative != Some(at) {
                continue;
            }
            if let Some(entry) = self.map.remove(&key) {
                trace!(key = %String::from_utf8_lossy(&key), "store: swept");
                self.reclaim.dispose(entry.value);
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "store: active expiration pass");
        }
        removed
    }

    /// Raw presence check without the lazy-expiry side effect.
    #[cfg(test)]
    pub fn contains_raw(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    #[cfg(test)]
    pub fn expire_queue_len(&self) -> usize {
        self.expirations.len()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("keys", &self.map.len())
            .field("queued_deadlines", &self.expirations.len())
            .finish()
    }
}
