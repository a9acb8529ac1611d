//! Concurrent in-memory blob cache.
//!
//! Two retention modes are supported:
//!
//! - strong-only: every entry stays resident until removed or cleared.
//! - soft-backed: entries put as [`RetentionClass::Reclaimable`] are held by a
//!   bounded LRU pool and a [`RetentionQueue`] of recently touched keys. The map
//!   itself only keeps a weak handle, so a blob that drops out of both is
//!   reclaimed and the next lookup heals the stale slot.
//!
//! `put` is first-write-wins in both modes.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};

use crate::retention::RetentionQueue;

pub type Blob = Arc<[u8]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionClass {
    Strong,
    Reclaimable,
}

#[derive(Debug, Clone)]
enum Slot {
    Strong(Blob),
    Reclaimable(Weak<[u8]>),
}

impl Slot {
    fn upgrade(&self) -> Option<Blob> {
        match self {
            Slot::Strong(blob) => Some(Arc::clone(blob)),
            Slot::Reclaimable(handle) => handle.upgrade(),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Slot::Strong(_) => true,
            Slot::Reclaimable(handle) => handle.strong_count() > 0,
        }
    }
}

#[derive(Debug)]
struct SoftBacking {
    pool: Mutex<LruCache<String, Blob>>,
    retained: RetentionQueue<Blob>,
}

#[derive(Debug)]
pub struct BlobCache {
    slots: DashMap<String, Slot>,
    soft: Option<SoftBacking>,
}

impl Default for BlobCache {
    fn default() -> Self {
        Self::strong_only()
    }
}

impl BlobCache {
    pub fn strong_only() -> Self {
        Self {
            slots: DashMap::new(),
            soft: None,
        }
    }

    /// `hard_size` bounds the retention queue (`-1` for unbounded);
    /// `soft_capacity` bounds how many reclaimable blobs the LRU pool keeps alive.
    pub fn with_soft_backing(hard_size: i64, soft_capacity: NonZeroUsize) -> Self {
        Self {
            slots: DashMap::new(),
            soft: Some(SoftBacking {
                pool: Mutex::new(LruCache::new(soft_capacity)),
                retained: RetentionQueue::new(hard_size),
            }),
        }
    }

    pub fn default_class(&self) -> RetentionClass {
        if self.soft.is_some() {
            RetentionClass::Reclaimable
        } else {
            RetentionClass::Strong
        }
    }

    pub fn get(&self, key: &str) -> Option<Blob> {
        let slot = self.slots.get(key).map(|s| s.value().clone())?;
        match slot {
            Slot::Strong(blob) => Some(blob),
            Slot::Reclaimable(handle) => match handle.upgrade() {
                Some(blob) => {
                    self.touch(key, &blob);
                    Some(blob)
                }
                None => {
                    self.heal(key);
                    None
                }
            },
        }
    }

    /// Stores `blob` under the cache's default retention class.
    pub fn put(&self, key: &str, blob: Blob) -> bool {
        self.put_with(key, blob, self.default_class())
    }

    /// Returns `false` when a live entry already exists; the existing blob is kept.
    pub fn put_with(&self, key: &str, blob: Blob, class: RetentionClass) -> bool {
        let slot = match (class, self.soft.as_ref()) {
            (RetentionClass::Reclaimable, Some(_)) => Slot::Reclaimable(Arc::downgrade(&blob)),
            _ => Slot::Strong(Arc::clone(&blob)),
        };
        let reclaimable = matches!(slot, Slot::Reclaimable(_));

        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live() {
                    return false;
                }
                occupied.insert(slot);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
            }
        }

        if reclaimable && let Some(soft) = self.soft.as_ref() {
            soft.pool.lock().put(key.to_string(), blob);
        }
        true
    }

    pub fn remove(&self, key: &str) -> Option<Blob> {
        let removed = self.slots.remove(key).and_then(|(_, slot)| slot.upgrade());
        if let Some(soft) = self.soft.as_ref() {
            soft.pool.lock().pop(key);
            soft.retained.remove(key);
        }
        removed
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let Some(live) = self.slots.get(key).map(|s| s.value().is_live()) else {
            return false;
        };
        if !live {
            self.heal(key);
        }
        live
    }

    /// Snapshot of every live entry. Reclaimable entries are touched as if read
    /// through [`BlobCache::get`]; reclaimed ones are dropped from the map.
    pub fn entries(&self) -> Vec<(String, Blob)> {
        let snapshot: Vec<(String, Slot)> = self
            .slots
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut out = Vec::with_capacity(snapshot.len());
        for (key, slot) in snapshot {
            match slot.upgrade() {
                Some(blob) => {
                    if matches!(slot, Slot::Reclaimable(_)) {
                        self.touch(&key, &blob);
                    }
                    out.push((key, blob));
                }
                None => self.heal(&key),
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.purge_reclaimed();
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Some(soft) = self.soft.as_ref() {
            soft.retained.clear();
            soft.pool.lock().clear();
        }
        self.slots.clear();
    }

    /// Drops every reclaimable blob not pinned by the retention queue or held
    /// by a caller.
    pub fn reclaim(&self) {
        if let Some(soft) = self.soft.as_ref() {
            soft.pool.lock().clear();
        }
        self.purge_reclaimed();
    }

    /// Keys currently protected by the retention queue, oldest first.
    pub fn retained_keys(&self) -> Vec<String> {
        self.soft
            .as_ref()
            .map(|soft| soft.retained.keys())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> CacheStats {
        self.purge_reclaimed();
        let mut stats = CacheStats {
            mode: if self.soft.is_some() {
                "soft"
            } else {
                "strong"
            },
            entries: 0,
            strong_entries: 0,
            reclaimable_entries: 0,
            resident_bytes: 0,
            retained_keys: 0,
            retention_bound: None,
            soft_capacity: None,
        };
        for item in self.slots.iter() {
            let Some(blob) = item.value().upgrade() else {
                continue;
            };
            stats.entries += 1;
            stats.resident_bytes += blob.len() as u64;
            match item.value() {
                Slot::Strong(_) => stats.strong_entries += 1,
                Slot::Reclaimable(_) => stats.reclaimable_entries += 1,
            }
        }
        if let Some(soft) = self.soft.as_ref() {
            stats.retained_keys = soft.retained.len();
            stats.retention_bound = soft.retained.bound();
            stats.soft_capacity = Some(soft.pool.lock().cap().get());
        }
        stats
    }

    fn touch(&self, key: &str, blob: &Blob) {
        let Some(soft) = self.soft.as_ref() else {
            return;
        };
        {
            let mut pool = soft.pool.lock();
            if pool.get(key).is_none() {
                pool.put(key.to_string(), Arc::clone(blob));
            }
        }
        if let Some(evicted) = soft.retained.touch(key, Arc::clone(blob)) {
            tracing::trace!(key = %evicted, "retention protection dropped");
        }
    }

    fn heal(&self, key: &str) {
        if self.slots.remove_if(key, |_, slot| !slot.is_live()).is_some() {
            tracing::trace!(key, "reclaimed entry removed");
        }
    }

    fn purge_reclaimed(&self) {
        if self.soft.is_some() {
            self.slots.retain(|_, slot| slot.is_live());
        }
    }
}

/// Hex SHA-256 of a blob.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub mode: &'static str,
    pub entries: u64,
    pub strong_entries: u64,
    pub reclaimable_entries: u64,
    pub resident_bytes: u64,
    pub retained_keys: usize,
    pub retention_bound: Option<usize>,
    pub soft_capacity: Option<usize>,
}
