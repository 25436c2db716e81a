//! Cache entry bookkeeping

use chrono::{DateTime, Utc};
use mmhost_core::ModelId;
use mmhost_runtime::LoadedModel;
use serde::Serialize;
use std::sync::Arc;

/// A resident model plus the bookkeeping the cache needs for eviction
pub(crate) struct CacheEntry {
    pub model: Arc<LoadedModel>,
    /// Distinguishes this residency from earlier or later loads of the same id
    pub generation: u64,
    /// Logical clock value of the last access; smallest is least recently used
    pub last_used: u64,
    pub last_access: DateTime<Utc>,
    /// Leases and pre-pins currently holding the entry
    pub ref_count: usize,
    /// Pre-pins taken for coalesced waiters that have not collected their lease yet
    pub load_pins: usize,
    pub hits: u64,
}

impl CacheEntry {
    pub fn new(model: Arc<LoadedModel>, generation: u64, clock: u64, load_pins: usize) -> Self {
        Self {
            model,
            generation,
            last_used: clock,
            last_access: Utc::now(),
            ref_count: load_pins,
            load_pins,
            hits: 0,
        }
    }

    pub fn footprint(&self) -> u64 {
        self.model.footprint_bytes()
    }

    /// Eligible for eviction
    pub fn is_idle(&self) -> bool {
        self.ref_count == 0
    }

    /// Record a hit and pin the entry for the caller
    pub fn acquire(&mut self, clock: u64) {
        self.last_used = clock;
        self.last_access = Utc::now();
        self.ref_count += 1;
        self.hits += 1;
    }

    /// Drop one pin; true when the entry just became idle
    pub fn unpin(&mut self) -> bool {
        self.ref_count = self.ref_count.saturating_sub(1);
        self.ref_count == 0
    }

    /// Turn one pre-pin into a lease held by a waiter
    pub fn claim_load_pin(&mut self) -> bool {
        if self.load_pins == 0 {
            return false;
        }
        self.load_pins -= 1;
        true
    }

    /// Return a pre-pin whose waiter went away
    pub fn abandon_load_pin(&mut self) -> bool {
        if self.claim_load_pin() {
            self.unpin()
        } else {
            false
        }
    }

    pub fn snapshot(&self, id: &ModelId) -> EntrySnapshot {
        EntrySnapshot {
            id: id.clone(),
            kind: self.model.kind().to_string(),
            footprint_bytes: self.footprint(),
            ref_count: self.ref_count,
            pinned_for_load: self.load_pins > 0,
            hits: self.hits,
            generation: self.generation,
            loaded_at: self.model.loaded_at(),
            last_access: self.last_access,
        }
    }
}

/// Point-in-time view of one resident entry
#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot {
    pub id: ModelId,
    pub kind: String,
    pub footprint_bytes: u64,
    pub ref_count: usize,
    pub pinned_for_load: bool,
    pub hits: u64,
    pub generation: u64,
    pub loaded_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}
