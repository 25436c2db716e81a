//! Bounded model cache with coalesced loading

use mmhost_core::{HostError, HostResult, InventoryRecord, ModelId};
use mmhost_runtime::{LoadedModel, ModelLoader};
use mmhost_store::{fetch_with_retry, ArtifactStore, Inventory, RetryPolicy, StagingArea};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::budget::{plan_eviction, Budget, CacheSettings, Candidate};
use crate::entry::{CacheEntry, EntrySnapshot};
use crate::lease::ModelLease;

type LoadOutcome = Result<Arc<LoadedModel>, HostError>;

/// Collaborators a cold load goes through
pub struct LoadBackend {
    pub inventory: Arc<Inventory>,
    pub store: Arc<dyn ArtifactStore>,
    pub loader: Arc<dyn ModelLoader>,
    pub staging: StagingArea,
    pub retry: RetryPolicy,
}

/// Bounded, LRU-evicting cache of loaded models.
///
/// Concurrent misses on one identifier share a single fetch+load. The load
/// runs on its own task, so it finishes and populates the cache even if
/// every caller that asked for it has gone away.
#[derive(Clone)]
pub struct ModelCache {
    inner: Arc<CacheInner>,
}

pub(crate) struct CacheInner {
    state: Mutex<CacheState>,
    /// Signalled whenever an entry becomes idle or leaves the cache
    released: Notify,
    settings: CacheSettings,
    backend: LoadBackend,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<ModelId, CacheEntry>,
    loads: HashMap<ModelId, InFlight>,
    resident_bytes: u64,
    next_generation: u64,
    clock: u64,
    counters: Counters,
}

/// A load running on behalf of one or more callers
struct InFlight {
    generation: u64,
    /// Callers currently waiting; each becomes a pre-pin at install time
    joined: usize,
    /// Invalidated while running: answer the waiters but do not install
    stale: bool,
    outcome: watch::Receiver<Option<LoadOutcome>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
    coalesced: u64,
    loads: u64,
    load_failures: u64,
    evictions: u64,
    invalidations: u64,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Number of resident models
    pub resident: usize,
    /// Maximum number of resident models
    pub capacity: usize,
    /// Aggregate footprint of resident models
    pub resident_bytes: u64,
    /// Footprint limit, if any
    pub memory_budget_bytes: Option<u64>,
    /// Loads currently running
    pub in_flight_loads: usize,
    pub hits: u64,
    pub misses: u64,
    /// Misses that joined a load already in flight
    pub coalesced: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

enum Lookup {
    Hit(ModelLease),
    Wait(LoadTicket),
    WaitStale(watch::Receiver<Option<LoadOutcome>>),
    Miss,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove_entry(&mut self, id: &ModelId) -> Option<CacheEntry> {
        let entry = self.entries.remove(id)?;
        self.resident_bytes = self.resident_bytes.saturating_sub(entry.footprint());
        Some(entry)
    }

    fn idle_candidates(&self) -> Vec<Candidate<ModelId>> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_idle())
            .map(|(id, e)| Candidate {
                key: id.clone(),
                last_used: e.last_used,
                footprint: e.footprint(),
            })
            .collect()
    }

    /// Footprint held by entries that cannot be evicted right now
    fn pinned_bytes(&self) -> u64 {
        self.entries
            .values()
            .filter(|e| !e.is_idle())
            .map(|e| e.footprint())
            .sum()
    }

    /// Evict idle entries until `incoming` fits; false if it cannot fit yet
    fn make_room(&mut self, budget: &Budget, incoming: u64) -> bool {
        let plan = plan_eviction(
            budget,
            self.entries.len(),
            self.resident_bytes,
            incoming,
            self.idle_candidates(),
        );
        let Some(victims) = plan else {
            return false;
        };
        for victim in victims {
            if self.remove_entry(&victim).is_some() {
                self.counters.evictions += 1;
                info!(model_id = %victim, "Evicting model from cache (LRU)");
            }
        }
        true
    }
}

impl ModelCache {
    /// Create a new model cache
    pub fn new(settings: CacheSettings, backend: LoadBackend) -> Self {
        info!(
            capacity = settings.budget.capacity,
            memory_budget = ?settings.budget.memory_bytes,
            eviction_wait = ?settings.eviction_wait,
            store = backend.store.name(),
            loader = backend.loader.name(),
            "Model cache initialized"
        );

        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState::default()),
                released: Notify::new(),
                settings,
                backend,
            }),
        }
    }

    /// Return a pinned model, loading it on a miss.
    ///
    /// A hit never touches the inventory, store or loader. On a miss the id
    /// must be registered (`UnknownModel` otherwise, without contacting the
    /// store); concurrent misses coalesce onto one load whose outcome, success
    /// or error, every waiter receives.
    pub async fn get_or_load(&self, id: &ModelId) -> HostResult<ModelLease> {
        loop {
            match self.lookup(id, None) {
                Lookup::Hit(lease) => return Ok(lease),
                Lookup::Wait(ticket) => return ticket.wait().await,
                Lookup::WaitStale(rx) => {
                    wait_outcome(rx).await;
                    continue;
                }
                Lookup::Miss => {}
            }

            let Some(record) = self.inner.backend.inventory.lookup(id).await else {
                debug!(model_id = %id, "Rejecting unregistered model");
                return Err(HostError::UnknownModel(id.clone()));
            };

            match self.lookup(id, Some(record)) {
                Lookup::Hit(lease) => return Ok(lease),
                Lookup::Wait(ticket) => return ticket.wait().await,
                Lookup::WaitStale(rx) => {
                    wait_outcome(rx).await;
                }
                Lookup::Miss => {}
            }
        }
    }

    /// Check the table; with a record in hand, start a load on a miss
    fn lookup(&self, id: &ModelId, record: Option<InventoryRecord>) -> Lookup {
        let inner = &self.inner;
        let mut state = inner.lock();

        let clock = state.tick();
        if let Some(entry) = state.entries.get_mut(id) {
            entry.acquire(clock);
            let lease = ModelLease {
                cache: inner.clone(),
                id: id.clone(),
                generation: entry.generation,
                model: entry.model.clone(),
                warm: true,
            };
            state.counters.hits += 1;
            debug!(model_id = %id, "Cache hit");
            return Lookup::Hit(lease);
        }

        if let Some(flight) = state.loads.get_mut(id) {
            if flight.stale {
                return Lookup::WaitStale(flight.outcome.clone());
            }
            flight.joined += 1;
            let waiters = flight.joined;
            let ticket = LoadTicket::new(
                inner.clone(),
                id.clone(),
                flight.generation,
                flight.outcome.clone(),
            );
            state.counters.coalesced += 1;
            debug!(model_id = %id, waiters = waiters, "Joined in-flight load");
            return Lookup::Wait(ticket);
        }

        let Some(record) = record else {
            return Lookup::Miss;
        };

        state.next_generation += 1;
        let generation = state.next_generation;
        let (tx, rx) = watch::channel(None);
        state.loads.insert(
            id.clone(),
            InFlight {
                generation,
                joined: 1,
                stale: false,
                outcome: rx.clone(),
            },
        );
        state.counters.misses += 1;
        state.counters.loads += 1;
        drop(state);

        info!(model_id = %id, generation = generation, "Cold load started");
        tokio::spawn(inner.clone().run_load(id.clone(), record, generation, tx));

        Lookup::Wait(LoadTicket::new(inner.clone(), id.clone(), generation, rx))
    }

    /// Remove an entry regardless of recency.
    ///
    /// Leases already handed out keep working. A load in flight for the id is
    /// marked stale so the next lookup starts over. Returns whether a resident
    /// entry was removed.
    pub fn invalidate(&self, id: &ModelId) -> bool {
        let mut state = self.inner.lock();
        let removed = state.remove_entry(id).is_some();
        if removed {
            state.counters.invalidations += 1;
        }
        if let Some(flight) = state.loads.get_mut(id) {
            flight.stale = true;
            debug!(model_id = %id, "Marked in-flight load stale");
        }
        drop(state);

        if removed {
            info!(model_id = %id, "Invalidated cached model");
        }
        self.inner.released.notify_waiters();
        removed
    }

    /// Check if a model is resident
    pub fn contains(&self, id: &ModelId) -> bool {
        self.inner.lock().entries.contains_key(id)
    }

    /// Number of resident models
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of resident entries, sorted by identifier
    pub fn entries(&self) -> Vec<EntrySnapshot> {
        let state = self.inner.lock();
        let mut all: Vec<EntrySnapshot> = state
            .entries
            .iter()
            .map(|(id, entry)| entry.snapshot(id))
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.inner.lock();
        let budget = self.inner.settings.budget;
        let c = state.counters;

        CacheStats {
            resident: state.entries.len(),
            capacity: budget.capacity,
            resident_bytes: state.resident_bytes,
            memory_budget_bytes: budget.memory_bytes,
            in_flight_loads: state.loads.len(),
            hits: c.hits,
            misses: c.misses,
            coalesced: c.coalesced,
            loads: c.loads,
            load_failures: c.load_failures,
            evictions: c.evictions,
            invalidations: c.invalidations,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }
}

impl CacheInner {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop one pin from the entry generation a lease was issued for
    pub(crate) fn release(&self, id: &ModelId, generation: u64) {
        let became_idle = {
            let mut state = self.lock();
            match state.entries.get_mut(id) {
                Some(entry) if entry.generation == generation => entry.unpin(),
                _ => false,
            }
        };
        if became_idle {
            debug!(model_id = %id, "Model idle, eligible for eviction");
            self.released.notify_waiters();
        }
    }

    /// Turn a waiter's pre-pin into a lease
    fn claim(&self, id: &ModelId, generation: u64) {
        let mut state = self.lock();
        if let Some(entry) = state.entries.get_mut(id) {
            if entry.generation == generation {
                entry.claim_load_pin();
            }
        }
    }

    /// A waiter went away before collecting its result
    fn abandon(&self, id: &ModelId, generation: u64) {
        let became_idle = {
            let mut state = self.lock();
            if let Some(flight) = state.loads.get_mut(id) {
                if flight.generation == generation {
                    flight.joined = flight.joined.saturating_sub(1);
                    debug!(model_id = %id, waiters = flight.joined, "Waiter left in-flight load");
                    return;
                }
            }
            match state.entries.get_mut(id) {
                Some(entry) if entry.generation == generation => entry.abandon_load_pin(),
                _ => false,
            }
        };
        if became_idle {
            self.released.notify_waiters();
        }
    }

    /// Forget an in-flight load that will not install
    fn end_flight(&self, id: &ModelId, generation: u64) {
        let mut state = self.lock();
        if state
            .loads
            .get(id)
            .is_some_and(|flight| flight.generation == generation)
        {
            state.loads.remove(id);
        }
    }

    async fn run_load(
        self: Arc<Self>,
        id: ModelId,
        record: InventoryRecord,
        generation: u64,
        tx: watch::Sender<Option<LoadOutcome>>,
    ) {
        let started = Instant::now();
        let mut deadline = None;
        let outcome = match self.fetch_and_load(&record, &mut deadline).await {
            Ok(model) => self.install(&id, generation, model, deadline).await,
            Err(e) => {
                self.end_flight(&id, generation);
                Err(e)
            }
        };

        match &outcome {
            Ok(model) => info!(
                model_id = %id,
                kind = model.kind(),
                footprint = model.footprint_bytes(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Cold load finished"
            ),
            Err(e) => {
                self.lock().counters.load_failures += 1;
                warn!(model_id = %id, error = %e, kind = e.kind(), "Cold load failed");
            }
        }

        // Nobody left to tell is fine; the cache is already populated.
        let _ = tx.send(Some(outcome));
    }

    /// Fetch and deserialize, giving the loader the memory it could get by
    /// evicting every idle entry.
    ///
    /// A loader out of memory first costs the LRU idle entry, up to
    /// `load_retry_count` times. Past that, while pinned entries hold the
    /// memory, the load waits for a release until `deadline`, which it starts
    /// and shares with [`Self::install`].
    async fn fetch_and_load(
        &self,
        record: &InventoryRecord,
        deadline: &mut Option<tokio::time::Instant>,
    ) -> HostResult<LoadedModel> {
        let backend = &self.backend;
        let mut staged =
            fetch_with_retry(backend.store.as_ref(), record, &backend.staging, &backend.retry)
                .await?;

        let mut retries = 0;
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let headroom = {
                let state = self.lock();
                self.settings.budget.headroom(state.pinned_bytes())
            };

            let loader = backend.loader.clone();
            let (returned, result) = tokio::task::spawn_blocking(move || {
                let result = loader.load(&staged, headroom);
                (staged, result)
            })
            .await
            .map_err(|e| HostError::Deserialization {
                id: record.id.clone(),
                message: format!("loader task failed: {}", e),
            })?;
            staged = returned;

            if !matches!(result, Err(HostError::ResourceExhausted { .. })) {
                return result;
            }

            if retries < self.settings.load_retry_count {
                if let Some(evicted) = self.evict_one() {
                    retries += 1;
                    warn!(
                        model_id = %record.id,
                        retry = retries,
                        evicted = %evicted,
                        "Loader out of memory, evicting and retrying"
                    );
                    continue;
                }
            }

            let (pinned, empty) = {
                let state = self.lock();
                (state.pinned_bytes() > 0, state.entries.is_empty())
            };
            if !pinned {
                if empty {
                    // nothing resident, so the model exceeds the whole budget
                    return Err(HostError::CacheFull {
                        id: record.id.clone(),
                        waited: std::time::Duration::ZERO,
                    });
                }
                return result;
            }

            let wait = self.settings.eviction_wait;
            let until = *deadline.get_or_insert_with(|| tokio::time::Instant::now() + wait);
            if tokio::time::Instant::now() >= until {
                warn!(model_id = %record.id, waited = ?wait, "Pinned models still hold the memory");
                return Err(HostError::CacheFull {
                    id: record.id.clone(),
                    waited: wait,
                });
            }

            debug!(model_id = %record.id, "Memory held by pinned models, waiting for a release");
            let _ = tokio::time::timeout_at(until, notified).await;
        }
    }

    /// Evict the least recently used idle entry
    fn evict_one(&self) -> Option<ModelId> {
        let mut state = self.lock();
        let victim = state
            .idle_candidates()
            .into_iter()
            .min_by_key(|c| c.last_used)?
            .key;
        state.remove_entry(&victim)?;
        state.counters.evictions += 1;
        info!(model_id = %victim, "Evicting model from cache to free memory");
        Some(victim)
    }

    /// Put a freshly loaded model into the table, waiting for room if every
    /// resident entry is pinned
    async fn install(
        &self,
        id: &ModelId,
        generation: u64,
        model: LoadedModel,
        deadline: Option<tokio::time::Instant>,
    ) -> LoadOutcome {
        let model = Arc::new(model);
        let footprint = model.footprint_bytes();
        let budget = self.settings.budget;
        let wait = self.settings.eviction_wait;

        if !budget.admits(footprint) {
            self.end_flight(id, generation);
            return Err(HostError::CacheFull {
                id: id.clone(),
                waited: std::time::Duration::ZERO,
            });
        }

        let deadline = deadline.unwrap_or_else(|| tokio::time::Instant::now() + wait);
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                let flight = state
                    .loads
                    .get(id)
                    .filter(|flight| flight.generation == generation)
                    .map(|flight| (flight.joined, flight.stale));
                let joined = match flight {
                    Some((joined, false)) => joined,
                    Some((_, true)) => {
                        state.loads.remove(id);
                        debug!(model_id = %id, "Discarding stale load");
                        return Ok(model);
                    }
                    None => return Ok(model),
                };

                if state.make_room(&budget, footprint) {
                    state.loads.remove(id);
                    if let Some(old) = state.remove_entry(id) {
                        warn!(model_id = %id, generation = old.generation, "Replacing resident entry");
                    }
                    let clock = state.tick();
                    state
                        .entries
                        .insert(id.clone(), CacheEntry::new(model.clone(), generation, clock, joined));
                    state.resident_bytes += footprint;
                    debug!(
                        model_id = %id,
                        resident = state.entries.len(),
                        resident_bytes = state.resident_bytes,
                        pins = joined,
                        "Installed model"
                    );
                    return Ok(model);
                }
            }

            if tokio::time::Instant::now() >= deadline {
                self.end_flight(id, generation);
                warn!(model_id = %id, waited = ?wait, "No evictable entry before deadline");
                return Err(HostError::CacheFull {
                    id: id.clone(),
                    waited: wait,
                });
            }

            debug!(model_id = %id, "All resident models pinned, waiting for a release");
            let _ = tokio::time::timeout_at(deadline, notified).await;
        }
    }
}

/// One caller's claim on an in-flight load.
///
/// Dropping the ticket before the result is collected (timeout or a dropped
/// request) hands back the pre-pin the load would otherwise hold for it.
struct LoadTicket {
    cache: Arc<CacheInner>,
    id: ModelId,
    generation: u64,
    outcome: watch::Receiver<Option<LoadOutcome>>,
    armed: bool,
}

impl LoadTicket {
    fn new(
        cache: Arc<CacheInner>,
        id: ModelId,
        generation: u64,
        outcome: watch::Receiver<Option<LoadOutcome>>,
    ) -> Self {
        Self {
            cache,
            id,
            generation,
            outcome,
            armed: true,
        }
    }

    async fn wait(mut self) -> HostResult<ModelLease> {
        let outcome = wait_outcome(self.outcome.clone()).await;
        self.armed = false;

        match outcome {
            Some(Ok(model)) => {
                self.cache.claim(&self.id, self.generation);
                Ok(ModelLease {
                    cache: self.cache.clone(),
                    id: self.id.clone(),
                    generation: self.generation,
                    model,
                    warm: false,
                })
            }
            Some(Err(e)) => Err(e),
            None => Err(HostError::Internal(format!(
                "load task for {} ended without an outcome",
                self.id
            ))),
        }
    }
}

impl Drop for LoadTicket {
    fn drop(&mut self) {
        if self.armed {
            self.cache.abandon(&self.id, self.generation);
        }
    }
}

/// Wait for a load to publish; `None` if the load task vanished
async fn wait_outcome(mut rx: watch::Receiver<Option<LoadOutcome>>) -> Option<LoadOutcome> {
    if let Ok(value) = rx.wait_for(Option::is_some).await {
        return value.clone();
    }
    rx.borrow().clone()
}
