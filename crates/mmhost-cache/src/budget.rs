//! Capacity accounting and victim selection

use mmhost_core::CacheConfig;
use std::time::Duration;

/// Limits on what the cache may keep resident
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    /// Maximum resident entries
    pub capacity: usize,
    /// Maximum aggregate footprint, if bounded
    pub memory_bytes: Option<u64>,
}

impl Budget {
    pub fn new(capacity: usize, memory_bytes: Option<u64>) -> Self {
        Self {
            capacity,
            memory_bytes,
        }
    }

    /// Whether `count` entries totalling `bytes` stay within the limits
    pub fn fits(&self, count: usize, bytes: u64) -> bool {
        count <= self.capacity && self.memory_bytes.map_or(true, |limit| bytes <= limit)
    }

    /// Whether a single model of this footprint could ever be admitted
    pub fn admits(&self, footprint: u64) -> bool {
        self.capacity > 0 && self.fits(1, footprint)
    }

    /// Memory a loader can count on once every evictable entry is gone,
    /// if memory is bounded
    pub fn headroom(&self, pinned_bytes: u64) -> Option<u64> {
        self.memory_bytes
            .map(|limit| limit.saturating_sub(pinned_bytes))
    }
}

/// Idle entry considered for eviction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<K> {
    pub key: K,
    pub last_used: u64,
    pub footprint: u64,
}

/// Pick the least recently used idle entries whose removal lets an entry of
/// `incoming` bytes fit.
///
/// Returns `None` when evicting every candidate would still not make room;
/// nothing should be evicted in that case.
pub fn plan_eviction<K: Clone>(
    budget: &Budget,
    resident_count: usize,
    resident_bytes: u64,
    incoming: u64,
    mut candidates: Vec<Candidate<K>>,
) -> Option<Vec<K>> {
    let mut count = resident_count + 1;
    let mut bytes = resident_bytes.saturating_add(incoming);
    if budget.fits(count, bytes) {
        return Some(Vec::new());
    }

    candidates.sort_by_key(|c| c.last_used);
    let mut victims = Vec::new();
    for candidate in candidates {
        count -= 1;
        bytes = bytes.saturating_sub(candidate.footprint);
        victims.push(candidate.key);
        if budget.fits(count, bytes) {
            return Some(victims);
        }
    }
    None
}

/// Settings the cache runs with
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub budget: Budget,
    /// How long an insertion waits for pinned entries to free up
    pub eviction_wait: Duration,
    /// Evict-and-retry cycles on `ResourceExhausted`
    pub load_retry_count: u32,
}

impl From<&CacheConfig> for CacheSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            budget: Budget::new(config.capacity, config.memory_budget_bytes),
            eviction_wait: config.eviction_wait_timeout(),
            load_retry_count: config.load_retry_count,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(key: &'static str, last_used: u64, footprint: u64) -> Candidate<&'static str> {
        Candidate {
            key,
            last_used,
            footprint,
        }
    }

    #[test]
    fn test_fits_by_count_and_bytes() {
        let budget = Budget::new(2, Some(100));
        assert!(budget.fits(2, 100));
        assert!(!budget.fits(3, 10));
        assert!(!budget.fits(1, 101));
        assert_eq!(budget.headroom(40), Some(60));
        assert_eq!(budget.headroom(400), Some(0));
        assert_eq!(Budget::new(2, None).headroom(400), None);
    }

    #[test]
    fn test_admits() {
        assert!(Budget::new(1, Some(10)).admits(10));
        assert!(!Budget::new(1, Some(10)).admits(11));
        assert!(!Budget::new(0, None).admits(1));
    }

    #[test]
    fn test_no_eviction_when_room() {
        let budget = Budget::new(3, None);
        let plan = plan_eviction(&budget, 2, 0, 10, vec![candidate("a", 1, 10)]);
        assert_eq!(plan, Some(vec![]));
    }

    #[test]
    fn test_evicts_least_recently_used_first() {
        let budget = Budget::new(2, None);
        let plan = plan_eviction(
            &budget,
            2,
            0,
            10,
            vec![candidate("b", 7, 10), candidate("a", 3, 10)],
        );
        assert_eq!(plan, Some(vec!["a"]));
    }

    #[test]
    fn test_evicts_several_for_memory() {
        let budget = Budget::new(10, Some(100));
        let plan = plan_eviction(
            &budget,
            3,
            90,
            50,
            vec![
                candidate("small-old", 1, 10),
                candidate("big", 2, 60),
                candidate("new", 9, 20),
            ],
        );
        assert_eq!(plan, Some(vec!["small-old", "big"]));
    }

    #[test]
    fn test_impossible_plan_evicts_nothing() {
        // two resident, one pinned: evicting the idle one still overflows capacity 1
        let plan = plan_eviction(&Budget::new(1, None), 2, 0, 1, vec![candidate("a", 1, 1)]);
        assert_eq!(plan, None);

        let plan = plan_eviction(&Budget::new(2, None), 2, 0, 1, Vec::<Candidate<&str>>::new());
        assert_eq!(plan, None);
    }
}
