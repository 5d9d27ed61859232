// Signal Cache
// Suppresses duplicate signals for the same (instrument, timeframe, direction)
// key within a TTL window.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use common::Signal;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

/// Trait for signal dedupe backends.
///
/// An erroring backend must be treated as accepting by the caller
/// (fail-open): dedupe is a quality improvement, not a safety property.
pub trait SignalCache: Send + Sync {
    /// Returns false without side effects if an unexpired entry exists for
    /// the signal's cache key; otherwise records the key and returns true.
    fn offer(&self, signal: &Signal) -> Result<bool>;
}

/// In-memory TTL cache with per-key atomic check-and-set
pub struct InMemorySignalCache {
    ttl: Duration,
    entries: DashMap<String, DateTime<Utc>>,
}

impl InMemorySignalCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs as i64),
            entries: DashMap::new(),
        }
    }

    /// Drop expired entries. Lazy eviction on lookup keeps the cache
    /// correct; this pass only bounds memory.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SignalCache for InMemorySignalCache {
    fn offer(&self, signal: &Signal) -> Result<bool> {
        let now = Utc::now();
        let key = signal.cache_key();

        // The entry holds a shard lock for the duration of the match, so
        // the TTL check and the insert are a single atomic step.
        let accepted = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() > now {
                    false
                } else {
                    occupied.insert(now + self.ttl);
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now + self.ttl);
                true
            }
        };

        debug!("Cache offer for {}: accepted={}", key, accepted);
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Direction;
    use uuid::Uuid;

    fn test_signal(instrument: &str, direction: Direction) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            instrument: instrument.to_string(),
            timeframe: "1h".to_string(),
            direction,
            score: 0.9,
            confidence: 0.95,
            generated_at: Utc::now(),
            source_model_id: "test-model".to_string(),
        }
    }

    #[test]
    fn test_second_offer_within_ttl_rejected() {
        let cache = InMemorySignalCache::new(300);
        let signal = test_signal("BTC/USDT", Direction::Buy);

        assert!(cache.offer(&signal).unwrap());
        assert!(!cache.offer(&signal).unwrap());

        // A redelivered copy with a different signal id shares the key
        let redelivered = test_signal("BTC/USDT", Direction::Buy);
        assert!(!cache.offer(&redelivered).unwrap());
    }

    #[test]
    fn test_distinct_keys_accepted() {
        let cache = InMemorySignalCache::new(300);

        assert!(cache.offer(&test_signal("BTC/USDT", Direction::Buy)).unwrap());
        assert!(cache.offer(&test_signal("BTC/USDT", Direction::Sell)).unwrap());
        assert!(cache.offer(&test_signal("ETH/USDT", Direction::Buy)).unwrap());
    }

    #[test]
    fn test_expired_entry_reaccepted() {
        // Zero TTL expires entries immediately
        let cache = InMemorySignalCache::new(0);
        let signal = test_signal("BTC/USDT", Direction::Buy);

        assert!(cache.offer(&signal).unwrap());
        assert!(cache.offer(&signal).unwrap());
    }

    #[test]
    fn test_sweep_bounds_memory() {
        let cache = InMemorySignalCache::new(0);
        cache.offer(&test_signal("BTC/USDT", Direction::Buy)).unwrap();
        cache.offer(&test_signal("ETH/USDT", Direction::Buy)).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.sweep(), 2);
        assert!(cache.is_empty());
    }
}
