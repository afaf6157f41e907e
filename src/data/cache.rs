use dashmap::DashMap;
use std::time::{Duration, Instant};
use crate::data::types::MarketInfo;

/// Token id → market resolution, evicted lazily on read once stale.
pub struct MarketCache {
    cache: DashMap<String, CachedMarket>,
    ttl: Duration,
}

struct CachedMarket {
    market: MarketInfo,
    timestamp: Instant,
}

impl MarketCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: DashMap::new(),
            ttl,
        }
    }

    pub fn insert(&self, token_id: String, market: MarketInfo) {
        self.cache.insert(token_id, CachedMarket {
            market,
            timestamp: Instant::now(),
        });
    }

    pub fn get(&self, token_id: &str) -> Option<MarketInfo> {
        let entry = self.cache.get(token_id)?;
        if entry.timestamp.elapsed() > self.ttl {
            drop(entry); // release the shard read lock before removing
            self.cache.remove(token_id);
            return None;
        }
        Some(entry.market.clone())
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
