use anyhow::Result;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use crate::data::types::RankedTrader;
use crate::execution::persistence::CopyTradeDatabase;

/// Canonical form for membership tests: trimmed, lower-case, `0x`-prefixed.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim().to_lowercase();
    if trimmed.starts_with("0x") {
        trimmed
    } else {
        format!("0x{}", trimmed)
    }
}

/// One published generation of the tracked set. Never mutated after publish.
#[derive(Debug, Default)]
pub struct TrackedSnapshot {
    pub generation: u64,
    addresses: HashSet<String>,
    pub ranking: Vec<RankedTrader>,
}

impl TrackedSnapshot {
    fn build(generation: u64, ranking: Vec<RankedTrader>) -> Self {
        let addresses = ranking.iter().map(|t| normalize_address(&t.address)).collect();
        Self { generation, addresses, ranking }
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains(&normalize_address(address))
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// Read-mostly membership set, replaced wholesale on refresh.
///
/// Writers build the next snapshot outside the lock and swap a single `Arc`;
/// readers clone the current `Arc` and keep using it even if a newer
/// generation is published meanwhile.
#[derive(Debug, Default)]
pub struct TrackedTraderSet {
    current: RwLock<Arc<TrackedSnapshot>>,
    generations: AtomicU64,
}

impl TrackedTraderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<TrackedSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn is_tracked(&self, address: &str) -> bool {
        self.snapshot().contains(address)
    }

    pub fn size(&self) -> usize {
        self.snapshot().len()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    /// Publishes `ranking` as the next generation. An empty ranking is
    /// ignored so a failed upstream fetch never clears the set.
    pub fn publish(&self, ranking: Vec<RankedTrader>) -> Option<u64> {
        if ranking.is_empty() {
            return None;
        }

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let next = Arc::new(TrackedSnapshot::build(generation, ranking));

        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // A concurrent publisher may already have swapped in a newer generation.
        if guard.generation >= generation {
            return None;
        }
        *guard = next;
        Some(generation)
    }
}

/// Reloads the top-K traders from the ledger and publishes them.
pub fn refresh_once(set: &TrackedTraderSet, db: &CopyTradeDatabase, top_k: usize) -> Result<Option<u64>> {
    let ranking = db.get_top_traders(top_k)?;
    if ranking.is_empty() {
        warn!("Top trader query returned no rows; keeping generation {}", set.generation());
        return Ok(None);
    }

    let count = ranking.len();
    let generation = set.publish(ranking);
    info!("Updated top traders list: {} traders (generation {:?})", count, generation);
    Ok(generation)
}

pub async fn run_refresh_loop(
    set: Arc<TrackedTraderSet>,
    db: Arc<CopyTradeDatabase>,
    top_k: usize,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown requested; stopping tracked trader refresh");
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = refresh_once(&set, &db, top_k) {
                    warn!("Failed to get top traders: {}", e);
                }
            }
        }
    }
}
