use anyhow::Result;
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use crate::common::backoff::Backoff;
use crate::config::ChainConfig;
use crate::data::chain::ChainSource;
use crate::data::decoder::EventDecoder;
use crate::data::types::{ChainLogEvent, DecodedEvent};
use crate::execution::outbox::{Published, SignalOutbox};
use crate::strategies::signal;
use crate::strategies::tracked::TrackedTraderSet;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WatcherError {
    #[error("head subscription failed {attempts} consecutive times")]
    SubscriptionExhausted { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub backfill_interval: Duration,
    pub backfill_window: u64,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
    pub head_idle_timeout: Duration,
}

impl From<&ChainConfig> for WatcherSettings {
    fn from(config: &ChainConfig) -> Self {
        Self {
            backfill_interval: config.backfill_interval(),
            backfill_window: config.backfill_window_blocks,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            max_attempts: config.resubscribe_max_attempts,
            head_idle_timeout: config.head_idle_timeout(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockStats {
    pub logs: usize,
    pub fills: usize,
    pub matches: usize,
    pub signals: usize,
    pub decode_errors: usize,
}

/// Turns exchange logs into copy signals.
///
/// Two loops share one watcher: the head subscription handles each new
/// block as it arrives, the backfill poller re-sweeps a trailing window to
/// cover anything the subscription missed. Re-delivered fills are absorbed
/// by the outbox's idempotency key.
pub struct ChainWatcher {
    source: Arc<dyn ChainSource>,
    decoder: EventDecoder,
    tracked: Arc<TrackedTraderSet>,
    outbox: SignalOutbox,
    settings: WatcherSettings,
    last_head: AtomicU64,
    swept_through: AtomicU64,
}

impl ChainWatcher {
    pub fn new(
        source: Arc<dyn ChainSource>,
        tracked: Arc<TrackedTraderSet>,
        outbox: SignalOutbox,
        settings: WatcherSettings,
    ) -> Self {
        Self {
            source,
            decoder: EventDecoder::new(),
            tracked,
            outbox,
            settings,
            last_head: AtomicU64::new(0),
            swept_through: AtomicU64::new(0),
        }
    }

    pub fn last_head(&self) -> u64 {
        self.last_head.load(Ordering::SeqCst)
    }

    pub fn swept_through(&self) -> u64 {
        self.swept_through.load(Ordering::SeqCst)
    }

    /// Follows new heads until shutdown. Returns an error only once the
    /// resubscribe budget is spent.
    pub async fn run_subscription(&self, shutdown: CancellationToken) -> Result<(), WatcherError> {
        let mut backoff = Backoff::new(
            self.settings.initial_backoff,
            self.settings.max_backoff,
            self.settings.max_attempts,
        );
        let idle = self.settings.head_idle_timeout;
        let mut resubscribing = false;

        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            // Fresh transport for every retry
            if resubscribing {
                if let Err(e) = self.source.reconnect().await {
                    warn!("Transport rebuild failed: {:#}", e);
                }
            }
            resubscribing = true;

            match self.source.subscribe_heads().await {
                Ok(mut heads) => {
                    info!("📡 Subscribed to new block heads");
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => {
                                info!("Shutdown requested; closing head subscription");
                                return Ok(());
                            }
                            next = tokio::time::timeout(idle, heads.next()) => match next {
                                Ok(Some(number)) => {
                                    backoff.reset();
                                    self.on_head(number).await;
                                }
                                Ok(None) => {
                                    warn!("Head subscription ended");
                                    break;
                                }
                                // Silent stream counts as a dead one
                                Err(_) => {
                                    warn!("No head for {:?}; dropping subscription", idle);
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => warn!("Head subscription failed: {:#}", e),
            }

            // Check if budget is spent
            let delay = match backoff.next_delay() {
                Some(delay) => delay,
                None => {
                    let attempts = backoff.attempts();
                    error!("❌ Giving up on head subscription after {} consecutive failures", attempts);
                    return Err(WatcherError::SubscriptionExhausted { attempts });
                }
            };
            warn!("Resubscribing in {:?} (attempt {})", delay, backoff.attempts());

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Handles one head if it is newer than every head seen so far.
    pub async fn on_head(&self, number: u64) -> Option<BlockStats> {
        let previous = self.last_head.fetch_max(number, Ordering::SeqCst);
        if number <= previous {
            debug!("Ignoring head {} (already at {})", number, previous);
            return None;
        }

        match self.process_range(number, number).await {
            Ok(stats) => {
                if stats.signals > 0 {
                    info!("Block {}: {} fills, {} signals", number, stats.fills, stats.signals);
                }
                Some(stats)
            }
            Err(e) => {
                warn!("Failed to query logs for block {}: {:#}", number, e);
                None
            }
        }
    }

    pub async fn run_backfill(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.backfill_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested; stopping backfill");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.backfill_once().await {
                        warn!("Backfill pass failed: {:#}", e);
                    }
                }
            }
        }
    }

    /// Re-sweeps `[max(swept_through, latest - window + 1), latest]`.
    /// Returns the swept range, or `None` when the node is behind the cursor.
    pub async fn backfill_once(&self) -> Result<Option<(u64, u64)>> {
        let latest = self.source.latest_block().await?;
        let window_start = latest.saturating_sub(self.settings.backfill_window.saturating_sub(1));
        let from = self.swept_through().max(window_start);
        if from > latest {
            debug!("Backfill cursor {} ahead of latest block {}", from, latest);
            return Ok(None);
        }

        let stats = self.process_range(from, latest).await?;
        self.swept_through.fetch_max(latest, Ordering::SeqCst);

        debug!(
            "Backfilled blocks {}..={}: {} logs, {} signals",
            from, latest, stats.logs, stats.signals
        );
        Ok(Some((from, latest)))
    }

    async fn process_range(&self, from: u64, to: u64) -> Result<BlockStats> {
        let logs = self.source.logs_in_range(from, to).await?;
        Ok(self.handle_logs(logs))
    }

    /// Decodes and extracts in (block, log index) order against one
    /// membership snapshot.
    pub fn handle_logs(&self, mut logs: Vec<ChainLogEvent>) -> BlockStats {
        logs.sort_by_key(|l| (l.block_number, l.log_index));
        let tracked = self.tracked.snapshot();
        let mut stats = BlockStats {
            logs: logs.len(),
            ..Default::default()
        };

        for log in &logs {
            match self.decoder.decode(log) {
                Ok(DecodedEvent::Fill(fill)) => {
                    stats.fills += 1;
                    let maker_tracked = tracked.contains(&format!("{:#x}", fill.maker));
                    let taker_tracked = tracked.contains(&format!("{:#x}", fill.taker));

                    if let Some(signal) = signal::extract(&fill, maker_tracked, taker_tracked) {
                        info!(
                            trader = %format!("{:#x}", signal.trader),
                            side = %signal.side,
                            token_id = %signal.token_id,
                            amount = %signal.amount,
                            "🎯 Copy signal detected"
                        );
                        if self.outbox.publish(signal) != Published::Duplicate {
                            stats.signals += 1;
                        }
                    }
                }
                Ok(DecodedEvent::BatchMatch(matched)) => {
                    stats.matches += 1;
                    info!(
                        "Orders matched: taker order {:#x} by {:#x} in tx {:#x}",
                        matched.taker_order_hash, matched.taker_order_maker, matched.transaction_hash
                    );
                }
                Err(e) => {
                    stats.decode_errors += 1;
                    warn!(
                        "Skipping log {} in tx {:#x}: {}",
                        log.log_index, log.transaction_hash, e
                    );
                }
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::decoder::tests::fill_log;
    use crate::data::types::RankedTrader;
    use crate::execution::persistence::tests::memory_db;
    use crate::execution::persistence::CopyTradeDatabase;
    use crate::execution::types::SignalStatus;
    use crate::strategies::types::{Side, TradeSignal};
    use async_trait::async_trait;
    use ethers::types::{Address, H256};
    use futures::stream::{self, BoxStream};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    enum Heads {
        Refused,
        Finite(Vec<u64>),
        /// Never yields, never ends.
        Silent,
    }

    /// Scripted chain: each subscribe call pops the next script entry.
    /// An empty script refuses.
    #[derive(Default)]
    struct FakeChain {
        subscriptions: Mutex<VecDeque<Heads>>,
        subscribes: AtomicUsize,
        reconnects: AtomicUsize,
        latest: AtomicU64,
        logs: Mutex<Vec<ChainLogEvent>>,
        queries: Mutex<Vec<(u64, u64)>>,
    }

    impl FakeChain {
        fn script(&self, entries: Vec<Heads>) {
            self.subscriptions.lock().unwrap().extend(entries);
        }
    }

    #[async_trait]
    impl ChainSource for FakeChain {
        async fn subscribe_heads(&self) -> Result<BoxStream<'static, u64>> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            match self.subscriptions.lock().unwrap().pop_front().unwrap_or(Heads::Refused) {
                Heads::Finite(heads) => Ok(stream::iter(heads).boxed()),
                Heads::Silent => Ok(stream::pending().boxed()),
                Heads::Refused => Err(anyhow::anyhow!("connection refused")),
            }
        }

        async fn reconnect(&self) -> Result<()> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn latest_block(&self) -> Result<u64> {
            Ok(self.latest.load(Ordering::SeqCst))
        }

        async fn logs_in_range(&self, from: u64, to: u64) -> Result<Vec<ChainLogEvent>> {
            self.queries.lock().unwrap().push((from, to));
            Ok(self
                .logs
                .lock()
                .unwrap()
                .iter()
                .filter(|l| l.block_number >= from && l.block_number <= to)
                .cloned()
                .collect())
        }
    }

    const TRACKED: u8 = 0xaa;
    const OTHER: u8 = 0xbb;

    struct Harness {
        chain: Arc<FakeChain>,
        db: Arc<CopyTradeDatabase>,
        watcher: ChainWatcher,
        rx: mpsc::Receiver<TradeSignal>,
    }

    fn harness(max_attempts: u32) -> Harness {
        harness_with_idle(max_attempts, Duration::from_secs(3600))
    }

    fn harness_with_idle(max_attempts: u32, head_idle_timeout: Duration) -> Harness {
        let chain = Arc::new(FakeChain::default());
        let db = Arc::new(memory_db());
        let tracked = Arc::new(TrackedTraderSet::new());
        tracked.publish(vec![RankedTrader {
            address: format!("{:#x}", Address::repeat_byte(TRACKED)),
            total_pnl: 5_000.0,
            win_rate: 0.6,
            volume: 10_000.0,
        }]);
        let (tx, rx) = mpsc::channel(16);
        let settings = WatcherSettings {
            backfill_interval: Duration::from_secs(3600),
            backfill_window: 50,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            max_attempts,
            head_idle_timeout,
        };
        let source: Arc<dyn ChainSource> = chain.clone();
        let watcher = ChainWatcher::new(source, tracked, SignalOutbox::new(Arc::clone(&db), tx), settings);
        Harness { chain, db, watcher, rx }
    }

    fn buy_fill(block: u64, log_index: u64, tx: u8, maker: u8) -> ChainLogEvent {
        fill_log(
            &EventDecoder::new(),
            block,
            log_index,
            H256::repeat_byte(tx),
            H256::repeat_byte(tx ^ 0xff),
            Address::repeat_byte(maker),
            Address::repeat_byte(0x01),
            [0, 77, 10_000_000, 20_000_000, 0],
        )
    }

    #[tokio::test]
    async fn test_tracked_fill_becomes_signal() {
        let mut h = harness(3);
        let stats = h.watcher.handle_logs(vec![buy_fill(10, 0, 1, TRACKED), buy_fill(10, 1, 2, OTHER)]);

        assert_eq!(stats.fills, 2);
        assert_eq!(stats.signals, 1);
        let signal = h.rx.recv().await.unwrap();
        assert_eq!(signal.trader, Address::repeat_byte(TRACKED));
        assert_eq!(signal.side, Side::Buy);
        assert_eq!(h.db.count_signals(SignalStatus::Queued).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_redelivered_fill_is_absorbed() {
        let mut h = harness(3);
        h.watcher.handle_logs(vec![buy_fill(10, 0, 1, TRACKED)]);
        let stats = h.watcher.handle_logs(vec![buy_fill(10, 0, 1, TRACKED)]);

        assert_eq!(stats.signals, 0);
        assert!(h.rx.recv().await.is_some());
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_log_is_skipped() {
        let mut h = harness(3);
        let mut broken = buy_fill(10, 0, 1, TRACKED);
        broken.data.truncate(40);

        let stats = h.watcher.handle_logs(vec![broken, buy_fill(10, 1, 2, TRACKED)]);
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.signals, 1);
        assert_eq!(h.rx.recv().await.unwrap().log_index, 1);
    }

    #[tokio::test]
    async fn test_logs_handled_in_chain_order() {
        let mut h = harness(3);
        h.watcher.handle_logs(vec![
            buy_fill(11, 0, 3, TRACKED),
            buy_fill(10, 5, 2, TRACKED),
            buy_fill(10, 1, 1, TRACKED),
        ]);

        let order: Vec<(u64, u64)> = (0..3)
            .map(|_| h.rx.try_recv().unwrap())
            .map(|s| (s.block_number, s.log_index))
            .collect();
        assert_eq!(order, vec![(10, 1), (10, 5), (11, 0)]);
    }

    #[tokio::test]
    async fn test_stale_heads_are_ignored() {
        let h = harness(3);
        assert!(h.watcher.on_head(5).await.is_some());
        assert!(h.watcher.on_head(5).await.is_none());
        assert!(h.watcher.on_head(4).await.is_none());
        assert!(h.watcher.on_head(6).await.is_some());

        assert_eq!(*h.chain.queries.lock().unwrap(), vec![(5, 5), (6, 6)]);
        assert_eq!(h.watcher.last_head(), 6);
    }

    #[tokio::test]
    async fn test_backfill_advances_cursor() {
        let mut h = harness(3);
        h.chain.logs.lock().unwrap().push(buy_fill(60, 0, 1, TRACKED));
        h.chain.latest.store(100, Ordering::SeqCst);

        assert_eq!(h.watcher.backfill_once().await.unwrap(), Some((51, 100)));
        assert_eq!(h.watcher.swept_through(), 100);
        assert!(h.rx.try_recv().is_ok());

        h.chain.latest.store(120, Ordering::SeqCst);
        assert_eq!(h.watcher.backfill_once().await.unwrap(), Some((100, 120)));

        // Node lagging behind the cursor.
        h.chain.latest.store(90, Ordering::SeqCst);
        assert_eq!(h.watcher.backfill_once().await.unwrap(), None);
        assert_eq!(h.watcher.swept_through(), 120);
    }

    #[tokio::test]
    async fn test_backfill_near_genesis() {
        let h = harness(3);
        h.chain.latest.store(10, Ordering::SeqCst);
        assert_eq!(h.watcher.backfill_once().await.unwrap(), Some((0, 10)));
    }

    #[tokio::test]
    async fn test_subscription_gives_up_after_budget() {
        let h = harness(2);
        let result = h.watcher.run_subscription(CancellationToken::new()).await;

        assert_eq!(result, Err(WatcherError::SubscriptionExhausted { attempts: 2 }));
        assert_eq!(h.chain.subscribes.load(Ordering::SeqCst), 2);
        assert_eq!(h.chain.reconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_silent_subscription_is_replaced() {
        let h = harness_with_idle(3, Duration::from_millis(20));
        h.chain.script(vec![Heads::Silent, Heads::Silent, Heads::Silent]);

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            h.watcher.run_subscription(CancellationToken::new()),
        )
        .await
        .expect("silent heads must not stall the watcher");

        assert_eq!(result, Err(WatcherError::SubscriptionExhausted { attempts: 3 }));
        assert_eq!(h.chain.subscribes.load(Ordering::SeqCst), 3);
        assert_eq!(h.chain.reconnects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_heads_resume_after_silence() {
        let h = harness_with_idle(2, Duration::from_millis(20));
        h.chain.script(vec![Heads::Silent, Heads::Finite(vec![7])]);

        let result = h.watcher.run_subscription(CancellationToken::new()).await;
        assert!(result.is_err());
        assert_eq!(*h.chain.queries.lock().unwrap(), vec![(7, 7)]);
        assert_eq!(h.watcher.last_head(), 7);
    }

    #[tokio::test]
    async fn test_received_heads_reset_attempts() {
        let h = harness(2);
        h.chain.script(vec![Heads::Refused, Heads::Finite(vec![1, 2]), Heads::Finite(vec![3])]);

        // Without the resets the budget would be spent before head 3 arrives.
        let result = h.watcher.run_subscription(CancellationToken::new()).await;
        assert!(result.is_err());
        assert_eq!(*h.chain.queries.lock().unwrap(), vec![(1, 1), (2, 2), (3, 3)]);
    }

    #[tokio::test]
    async fn test_subscription_stops_on_shutdown() {
        let h = harness(10);
        h.chain.script(vec![Heads::Finite(vec![])]);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        assert_eq!(h.watcher.run_subscription(shutdown).await, Ok(()));
    }
}
