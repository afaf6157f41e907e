use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use crate::data::gamma_api::MarketLookup;
use crate::data::types::MarketInfo;
use crate::execution::backend::ExecutionBackend;
use crate::execution::persistence::{CopyTradeDatabase, LedgerResult};
use crate::execution::sizing::SizingPolicy;
use crate::execution::types::{
    units_to_f64, MirrorOrder, NewCopyTrade, Position, PositionStatus, SignalStatus, TradeStatus,
};
use crate::monitoring::logger::TradeJournal;
use crate::strategies::types::TradeSignal;

/// Outbox rows drained per sweep.
const SWEEP_BATCH: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// A trade already exists for this idempotency key.
    Duplicate,
    /// Sized to nothing; the outbox row is marked skipped.
    Skipped,
    Confirmed { trade_id: i64, tx_hash: String },
    Failed { trade_id: i64, reason: String },
}

/// Books and places one mirrored trade per signal.
pub struct ExecutionOrchestrator {
    db: Arc<CopyTradeDatabase>,
    backend: Arc<dyn ExecutionBackend>,
    markets: Arc<dyn MarketLookup>,
    sizing: SizingPolicy,
    journal: Option<TradeJournal>,
}

impl ExecutionOrchestrator {
    pub fn new(
        db: Arc<CopyTradeDatabase>,
        backend: Arc<dyn ExecutionBackend>,
        markets: Arc<dyn MarketLookup>,
        sizing: SizingPolicy,
        journal: Option<TradeJournal>,
    ) -> Self {
        info!(
            "⚙️  Execution orchestrator using {} backend at {}x",
            backend.name(),
            sizing.multiplier()
        );
        Self { db, backend, markets, sizing, journal }
    }

    /// Idempotent: re-delivering a signal never creates a second trade.
    /// A ledger error leaves the outbox row queued for the next sweep.
    pub async fn execute(&self, signal: &TradeSignal) -> LedgerResult<ExecutionOutcome> {
        let key = signal.key.to_string();

        // Check if already booked
        if self.db.trade_exists(&key)? {
            debug!("Trade for {} already booked", key);
            self.db.mark_signal(&signal.key, SignalStatus::Booked)?;
            return Ok(ExecutionOutcome::Duplicate);
        }

        // Size the mirror order
        let amount = match self.sizing.mirrored_amount(signal) {
            Ok(amount) => amount,
            Err(e) => {
                info!("Skipping signal {}: {}", key, e);
                self.db.mark_signal(&signal.key, SignalStatus::Skipped)?;
                return Ok(ExecutionOutcome::Skipped);
            }
        };

        // Resolve market metadata
        let market = match self.markets.resolve(signal.token_id).await {
            Ok(market) => market,
            Err(e) => {
                warn!("Could not resolve market for token {}: {:#}", signal.token_id, e);
                MarketInfo::unresolved()
            }
        };

        let price = signal.price.map(units_to_f64);
        let trader = format!("{:#x}", signal.trader);
        let new = NewCopyTrade {
            idempotency_key: key.clone(),
            position: Position {
                id: None,
                market_id: market.market_id,
                token_id: signal.token_id.to_string(),
                outcome: market.outcome,
                amount,
                avg_price: price.unwrap_or(0.0),
                current_price: price.unwrap_or(0.0),
                status: PositionStatus::Open,
                created_at: Utc::now(),
                closed_at: None,
            },
            trader_address: trader.clone(),
            side: signal.side,
            amount,
            price: price.unwrap_or(0.0),
        };

        // Book position and pending trade
        let booked = match self.db.book_copy_trade(&new)? {
            Some(booked) => booked,
            None => return Ok(ExecutionOutcome::Duplicate),
        };
        info!(
            "📒 Booked trade {} (position {}): copy {} {} {:.4} of token {}",
            booked.trade_id, booked.position_id, trader, signal.side, amount, signal.token_id
        );

        let order = MirrorOrder {
            trade_id: booked.trade_id,
            token_id: signal.token_id,
            side: signal.side,
            amount,
            price,
        };

        // Submit and resolve
        match self.backend.submit(&order).await {
            Ok(tx_hash) => {
                self.db.update_trade_status(booked.trade_id, TradeStatus::Confirmed, Some(&tx_hash))?;
                info!("✅ Trade {} confirmed: {}", booked.trade_id, tx_hash);
                self.journal(&order, &trader, TradeStatus::Confirmed, Some(&tx_hash), None);
                Ok(ExecutionOutcome::Confirmed {
                    trade_id: booked.trade_id,
                    tx_hash,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                error!("❌ Trade {} failed on {} backend: {}", booked.trade_id, self.backend.name(), reason);
                self.db.update_trade_status(booked.trade_id, TradeStatus::Failed, None)?;
                self.journal(&order, &trader, TradeStatus::Failed, None, Some(&reason));
                Ok(ExecutionOutcome::Failed {
                    trade_id: booked.trade_id,
                    reason,
                })
            }
        }
    }

    fn journal(
        &self,
        order: &MirrorOrder,
        trader: &str,
        status: TradeStatus,
        tx_hash: Option<&str>,
        detail: Option<&str>,
    ) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record(order, trader, status, tx_hash, detail) {
                warn!("Failed to write trade journal: {}", e);
            }
        }
    }

    /// Drains queued outbox rows. Returns how many were processed.
    pub async fn sweep_outbox(&self) -> LedgerResult<usize> {
        let queued = self.db.queued_signals(SWEEP_BATCH)?;
        if queued.is_empty() {
            return Ok(0);
        }

        info!("Sweeping {} queued signals from outbox", queued.len());
        for signal in &queued {
            if let Err(e) = self.execute(signal).await {
                error!("Failed to execute signal {}: {}", signal.key, e);
            }
        }
        Ok(queued.len())
    }

    /// Consumes the signal queue, sweeping the outbox on an interval, until
    /// shutdown or until every sender is gone.
    pub async fn run_worker(
        &self,
        mut rx: mpsc::Receiver<TradeSignal>,
        sweep_interval: Duration,
        shutdown: CancellationToken,
    ) {
        let mut sweep = tokio::time::interval(sweep_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested; stopping execution worker");
                    return;
                }
                received = rx.recv() => match received {
                    Some(signal) => {
                        if let Err(e) = self.execute(&signal).await {
                            error!("Failed to execute signal {}: {}", signal.key, e);
                        }
                    }
                    None => {
                        info!("Signal queue closed; stopping execution worker");
                        return;
                    }
                },
                _ = sweep.tick() => {
                    if let Err(e) = self.sweep_outbox().await {
                        error!("Outbox sweep failed: {}", e);
                    }
                }
            }
        }
    }
}
