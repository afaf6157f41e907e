use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};
use crate::execution::persistence::CopyTradeDatabase;
use crate::strategies::types::TradeSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Published {
    /// Written to the outbox and handed to the execution worker.
    Dispatched,
    /// Already in the outbox from an earlier delivery.
    Duplicate,
    /// Queue full or closed; the outbox row is picked up by the next sweep.
    Deferred,
}

/// Durable hand-off between detection and execution.
#[derive(Clone)]
pub struct SignalOutbox {
    db: Arc<CopyTradeDatabase>,
    tx: mpsc::Sender<TradeSignal>,
}

impl SignalOutbox {
    pub fn new(db: Arc<CopyTradeDatabase>, tx: mpsc::Sender<TradeSignal>) -> Self {
        Self { db, tx }
    }

    pub fn publish(&self, signal: TradeSignal) -> Published {
        match self.db.enqueue_signal(&signal) {
            Ok(true) => {}
            Ok(false) => {
                debug!("Signal {} already in outbox", signal.key);
                return Published::Duplicate;
            }
            // Not durable; the in-memory hand-off is the only copy.
            Err(e) => error!("Failed to persist signal {}: {}", signal.key, e),
        }

        match self.tx.try_send(signal) {
            Ok(()) => Published::Dispatched,
            Err(TrySendError::Full(signal)) => {
                warn!("Execution queue full; signal {} deferred to outbox sweep", signal.key);
                Published::Deferred
            }
            Err(TrySendError::Closed(signal)) => {
                warn!("Execution queue closed; signal {} left in outbox", signal.key);
                Published::Deferred
            }
        }
    }
}
