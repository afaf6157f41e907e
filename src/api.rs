use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;
use crate::data::types::RankedTrader;
use crate::execution::persistence::{CopyTradeDatabase, LedgerResult};
use crate::execution::types::{Position, Trade, User};
use crate::strategies::tracked::TrackedTraderSet;

/// Read-side handle over the running pipeline.
#[derive(Clone)]
pub struct QuerySurface {
    db: Arc<CopyTradeDatabase>,
    tracked: Arc<TrackedTraderSet>,
    leaderboard_refresh: Arc<Notify>,
}

impl QuerySurface {
    pub fn new(
        db: Arc<CopyTradeDatabase>,
        tracked: Arc<TrackedTraderSet>,
        leaderboard_refresh: Arc<Notify>,
    ) -> Self {
        Self { db, tracked, leaderboard_refresh }
    }

    /// Top traders by total pnl as stored in the ledger.
    pub fn top_traders(&self, limit: usize) -> LedgerResult<Vec<RankedTrader>> {
        self.db.get_top_traders(limit)
    }

    /// Asks the ingestion task for an out-of-band leaderboard pass. Requests
    /// made while a pass is running coalesce into one follow-up pass.
    pub fn request_leaderboard_refresh(&self) {
        info!("Leaderboard refresh requested");
        self.leaderboard_refresh.notify_one();
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.size()
    }

    pub fn tracked_generation(&self) -> u64 {
        self.tracked.generation()
    }

    pub fn is_tracked(&self, address: &str) -> bool {
        self.tracked.is_tracked(address)
    }

    pub fn open_positions(&self) -> LedgerResult<Vec<Position>> {
        self.db.get_open_positions()
    }

    pub fn trade_by_key(&self, idempotency_key: &str) -> LedgerResult<Option<Trade>> {
        self.db.get_trade_by_key(idempotency_key)
    }

    pub fn user(&self, address: &str) -> LedgerResult<Option<User>> {
        self.db.get_user(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::persistence::tests::memory_db;
    use crate::strategies::tracked::refresh_once;
    use std::time::Duration;

    fn surface() -> (QuerySurface, Arc<CopyTradeDatabase>, Arc<TrackedTraderSet>, Arc<Notify>) {
        let db = Arc::new(memory_db());
        let tracked = Arc::new(TrackedTraderSet::new());
        let notify = Arc::new(Notify::new());
        let surface = QuerySurface::new(Arc::clone(&db), Arc::clone(&tracked), Arc::clone(&notify));
        (surface, db, tracked, notify)
    }

    #[test]
    fn test_reads_ledger_and_tracked_set() {
        let (surface, db, tracked, _) = surface();
        db.upsert_top_trader("0xaaa", 900.0, 0.6, 1.0).unwrap();
        db.upsert_top_trader("0xbbb", 1_200.0, 0.7, 1.0).unwrap();
        db.create_user("0xuser", 50.0).unwrap();
        refresh_once(&tracked, &db, 10).unwrap();

        let top = surface.top_traders(1).unwrap();
        assert_eq!(top[0].address, "0xbbb");
        assert_eq!(surface.tracked_count(), 2);
        assert_eq!(surface.tracked_generation(), 1);
        assert!(surface.is_tracked("0xAAA"));
        assert!(surface.open_positions().unwrap().is_empty());
        assert!(surface.trade_by_key("0x1:0x2").unwrap().is_none());
        assert_eq!(surface.user("0xuser").unwrap().unwrap().deposit_amount, 50.0);
    }

    #[tokio::test]
    async fn test_refresh_request_wakes_ingestion() {
        let (surface, _, _, notify) = surface();

        // Requested before anyone waits: the permit is kept.
        surface.request_leaderboard_refresh();
        tokio::time::timeout(Duration::from_secs(1), notify.notified())
            .await
            .unwrap();
    }
}
