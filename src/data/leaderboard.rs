use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use crate::config::TrackingConfig;
use crate::data::types::LeaderboardEntry;
use crate::execution::persistence::CopyTradeDatabase;
use crate::strategies::tracked::{self, TrackedTraderSet};

/// Rough win rate from realized pnl relative to volume, capped at 0.9.
pub fn estimated_win_rate(pnl: f64, volume: f64) -> f64 {
    (0.5 + pnl / (volume + 1.0) * 0.3).min(0.9)
}

pub fn filter_profitable(entries: Vec<LeaderboardEntry>, min_profit: f64) -> Vec<LeaderboardEntry> {
    entries.into_iter().filter(|e| e.pnl >= min_profit).collect()
}

/// Pulls the data-api leaderboard into the ledger's tracked-trader table.
pub struct LeaderboardIngestion {
    client: Client,
    data_url: String,
    time_period: String,
    limit: usize,
    min_profit: f64,
    top_k: usize,
    db: Arc<CopyTradeDatabase>,
    tracked: Arc<TrackedTraderSet>,
}

impl LeaderboardIngestion {
    pub fn new(
        data_url: String,
        config: &TrackingConfig,
        db: Arc<CopyTradeDatabase>,
        tracked: Arc<TrackedTraderSet>,
    ) -> Self {
        Self {
            client: Client::new(),
            data_url,
            time_period: config.leaderboard_time_period.clone(),
            limit: config.leaderboard_limit,
            min_profit: config.min_profit_threshold,
            top_k: config.top_traders_count,
            db,
            tracked,
        }
    }

    pub async fn fetch(&self) -> Result<Vec<LeaderboardEntry>> {
        let url = format!("{}/v1/leaderboard", self.data_url);
        let limit = self.limit.to_string();

        let entries: Vec<LeaderboardEntry> = self.client
            .get(&url)
            .query(&[
                ("timePeriod", self.time_period.as_str()),
                ("orderBy", "PNL"),
                ("limit", limit.as_str()),
                ("offset", "0"),
                ("category", "overall"),
            ])
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .context("Failed to fetch leaderboard")?
            .error_for_status()
            .context("Leaderboard API returned an error status")?
            .json()
            .await
            .context("Failed to parse leaderboard response")?;

        Ok(entries)
    }

    /// One fetch → filter → upsert pass. Returns how many traders were stored.
    pub async fn ingest_once(&self) -> Result<usize> {
        let entries = self.fetch().await?;
        if entries.is_empty() {
            warn!("Leaderboard returned no traders; keeping existing ranking");
            return Ok(0);
        }
        self.store(entries)
    }

    /// Upserts the profitable entries, then republishes the tracked set.
    pub fn store(&self, entries: Vec<LeaderboardEntry>) -> Result<usize> {
        let fetched = entries.len();
        let profitable = filter_profitable(entries, self.min_profit);

        for entry in &profitable {
            let win_rate = estimated_win_rate(entry.pnl, entry.vol);
            self.db
                .upsert_top_trader(&entry.proxy_wallet.to_lowercase(), entry.pnl, win_rate, entry.vol)
                .with_context(|| format!("Failed to store trader {}", entry.proxy_wallet))?;
        }

        info!(
            "📊 Leaderboard ingested: {} of {} traders above ${:.0} pnl",
            profitable.len(),
            fetched,
            self.min_profit
        );

        if !profitable.is_empty() {
            tracked::refresh_once(&self.tracked, &self.db, self.top_k)?;
        }
        Ok(profitable.len())
    }

    /// Ingests on a fixed interval and whenever `refresh` is notified.
    pub async fn run(&self, interval: Duration, refresh: Arc<Notify>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested; stopping leaderboard ingestion");
                    return;
                }
                _ = ticker.tick() => {}
                _ = refresh.notified() => {
                    info!("On-demand leaderboard refresh requested");
                }
            }

            if let Err(e) = self.ingest_once().await {
                warn!("Leaderboard ingestion failed: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::persistence::tests::memory_db;

    fn entry(wallet: &str, pnl: f64, vol: f64) -> LeaderboardEntry {
        LeaderboardEntry {
            rank: String::new(),
            proxy_wallet: wallet.to_string(),
            user_name: None,
            vol,
            pnl,
        }
    }

    fn ingestion(db: Arc<CopyTradeDatabase>, tracked: Arc<TrackedTraderSet>) -> LeaderboardIngestion {
        let config = TrackingConfig::default();
        LeaderboardIngestion::new("http://127.0.0.1:9".to_string(), &config, db, tracked)
    }

    #[test]
    fn test_win_rate_estimate() {
        assert!((estimated_win_rate(0.0, 0.0) - 0.5).abs() < 1e-9);
        assert!((estimated_win_rate(1_000.0, 9_999.0) - 0.53).abs() < 1e-9);
        assert_eq!(estimated_win_rate(1_000_000.0, 10.0), 0.9);
    }

    #[test]
    fn test_filter_keeps_threshold_and_above() {
        let kept = filter_profitable(
            vec![entry("0x1", 999.99, 0.0), entry("0x2", 1000.0, 0.0), entry("0x3", 5000.0, 0.0)],
            1000.0,
        );
        let wallets: Vec<&str> = kept.iter().map(|e| e.proxy_wallet.as_str()).collect();
        assert_eq!(wallets, vec!["0x2", "0x3"]);
    }

    #[test]
    fn test_leaderboard_payload_parses() {
        let body = r#"[{"rank":"1","proxyWallet":"0xAbC","userName":"whale","vol":12000.5,"pnl":3400.25}]"#;
        let entries: Vec<LeaderboardEntry> = serde_json::from_str(body).unwrap();

        assert_eq!(entries[0].proxy_wallet, "0xAbC");
        assert_eq!(entries[0].user_name.as_deref(), Some("whale"));
        assert_eq!(entries[0].pnl, 3400.25);
    }

    #[test]
    fn test_store_upserts_and_publishes() {
        let db = Arc::new(memory_db());
        let tracked = Arc::new(TrackedTraderSet::new());
        let ingestion = ingestion(Arc::clone(&db), Arc::clone(&tracked));

        let stored = ingestion
            .store(vec![entry("0xAAA", 5_000.0, 20_000.0), entry("0xbbb", 10.0, 50.0)])
            .unwrap();

        assert_eq!(stored, 1);
        let top = db.get_top_traders(10).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].address, "0xaaa");
        assert!(tracked.is_tracked("0xAAA"));
    }

    #[test]
    fn test_nothing_profitable_keeps_tracked_set() {
        let db = Arc::new(memory_db());
        let tracked = Arc::new(TrackedTraderSet::new());
        let ingestion = ingestion(Arc::clone(&db), Arc::clone(&tracked));
        ingestion.store(vec![entry("0xaaa", 5_000.0, 0.0)]).unwrap();

        assert_eq!(ingestion.store(vec![entry("0xccc", 1.0, 0.0)]).unwrap(), 0);
        assert_eq!(tracked.generation(), 1);
        assert!(tracked.is_tracked("0xaaa"));
    }
}
