use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use crate::execution::types::{MirrorOrder, TradeStatus};

const HEADER: &str = "timestamp,trade_id,trader,side,token_id,amount,price,status,tx_hash,detail";

/// Append-only CSV of terminal trade outcomes.
pub struct TradeJournal {
    log_path: String,
}

impl TradeJournal {
    pub fn new(log_path: String) -> Result<Self> {
        if !Path::new(&log_path).exists() {
            if let Some(parent) = Path::new(&log_path).parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(&log_path)
                .with_context(|| format!("Failed to create {}", log_path))?;

            writeln!(file, "{}", HEADER)?;
        }

        Ok(Self { log_path })
    }

    pub fn record(
        &self,
        order: &MirrorOrder,
        trader: &str,
        status: TradeStatus,
        tx_hash: Option<&str>,
        detail: Option<&str>,
    ) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.log_path)?;

        let price = order.price.map(|p| format!("{:.6}", p)).unwrap_or_default();
        // Detail is free text; keep it inside one column.
        let detail = detail.unwrap_or_default().replace(',', ";");

        writeln!(
            file,
            "{},{},{},{},{},{:.6},{},{},{},{}",
            Utc::now().to_rfc3339(),
            order.trade_id,
            trader,
            order.side,
            order.token_id,
            order.amount,
            price,
            status,
            tx_hash.unwrap_or_default(),
            detail
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::types::Side;
    use ethers::types::U256;

    #[test]
    fn test_journal_appends_rows() {
        let path = std::env::temp_dir().join(format!("journal_{}_{}.csv", std::process::id(), Utc::now().timestamp_nanos_opt().unwrap_or_default()));
        let path = path.to_string_lossy().to_string();
        let journal = TradeJournal::new(path.clone()).unwrap();

        let order = MirrorOrder {
            trade_id: 3,
            token_id: U256::from(77),
            side: Side::Buy,
            amount: 2.0,
            price: Some(0.5),
        };
        journal.record(&order, "0xaaa", TradeStatus::Confirmed, Some("0xhash"), None).unwrap();
        journal.record(&order, "0xaaa", TradeStatus::Failed, None, Some("reverted, twice")).unwrap();

        // Reopening keeps the existing file.
        TradeJournal::new(path.clone()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert!(lines[1].ends_with(",3,0xaaa,buy,77,2.000000,0.500000,confirmed,0xhash,"));
        assert!(lines[2].ends_with(",failed,,reverted; twice"));

        std::fs::remove_file(&path).unwrap();
    }
}
