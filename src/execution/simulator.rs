use async_trait::async_trait;
use ethers::types::H256;
use rand::Rng;
use std::sync::Mutex;
use tracing::info;
use crate::config::PaperTradingConfig;
use crate::execution::backend::{ExecutionBackend, SubmitError};
use crate::execution::types::MirrorOrder;
use crate::strategies::types::Side;

/// Dry-run backend: fills probabilistically against a paper balance.
pub struct PaperTradingSimulator {
    config: PaperTradingConfig,
    balance: Mutex<f64>,
}

impl PaperTradingSimulator {
    pub fn new(config: PaperTradingConfig) -> Self {
        let balance = config.initial_balance_usd;
        info!("📝 Paper trading simulator initialized with ${:.2}", balance);

        Self {
            config,
            balance: Mutex::new(balance),
        }
    }

    pub fn balance(&self) -> f64 {
        match self.balance.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn simulated_tx_hash() -> String {
        let bytes: [u8; 32] = rand::thread_rng().gen();
        format!("{:#x}", H256::from(bytes))
    }
}

#[async_trait]
impl ExecutionBackend for PaperTradingSimulator {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn submit(&self, order: &MirrorOrder) -> Result<String, SubmitError> {
        let (will_fill, slippage) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen::<f64>() < self.config.fill_rate,
                rng.gen::<f64>() * self.config.slippage_pct,
            )
        };

        if !will_fill {
            info!("Trade {} not filled (simulated rejection)", order.trade_id);
            return Err(SubmitError::Unfilled);
        }

        let mut balance = match self.balance.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match order.side {
            Side::Buy => {
                let price = order
                    .price
                    .ok_or_else(|| SubmitError::Rejected("buy without a reference price".to_string()))?;
                if price <= 0.0 {
                    return Err(SubmitError::Rejected(format!("non-positive price {}", price)));
                }
                // Signal price is counter per own amount: outcome tokens per USDC on a buy.
                let executed_price = (1.0 / price) * (1.0 + slippage);
                let cost = order.amount * executed_price;
                if cost > *balance {
                    return Err(SubmitError::InsufficientBalance {
                        needed: cost,
                        available: *balance,
                    });
                }
                *balance -= cost;

                info!(
                    "Paper fill: buy {:.4} of token {} @ ${:.4} (slippage: {:.2}%), balance ${:.2}",
                    order.amount,
                    order.token_id,
                    executed_price,
                    slippage * 100.0,
                    *balance
                );
            }
            Side::Sell => {
                // Sell proceeds are unknown without a price; the balance is left as is.
                info!("Paper fill: sell {:.4} of token {}", order.amount, order.token_id);
            }
        }

        Ok(Self::simulated_tx_hash())
    }
}
