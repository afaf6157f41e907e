use async_trait::async_trait;
use ethers::abi::{self, Token};
use ethers::core::utils::keccak256;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TransactionRequest, U256, U64};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};
use crate::execution::types::{f64_to_units, MirrorOrder};
use crate::strategies::types::Side;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum SubmitError {
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("transaction {0} reverted")]
    Reverted(String),

    #[error("no receipt for {tx_hash} within {waited:?}")]
    Timeout { tx_hash: String, waited: Duration },

    #[error("transaction {0} dropped from mempool")]
    Dropped(String),

    #[error("order not filled")]
    Unfilled,

    #[error("insufficient balance: need ${needed:.2}, have ${available:.2}")]
    InsufficientBalance { needed: f64, available: f64 },
}

/// Places a mirrored order. Returns the transaction hash on success.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn submit(&self, order: &MirrorOrder) -> Result<String, SubmitError>;
}

const EXECUTE_TRADE_SIGNATURE: &str = "executeTrade(uint256,bool,uint256,uint256)";

/// `executeTrade(tokenId, isBuy, amount, price)` with 6-decimal amounts.
pub fn execute_trade_calldata(order: &MirrorOrder) -> Vec<u8> {
    let selector = &keccak256(EXECUTE_TRADE_SIGNATURE.as_bytes())[..4];
    let params = abi::encode(&[
        Token::Uint(order.token_id),
        Token::Bool(order.side == Side::Buy),
        Token::Uint(f64_to_units(order.amount)),
        Token::Uint(order.price.map(f64_to_units).unwrap_or_else(U256::zero)),
    ]);

    let mut calldata = selector.to_vec();
    calldata.extend_from_slice(&params);
    calldata
}

/// Sends mirrored orders to the copy-trading vault contract.
pub struct VaultBackend {
    client: SignerMiddleware<Provider<Http>, LocalWallet>,
    vault: Address,
    confirm_timeout: Duration,
}

impl VaultBackend {
    pub fn new(
        rpc_url: &str,
        private_key: &str,
        chain_id: u64,
        vault: &str,
        confirm_timeout: Duration,
    ) -> anyhow::Result<Self> {
        use anyhow::Context;

        let provider = Provider::<Http>::try_from(rpc_url).context("Invalid RPC url")?;
        let wallet = private_key
            .parse::<LocalWallet>()
            .context("Invalid wallet private key")?
            .with_chain_id(chain_id);
        let vault = Address::from_str(vault).context("Invalid vault address")?;

        info!("🏦 Vault backend ready: vault={:#x}, signer={:#x}", vault, wallet.address());
        Ok(Self {
            client: SignerMiddleware::new(provider, wallet),
            vault,
            confirm_timeout,
        })
    }
}

#[async_trait]
impl ExecutionBackend for VaultBackend {
    fn name(&self) -> &'static str {
        "vault"
    }

    async fn submit(&self, order: &MirrorOrder) -> Result<String, SubmitError> {
        let tx = TransactionRequest::new()
            .to(self.vault)
            .data(execute_trade_calldata(order))
            .from(self.client.address());

        let gas_estimate = self
            .client
            .estimate_gas(&tx.clone().into(), None)
            .await
            .map_err(|e| SubmitError::Rejected(format!("gas estimation failed: {}", e)))?;
        let tx = tx.gas(gas_estimate * 120 / 100);

        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| SubmitError::Rejected(e.to_string()))?;
        let tx_hash = format!("{:#x}", pending.tx_hash());
        info!("🔗 Vault tx sent for trade {}: {}", order.trade_id, tx_hash);

        match tokio::time::timeout(self.confirm_timeout, pending).await {
            Ok(Ok(Some(receipt))) if receipt.status == Some(U64::from(1)) => {
                info!(
                    "✅ Trade {} confirmed in block {}",
                    order.trade_id,
                    receipt.block_number.unwrap_or_default()
                );
                Ok(tx_hash)
            }
            Ok(Ok(Some(_))) => Err(SubmitError::Reverted(tx_hash)),
            Ok(Ok(None)) => Err(SubmitError::Dropped(tx_hash)),
            Ok(Err(e)) => Err(SubmitError::Rejected(format!("{}: {}", tx_hash, e))),
            Err(_) => {
                warn!("⏳ Trade {} tx timeout, check manually: {}", order.trade_id, tx_hash);
                Err(SubmitError::Timeout {
                    tx_hash,
                    waited: self.confirm_timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(side: Side, price: Option<f64>) -> MirrorOrder {
        MirrorOrder {
            trade_id: 1,
            token_id: U256::from(77),
            side,
            amount: 2.5,
            price,
        }
    }

    #[test]
    fn test_calldata_layout() {
        let calldata = execute_trade_calldata(&order(Side::Buy, Some(0.42)));

        assert_eq!(calldata.len(), 4 + 4 * 32);
        assert_eq!(&calldata[..4], &keccak256(EXECUTE_TRADE_SIGNATURE.as_bytes())[..4]);

        let words = abi::decode(
            &[abi::ParamType::Uint(256), abi::ParamType::Bool, abi::ParamType::Uint(256), abi::ParamType::Uint(256)],
            &calldata[4..],
        )
        .unwrap();
        assert_eq!(words[0], Token::Uint(U256::from(77)));
        assert_eq!(words[1], Token::Bool(true));
        assert_eq!(words[2], Token::Uint(U256::from(2_500_000u64)));
        assert_eq!(words[3], Token::Uint(U256::from(420_000u64)));
    }

    #[test]
    fn test_sell_without_price_encodes_zero() {
        let calldata = execute_trade_calldata(&order(Side::Sell, None));

        assert_eq!(calldata[4 + 32 + 31], 0);
        assert!(calldata[4 + 96..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_vault_backend_rejects_bad_key() {
        let result = VaultBackend::new(
            "http://127.0.0.1:8545",
            "not-a-key",
            137,
            "0x0000000000000000000000000000000000000001",
            Duration::from_secs(1),
        );
        assert!(result.is_err());
    }
}
