use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

/// Raw log record as delivered by the chain, already stripped of the
/// pending-log optionals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLogEvent {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub transaction_hash: H256,
    pub log_index: u64,
}

/// `OrderFilled` on the CTF exchange. Asset id zero is the USDC leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFillEvent {
    pub transaction_hash: H256,
    pub block_number: u64,
    pub log_index: u64,
    pub order_hash: H256,
    pub maker: Address,
    pub taker: Address,
    pub maker_asset_id: U256,
    pub taker_asset_id: U256,
    pub maker_amount_filled: U256,
    pub taker_amount_filled: U256,
    pub fee: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMatchEvent {
    pub transaction_hash: H256,
    pub taker_order_hash: H256,
    pub taker_order_maker: Address,
    pub maker_asset_id: U256,
    pub taker_asset_id: U256,
    pub maker_amount_filled: U256,
    pub taker_amount_filled: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    Fill(DecodedFillEvent),
    BatchMatch(DecodedMatchEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketInfo {
    pub market_id: String,
    pub outcome: String,
}

impl MarketInfo {
    pub const UNRESOLVED_MARKET: &'static str = "unresolved";
    pub const UNKNOWN_OUTCOME: &'static str = "UNKNOWN";

    pub fn unresolved() -> Self {
        Self {
            market_id: Self::UNRESOLVED_MARKET.to_string(),
            outcome: Self::UNKNOWN_OUTCOME.to_string(),
        }
    }
}

/// One row of the data-api leaderboard.
#[derive(Debug, Clone, Deserialize)]
pub struct LeaderboardEntry {
    #[serde(default)]
    pub rank: String,
    #[serde(rename = "proxyWallet")]
    pub proxy_wallet: String,
    #[serde(rename = "userName", default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub vol: f64,
    #[serde(default)]
    pub pnl: f64,
}

/// A tracked-trader row as ranked by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedTrader {
    pub address: String,
    pub total_pnl: f64,
    pub win_rate: f64,
    pub volume: f64,
}
