use ethers::types::{Address, H256, U256};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(format!("unknown side: {}", other)),
        }
    }
}

/// (transaction hash, order hash): one logical fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub tx_hash: H256,
    pub order_hash: H256,
}

impl IdempotencyKey {
    pub fn new(tx_hash: H256, order_hash: H256) -> Self {
        Self { tx_hash, order_hash }
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}:{:#x}", self.tx_hash, self.order_hash)
    }
}

/// Normalized copy-trade signal. Amount and price are raw 6-decimal integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeSignal {
    pub trader: Address,
    pub side: Side,
    pub token_id: U256,
    pub amount: U256,
    pub price: Option<U256>,
    pub source_tx_hash: H256,
    pub key: IdempotencyKey,
    pub block_number: u64,
    pub log_index: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_renders_full_hashes() {
        let key = IdempotencyKey::new(H256::repeat_byte(0x01), H256::repeat_byte(0xab));
        let rendered = key.to_string();

        assert_eq!(rendered.len(), 2 * 66 + 1);
        assert!(rendered.starts_with("0x0101"));
        assert!(rendered.ends_with("abab"));
    }

    #[test]
    fn test_side_round_trips_through_str() {
        assert_eq!("buy".parse::<Side>(), Ok(Side::Buy));
        assert_eq!(Side::Sell.as_str(), "sell");
        assert!("BUY".parse::<Side>().is_err());
    }
}
