use chrono::{DateTime, Utc};
use ethers::types::U256;
use std::fmt;
use std::str::FromStr;
use crate::strategies::types::Side;

/// Both USDC and CTF outcome tokens carry six decimals.
pub const UNIT_SCALE: f64 = 1_000_000.0;

/// Raw 6-decimal integer to decimal units.
pub fn units_to_f64(raw: U256) -> f64 {
    let whole = if raw.bits() <= 128 {
        raw.low_u128() as f64
    } else {
        raw.to_string().parse::<f64>().unwrap_or(f64::MAX)
    };
    whole / UNIT_SCALE
}

/// Decimal units back to a raw 6-decimal integer. Negative and NaN map to zero.
pub fn f64_to_units(value: f64) -> U256 {
    U256::from((value * UNIT_SCALE).round() as u128)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(PositionStatus::Open),
            "closed" => Ok(PositionStatus::Closed),
            other => Err(format!("unknown position status: {}", other)),
        }
    }
}

/// pending is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Confirmed => "confirmed",
            TradeStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Pending)
    }

    pub fn can_transition_to(&self, next: TradeStatus) -> bool {
        matches!(
            (self, next),
            (TradeStatus::Pending, TradeStatus::Confirmed) | (TradeStatus::Pending, TradeStatus::Failed)
        )
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TradeStatus::Pending),
            "confirmed" => Ok(TradeStatus::Confirmed),
            "failed" => Ok(TradeStatus::Failed),
            other => Err(format!("unknown trade status: {}", other)),
        }
    }
}

/// Lifecycle of a row in the signal outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalStatus {
    Queued,
    Booked,
    Skipped,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Queued => "queued",
            SignalStatus::Booked => "booked",
            SignalStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub id: Option<i64>,
    pub market_id: String,
    pub token_id: String,
    pub outcome: String,
    pub amount: f64,
    pub avg_price: f64,
    pub current_price: f64,
    pub status: PositionStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub id: i64,
    pub position_id: i64,
    pub trader_address: String,
    pub side: Side,
    pub amount: f64,
    pub price: f64,
    pub tx_hash: Option<String>,
    pub status: TradeStatus,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub address: String,
    pub deposit_amount: f64,
    pub shares: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything booked for one signal in a single transaction.
#[derive(Debug, Clone)]
pub struct NewCopyTrade {
    pub idempotency_key: String,
    pub position: Position,
    pub trader_address: String,
    pub side: Side,
    pub amount: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookedTrade {
    pub position_id: i64,
    pub trade_id: i64,
}

/// The instruction handed to an execution backend.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorOrder {
    pub trade_id: i64,
    pub token_id: U256,
    pub side: Side,
    pub amount: f64,
    pub price: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_state_machine() {
        use TradeStatus::*;

        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Pending));
        for terminal in [Confirmed, Failed] {
            assert!(terminal.is_terminal());
            for next in [Pending, Confirmed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_units_conversion() {
        assert_eq!(units_to_f64(U256::from(10_000_000u64)), 10.0);
        assert_eq!(units_to_f64(U256::from(2)), 0.000002);
        assert!(units_to_f64(U256::MAX) > 1e70);
        assert_eq!(f64_to_units(2.5), U256::from(2_500_000u64));
        assert_eq!(f64_to_units(-1.0), U256::zero());
    }
}
