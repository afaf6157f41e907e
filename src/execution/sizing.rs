use crate::execution::types::units_to_f64;
use crate::strategies::types::TradeSignal;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SizingError {
    #[error("mirrored amount rounds to zero")]
    ZeroAmount,

    #[error("mirrored amount {0} is not a finite positive number")]
    Invalid(f64),
}

/// Uniform proportional sizing: every signal is copied at the same multiplier.
#[derive(Debug, Clone, Copy)]
pub struct SizingPolicy {
    multiplier: f64,
}

impl SizingPolicy {
    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Mirrored amount in decimal units.
    pub fn mirrored_amount(&self, signal: &TradeSignal) -> Result<f64, SizingError> {
        let amount = units_to_f64(signal.amount) * self.multiplier;

        if !amount.is_finite() || amount < 0.0 {
            return Err(SizingError::Invalid(amount));
        }
        // Below one raw unit there is nothing to place.
        if amount < 1e-6 {
            return Err(SizingError::ZeroAmount);
        }
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::persistence::tests::signal;
    use ethers::types::U256;

    #[test]
    fn test_amount_scales_by_multiplier() {
        let policy = SizingPolicy::new(0.1);
        // 20_000_000 raw = 20 units
        assert!((policy.mirrored_amount(&signal(1, 1)).unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_dust_is_zero() {
        let policy = SizingPolicy::new(0.1);
        let mut dust = signal(1, 1);
        dust.amount = U256::from(5);

        assert_eq!(policy.mirrored_amount(&dust), Err(SizingError::ZeroAmount));

        dust.amount = U256::zero();
        assert_eq!(policy.mirrored_amount(&dust), Err(SizingError::ZeroAmount));
    }

    #[test]
    fn test_sizing_is_uniform_across_sides() {
        use crate::strategies::types::Side;

        let policy = SizingPolicy::new(0.5);
        let buy = signal(1, 1);
        let mut sell = signal(2, 2);
        sell.side = Side::Sell;
        sell.price = None;

        assert_eq!(policy.mirrored_amount(&buy), policy.mirrored_amount(&sell));
    }
}
