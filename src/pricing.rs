// 5.0: price retrieval boundary. The pipeline only ever needs "one price for
// one asset pair"; how the venue derives it (direct pair, composite path) is
// behind the trait. A fixed-rate table implementation backs tests and the sim.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// One hop of a composite price path, kept for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceStep {
    pub source: String,
    pub from: String,
    pub to: String,
    pub price: Decimal,
}

impl PriceStep {
    pub fn new(source: &str, from: &str, to: &str, price: Decimal) -> Self {
        Self {
            source: source.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            price,
        }
    }
}

/// A quoted price for `source`/`target`: one unit of `target` costs `price`
/// units of `source`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub source: String,
    pub target: String,
    pub price: Decimal,
    pub steps: Vec<PriceStep>,
}

impl Price {
    pub fn new(source: &str, target: &str, price: Decimal) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            price,
            steps: Vec::new(),
        }
    }

    pub fn identity(asset: &str) -> Self {
        Self::new(asset, asset, Decimal::ONE)
    }

    pub fn with_steps(mut self, steps: Vec<PriceStep>) -> Self {
        self.steps = steps;
        self
    }

    /// Convert an amount of the source asset into the target asset, rounded
    /// to `decimals` places. A zero price is a fatal calculation error.
    pub fn convert(&self, amount: Decimal, decimals: u32) -> Result<Decimal, PricingError> {
        if self.price == Decimal::ZERO {
            return Err(PricingError::ZeroPrice {
                from: self.source.clone(),
                to: self.target.clone(),
            });
        }
        Ok((amount / self.price)
            .round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("no reliable price path for {from}/{to}")]
    PriceMismatch { from: String, to: String },

    #[error("price for {from}/{to} is zero")]
    ZeroPrice { from: String, to: String },
}

pub trait PricingProvider {
    fn get_price(&self, from: &str, to: &str) -> Result<Price, PricingError>;
}

// 5.1: fixed-rate table. Rates are stored one-directional; same-asset requests
// short-circuit to the identity price.
#[derive(Debug, Default)]
pub struct FixedRatePricing {
    rates: HashMap<(String, String), Decimal>,
}

impl FixedRatePricing {
    pub fn new() -> Self {
        Self {
            rates: HashMap::new(),
        }
    }

    pub fn set_rate(&mut self, from: &str, to: &str, price: Decimal) {
        self.rates
            .insert((from.to_string(), to.to_string()), price);
    }
}

impl PricingProvider for FixedRatePricing {
    fn get_price(&self, from: &str, to: &str) -> Result<Price, PricingError> {
        if from == to {
            return Ok(Price::identity(from));
        }

        let price = self
            .rates
            .get(&(from.to_string(), to.to_string()))
            .copied()
            .ok_or_else(|| PricingError::PriceMismatch {
                from: from.to_string(),
                to: to.to_string(),
            })?;

        Ok(Price::new(from, to, price)
            .with_steps(vec![PriceStep::new("fixed", from, to, price)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn convert_divides_by_price() {
        // 1 BTC costs 50,000 EUR, so 25,000 EUR buys 0.5 BTC
        let price = Price::new("EUR", "BTC", dec!(50000));
        assert_eq!(price.convert(dec!(25000), 8).unwrap(), dec!(0.5));
    }

    #[test]
    fn convert_rounds_at_the_point_of_calculation() {
        let price = Price::new("EUR", "BTC", dec!(3));
        assert_eq!(price.convert(dec!(1), 8).unwrap(), dec!(0.33333333));
    }

    #[test]
    fn zero_price_is_fatal() {
        let price = Price::new("EUR", "BTC", dec!(0));
        assert!(matches!(
            price.convert(dec!(1), 8),
            Err(PricingError::ZeroPrice { .. })
        ));
    }

    #[test]
    fn fixed_table_identity_and_missing_pair() {
        let mut pricing = FixedRatePricing::new();
        pricing.set_rate("EUR", "BTC", dec!(50000));

        assert_eq!(pricing.get_price("EUR", "EUR").unwrap().price, dec!(1));
        assert_eq!(pricing.get_price("EUR", "BTC").unwrap().price, dec!(50000));
        assert!(matches!(
            pricing.get_price("EUR", "ETH"),
            Err(PricingError::PriceMismatch { .. })
        ));
    }
}
