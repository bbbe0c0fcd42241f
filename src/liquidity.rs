// 8.0 liquidity.rs: the dex boundary. The pipeline asks one question per
// batch ("can the output asset be covered, and at what fee") and issues
// reserve/purchase orders against the answer. A deterministic in-memory dex
// backs tests and the sim.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::asset::AssetId;
use crate::types::{round8, BatchId};

/// One liquidity question or order, correlated by the batch id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityRequest {
    pub correlation_id: BatchId,
    pub reference_asset: AssetId,
    pub reference_amount: Decimal,
    pub target_asset: AssetId,
}

/// Fee quoted or charged by the venue, denominated in `asset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub asset: AssetId,
    pub amount: Decimal,
}

/// Availability in both denominations. Reference figures drive the batch
/// optimization; target figures feed shortage notifications.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidityCheck {
    pub reference_available: Decimal,
    pub reference_max_purchasable: Decimal,
    pub target_amount: Decimal,
    pub target_available: Decimal,
    pub target_max_purchasable: Decimal,
    pub purchase_fee: FeeEstimate,
}

/// Settled purchase order, in target-asset terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub target_amount: Decimal,
    pub purchase_fee: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiquidityError {
    #[error("not enough liquidity of asset {asset:?}: requested {requested}, available {available}")]
    NotEnoughLiquidity {
        asset: AssetId,
        requested: Decimal,
        available: Decimal,
    },

    #[error("price slippage while trading asset {asset:?}")]
    PriceSlippage { asset: AssetId },

    #[error("order {correlation_id:?} is not ready yet")]
    OrderNotReady { correlation_id: BatchId },

    #[error("no order found for {correlation_id:?}")]
    OrderNotFound { correlation_id: BatchId },

    #[error("no pool configured for asset {asset:?}")]
    NoPool { asset: AssetId },
}

pub trait LiquidityProvider {
    fn check_liquidity(&self, request: &LiquidityRequest) -> Result<LiquidityCheck, LiquidityError>;

    /// Reserve against liquidity on hand. Returns the secured target amount,
    /// or zero when the pool cannot cover the request.
    fn reserve_liquidity(&mut self, request: &LiquidityRequest) -> Result<Decimal, LiquidityError>;

    /// Submit an asynchronous purchase order; the result is polled via
    /// `fetch_order_result`.
    fn purchase_liquidity(&mut self, request: &LiquidityRequest) -> Result<(), LiquidityError>;

    fn fetch_order_result(&mut self, correlation_id: BatchId) -> Result<OrderResult, LiquidityError>;

    /// Release the bookkeeping for a settled correlation id. Idempotent.
    fn complete_orders(&mut self, correlation_id: BatchId);

    /// Fire-and-forget compensating order after a shortage, in target units.
    fn order_liquidity(&mut self, asset: AssetId, amount: Decimal) -> Result<(), LiquidityError>;
}

// 8.1: in-memory dex. One pool per target asset with a fixed conversion rate,
// finite availability and a purchase ceiling. Orders settle after a
// configurable number of polls so pending-liquidity paths are exercisable.

#[derive(Debug, Clone)]
struct Pool {
    // target units per one reference unit
    rate: Decimal,
    // target units on hand
    available: Decimal,
    // target units purchasable on top
    purchasable: Decimal,
    // flat purchase fee quote, in the reference asset
    purchase_fee: Decimal,
    // next purchase on this pool fails with slippage
    slippage: bool,
}

#[derive(Debug, Clone)]
struct PendingOrder {
    target_asset: AssetId,
    target_amount: Decimal,
    purchase_fee: Decimal,
    polls_left: u32,
}

#[derive(Debug, Default)]
pub struct MemoryDex {
    pools: HashMap<AssetId, Pool>,
    orders: HashMap<BatchId, PendingOrder>,
    compensating_orders: Vec<(AssetId, Decimal)>,
    // polls before a purchase order settles
    settle_after: u32,
}

impl MemoryDex {
    pub fn new() -> Self {
        Self {
            settle_after: 1,
            ..Self::default()
        }
    }

    pub fn with_pool(
        mut self,
        asset: AssetId,
        rate: Decimal,
        available: Decimal,
        purchasable: Decimal,
        purchase_fee: Decimal,
    ) -> Self {
        self.pools.insert(
            asset,
            Pool {
                rate,
                available,
                purchasable,
                purchase_fee,
                slippage: false,
            },
        );
        self
    }

    pub fn settle_after(mut self, polls: u32) -> Self {
        self.settle_after = polls;
        self
    }

    pub fn trigger_slippage(&mut self, asset: AssetId) {
        if let Some(pool) = self.pools.get_mut(&asset) {
            pool.slippage = true;
        }
    }

    pub fn available(&self, asset: AssetId) -> Decimal {
        self.pools
            .get(&asset)
            .map(|p| p.available)
            .unwrap_or_default()
    }

    pub fn compensating_orders(&self) -> &[(AssetId, Decimal)] {
        &self.compensating_orders
    }

    pub fn open_order_count(&self) -> usize {
        self.orders.len()
    }

    fn pool(&self, asset: AssetId) -> Result<&Pool, LiquidityError> {
        self.pools
            .get(&asset)
            .ok_or(LiquidityError::NoPool { asset })
    }
}

impl LiquidityProvider for MemoryDex {
    fn check_liquidity(&self, request: &LiquidityRequest) -> Result<LiquidityCheck, LiquidityError> {
        let pool = self.pool(request.target_asset)?;
        let target_amount = round8(request.reference_amount * pool.rate);

        Ok(LiquidityCheck {
            reference_available: round8(pool.available / pool.rate),
            reference_max_purchasable: round8(pool.purchasable / pool.rate),
            target_amount,
            target_available: pool.available,
            target_max_purchasable: pool.purchasable,
            purchase_fee: FeeEstimate {
                asset: request.reference_asset,
                amount: pool.purchase_fee,
            },
        })
    }

    fn reserve_liquidity(&mut self, request: &LiquidityRequest) -> Result<Decimal, LiquidityError> {
        let rate = self.pool(request.target_asset)?.rate;
        let needed = round8(request.reference_amount * rate);

        let pool = self
            .pools
            .get_mut(&request.target_asset)
            .ok_or(LiquidityError::NoPool {
                asset: request.target_asset,
            })?;
        if needed > pool.available {
            return Ok(Decimal::ZERO);
        }
        pool.available = round8(pool.available - needed);
        Ok(needed)
    }

    fn purchase_liquidity(&mut self, request: &LiquidityRequest) -> Result<(), LiquidityError> {
        let pool = self
            .pools
            .get_mut(&request.target_asset)
            .ok_or(LiquidityError::NoPool {
                asset: request.target_asset,
            })?;
        if pool.slippage {
            return Err(LiquidityError::PriceSlippage {
                asset: request.target_asset,
            });
        }

        let target_amount = round8(request.reference_amount * pool.rate);
        if target_amount > pool.purchasable {
            return Err(LiquidityError::NotEnoughLiquidity {
                asset: request.target_asset,
                requested: target_amount,
                available: pool.purchasable,
            });
        }
        let purchase_fee = pool.purchase_fee;
        pool.purchasable = round8(pool.purchasable - target_amount);

        self.orders.insert(
            request.correlation_id,
            PendingOrder {
                target_asset: request.target_asset,
                target_amount,
                purchase_fee,
                polls_left: self.settle_after,
            },
        );
        Ok(())
    }

    fn fetch_order_result(&mut self, correlation_id: BatchId) -> Result<OrderResult, LiquidityError> {
        let order = self
            .orders
            .get_mut(&correlation_id)
            .ok_or(LiquidityError::OrderNotFound { correlation_id })?;

        if order.polls_left > 0 {
            order.polls_left -= 1;
            return Err(LiquidityError::OrderNotReady { correlation_id });
        }

        let result = OrderResult {
            target_amount: order.target_amount,
            purchase_fee: order.purchase_fee,
        };
        // the purchased amount lands in the pool for the reserve that follows
        let asset = order.target_asset;
        let amount = order.target_amount;
        if let Some(pool) = self.pools.get_mut(&asset) {
            pool.available = round8(pool.available + amount);
        }
        Ok(result)
    }

    fn complete_orders(&mut self, correlation_id: BatchId) {
        self.orders.remove(&correlation_id);
    }

    fn order_liquidity(&mut self, asset: AssetId, amount: Decimal) -> Result<(), LiquidityError> {
        self.pool(asset)?;
        self.compensating_orders.push((asset, amount));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(amount: Decimal) -> LiquidityRequest {
        LiquidityRequest {
            correlation_id: BatchId(1),
            reference_asset: AssetId(1),
            reference_amount: amount,
            target_asset: AssetId(2),
        }
    }

    fn dex() -> MemoryDex {
        // 1 reference unit buys 0.5 target units
        MemoryDex::new().with_pool(AssetId(2), dec!(0.5), dec!(10), dec!(100), dec!(0.01))
    }

    #[test]
    fn check_reports_both_denominations() {
        let check = dex().check_liquidity(&request(dec!(4))).unwrap();
        assert_eq!(check.target_amount, dec!(2));
        assert_eq!(check.reference_available, dec!(20));
        assert_eq!(check.reference_max_purchasable, dec!(200));
        assert_eq!(check.purchase_fee.amount, dec!(0.01));
    }

    #[test]
    fn reserve_consumes_the_pool_or_returns_zero() {
        let mut dex = dex();
        let secured = dex.reserve_liquidity(&request(dec!(4))).unwrap();
        assert_eq!(secured, dec!(2));
        assert_eq!(dex.available(AssetId(2)), dec!(8));

        // 8 target units left, 40 reference units would need 20
        let secured = dex.reserve_liquidity(&request(dec!(40))).unwrap();
        assert_eq!(secured, Decimal::ZERO);
        assert_eq!(dex.available(AssetId(2)), dec!(8));
    }

    #[test]
    fn purchase_settles_after_polling() {
        let mut dex = dex().settle_after(2);
        dex.purchase_liquidity(&request(dec!(4))).unwrap();

        assert!(matches!(
            dex.fetch_order_result(BatchId(1)),
            Err(LiquidityError::OrderNotReady { .. })
        ));
        assert!(matches!(
            dex.fetch_order_result(BatchId(1)),
            Err(LiquidityError::OrderNotReady { .. })
        ));

        let result = dex.fetch_order_result(BatchId(1)).unwrap();
        assert_eq!(result.target_amount, dec!(2));
        assert_eq!(result.purchase_fee, dec!(0.01));
        // settled order refills the pool
        assert_eq!(dex.available(AssetId(2)), dec!(12));

        dex.complete_orders(BatchId(1));
        assert_eq!(dex.open_order_count(), 0);
        assert!(matches!(
            dex.fetch_order_result(BatchId(1)),
            Err(LiquidityError::OrderNotFound { .. })
        ));
    }

    #[test]
    fn slippage_fails_the_purchase() {
        let mut dex = dex();
        dex.trigger_slippage(AssetId(2));
        assert!(matches!(
            dex.purchase_liquidity(&request(dec!(4))),
            Err(LiquidityError::PriceSlippage { .. })
        ));
    }

    #[test]
    fn purchase_beyond_ceiling_is_a_shortage() {
        let mut dex = dex();
        assert!(matches!(
            dex.purchase_liquidity(&request(dec!(1000))),
            Err(LiquidityError::NotEnoughLiquidity { .. })
        ));
    }

    #[test]
    fn compensating_orders_are_recorded() {
        let mut dex = dex();
        dex.order_liquidity(AssetId(2), dec!(5)).unwrap();
        assert_eq!(dex.compensating_orders(), &[(AssetId(2), dec!(5))]);

        assert!(matches!(
            dex.order_liquidity(AssetId(9), dec!(1)),
            Err(LiquidityError::NoPool { .. })
        ));
    }
}
