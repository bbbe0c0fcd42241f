// 8.5 payout.rs: the blockchain payout boundary. Orders are submitted per
// transaction and polled for completion; the in-memory implementation settles
// deterministically for tests and the sim.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::asset::AssetId;
use crate::liquidity::FeeEstimate;
use crate::types::TransactionId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub correlation_id: TransactionId,
    pub asset: AssetId,
    pub amount: Decimal,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutCompletion {
    pub is_complete: bool,
    pub payout_tx_id: Option<String>,
    pub payout_fee: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayoutError {
    #[error("payout for {correlation_id:?} was already submitted")]
    DuplicateSubmission { correlation_id: TransactionId },

    #[error("no payout order found for {correlation_id:?}")]
    OrderNotFound { correlation_id: TransactionId },

    #[error("payout venue rejected asset {asset:?}")]
    UnsupportedAsset { asset: AssetId },
}

pub trait PayoutProvider {
    fn estimate_fee(&self, asset: AssetId) -> Result<FeeEstimate, PayoutError>;

    fn submit_payout(&mut self, request: &PayoutRequest) -> Result<(), PayoutError>;

    fn check_completion(
        &mut self,
        correlation_id: TransactionId,
    ) -> Result<PayoutCompletion, PayoutError>;
}

// in-memory venue: fixed fee per asset, orders complete after one poll
#[derive(Debug, Default)]
pub struct MemoryPayout {
    fees: HashMap<AssetId, Decimal>,
    orders: HashMap<TransactionId, PendingPayout>,
    submitted: u64,
    // polls before an order confirms
    confirm_after: u32,
}

#[derive(Debug, Clone)]
struct PendingPayout {
    fee: Decimal,
    tx_id: String,
    polls_left: u32,
}

impl MemoryPayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fee(mut self, asset: AssetId, fee: Decimal) -> Self {
        self.fees.insert(asset, fee);
        self
    }

    pub fn confirm_after(mut self, polls: u32) -> Self {
        self.confirm_after = polls;
        self
    }

    pub fn submitted_count(&self) -> u64 {
        self.submitted
    }
}

impl PayoutProvider for MemoryPayout {
    fn estimate_fee(&self, asset: AssetId) -> Result<FeeEstimate, PayoutError> {
        let amount = *self
            .fees
            .get(&asset)
            .ok_or(PayoutError::UnsupportedAsset { asset })?;
        Ok(FeeEstimate { asset, amount })
    }

    fn submit_payout(&mut self, request: &PayoutRequest) -> Result<(), PayoutError> {
        if self.orders.contains_key(&request.correlation_id) {
            return Err(PayoutError::DuplicateSubmission {
                correlation_id: request.correlation_id,
            });
        }
        let fee = *self
            .fees
            .get(&request.asset)
            .ok_or(PayoutError::UnsupportedAsset {
                asset: request.asset,
            })?;

        self.submitted += 1;
        self.orders.insert(
            request.correlation_id,
            PendingPayout {
                fee,
                tx_id: format!("payout-{}", self.submitted),
                polls_left: self.confirm_after,
            },
        );
        Ok(())
    }

    fn check_completion(
        &mut self,
        correlation_id: TransactionId,
    ) -> Result<PayoutCompletion, PayoutError> {
        let order = self
            .orders
            .get_mut(&correlation_id)
            .ok_or(PayoutError::OrderNotFound { correlation_id })?;

        if order.polls_left > 0 {
            order.polls_left -= 1;
            return Ok(PayoutCompletion {
                is_complete: false,
                payout_tx_id: None,
                payout_fee: Decimal::ZERO,
            });
        }

        Ok(PayoutCompletion {
            is_complete: true,
            payout_tx_id: Some(order.tx_id.clone()),
            payout_fee: order.fee,
        })
    }
}
