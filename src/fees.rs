// 4.0: proportional fee/amount allocation with exact rounding-error correction,
// and the per-transaction fee record the batch stages stamp.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{round8, AMOUNT_UNIT};

/// Uncorrected residuals beyond this are an upstream pricing bug, not noise.
pub const ALLOCATION_TOLERANCE: Decimal = rust_decimal_macros::dec!(0.00001);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("cannot allocate over empty weights")]
    EmptyWeights,

    #[error("cannot allocate, weights sum to zero")]
    ZeroWeightSum,

    #[error("amount mismatch of {delta} exceeds tolerance {tolerance}")]
    AmountMismatch { delta: Decimal, tolerance: Decimal },
}

// 4.1: split `total` proportionally to `weights`, rounded to 8 decimals, such
// that the shares sum to `total` exactly and no share deviates from its ideal
// by more than one minimal unit. The rounding residual is consumed one unit
// per share, in declaration order, preferring shares whose own rounding error
// has the residual's sign. Deterministic and idempotent for fixed inputs.
pub fn allocate(total: Decimal, weights: &[Decimal]) -> Result<Vec<Decimal>, AllocationError> {
    if weights.is_empty() {
        return Err(AllocationError::EmptyWeights);
    }

    let weight_sum: Decimal = weights.iter().sum();
    if weight_sum == Decimal::ZERO {
        return Err(AllocationError::ZeroWeightSum);
    }

    let ideals: Vec<Decimal> = weights.iter().map(|w| total * w / weight_sum).collect();
    let mut shares: Vec<Decimal> = ideals.iter().map(|i| round8(*i)).collect();

    let rounded_sum: Decimal = shares.iter().sum();
    let residual = round8(total - rounded_sum);

    if residual == Decimal::ZERO {
        return Ok(shares);
    }
    if residual.abs() > ALLOCATION_TOLERANCE {
        return Err(AllocationError::AmountMismatch {
            delta: residual,
            tolerance: ALLOCATION_TOLERANCE,
        });
    }

    settle_residual(&mut shares, &ideals, residual);

    Ok(shares)
}

/// Consume a rounding residual one unit per share. The first pass only
/// touches shares whose own rounding error has the residual's sign, which
/// keeps every share within one unit of its ideal; any leftover cycles
/// through all shares. Shared with the batch output split.
pub(crate) fn settle_residual(shares: &mut [Decimal], ideals: &[Decimal], residual: Decimal) {
    let step = if residual > Decimal::ZERO {
        AMOUNT_UNIT
    } else {
        -AMOUNT_UNIT
    };
    let mut remaining = residual;

    for i in 0..shares.len() {
        if remaining == Decimal::ZERO {
            break;
        }
        let rounding_error = ideals[i] - shares[i];
        if (residual > Decimal::ZERO) == (rounding_error > Decimal::ZERO)
            && rounding_error != Decimal::ZERO
        {
            shares[i] += step;
            remaining = round8(remaining - step);
        }
    }

    let mut i = 0;
    while remaining != Decimal::ZERO {
        shares[i % shares.len()] += step;
        remaining = round8(remaining - step);
        i += 1;
    }
}

// 4.2: fee record, one per transaction. Four amount/percent pairs plus the
// total-fee ceiling captured when the record is created. Percent fields are
// always amount / outputReferenceAmount, rounded to 8 decimals.

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeePair {
    pub amount: Decimal,
    pub percent: Decimal,
}

impl FeePair {
    fn of(amount: Decimal, output_reference_amount: Decimal) -> Self {
        let percent = if output_reference_amount == Decimal::ZERO {
            Decimal::ZERO
        } else {
            round8(amount / output_reference_amount)
        };
        Self { amount, percent }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFees {
    /// Ceiling on the combined estimated fee, as a share of the
    /// output reference amount. Captured at record creation.
    pub allowed_total_fee_percent: Decimal,
    pub estimated_purchase: Option<FeePair>,
    pub estimated_payout: Option<FeePair>,
    pub actual_purchase: Option<FeePair>,
    pub actual_payout: Option<FeePair>,
}

impl TransactionFees {
    pub fn new(allowed_total_fee_percent: Decimal) -> Self {
        Self {
            allowed_total_fee_percent,
            estimated_purchase: None,
            estimated_payout: None,
            actual_purchase: None,
            actual_payout: None,
        }
    }

    pub fn record_purchase_estimate(&mut self, amount: Decimal, output_reference_amount: Decimal) {
        self.estimated_purchase = Some(FeePair::of(amount, output_reference_amount));
    }

    pub fn record_payout_estimate(&mut self, amount: Decimal, output_reference_amount: Decimal) {
        self.estimated_payout = Some(FeePair::of(amount, output_reference_amount));
    }

    pub fn record_actual_purchase(&mut self, amount: Decimal, output_reference_amount: Decimal) {
        self.actual_purchase = Some(FeePair::of(amount, output_reference_amount));
    }

    pub fn record_actual_payout(&mut self, amount: Decimal, output_reference_amount: Decimal) {
        self.actual_payout = Some(FeePair::of(amount, output_reference_amount));
    }

    /// Combined purchase + payout estimate, in the reference asset.
    pub fn estimated_total(&self) -> Decimal {
        self.estimated_purchase.map(|f| f.amount).unwrap_or_default()
            + self.estimated_payout.map(|f| f.amount).unwrap_or_default()
    }

    /// Absolute ceiling for a given output reference amount.
    pub fn allowed_total_fee_amount(&self, output_reference_amount: Decimal) -> Decimal {
        round8(self.allowed_total_fee_percent * output_reference_amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn exact_split_needs_no_correction() {
        let shares = allocate(dec!(100), &[dec!(3), dec!(1)]).unwrap();
        assert_eq!(shares, vec![dec!(75), dec!(25)]);
    }

    #[test]
    fn residual_lands_on_first_share_rounded_down() {
        // three equal weights: each rounds to 0.33333333, residual +1 unit
        let shares = allocate(dec!(1), &[dec!(1), dec!(1), dec!(1)]).unwrap();
        assert_eq!(
            shares,
            vec![dec!(0.33333334), dec!(0.33333333), dec!(0.33333333)]
        );
        let sum: Decimal = shares.iter().sum();
        assert_eq!(sum, dec!(1));
    }

    #[test]
    fn purchase_fee_estimate_vector() {
        let shares = allocate(dec!(0.00003), &[dec!(100), dec!(10), dec!(1)]).unwrap();
        assert_eq!(
            shares,
            vec![dec!(0.00002703), dec!(0.00000270), dec!(0.00000027)]
        );
    }

    #[test]
    fn shares_stay_within_one_unit_of_ideal() {
        let weights = [dec!(7), dec!(13), dec!(29), dec!(1), dec!(50)];
        let total = dec!(0.12345678);
        let shares = allocate(total, &weights).unwrap();

        let weight_sum: Decimal = weights.iter().sum();
        for (share, weight) in shares.iter().zip(weights.iter()) {
            let ideal = total * weight / weight_sum;
            assert!((*share - ideal).abs() <= AMOUNT_UNIT, "share {share} vs ideal {ideal}");
        }
        let sum: Decimal = shares.iter().sum();
        assert_eq!(sum, total);
    }

    #[test]
    fn empty_and_zero_weights_rejected() {
        assert_eq!(allocate(dec!(1), &[]), Err(AllocationError::EmptyWeights));
        assert_eq!(
            allocate(dec!(1), &[dec!(0), dec!(0)]),
            Err(AllocationError::ZeroWeightSum)
        );
    }

    #[test]
    fn allocation_is_idempotent() {
        let weights = [dec!(100), dec!(10), dec!(1)];
        let first = allocate(dec!(0.5), &weights).unwrap();
        let second = allocate(dec!(0.5), &weights).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn fee_pair_percent_is_amount_over_reference() {
        let mut fees = TransactionFees::new(dec!(0.005));
        fees.record_purchase_estimate(dec!(0.5), dec!(100));
        assert_eq!(fees.estimated_purchase.unwrap().percent, dec!(0.005));
        assert_eq!(fees.estimated_total(), dec!(0.5));
        assert_eq!(fees.allowed_total_fee_amount(dec!(100)), dec!(0.5));
    }
}
