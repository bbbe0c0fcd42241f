// 1.0: all the primitives live here. nothing in the pipeline works without these types.
// IDs, KYC levels, timestamps, amount rounding. each ID is a newtype so the compiler
// catches type mixups between transactions, batches and users.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

// 1.1: amounts are plain Decimals, but every computed amount is rounded to the
// asset's 8 decimal places at the point of calculation, never deferred.
pub const AMOUNT_DECIMALS: u32 = 8;

/// Smallest representable amount increment (one satoshi-equivalent).
pub const AMOUNT_UNIT: Decimal = dec!(0.00000001);

pub fn round8(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(AMOUNT_DECIMALS, RoundingStrategy::MidpointAwayFromZero)
}

// fiat-side amounts (fees in EUR/CHF) round to cents
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

// 1.2: KYC verification level. higher is more verified. thresholds 30 and 50
// gate most volume limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KycLevel(pub u8);

impl KycLevel {
    pub const NONE: KycLevel = KycLevel(0);
    pub const LEVEL_30: KycLevel = KycLevel(30);
    pub const LEVEL_50: KycLevel = KycLevel(50);

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for KycLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kyc-{}", self.0)
    }
}

// 1.3: millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn add_minutes(&self, minutes: i64) -> Self {
        Self(self.0 + minutes * 60_000)
    }

    pub fn add_days(&self, days: i64) -> Self {
        Self(self.0 + days * 86_400_000)
    }

    /// Whole minutes elapsed between `self` and a later `now`.
    pub fn elapsed_minutes(&self, now: Timestamp) -> i64 {
        (now.0 - self.0) / 60_000
    }

    /// Whole days elapsed between `self` and a later `now`.
    pub fn elapsed_days(&self, now: Timestamp) -> i64 {
        (now.0 - self.0) / 86_400_000
    }
}
