// 6.0: the purchase instruction and its state machine. Transitions are pure
// and return the field-level changes a store has to persist; most consume the
// value and hand back the updated one. Nothing here touches a database.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aml::{Reason, Verdict};
use crate::asset::AssetId;
use crate::fees::TransactionFees;
use crate::pricing::{Price, PricingError};
use crate::types::{round8, BatchId, Timestamp, TransactionId, UserId};

// 6.1: exactly one originating pay-in per transaction, enforced structurally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    BankTransfer {
        payin_ref: String,
        iban: String,
        bic: Option<String>,
        instant: bool,
    },
    CardCharge {
        payin_ref: String,
        fingerprint: String,
        holder_name: String,
    },
    CryptoInput {
        payin_ref: String,
        confirmed: bool,
        high_risk_input: bool,
    },
}

impl SourceKind {
    /// Stable key used to deduplicate pay-ins at registration.
    pub fn payin_ref(&self) -> &str {
        match self {
            SourceKind::BankTransfer { payin_ref, .. } => payin_ref,
            SourceKind::CardCharge { payin_ref, .. } => payin_ref,
            SourceKind::CryptoInput { payin_ref, .. } => payin_ref,
        }
    }

    pub fn is_card(&self) -> bool {
        matches!(self, SourceKind::CardCharge { .. })
    }

    pub fn is_crypto(&self) -> bool {
        matches!(self, SourceKind::CryptoInput { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Created,
    Prepared,
    Batched,
    // recoverable rejections, transaction returns to the unbatched pool
    PriceMismatch,
    MissingLiquidity,
    WaitingForLowerFee,
    PriceSlippage,
    // secured path
    PendingLiquidity,
    ReadyForPayout,
    PayingOut,
    Complete,
}

impl TransactionStatus {
    /// Statuses eligible for (re-)batching on the next tick.
    pub fn is_batchable(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Prepared
                | TransactionStatus::PriceMismatch
                | TransactionStatus::MissingLiquidity
                | TransactionStatus::WaitingForLowerFee
                | TransactionStatus::PriceSlippage
        )
    }
}

/// What a transition wants persisted. The store applies these; callers that
/// only care about the new value can ignore them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldChange {
    Status(TransactionStatus),
    Verdict {
        verdict: Option<Verdict>,
        reason: Option<Reason>,
    },
    Comment(Option<String>),
    OutputReferenceAsset(Option<AssetId>),
    OutputReferenceAmount(Option<Decimal>),
    OutputAmount(Option<Decimal>),
    Batch(Option<BatchId>),
    TotalFee(Option<Decimal>),
    Fees(TransactionFees),
    PayoutTxId(String),
    OutputDate(Timestamp),
    MailSentAt(Option<Timestamp>),
    RetryCount(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("transaction {id} has no reference amount minus fee yet")]
    FeesNotComputed { id: TransactionId },

    #[error("transaction {id} is not priced yet")]
    NotPriced { id: TransactionId },

    #[error("pricing failed for transaction {id}: {source}")]
    Pricing {
        id: TransactionId,
        #[source]
        source: PricingError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub created_at: Timestamp,
    pub source: SourceKind,

    // input side
    pub input_amount: Decimal,
    pub input_asset: String,
    /// Input normalized to the fiat reference currency.
    pub input_reference_amount: Decimal,
    pub input_reference_asset: String,

    // compliance
    pub verdict: Option<Verdict>,
    pub reason: Option<Reason>,
    pub comment: Option<String>,
    pub mail_sent_at: Option<Timestamp>,

    // economics
    pub percent_fee: Decimal,
    pub fixed_fee: Decimal,
    pub total_fee_amount: Option<Decimal>,
    pub input_reference_amount_minus_fee: Option<Decimal>,
    pub output_asset: AssetId,
    pub output_reference_asset: Option<AssetId>,
    pub output_reference_amount: Option<Decimal>,
    pub output_amount: Option<Decimal>,
    pub fees: Option<TransactionFees>,
    pub payout_address: String,

    // lifecycle
    pub status: TransactionStatus,
    pub batch_id: Option<BatchId>,
    pub payout_tx_id: Option<String>,
    pub output_date: Option<Timestamp>,
    pub retry_count: u32,
}

impl Transaction {
    pub fn new(
        id: TransactionId,
        user_id: UserId,
        source: SourceKind,
        input_amount: Decimal,
        input_asset: &str,
        output_asset: AssetId,
        payout_address: &str,
        percent_fee: Decimal,
        fixed_fee: Decimal,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            user_id,
            created_at,
            source,
            input_amount,
            input_asset: input_asset.to_string(),
            // pay-ins arrive already normalized to the reference currency
            input_reference_amount: input_amount,
            input_reference_asset: input_asset.to_string(),
            verdict: None,
            reason: None,
            comment: None,
            mail_sent_at: None,
            percent_fee,
            fixed_fee,
            total_fee_amount: None,
            input_reference_amount_minus_fee: None,
            output_asset,
            output_reference_asset: None,
            output_reference_amount: None,
            output_amount: None,
            fees: None,
            payout_address: payout_address.to_string(),
            status: TransactionStatus::Created,
            batch_id: None,
            payout_tx_id: None,
            output_date: None,
            retry_count: 0,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_bank_transfer(
        id: TransactionId,
        user_id: UserId,
        payin_ref: &str,
        iban: &str,
        bic: Option<&str>,
        instant: bool,
        input_amount: Decimal,
        input_asset: &str,
        output_asset: AssetId,
        payout_address: &str,
        percent_fee: Decimal,
        fixed_fee: Decimal,
        created_at: Timestamp,
    ) -> Self {
        Self::new(
            id,
            user_id,
            SourceKind::BankTransfer {
                payin_ref: payin_ref.to_string(),
                iban: iban.to_string(),
                bic: bic.map(|b| b.to_string()),
                instant,
            },
            input_amount,
            input_asset,
            output_asset,
            payout_address,
            percent_fee,
            fixed_fee,
            created_at,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_card_charge(
        id: TransactionId,
        user_id: UserId,
        payin_ref: &str,
        fingerprint: &str,
        holder_name: &str,
        input_amount: Decimal,
        input_asset: &str,
        output_asset: AssetId,
        payout_address: &str,
        percent_fee: Decimal,
        fixed_fee: Decimal,
        created_at: Timestamp,
    ) -> Self {
        Self::new(
            id,
            user_id,
            SourceKind::CardCharge {
                payin_ref: payin_ref.to_string(),
                fingerprint: fingerprint.to_string(),
                holder_name: holder_name.to_string(),
            },
            input_amount,
            input_asset,
            output_asset,
            payout_address,
            percent_fee,
            fixed_fee,
            created_at,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_crypto_input(
        id: TransactionId,
        user_id: UserId,
        payin_ref: &str,
        confirmed: bool,
        high_risk_input: bool,
        input_amount: Decimal,
        input_asset: &str,
        output_asset: AssetId,
        payout_address: &str,
        percent_fee: Decimal,
        fixed_fee: Decimal,
        created_at: Timestamp,
    ) -> Self {
        Self::new(
            id,
            user_id,
            SourceKind::CryptoInput {
                payin_ref: payin_ref.to_string(),
                confirmed,
                high_risk_input,
            },
            input_amount,
            input_asset,
            output_asset,
            payout_address,
            percent_fee,
            fixed_fee,
            created_at,
        )
    }

    pub fn is_complete(&self) -> bool {
        self.status == TransactionStatus::Complete
    }

    // 6.2: compliance bookkeeping.

    pub fn with_verdict(
        mut self,
        verdict: Verdict,
        reason: Option<Reason>,
        comment: Option<String>,
    ) -> (Self, Vec<FieldChange>) {
        self.verdict = Some(verdict);
        self.reason = reason;
        self.comment = comment.clone();
        // a changed decision re-arms the user notification
        self.mail_sent_at = None;
        (
            self,
            vec![
                FieldChange::Verdict {
                    verdict: Some(verdict),
                    reason,
                },
                FieldChange::Comment(comment),
                FieldChange::MailSentAt(None),
            ],
        )
    }

    pub fn with_comment(mut self, comment: String) -> (Self, Vec<FieldChange>) {
        self.comment = Some(comment.clone());
        (self, vec![FieldChange::Comment(Some(comment))])
    }

    pub fn confirm_mail(mut self, now: Timestamp) -> (Self, Vec<FieldChange>) {
        self.mail_sent_at = Some(now);
        (self, vec![FieldChange::MailSentAt(Some(now))])
    }

    // 6.3: economics.

    /// Compute the total fee and the purchasable remainder. A fee that eats
    /// the whole pay-in fails the transaction outright.
    pub fn compute_fee(mut self, allowed_total_fee_percent: Decimal) -> (Self, Vec<FieldChange>) {
        let total_fee = round8(self.percent_fee * self.input_reference_amount) + self.fixed_fee;
        let minus_fee = round8(self.input_reference_amount - total_fee);

        if minus_fee < Decimal::ZERO {
            return self.with_verdict(
                Verdict::Fail,
                Some(Reason::FeeTooHigh),
                Some("fee exceeds input amount".to_string()),
            );
        }

        let fees = TransactionFees::new(allowed_total_fee_percent);
        self.total_fee_amount = Some(total_fee);
        self.input_reference_amount_minus_fee = Some(minus_fee);
        self.fees = Some(fees.clone());
        (
            self,
            vec![FieldChange::TotalFee(Some(total_fee)), FieldChange::Fees(fees)],
        )
    }

    // 6.4: lifecycle transitions.

    pub fn prepared(mut self, output_reference_asset: AssetId) -> (Self, Vec<FieldChange>) {
        self.output_reference_asset = Some(output_reference_asset);
        self.status = TransactionStatus::Prepared;
        (
            self,
            vec![
                FieldChange::OutputReferenceAsset(Some(output_reference_asset)),
                FieldChange::Status(TransactionStatus::Prepared),
            ],
        )
    }

    /// Price the fee-adjusted input into the batch reference asset. Mutates
    /// in place; a failed conversion leaves the transaction untouched, so the
    /// caller keeps ownership on both paths.
    pub fn priced(&mut self, price: &Price) -> Result<Vec<FieldChange>, TransactionError> {
        let minus_fee = self
            .input_reference_amount_minus_fee
            .ok_or(TransactionError::FeesNotComputed { id: self.id })?;

        let amount = price.convert(minus_fee, 8).map_err(|source| {
            TransactionError::Pricing {
                id: self.id,
                source,
            }
        })?;

        self.output_reference_amount = Some(amount);
        Ok(vec![FieldChange::OutputReferenceAmount(Some(amount))])
    }

    pub fn batched(mut self, batch_id: BatchId) -> (Self, Vec<FieldChange>) {
        self.batch_id = Some(batch_id);
        self.status = TransactionStatus::Batched;
        (
            self,
            vec![
                FieldChange::Batch(Some(batch_id)),
                FieldChange::Status(TransactionStatus::Batched),
            ],
        )
    }

    /// Recoverable rejection: detach from the candidate batch, wipe computed
    /// amounts and rejoin the unbatched pool on the next tick.
    pub fn rejected(mut self, status: TransactionStatus) -> (Self, Vec<FieldChange>) {
        debug_assert!(status.is_batchable());

        self.status = status;
        self.retry_count += 1;
        let mut changes = self.reset_amounts();
        changes.push(FieldChange::Status(status));
        changes.push(FieldChange::RetryCount(self.retry_count));
        (self, changes)
    }

    pub fn pending_liquidity(mut self) -> (Self, Vec<FieldChange>) {
        self.status = TransactionStatus::PendingLiquidity;
        (
            self,
            vec![FieldChange::Status(TransactionStatus::PendingLiquidity)],
        )
    }

    /// Stamp the secured output amount; set by the owning batch only.
    pub fn ready_for_payout(mut self, output_amount: Decimal) -> (Self, Vec<FieldChange>) {
        self.output_amount = Some(output_amount);
        self.status = TransactionStatus::ReadyForPayout;
        (
            self,
            vec![
                FieldChange::OutputAmount(Some(output_amount)),
                FieldChange::Status(TransactionStatus::ReadyForPayout),
            ],
        )
    }

    pub fn paying_out(mut self) -> (Self, Vec<FieldChange>) {
        self.status = TransactionStatus::PayingOut;
        (self, vec![FieldChange::Status(TransactionStatus::PayingOut)])
    }

    /// Terminal: record the payout proof and the actual payout fee.
    pub fn completed(
        mut self,
        payout_tx_id: String,
        payout_fee: Decimal,
        now: Timestamp,
    ) -> (Self, Vec<FieldChange>) {
        let output_reference_amount = self.output_reference_amount.unwrap_or_default();
        if let Some(fees) = self.fees.as_mut() {
            fees.record_actual_payout(payout_fee, output_reference_amount);
        }

        self.payout_tx_id = Some(payout_tx_id.clone());
        self.output_date = Some(now);
        self.status = TransactionStatus::Complete;

        let mut changes = vec![
            FieldChange::PayoutTxId(payout_tx_id),
            FieldChange::OutputDate(now),
            FieldChange::Status(TransactionStatus::Complete),
        ];
        if let Some(fees) = &self.fees {
            changes.push(FieldChange::Fees(fees.clone()));
        }
        (self, changes)
    }

    fn reset_amounts(&mut self) -> Vec<FieldChange> {
        self.output_reference_amount = None;
        self.output_amount = None;
        self.output_date = None;
        self.batch_id = None;
        vec![
            FieldChange::OutputReferenceAmount(None),
            FieldChange::OutputAmount(None),
            FieldChange::Batch(None),
        ]
    }
}
