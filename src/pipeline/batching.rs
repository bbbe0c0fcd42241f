// 12.5 pipeline/batching.rs: stages 3 and 4. passed transactions get their
// fee computed and their pricing pair resolved, then batchable transactions
// are grouped per output asset, priced, shrunk against live liquidity,
// fee-checked and persisted as a batch.

use rust_decimal::Decimal;
use tracing::{debug, error, warn};

use super::core::SettlementPipeline;
use super::results::{PipelineError, TickReport};
use crate::aml::Verdict;
use crate::batch::{Batch, BatchError, GroupKey};
use crate::events::{
    BatchCreatedEvent, BatchOptimizedEvent, EventPayload, LiquidityShortageEvent,
    LiquidityWarningEvent, TransactionPreparedEvent, VerdictChangedEvent,
};
use crate::liquidity::{LiquidityProvider, LiquidityRequest};
use crate::notification::{Notification, NotificationSink};
use crate::payout::PayoutProvider;
use crate::pricing::PricingProvider;
use crate::transaction::TransactionStatus;
use crate::types::{round8, TransactionId};

impl<Pr, Lq, Po, Nt> SettlementPipeline<Pr, Lq, Po, Nt>
where
    Pr: PricingProvider,
    Lq: LiquidityProvider,
    Po: PayoutProvider,
    Nt: NotificationSink,
{
    // 12.5.1: stage 3. fee computation and asset-pair preparation.
    pub(super) fn compute_fees(&mut self, report: &mut TickReport) {
        let ids = self.store.select_ids(|tx| {
            tx.verdict == Some(Verdict::Pass)
                && (tx.status == TransactionStatus::Created
                    || (tx.status.is_batchable() && tx.output_reference_asset.is_none()))
        });

        for id in ids {
            let Some(mut tx) = self.store.take_transaction(id) else {
                continue;
            };

            if tx.total_fee_amount.is_none() {
                let (next, _) = tx.compute_fee(self.config.batch.allowed_total_fee_percent);
                tx = next;
                if tx.verdict == Some(Verdict::Fail) {
                    // the fee ate the whole pay-in
                    self.events.record(
                        self.current_time,
                        EventPayload::VerdictChanged(VerdictChangedEvent {
                            transaction_id: id,
                            verdict: Verdict::Fail,
                            reason: tx.reason,
                            comment: tx.comment.clone(),
                        }),
                    );
                    self.store.insert_transaction(tx);
                    report.verdicts_changed += 1;
                    continue;
                }
            }

            let reference = self
                .registry
                .get(tx.output_asset)
                .and_then(|asset| self.registry.price_reference(asset));
            match reference {
                Some(reference_asset) => {
                    let amount_minus_fee = tx.input_reference_amount_minus_fee.unwrap_or_default();
                    let (tx, _) = tx.prepared(reference_asset);
                    debug!(tx = %id, ?reference_asset, "prepared");
                    self.events.record(
                        self.current_time,
                        EventPayload::TransactionPrepared(TransactionPreparedEvent {
                            transaction_id: id,
                            output_reference_asset: reference_asset,
                            amount_minus_fee,
                        }),
                    );
                    self.store.insert_transaction(tx);
                    report.prepared += 1;
                }
                None => {
                    warn!(tx = %id, asset = ?tx.output_asset, "no pricing reference for asset");
                    self.reject_to_pool(tx, TransactionStatus::PriceMismatch, report);
                }
            }
        }
    }

    // 12.5.2: stage 4. group, price, optimize and persist batches.
    pub(super) fn build_batches(&mut self, report: &mut TickReport) {
        let ids = self.store.select_ids(|tx| {
            tx.verdict == Some(Verdict::Pass)
                && tx.status.is_batchable()
                && tx.output_reference_asset.is_some()
                && tx.input_reference_amount_minus_fee.is_some()
        });

        // declaration-ordered grouping keeps ticks deterministic
        let mut groups: Vec<(GroupKey, Vec<TransactionId>)> = Vec::new();
        for id in ids {
            let Some(tx) = self.store.transaction(id) else {
                continue;
            };
            if self.store.has_open_batch(tx.output_asset) {
                continue;
            }
            let Some(asset) = self.registry.get(tx.output_asset) else {
                continue;
            };
            let Some(reference_asset) = tx.output_reference_asset else {
                continue;
            };
            let key = GroupKey {
                reference_asset,
                output_asset: asset.id,
                blockchain: asset.blockchain,
                category: asset.category,
            };
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(id),
                None => groups.push((key, vec![id])),
            }
        }

        for (key, member_ids) in groups {
            if let Err(err) = self.settle_group(key, member_ids, report) {
                error!(asset = ?key.output_asset, %err, "batch build failed");
                report.item_errors += 1;
            }
        }
    }

    fn settle_group(
        &mut self,
        key: GroupKey,
        member_ids: Vec<TransactionId>,
        report: &mut TickReport,
    ) -> Result<(), PipelineError> {
        let reference_name = match self.registry.get(key.reference_asset) {
            Some(asset) => asset.name.clone(),
            None => return Ok(()),
        };

        // price every member into the batch reference asset
        let mut batch = Batch::new(key);
        for id in member_ids {
            let Some(mut tx) = self.store.take_transaction(id) else {
                continue;
            };
            let price = match self.pricing.get_price(&tx.input_reference_asset, &reference_name) {
                Ok(price) => price,
                Err(err) => {
                    warn!(tx = %id, %err, "pricing failed");
                    self.reject_to_pool(tx, TransactionStatus::PriceMismatch, report);
                    continue;
                }
            };
            match tx.priced(&price) {
                Ok(_) => batch.add(tx),
                Err(err) => {
                    warn!(tx = %id, %err, "price conversion failed");
                    self.reject_to_pool(tx, TransactionStatus::PriceMismatch, report);
                }
            }
        }
        if batch.is_empty() {
            return Ok(());
        }

        // live liquidity picture for the whole candidate batch
        let request = LiquidityRequest {
            correlation_id: self.store.peek_batch_id(),
            reference_asset: key.reference_asset,
            reference_amount: batch.output_reference_amount,
            target_asset: key.output_asset,
        };
        let check = match self.liquidity.check_liquidity(&request) {
            Ok(check) => check,
            Err(err) => {
                warn!(asset = ?key.output_asset, %err, "liquidity check failed");
                self.dissolve_candidate(batch, TransactionStatus::MissingLiquidity, report);
                return Ok(());
            }
        };

        match batch.optimize_by_liquidity(
            check.reference_available,
            check.reference_max_purchasable,
            self.config.batch.liquidity_buffer,
        ) {
            Ok(outcome) => {
                if !outcome.removed.is_empty() || outcome.purchase_required {
                    self.events.record(
                        self.current_time,
                        EventPayload::BatchOptimized(BatchOptimizedEvent {
                            output_asset: key.output_asset,
                            removed_count: outcome.removed.len(),
                            retained_amount: batch.output_reference_amount,
                            purchase_required: outcome.purchase_required,
                        }),
                    );
                }
                for removed in outcome.removed {
                    self.reject_to_pool(removed, TransactionStatus::MissingLiquidity, report);
                }
                if outcome.liquidity_warning {
                    warn!(asset = ?key.output_asset, "purchasable liquidity constrains the batch");
                    self.events.record(
                        self.current_time,
                        EventPayload::LiquidityWarning(LiquidityWarningEvent {
                            output_asset: key.output_asset,
                            requested_amount: request.reference_amount,
                            purchasable_amount: check.reference_max_purchasable,
                        }),
                    );
                    self.notifications.send(
                        Notification::warning(
                            &format!("liquidity-{:?}", key.output_asset),
                            "liquidity constrains batching",
                            vec![format!(
                                "batch for asset {:?} shrunk to {} against purchasable {}",
                                key.output_asset,
                                batch.output_reference_amount,
                                check.reference_max_purchasable
                            )],
                        ),
                        self.current_time,
                    );
                }
            }
            Err(
                BatchError::NotEnoughLiquidity { .. } | BatchError::RebatchLimitTooLow { .. },
            ) => {
                self.report_shortage(
                    key,
                    round8(check.target_amount - check.target_available),
                    round8(request.reference_amount - check.reference_available),
                );
                self.dissolve_candidate(batch, TransactionStatus::MissingLiquidity, report);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        // payout fee filter, then the combined fee ceiling
        let payout_fee = match self.payout.estimate_fee(key.output_asset) {
            Ok(estimate) => estimate.amount,
            Err(err) => {
                warn!(asset = ?key.output_asset, %err, "payout fee estimation failed");
                self.dissolve_candidate(batch, TransactionStatus::WaitingForLowerFee, report);
                return Ok(());
            }
        };
        // provider quotes in the target asset; members compare in reference
        // terms, so convert at the rate the check was quoted for
        let payout_fee_reference = if check.target_amount == Decimal::ZERO {
            Decimal::ZERO
        } else {
            round8(payout_fee * request.reference_amount / check.target_amount)
        };
        for member in batch.members.iter_mut() {
            let amount = member.output_reference_amount.unwrap_or_default();
            if let Some(fees) = member.fees.as_mut() {
                fees.record_payout_estimate(payout_fee_reference, amount);
            }
        }
        match batch.optimize_by_payout_fee() {
            Ok(removed) => {
                for tx in removed {
                    debug!(tx = %tx.id, "payout fee exceeds the member's ceiling");
                    self.reject_to_pool(tx, TransactionStatus::WaitingForLowerFee, report);
                }
            }
            Err(BatchError::FeeLimitExceeded { .. }) => {
                self.dissolve_candidate(batch, TransactionStatus::WaitingForLowerFee, report);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        let total_payout_fee = round8(payout_fee_reference * Decimal::from(batch.len()));
        match batch.check_and_record_fees(
            check.purchase_fee.amount,
            total_payout_fee,
            self.config.batch.fee_limit,
        ) {
            Ok(()) => {}
            Err(BatchError::FeeLimitExceeded { ratio, limit, .. }) => {
                warn!(asset = ?key.output_asset, %ratio, %limit, "combined fee ceiling breached");
                self.notifications.send(
                    Notification::warning(
                        &format!("fees-{:?}", key.output_asset),
                        "batch fee ceiling breached",
                        vec![format!(
                            "asset {:?}: estimated fee ratio {} exceeds limit {}",
                            key.output_asset, ratio, limit
                        )],
                    ),
                    self.current_time,
                );
                self.dissolve_candidate(batch, TransactionStatus::WaitingForLowerFee, report);
                return Ok(());
            }
            Err(err) => {
                // allocation mismatch is an upstream pricing bug
                error!(asset = ?key.output_asset, %err, "fee allocation integrity failure");
                self.notifications.send(
                    Notification::error(
                        &format!("integrity-{:?}", key.output_asset),
                        "fee allocation mismatch",
                        vec![err.to_string()],
                    ),
                    self.current_time,
                );
                self.dissolve_candidate(batch, TransactionStatus::PriceMismatch, report);
                return Ok(());
            }
        }

        let member_count = batch.len();
        let output_reference_amount = batch.output_reference_amount;
        let id = self.store.persist_batch(batch, self.current_time)?;
        debug!(batch = %id, members = member_count, amount = %output_reference_amount, "batch persisted");
        self.events.record(
            self.current_time,
            EventPayload::BatchCreated(BatchCreatedEvent {
                batch_id: id,
                output_asset: key.output_asset,
                member_count,
                output_reference_amount,
            }),
        );
        report.batches_created += 1;
        Ok(())
    }

    /// Abandon an unpersisted candidate batch: every member goes back to the
    /// pool under the given rejection status.
    pub(super) fn dissolve_candidate(
        &mut self,
        mut batch: Batch,
        status: TransactionStatus,
        report: &mut TickReport,
    ) {
        for tx in batch.members.drain(..) {
            self.reject_to_pool(tx, status, report);
        }
    }

    /// Shortage abort: compensating purchase order plus operator notification.
    pub(super) fn report_shortage(
        &mut self,
        key: GroupKey,
        deficit_target: Decimal,
        deficit_reference: Decimal,
    ) {
        error!(
            asset = ?key.output_asset,
            %deficit_target,
            %deficit_reference,
            "liquidity shortage"
        );
        self.events.record(
            self.current_time,
            EventPayload::LiquidityShortage(LiquidityShortageEvent {
                output_asset: key.output_asset,
                deficit_target,
                deficit_reference,
            }),
        );
        // fire-and-forget: a failed order only gets logged
        if let Err(err) = self.liquidity.order_liquidity(key.output_asset, deficit_target) {
            error!(asset = ?key.output_asset, %err, "compensating liquidity order failed");
        }
        self.notifications.send(
            Notification::error(
                &format!("shortage-{:?}", key.output_asset),
                "liquidity shortage",
                vec![format!(
                    "asset {:?}: missing {} in target units ({} in reference units)",
                    key.output_asset, deficit_target, deficit_reference
                )],
            ),
            self.current_time,
        );
    }
}
