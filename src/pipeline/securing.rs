// 12.6 pipeline/securing.rs: stage 5, liquidity securing. pending purchase
// orders are polled first; fresh batches then reserve from liquidity on hand
// and fall back to an asynchronous purchase.

use rust_decimal::Decimal;
use tracing::{debug, error, warn};

use super::core::SettlementPipeline;
use super::results::TickReport;
use crate::batch::BatchStatus;
use crate::events::{BatchPendingLiquidityEvent, BatchSecuredEvent, EventPayload};
use crate::liquidity::{LiquidityError, LiquidityProvider, LiquidityRequest};
use crate::notification::{Notification, NotificationSink};
use crate::payout::PayoutProvider;
use crate::pricing::PricingProvider;
use crate::transaction::TransactionStatus;
use crate::types::{round8, BatchId};

impl<Pr, Lq, Po, Nt> SettlementPipeline<Pr, Lq, Po, Nt>
where
    Pr: PricingProvider,
    Lq: LiquidityProvider,
    Po: PayoutProvider,
    Nt: NotificationSink,
{
    pub(super) fn secure_batches(&mut self, report: &mut TickReport) {
        self.poll_pending_orders(report);
        self.secure_fresh_batches(report);
    }

    // 12.6.1: batches waiting on an asynchronous purchase order.
    fn poll_pending_orders(&mut self, report: &mut TickReport) {
        for id in self
            .store
            .batch_ids_with_status(&[BatchStatus::PendingLiquidity])
        {
            match self.liquidity.fetch_order_result(id) {
                Err(LiquidityError::OrderNotReady { .. }) => {
                    debug!(batch = %id, "purchase order not ready yet");
                }
                Err(err) => {
                    error!(batch = %id, %err, "order poll failed");
                    report.item_errors += 1;
                }
                Ok(result) => {
                    // the settled purchase landed in the pool; reserve it now
                    let Some(request) = self.batch_request(id) else {
                        continue;
                    };
                    match self.liquidity.reserve_liquidity(&request) {
                        Ok(secured) if secured > Decimal::ZERO => {
                            self.apply_secure(id, secured, result.purchase_fee, report);
                            self.liquidity.complete_orders(id);
                        }
                        Ok(_) => {
                            warn!(batch = %id, "purchased liquidity already drained, staying pending");
                        }
                        Err(err) => {
                            error!(batch = %id, %err, "reserve after purchase failed");
                            report.item_errors += 1;
                        }
                    }
                }
            }
        }
    }

    // 12.6.2: freshly persisted batches. reserve first, purchase second.
    fn secure_fresh_batches(&mut self, report: &mut TickReport) {
        for id in self.store.batch_ids_with_status(&[BatchStatus::Created]) {
            let Some(request) = self.batch_request(id) else {
                continue;
            };

            match self.liquidity.reserve_liquidity(&request) {
                Ok(secured) if secured > Decimal::ZERO => {
                    self.apply_secure(id, secured, Decimal::ZERO, report);
                }
                Ok(_) => match self.liquidity.purchase_liquidity(&request) {
                    Ok(()) => {
                        if let Some(batch) = self.store.batch_mut(id) {
                            batch.pending();
                        }
                        debug!(batch = %id, "purchase order submitted");
                        self.events.record(
                            self.current_time,
                            EventPayload::BatchPendingLiquidity(BatchPendingLiquidityEvent {
                                batch_id: id,
                                output_asset: request.target_asset,
                            }),
                        );
                        report.batches_pending += 1;
                    }
                    Err(LiquidityError::PriceSlippage { asset }) => {
                        error!(batch = %id, ?asset, "price slippage during purchase");
                        self.notifications.send(
                            Notification::error(
                                &format!("slippage-{id}"),
                                "price slippage, batch aborted",
                                vec![format!(
                                    "batch {id} for asset {asset:?} hit slippage; members reset for retry"
                                )],
                            ),
                            self.current_time,
                        );
                        self.abandon_batch(id, TransactionStatus::PriceSlippage, report);
                    }
                    Err(LiquidityError::NotEnoughLiquidity {
                        asset,
                        requested,
                        available,
                    }) => {
                        let key = self.store.batch(id).map(|b| b.key);
                        if let Some(key) = key {
                            let deficit_target = round8(requested - available);
                            // scale the target-unit deficit back into reference terms
                            let deficit_reference = if requested == Decimal::ZERO {
                                request.reference_amount
                            } else {
                                round8(request.reference_amount * deficit_target / requested)
                            };
                            self.report_shortage(key, deficit_target, deficit_reference);
                        } else {
                            error!(batch = %id, ?asset, "shortage on unknown batch");
                        }
                        self.abandon_batch(id, TransactionStatus::MissingLiquidity, report);
                    }
                    Err(err) => {
                        error!(batch = %id, %err, "purchase failed");
                        report.item_errors += 1;
                    }
                },
                Err(err) => {
                    error!(batch = %id, %err, "reserve failed");
                    report.item_errors += 1;
                }
            }
        }
    }

    fn batch_request(&self, id: BatchId) -> Option<LiquidityRequest> {
        let batch = self.store.batch(id)?;
        Some(LiquidityRequest {
            correlation_id: id,
            reference_asset: batch.key.reference_asset,
            reference_amount: batch.output_reference_amount,
            target_asset: batch.key.output_asset,
        })
    }

    /// Secure the batch with the given liquidity. Allocation failures are
    /// integrity errors that abandon the batch for this tick.
    fn apply_secure(
        &mut self,
        id: BatchId,
        liquidity: Decimal,
        purchase_fee: Decimal,
        report: &mut TickReport,
    ) {
        let outcome = match self.store.batch_mut(id) {
            Some(batch) => batch.secure(liquidity, purchase_fee),
            None => return,
        };
        match outcome {
            Ok(()) => {
                debug!(batch = %id, %liquidity, %purchase_fee, "batch secured");
                self.events.record(
                    self.current_time,
                    EventPayload::BatchSecured(BatchSecuredEvent {
                        batch_id: id,
                        output_amount: liquidity,
                        purchase_fee,
                    }),
                );
                report.batches_secured += 1;
            }
            Err(err) => {
                error!(batch = %id, %err, "securing integrity failure");
                self.notifications.send(
                    Notification::error(
                        &format!("integrity-{id}"),
                        "output amount mismatch",
                        vec![err.to_string()],
                    ),
                    self.current_time,
                );
                self.abandon_batch(id, TransactionStatus::PriceMismatch, report);
            }
        }
    }

    /// Dissolve a persisted batch mid-flight: members rejoin the pool under
    /// the given rejection status and the asset claim is released.
    fn abandon_batch(&mut self, id: BatchId, status: TransactionStatus, report: &mut TickReport) {
        let member_ids = match self.store.dissolve_batch(id) {
            Ok(ids) => ids,
            Err(err) => {
                error!(batch = %id, %err, "dissolve failed");
                report.item_errors += 1;
                return;
            }
        };
        for member_id in member_ids {
            if let Some(tx) = self.store.take_transaction(member_id) {
                self.reject_to_pool(tx, status, report);
            }
        }
    }
}
