// 12.7 pipeline/payouts.rs: stages 6 and 7. secured batches submit one payout
// per member; paying-out batches poll for completion proofs and close once
// every member is done.

use tracing::{debug, error};

use super::core::SettlementPipeline;
use super::results::TickReport;
use crate::batch::BatchStatus;
use crate::events::{
    BatchCompletedEvent, EventPayload, PayoutSubmittedEvent, TransactionCompletedEvent,
};
use crate::liquidity::LiquidityProvider;
use crate::notification::NotificationSink;
use crate::payout::{PayoutError, PayoutProvider, PayoutRequest};
use crate::pricing::PricingProvider;
use crate::transaction::TransactionStatus;
use crate::types::TransactionId;

impl<Pr, Lq, Po, Nt> SettlementPipeline<Pr, Lq, Po, Nt>
where
    Pr: PricingProvider,
    Lq: LiquidityProvider,
    Po: PayoutProvider,
    Nt: NotificationSink,
{
    // 12.7.1: stage 6. one payout order per ready member.
    pub(super) fn submit_payouts(&mut self, report: &mut TickReport) {
        for id in self.store.batch_ids_with_status(&[BatchStatus::Secured]) {
            let requests: Vec<PayoutRequest> = match self.store.batch(id) {
                Some(batch) => batch
                    .members
                    .iter()
                    .filter(|tx| tx.status == TransactionStatus::ReadyForPayout)
                    .map(|tx| PayoutRequest {
                        correlation_id: tx.id,
                        asset: tx.output_asset,
                        amount: tx.output_amount.unwrap_or_default(),
                        destination: tx.payout_address.clone(),
                    })
                    .collect(),
                None => continue,
            };

            let mut submitted: Vec<TransactionId> = Vec::new();
            for request in &requests {
                match self.payout.submit_payout(request) {
                    // a duplicate means a previous tick got this far already
                    Ok(()) | Err(PayoutError::DuplicateSubmission { .. }) => {
                        submitted.push(request.correlation_id);
                    }
                    Err(err) => {
                        error!(tx = %request.correlation_id, %err, "payout submission failed");
                        report.item_errors += 1;
                    }
                }
            }

            let Some(batch) = self.store.batch_mut(id) else {
                continue;
            };
            for member_id in &submitted {
                if let Some(index) = batch.members.iter().position(|tx| tx.id == *member_id) {
                    let (tx, _) = batch.members[index].clone().paying_out();
                    batch.members[index] = tx;
                }
            }
            let all_paying = batch
                .members
                .iter()
                .all(|tx| tx.status == TransactionStatus::PayingOut);
            if all_paying && !batch.members.is_empty() {
                batch.paying_out();
            }

            for member_id in submitted {
                let amount = self
                    .store
                    .batch(id)
                    .and_then(|b| b.members.iter().find(|tx| tx.id == member_id))
                    .and_then(|tx| tx.output_amount)
                    .unwrap_or_default();
                debug!(batch = %id, tx = %member_id, %amount, "payout submitted");
                self.events.record(
                    self.current_time,
                    EventPayload::PayoutSubmitted(PayoutSubmittedEvent {
                        batch_id: id,
                        transaction_id: member_id,
                        amount,
                    }),
                );
                report.payouts_submitted += 1;
            }
        }
    }

    // 12.7.2: stage 7. poll completion proofs, close finished batches.
    pub(super) fn confirm_payouts(&mut self, report: &mut TickReport) {
        for id in self.store.batch_ids_with_status(&[BatchStatus::PayingOut]) {
            let member_ids: Vec<TransactionId> = match self.store.batch(id) {
                Some(batch) => batch
                    .members
                    .iter()
                    .filter(|tx| tx.status == TransactionStatus::PayingOut)
                    .map(|tx| tx.id)
                    .collect(),
                None => continue,
            };

            for member_id in member_ids {
                let completion = match self.payout.check_completion(member_id) {
                    Ok(completion) => completion,
                    Err(err) => {
                        error!(tx = %member_id, %err, "completion check failed");
                        report.item_errors += 1;
                        continue;
                    }
                };
                if !completion.is_complete {
                    continue;
                }
                let Some(payout_tx_id) = completion.payout_tx_id else {
                    error!(tx = %member_id, "completed payout without a chain tx id");
                    report.item_errors += 1;
                    continue;
                };

                let now = self.current_time;
                let mut completed_event = None;
                if let Some(batch) = self.store.batch_mut(id) {
                    if let Some(index) =
                        batch.members.iter().position(|tx| tx.id == member_id)
                    {
                        let (tx, _) = batch.members[index].clone().completed(
                            payout_tx_id.clone(),
                            completion.payout_fee,
                            now,
                        );
                        completed_event = Some(TransactionCompletedEvent {
                            transaction_id: member_id,
                            payout_tx_id,
                            output_amount: tx.output_amount.unwrap_or_default(),
                            payout_fee: completion.payout_fee,
                        });
                        batch.members[index] = tx;
                    }
                }
                if let Some(event) = completed_event {
                    debug!(batch = %id, tx = %member_id, "payout confirmed");
                    self.events
                        .record(now, EventPayload::TransactionCompleted(event));
                    report.transactions_completed += 1;
                }
            }

            let all_complete = self
                .store
                .batch(id)
                .map(|batch| batch.members.iter().all(|tx| tx.is_complete()))
                .unwrap_or(false);
            if all_complete {
                match self.store.finish_batch(id) {
                    Ok(()) => {
                        debug!(batch = %id, "batch complete");
                        self.events.record(
                            self.current_time,
                            EventPayload::BatchCompleted(BatchCompletedEvent {
                                batch_id: id,
                                status: BatchStatus::Complete,
                            }),
                        );
                        report.batches_completed += 1;
                    }
                    Err(err) => {
                        error!(batch = %id, %err, "failed to close batch");
                        report.item_errors += 1;
                    }
                }
            }
        }
    }
}
