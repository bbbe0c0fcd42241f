// 12.3 pipeline/intake.rs: stage 1, registration. drains the pay-in queue
// into fresh transactions, one per source, skipping duplicates and card
// pay-ins below the asset's minimum volume.

use tracing::{debug, warn};

use super::results::TickReport;
use crate::events::{EventPayload, PayInSkippedEvent, SkipReason, TransactionRegisteredEvent};
use crate::liquidity::LiquidityProvider;
use crate::notification::NotificationSink;
use crate::payout::PayoutProvider;
use crate::pricing::PricingProvider;
use crate::transaction::Transaction;

use super::core::SettlementPipeline;

impl<Pr, Lq, Po, Nt> SettlementPipeline<Pr, Lq, Po, Nt>
where
    Pr: PricingProvider,
    Lq: LiquidityProvider,
    Po: PayoutProvider,
    Nt: NotificationSink,
{
    pub(super) fn register_payins(&mut self, report: &mut TickReport) {
        while let Some(payin) = self.store.dequeue_payin() {
            let payin_ref = payin.source.payin_ref().to_string();

            if self.store.is_processed(&payin_ref) {
                warn!(payin_ref, "duplicate pay-in skipped");
                self.events.record(
                    self.current_time,
                    EventPayload::PayInSkipped(PayInSkippedEvent {
                        payin_ref,
                        reason: SkipReason::AlreadyProcessed,
                    }),
                );
                report.payins_skipped += 1;
                continue;
            }

            // card charges below the asset's floor never become transactions
            if payin.source.is_card() {
                let below_floor = self.registry.get(payin.output_asset).is_some_and(|asset| {
                    payin.amount < asset.min_volume * self.config.limits.min_volume_tolerance
                });
                if below_floor {
                    self.store.mark_processed(&payin_ref);
                    self.events.record(
                        self.current_time,
                        EventPayload::PayInSkipped(PayInSkippedEvent {
                            payin_ref,
                            reason: SkipReason::BelowMinVolume,
                        }),
                    );
                    report.payins_skipped += 1;
                    continue;
                }
            }

            let id = self.store.next_transaction_id();
            let tx = Transaction::new(
                id,
                payin.user_id,
                payin.source.clone(),
                payin.amount,
                &payin.currency,
                payin.output_asset,
                &payin.payout_address,
                payin.percent_fee,
                payin.fixed_fee,
                self.current_time,
            );
            debug!(tx = %id, payin_ref, amount = %payin.amount, "pay-in registered");
            self.store.mark_processed(&payin_ref);
            self.events.record(
                self.current_time,
                EventPayload::TransactionRegistered(TransactionRegisteredEvent {
                    transaction_id: id,
                    user_id: payin.user_id,
                    payin_ref,
                    input_reference_amount: tx.input_reference_amount,
                    output_asset: payin.output_asset,
                }),
            );
            self.store.insert_transaction(tx);
            report.registered += 1;
        }
    }
}
