// 12.4 pipeline/compliance.rs: stage 2, the AML gate. evaluates every
// undecided or still-pending transaction against its user context and applies
// the reduction outcome.

use tracing::{debug, warn};

use super::core::SettlementPipeline;
use super::results::TickReport;
use crate::aml::Verdict;
use crate::compliance::{evaluate, reduce, PriorDecision, Reduction};
use crate::events::{EventPayload, VerdictChangedEvent};
use crate::liquidity::LiquidityProvider;
use crate::notification::NotificationSink;
use crate::payout::PayoutProvider;
use crate::pricing::PricingProvider;
use crate::transaction::TransactionStatus;

impl<Pr, Lq, Po, Nt> SettlementPipeline<Pr, Lq, Po, Nt>
where
    Pr: PricingProvider,
    Lq: LiquidityProvider,
    Po: PayoutProvider,
    Nt: NotificationSink,
{
    pub(super) fn evaluate_compliance(&mut self, report: &mut TickReport) {
        // undecided transactions, plus pending ones due for re-evaluation
        let ids = self.store.select_ids(|tx| {
            tx.status == TransactionStatus::Created
                && matches!(tx.verdict, None | Some(Verdict::Pending))
        });

        for id in ids {
            let Some(tx) = self.store.take_transaction(id) else {
                continue;
            };
            let Some(ctx) = self.store.context(tx.user_id).cloned() else {
                warn!(tx = %id, user = ?tx.user_id, "no compliance context, skipping");
                self.store.insert_transaction(tx);
                report.item_errors += 1;
                continue;
            };
            let Some(asset) = self.registry.get(tx.output_asset).cloned() else {
                warn!(tx = %id, asset = ?tx.output_asset, "unknown output asset, skipping");
                self.store.insert_transaction(tx);
                report.item_errors += 1;
                continue;
            };

            let errors = evaluate(&tx, &asset, &ctx, &self.config.limits);
            let prior = PriorDecision {
                verdict: tx.verdict,
                reason: tx.reason,
                comment: tx.comment.as_deref(),
            };
            let outcome = reduce(
                &errors,
                prior,
                ctx.kyc_level,
                tx.created_at,
                self.current_time,
                &self.config.compliance,
            );

            match outcome {
                Reduction::Final {
                    verdict,
                    reason,
                    comment,
                } => {
                    debug!(tx = %id, ?verdict, ?reason, "verdict decided");
                    let (tx, _) = tx.with_verdict(verdict, reason, comment.clone());
                    self.events.record(
                        self.current_time,
                        EventPayload::VerdictChanged(VerdictChangedEvent {
                            transaction_id: id,
                            verdict,
                            reason,
                            comment,
                        }),
                    );
                    self.store.insert_transaction(tx);
                    report.verdicts_changed += 1;
                }
                Reduction::CommentOnly { comment } => {
                    let (tx, _) = tx.with_comment(comment);
                    self.store.insert_transaction(tx);
                    report.comments_updated += 1;
                }
                Reduction::NoChange => {
                    self.store.insert_transaction(tx);
                }
            }
        }
    }
}
