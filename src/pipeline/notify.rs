// 12.8 pipeline/notify.rs: stage 8, user mails. purchase confirmations for
// newly completed transactions and chargeback notices for failed ones, each
// sent once and recorded back onto the transaction.

use tracing::debug;

use super::core::SettlementPipeline;
use super::results::TickReport;
use crate::aml::Verdict;
use crate::events::{EventPayload, MailSentEvent};
use crate::liquidity::LiquidityProvider;
use crate::notification::{Notification, NotificationSink};
use crate::payout::PayoutProvider;
use crate::pricing::PricingProvider;

impl<Pr, Lq, Po, Nt> SettlementPipeline<Pr, Lq, Po, Nt>
where
    Pr: PricingProvider,
    Lq: LiquidityProvider,
    Po: PayoutProvider,
    Nt: NotificationSink,
{
    pub(super) fn send_user_mails(&mut self, report: &mut TickReport) {
        let ids = self.store.select_ids(|tx| {
            tx.mail_sent_at.is_none()
                && (tx.is_complete() || tx.verdict == Some(Verdict::Fail))
        });

        for id in ids {
            let Some(tx) = self.store.take_transaction(id) else {
                continue;
            };

            let (subject, messages) = if tx.is_complete() {
                let asset_name = self
                    .registry
                    .get(tx.output_asset)
                    .map(|a| a.name.clone())
                    .unwrap_or_else(|| format!("{:?}", tx.output_asset));
                (
                    "crypto purchase completed",
                    vec![format!(
                        "paid out {} {} ({})",
                        tx.output_amount.unwrap_or_default(),
                        asset_name,
                        tx.payout_tx_id.as_deref().unwrap_or("-")
                    )],
                )
            } else {
                (
                    "chargeback initiated",
                    vec![format!(
                        "purchase could not be executed: {:?}",
                        tx.reason
                    )],
                )
            };

            self.notifications.send(
                Notification::user_mail(&tx.id.to_string(), subject, messages),
                self.current_time,
            );
            debug!(tx = %id, subject, "user mail sent");
            self.events.record(
                self.current_time,
                EventPayload::MailSent(MailSentEvent {
                    transaction_id: id,
                    subject: subject.to_string(),
                }),
            );
            let (tx, _) = tx.confirm_mail(self.current_time);
            self.store.insert_transaction(tx);
            report.mails_sent += 1;
        }
    }
}
