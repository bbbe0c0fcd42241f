// 12.1 pipeline/core.rs: pipeline struct, tick lock, the tick itself.

use tracing::{info, warn};

use super::results::{PipelineError, TickReport};
use crate::asset::AssetRegistry;
use crate::config::SettlementConfig;
use crate::events::{EventCollector, EventPayload, TransactionRejectedEvent};
use crate::liquidity::LiquidityProvider;
use crate::notification::{Notification, NotificationSink};
use crate::payout::PayoutProvider;
use crate::pricing::PricingProvider;
use crate::store::SettlementStore;
use crate::transaction::{Transaction, TransactionStatus};
use crate::types::Timestamp;

/// Re-entrancy guard for the tick. A held lock expires after the configured
/// timeout so one stuck tick cannot stall the pipeline forever.
#[derive(Debug)]
pub(super) struct TickLock {
    held_since: Option<Timestamp>,
    timeout_secs: u64,
}

impl TickLock {
    pub(super) fn new(timeout_secs: u64) -> Self {
        Self {
            held_since: None,
            timeout_secs,
        }
    }

    pub(super) fn acquire(&mut self, now: Timestamp) -> Result<(), PipelineError> {
        if let Some(since) = self.held_since {
            let elapsed_millis = now.as_millis() - since.as_millis();
            if elapsed_millis < self.timeout_secs as i64 * 1000 {
                return Err(PipelineError::TickInProgress { since });
            }
            warn!(?since, "tick lock expired, taking over");
        }
        self.held_since = Some(now);
        Ok(())
    }

    pub(super) fn release(&mut self) {
        self.held_since = None;
    }
}

// 12.1.1: the pipeline owns the store, the asset registry, the audit log and
// one provider per external boundary. all state lives here.
pub struct SettlementPipeline<Pr, Lq, Po, Nt>
where
    Pr: PricingProvider,
    Lq: LiquidityProvider,
    Po: PayoutProvider,
    Nt: NotificationSink,
{
    pub config: SettlementConfig,
    pub store: SettlementStore,
    pub registry: AssetRegistry,
    pub pricing: Pr,
    pub liquidity: Lq,
    pub payout: Po,
    pub notifications: Nt,
    pub events: EventCollector,
    pub(super) lock: TickLock,
    pub(super) current_time: Timestamp,
}

impl<Pr, Lq, Po, Nt> SettlementPipeline<Pr, Lq, Po, Nt>
where
    Pr: PricingProvider,
    Lq: LiquidityProvider,
    Po: PayoutProvider,
    Nt: NotificationSink,
{
    pub fn new(
        config: SettlementConfig,
        registry: AssetRegistry,
        pricing: Pr,
        liquidity: Lq,
        payout: Po,
        notifications: Nt,
    ) -> Self {
        let lock = TickLock::new(config.pipeline.lock_timeout_secs);
        let events = EventCollector::new(config.pipeline.event_capacity);
        Self {
            config,
            store: SettlementStore::new(),
            registry,
            pricing,
            liquidity,
            payout,
            notifications,
            events,
            lock,
            current_time: Timestamp::from_millis(0),
        }
    }

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.current_time = Timestamp::from_millis(self.current_time.as_millis() + millis);
    }

    /// Advance the clock by one tick interval, then tick.
    pub fn advance_and_tick(&mut self) -> Result<TickReport, PipelineError> {
        self.advance_time(self.config.pipeline.tick_interval_secs as i64 * 1000);
        self.tick()
    }

    // 12.2: one tick. stages run in a fixed order; item failures are counted
    // in the report and never escape the tick boundary.
    pub fn tick(&mut self) -> Result<TickReport, PipelineError> {
        let now = self.current_time;
        self.lock.acquire(now)?;

        let mut report = TickReport::default();
        self.register_payins(&mut report);
        self.evaluate_compliance(&mut report);
        self.compute_fees(&mut report);
        self.build_batches(&mut report);
        self.secure_batches(&mut report);
        self.submit_payouts(&mut report);
        self.confirm_payouts(&mut report);
        self.send_user_mails(&mut report);

        self.lock.release();
        info!(
            registered = report.registered,
            verdicts = report.verdicts_changed,
            batches_created = report.batches_created,
            batches_secured = report.batches_secured,
            completed = report.transactions_completed,
            item_errors = report.item_errors,
            "tick done"
        );
        Ok(report)
    }

    /// Recoverable rejection: push the transaction back into the unbatched
    /// pool under the given status and warn once retries pile up.
    pub(super) fn reject_to_pool(
        &mut self,
        tx: Transaction,
        status: TransactionStatus,
        report: &mut TickReport,
    ) {
        let (tx, _) = tx.rejected(status);
        self.events.record(
            self.current_time,
            EventPayload::TransactionRejected(TransactionRejectedEvent {
                transaction_id: tx.id,
                status,
                retry_count: tx.retry_count,
            }),
        );
        if tx.retry_count >= self.config.pipeline.retry_warning_threshold {
            warn!(tx = %tx.id, retries = tx.retry_count, ?status, "transaction keeps retrying");
            self.notifications.send(
                Notification::warning(
                    &format!("{}-retries", tx.id),
                    "transaction keeps retrying",
                    vec![format!(
                        "{} rejected {} times, latest status {:?}",
                        tx.id, tx.retry_count, status
                    )],
                ),
                self.current_time,
            );
        }
        self.store.insert_transaction(tx);
        report.rejected += 1;
    }
}
