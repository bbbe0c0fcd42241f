// 11.0: every state change produces an event. used for audit trails, state
// reconstruction, and notifying external systems. the EventPayload enum lists
// all event types.

use crate::aml::{Reason, Verdict};
use crate::asset::AssetId;
use crate::batch::BatchStatus;
use crate::transaction::TransactionStatus;
use crate::types::{BatchId, Timestamp, TransactionId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // Intake events
    TransactionRegistered(TransactionRegisteredEvent),
    PayInSkipped(PayInSkippedEvent),

    // Compliance events
    VerdictChanged(VerdictChangedEvent),

    // Batching events
    TransactionPrepared(TransactionPreparedEvent),
    TransactionRejected(TransactionRejectedEvent),
    BatchCreated(BatchCreatedEvent),
    BatchOptimized(BatchOptimizedEvent),

    // Liquidity events
    LiquidityWarning(LiquidityWarningEvent),
    LiquidityShortage(LiquidityShortageEvent),
    BatchSecured(BatchSecuredEvent),
    BatchPendingLiquidity(BatchPendingLiquidityEvent),

    // Payout events
    PayoutSubmitted(PayoutSubmittedEvent),
    TransactionCompleted(TransactionCompletedEvent),
    BatchCompleted(BatchCompletedEvent),

    // Notification events
    MailSent(MailSentEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRegisteredEvent {
    pub transaction_id: TransactionId,
    pub user_id: UserId,
    pub payin_ref: String,
    pub input_reference_amount: Decimal,
    pub output_asset: AssetId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayInSkippedEvent {
    pub payin_ref: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SkipReason {
    AlreadyProcessed,
    BelowMinVolume,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictChangedEvent {
    pub transaction_id: TransactionId,
    pub verdict: Verdict,
    pub reason: Option<Reason>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionPreparedEvent {
    pub transaction_id: TransactionId,
    pub output_reference_asset: AssetId,
    pub amount_minus_fee: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRejectedEvent {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCreatedEvent {
    pub batch_id: BatchId,
    pub output_asset: AssetId,
    pub member_count: usize,
    pub output_reference_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOptimizedEvent {
    pub output_asset: AssetId,
    pub removed_count: usize,
    pub retained_amount: Decimal,
    pub purchase_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityWarningEvent {
    pub output_asset: AssetId,
    pub requested_amount: Decimal,
    pub purchasable_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityShortageEvent {
    pub output_asset: AssetId,
    pub deficit_target: Decimal,
    pub deficit_reference: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSecuredEvent {
    pub batch_id: BatchId,
    pub output_amount: Decimal,
    pub purchase_fee: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPendingLiquidityEvent {
    pub batch_id: BatchId,
    pub output_asset: AssetId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutSubmittedEvent {
    pub batch_id: BatchId,
    pub transaction_id: TransactionId,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionCompletedEvent {
    pub transaction_id: TransactionId,
    pub payout_tx_id: String,
    pub output_amount: Decimal,
    pub payout_fee: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCompletedEvent {
    pub batch_id: BatchId,
    pub status: BatchStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailSentEvent {
    pub transaction_id: TransactionId,
    pub subject: String,
}

pub trait EventEmitter {
    fn emit(&mut self, event: Event);
}

// capped collector: the oldest events fall off once capacity is reached,
// drain() hands the buffer to whoever archives it
#[derive(Debug)]
pub struct EventCollector {
    events: std::collections::VecDeque<Event>,
    capacity: usize,
    next_id: u64,
}

impl EventCollector {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: std::collections::VecDeque::new(),
            capacity,
            next_id: 1,
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn drain(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    pub fn next_id(&mut self) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn record(&mut self, timestamp: Timestamp, payload: EventPayload) {
        let id = self.next_id();
        self.emit(Event::new(id, timestamp, payload));
    }
}

impl EventEmitter for EventCollector {
    fn emit(&mut self, event: Event) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn collector_drains_in_order() {
        let mut collector = EventCollector::new(10);
        collector.record(
            Timestamp::from_millis(1000),
            EventPayload::TransactionRegistered(TransactionRegisteredEvent {
                transaction_id: TransactionId(1),
                user_id: UserId(1),
                payin_ref: "payin-1".to_string(),
                input_reference_amount: dec!(100),
                output_asset: AssetId(1),
            }),
        );
        collector.record(
            Timestamp::from_millis(2000),
            EventPayload::BatchCompleted(BatchCompletedEvent {
                batch_id: BatchId(1),
                status: BatchStatus::Complete,
            }),
        );

        let drained = collector.drain();
        assert_eq!(drained.len(), 2);
        assert!(drained[0].id < drained[1].id);
        assert!(collector.is_empty());
    }

    #[test]
    fn collector_caps_at_capacity() {
        let mut collector = EventCollector::new(2);
        for i in 0..5 {
            collector.record(
                Timestamp::from_millis(i),
                EventPayload::BatchCompleted(BatchCompletedEvent {
                    batch_id: BatchId(i as u64),
                    status: BatchStatus::Complete,
                }),
            );
        }
        assert_eq!(collector.len(), 2);
        // only the two newest survive
        let ids: Vec<u64> = collector.events().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![4, 5]);
    }
}
