// 8.7 notification.rs: fire-and-forget operator alerts and user mails.
// Delivery is behind a trait; the in-memory sink records everything and
// suppresses repeats of the same correlation key inside the debounce window.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Operator-facing, something needs intervention.
    Error,
    /// Operator-facing, degraded but self-healing.
    Warning,
    /// User-facing mail.
    UserMail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    /// Dedup key, e.g. "batch-3-liquidity" or "tx-17-chargeback".
    pub correlation_id: String,
    pub subject: String,
    pub messages: Vec<String>,
}

impl Notification {
    pub fn error(correlation_id: &str, subject: &str, messages: Vec<String>) -> Self {
        Self {
            kind: NotificationKind::Error,
            correlation_id: correlation_id.to_string(),
            subject: subject.to_string(),
            messages,
        }
    }

    pub fn warning(correlation_id: &str, subject: &str, messages: Vec<String>) -> Self {
        Self {
            kind: NotificationKind::Warning,
            correlation_id: correlation_id.to_string(),
            subject: subject.to_string(),
            messages,
        }
    }

    pub fn user_mail(correlation_id: &str, subject: &str, messages: Vec<String>) -> Self {
        Self {
            kind: NotificationKind::UserMail,
            correlation_id: correlation_id.to_string(),
            subject: subject.to_string(),
            messages,
        }
    }
}

pub trait NotificationSink {
    /// Deliver or drop; never fails, never blocks the pipeline.
    fn send(&mut self, notification: Notification, now: Timestamp);
}

// in-memory sink with per-correlation debounce. User mails always go out,
// repeat suppression for those lives on the transaction (mail_sent_at).
#[derive(Debug, Default)]
pub struct MemorySink {
    debounce_minutes: i64,
    last_sent: std::collections::HashMap<(NotificationKind, String), Timestamp>,
    sent: Vec<Notification>,
    suppressed: usize,
}

impl MemorySink {
    pub fn new(debounce_minutes: i64) -> Self {
        Self {
            debounce_minutes,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> &[Notification] {
        &self.sent
    }

    pub fn sent_of(&self, kind: NotificationKind) -> Vec<&Notification> {
        self.sent.iter().filter(|n| n.kind == kind).collect()
    }

    pub fn suppressed_count(&self) -> usize {
        self.suppressed
    }
}

impl NotificationSink for MemorySink {
    fn send(&mut self, notification: Notification, now: Timestamp) {
        if notification.kind != NotificationKind::UserMail {
            let key = (notification.kind, notification.correlation_id.clone());
            if let Some(last) = self.last_sent.get(&key) {
                if last.elapsed_minutes(now) < self.debounce_minutes {
                    self.suppressed += 1;
                    return;
                }
            }
            self.last_sent.insert(key, now);
        }
        self.sent.push(notification);
    }
}
