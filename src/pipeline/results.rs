// 12.0.2: tick-level results and errors.

use thiserror::Error;

use crate::batch::BatchError;
use crate::config::ConfigError;
use crate::store::StoreError;
use crate::types::Timestamp;

/// What one tick did, stage by stage. Item-level failures are counted, never
/// propagated; the report is the only thing a tick hands back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub registered: usize,
    pub payins_skipped: usize,
    pub verdicts_changed: usize,
    pub comments_updated: usize,
    pub prepared: usize,
    pub rejected: usize,
    pub batches_created: usize,
    pub batches_secured: usize,
    pub batches_pending: usize,
    pub payouts_submitted: usize,
    pub transactions_completed: usize,
    pub batches_completed: usize,
    pub mails_sent: usize,
    pub item_errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("tick already in progress since {since:?}")]
    TickInProgress { since: Timestamp },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
