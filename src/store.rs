// 10.0 store.rs: in-memory system of record. Holds the intake queue, the
// unbatched transaction pool, persisted batches and the per-asset open-batch
// claim. The pipeline is the only writer; everything is keyed for O(1) access.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

use crate::asset::AssetId;
use crate::batch::{Batch, BatchStatus};
use crate::compliance::ComplianceContext;
use crate::transaction::{SourceKind, Transaction, TransactionStatus};
use crate::types::{BatchId, Timestamp, TransactionId, UserId};

/// An incoming payment, not yet a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayIn {
    pub user_id: UserId,
    pub source: SourceKind,
    pub amount: Decimal,
    pub currency: String,
    pub output_asset: AssetId,
    pub payout_address: String,
    pub percent_fee: Decimal,
    pub fixed_fee: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("an open batch already exists for asset {asset:?}")]
    OpenBatchExists { asset: AssetId },

    #[error("unknown batch {id:?}")]
    UnknownBatch { id: BatchId },
}

#[derive(Debug, Default)]
pub struct SettlementStore {
    intake: VecDeque<PayIn>,
    processed_sources: HashSet<String>,
    pool: HashMap<TransactionId, Transaction>,
    batches: HashMap<BatchId, Batch>,
    // one unfinished batch per output asset, claimed atomically on persist
    open_batches: HashMap<AssetId, BatchId>,
    contexts: HashMap<UserId, ComplianceContext>,
    next_transaction_id: u64,
    next_batch_id: u64,
}

impl SettlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    // 10.1: intake queue and pay-in dedup.

    pub fn enqueue_payin(&mut self, payin: PayIn) {
        self.intake.push_back(payin);
    }

    pub fn dequeue_payin(&mut self) -> Option<PayIn> {
        self.intake.pop_front()
    }

    pub fn intake_len(&self) -> usize {
        self.intake.len()
    }

    pub fn is_processed(&self, payin_ref: &str) -> bool {
        self.processed_sources.contains(payin_ref)
    }

    pub fn mark_processed(&mut self, payin_ref: &str) {
        self.processed_sources.insert(payin_ref.to_string());
    }

    // 10.2: transaction pool.

    pub fn next_transaction_id(&mut self) -> TransactionId {
        self.next_transaction_id += 1;
        TransactionId(self.next_transaction_id)
    }

    pub fn insert_transaction(&mut self, tx: Transaction) {
        self.pool.insert(tx.id, tx);
    }

    pub fn transaction(&self, id: TransactionId) -> Option<&Transaction> {
        self.pool.get(&id)
    }

    pub fn take_transaction(&mut self, id: TransactionId) -> Option<Transaction> {
        self.pool.remove(&id)
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.pool.values()
    }

    /// Ids of pooled transactions matching a predicate, in id order so ticks
    /// are deterministic.
    pub fn select_ids<F>(&self, predicate: F) -> Vec<TransactionId>
    where
        F: Fn(&Transaction) -> bool,
    {
        let mut ids: Vec<TransactionId> = self
            .pool
            .values()
            .filter(|tx| predicate(tx))
            .map(|tx| tx.id)
            .collect();
        ids.sort();
        ids
    }

    pub fn count_with_status(&self, status: TransactionStatus) -> usize {
        self.pool.values().filter(|tx| tx.status == status).count()
    }

    // 10.3: batches and the open-asset claim.

    /// Persist a freshly built batch: claim the output asset, stamp identity,
    /// move members out of the pool's reach. Insert-if-absent, so two builds
    /// for the same asset cannot both land.
    pub fn persist_batch(&mut self, mut batch: Batch, now: Timestamp) -> Result<BatchId, StoreError> {
        let asset = batch.key.output_asset;
        if self.open_batches.contains_key(&asset) {
            return Err(StoreError::OpenBatchExists { asset });
        }

        self.next_batch_id += 1;
        let id = BatchId(self.next_batch_id);
        batch.persist(id, now);
        for member in &batch.members {
            self.pool.remove(&member.id);
        }
        self.open_batches.insert(asset, id);
        self.batches.insert(id, batch);
        Ok(id)
    }

    /// Id the next `persist_batch` will assign. Used as the correlation id
    /// for liquidity checks that run before the batch is persisted.
    pub fn peek_batch_id(&self) -> BatchId {
        BatchId(self.next_batch_id + 1)
    }

    pub fn has_open_batch(&self, asset: AssetId) -> bool {
        self.open_batches.contains_key(&asset)
    }

    pub fn batch(&self, id: BatchId) -> Option<&Batch> {
        self.batches.get(&id)
    }

    pub fn batch_mut(&mut self, id: BatchId) -> Option<&mut Batch> {
        self.batches.get_mut(&id)
    }

    pub fn batch_ids_with_status(&self, statuses: &[BatchStatus]) -> Vec<BatchId> {
        let mut ids: Vec<BatchId> = self
            .batches
            .values()
            .filter(|b| statuses.contains(&b.status))
            .filter_map(|b| b.id)
            .collect();
        ids.sort();
        ids
    }

    /// Close out a finished batch: release the asset claim and archive the
    /// members back into the pool for reporting.
    pub fn finish_batch(&mut self, id: BatchId) -> Result<(), StoreError> {
        let batch = self
            .batches
            .get_mut(&id)
            .ok_or(StoreError::UnknownBatch { id })?;
        batch.complete();
        let members = std::mem::take(&mut batch.members);
        let asset = batch.key.output_asset;
        for member in members {
            self.pool.insert(member.id, member);
        }
        self.open_batches.remove(&asset);
        Ok(())
    }

    /// Batch abandoned mid-flight (abort, slippage): members go back to the
    /// pool in whatever status the caller already gave them.
    pub fn dissolve_batch(&mut self, id: BatchId) -> Result<Vec<TransactionId>, StoreError> {
        let mut batch = self
            .batches
            .remove(&id)
            .ok_or(StoreError::UnknownBatch { id })?;
        self.open_batches.remove(&batch.key.output_asset);
        let ids = batch.members.iter().map(|t| t.id).collect();
        for member in batch.members.drain(..) {
            self.pool.insert(member.id, member);
        }
        Ok(ids)
    }

    // 10.4: compliance contexts, one per user.

    pub fn set_context(&mut self, user_id: UserId, ctx: ComplianceContext) {
        self.contexts.insert(user_id, ctx);
    }

    pub fn context(&self, user_id: UserId) -> Option<&ComplianceContext> {
        self.contexts.get(&user_id)
    }
}
