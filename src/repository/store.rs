//! Port trait for the idempotent persistence backend.
//!
//! Every write is insert-if-absent by the entity's unique key: a conflict is
//! a successful no-op, reported as `false` / not counted, never as an error.

use async_trait::async_trait;

use crate::error::StorageResult;

use super::models::{
    BatchSummary, Block, BlockBatch, Contract, Event, EventFilter, EventPage, EventRecord, Stats,
    Transaction, TransactionFilter,
};

#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Returns `true` when the block was newly inserted.
    async fn upsert_block(&self, block: &Block) -> StorageResult<bool>;

    async fn upsert_transaction(&self, transaction: &Transaction) -> StorageResult<bool>;

    /// Keyed by `(contract_address, transaction_hash, log_index)`.
    async fn upsert_event(&self, event: &Event) -> StorageResult<bool>;

    /// Write a whole batch. A row that fails is logged and skipped; it never
    /// aborts the rest of the batch.
    async fn write_batch(&self, batch: &BlockBatch) -> StorageResult<BatchSummary>;

    async fn upsert_contract(&self, contract: &Contract) -> StorageResult<bool>;

    /// Returns `true` when a row was deleted.
    async fn delete_contract(&self, address: &str) -> StorageResult<bool>;

    async fn get_contracts(&self) -> StorageResult<Vec<Contract>>;

    /// Explicit checkpoint if one was written, otherwise `max(block.number)`.
    async fn read_checkpoint(&self) -> StorageResult<Option<u64>>;

    /// Raise the stored checkpoint to `block_number`; lower values are ignored.
    async fn write_checkpoint(&self, block_number: u64) -> StorageResult<()>;

    /// `is_running` is always `false` here; the indexer fills it in.
    async fn get_stats(&self) -> StorageResult<Stats>;

    /// Sorted by `(block_number desc, log_index desc)`, one row per event key
    /// (the most recently inserted).
    async fn get_events(&self, filter: &EventFilter) -> StorageResult<Vec<EventRecord>>;

    /// Sorted by `block_number desc`.
    async fn get_transactions(&self, filter: &TransactionFilter) -> StorageResult<Vec<Transaction>>;

    /// Events with a decoded name, paginated from page 1.
    async fn get_all_events(&self, page: u64, page_size: u64) -> StorageResult<EventPage>;

    /// Newest first.
    async fn get_blocks(&self, limit: u64) -> StorageResult<Vec<Block>>;

    async fn get_block(&self, number: u64) -> StorageResult<Option<Block>>;

    /// Remove all indexed data, contracts and the checkpoint.
    async fn clear(&self) -> StorageResult<()>;
}
