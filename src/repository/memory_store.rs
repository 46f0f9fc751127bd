use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::models::{
    BatchSummary, Block, BlockBatch, Contract, Event, EventFilter, EventPage, EventRecord,
    Pagination, Stats, Transaction, TransactionFilter,
};
use super::sqlite_store::now_millis;
use super::store::PersistenceStore;
use crate::error::StorageResult;

#[derive(Default)]
struct MemoryState {
    blocks: BTreeMap<u64, Block>,
    transactions: HashMap<String, Transaction>,
    events: Vec<EventRecord>,
    /// `(contract_address, transaction_hash, log_index)` of every stored event.
    event_keys: HashSet<(String, String, u64)>,
    contracts: BTreeMap<String, Contract>,
    checkpoint: Option<u64>,
    next_id: i64,
    last_inserted_at: i64,
}

impl MemoryState {
    /// Strictly increasing insertion clock, so recency is never ambiguous.
    fn tick(&mut self) -> (i64, i64) {
        self.next_id += 1;
        self.last_inserted_at = now_millis().max(self.last_inserted_at + 1);
        (self.next_id, self.last_inserted_at)
    }

    fn insert_block(&mut self, block: &Block) -> bool {
        if self.blocks.contains_key(&block.number) {
            return false;
        }
        self.blocks.insert(block.number, block.clone());
        true
    }

    fn insert_transaction(&mut self, transaction: &Transaction) -> bool {
        if self.transactions.contains_key(&transaction.hash) {
            return false;
        }
        let mut transaction = transaction.clone();
        transaction.from_address = transaction.from_address.to_lowercase();
        transaction.to_address = transaction.to_address.map(|to| to.to_lowercase());
        self.transactions.insert(transaction.hash.clone(), transaction);
        true
    }

    fn insert_event(&mut self, event: &Event) -> bool {
        let key = (
            event.contract_address.to_lowercase(),
            event.transaction_hash.clone(),
            event.log_index,
        );
        let address = key.0.clone();
        if !self.event_keys.insert(key) {
            return false;
        }
        let (id, inserted_at) = self.tick();
        let mut record = EventRecord::from_event(event, id, inserted_at);
        record.contract_address = address;
        self.events.push(record);
        true
    }

    /// Most recently inserted row per event key, newest block first.
    fn latest_events(&self) -> Vec<&EventRecord> {
        let mut latest: HashMap<(&str, &str, u64), &EventRecord> = HashMap::new();
        for record in &self.events {
            latest
                .entry(record.identity())
                .and_modify(|current| {
                    if (record.inserted_at, record.id) > (current.inserted_at, current.id) {
                        *current = record;
                    }
                })
                .or_insert(record);
        }
        let mut events: Vec<_> = latest.into_values().collect();
        events.sort_by(|a, b| {
            (b.block_number, b.log_index, b.id).cmp(&(a.block_number, a.log_index, a.id))
        });
        events
    }
}

/// In-process [`PersistenceStore`] with the same idempotency and query
/// semantics as the SQLite backend.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row without the identity check, the way legacy writers did.
    /// Returns the assigned id.
    pub fn insert_unchecked(&self, mut record: EventRecord) -> i64 {
        let mut state = self.state.lock();
        let (id, inserted_at) = state.tick();
        record.id = id;
        record.inserted_at = inserted_at;
        state.event_keys.insert((
            record.contract_address.clone(),
            record.transaction_hash.clone(),
            record.log_index,
        ));
        state.events.push(record);
        id
    }

    /// Number of stored event rows, duplicates included.
    pub fn raw_event_count(&self) -> usize {
        self.state.lock().events.len()
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn upsert_block(&self, block: &Block) -> StorageResult<bool> {
        Ok(self.state.lock().insert_block(block))
    }

    async fn upsert_transaction(&self, transaction: &Transaction) -> StorageResult<bool> {
        Ok(self.state.lock().insert_transaction(transaction))
    }

    async fn upsert_event(&self, event: &Event) -> StorageResult<bool> {
        Ok(self.state.lock().insert_event(event))
    }

    async fn write_batch(&self, batch: &BlockBatch) -> StorageResult<BatchSummary> {
        let mut state = self.state.lock();
        let mut summary = BatchSummary::default();
        for block in &batch.blocks {
            summary.blocks += state.insert_block(block) as usize;
        }
        for transaction in &batch.transactions {
            summary.transactions += state.insert_transaction(transaction) as usize;
        }
        for event in &batch.events {
            summary.events += state.insert_event(event) as usize;
        }
        Ok(summary)
    }

    async fn upsert_contract(&self, contract: &Contract) -> StorageResult<bool> {
        let mut state = self.state.lock();
        let address = contract.address.to_lowercase();
        if state.contracts.contains_key(&address) {
            return Ok(false);
        }
        let mut contract = contract.clone();
        contract.address = address.clone();
        state.contracts.insert(address, contract);
        Ok(true)
    }

    async fn delete_contract(&self, address: &str) -> StorageResult<bool> {
        Ok(self
            .state
            .lock()
            .contracts
            .remove(&address.to_lowercase())
            .is_some())
    }

    async fn get_contracts(&self) -> StorageResult<Vec<Contract>> {
        Ok(self.state.lock().contracts.values().cloned().collect())
    }

    async fn read_checkpoint(&self) -> StorageResult<Option<u64>> {
        let state = self.state.lock();
        Ok(state
            .checkpoint
            .or_else(|| state.blocks.keys().next_back().copied()))
    }

    async fn write_checkpoint(&self, block_number: u64) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.checkpoint = Some(state.checkpoint.map_or(block_number, |c| c.max(block_number)));
        Ok(())
    }

    async fn get_stats(&self) -> StorageResult<Stats> {
        let state = self.state.lock();
        Ok(Stats {
            total_events: state.events.len() as u64,
            total_transactions: state.transactions.len() as u64,
            total_blocks: state.blocks.len() as u64,
            monitored_contracts: state.contracts.len() as u64,
            latest_block: state.blocks.keys().next_back().copied(),
            is_running: false,
        })
    }

    async fn get_events(&self, filter: &EventFilter) -> StorageResult<Vec<EventRecord>> {
        let address = filter.normalized_address();
        let state = self.state.lock();
        Ok(state
            .latest_events()
            .into_iter()
            .filter(|e| address.as_ref().is_none_or(|a| &e.contract_address == a))
            .filter(|e| {
                filter
                    .event_name
                    .as_ref()
                    .is_none_or(|name| e.event_name.as_ref() == Some(name))
            })
            .filter(|e| filter.from_block.is_none_or(|from| e.block_number >= from))
            .filter(|e| filter.to_block.is_none_or(|to| e.block_number <= to))
            .take(filter.limit as usize)
            .cloned()
            .collect())
    }

    async fn get_transactions(&self, filter: &TransactionFilter) -> StorageResult<Vec<Transaction>> {
        let address = filter.normalized_address();
        let state = self.state.lock();
        let mut transactions: Vec<_> = state
            .transactions
            .values()
            .filter(|t| filter.from_block.is_none_or(|from| t.block_number >= from))
            .filter(|t| filter.to_block.is_none_or(|to| t.block_number <= to))
            .filter(|t| {
                address.as_ref().is_none_or(|a| {
                    &t.from_address == a || t.to_address.as_ref() == Some(a)
                })
            })
            .cloned()
            .collect();
        transactions.sort_by(|a, b| {
            b.block_number
                .cmp(&a.block_number)
                .then_with(|| a.hash.cmp(&b.hash))
        });
        transactions.truncate(filter.limit as usize);
        Ok(transactions)
    }

    async fn get_all_events(&self, page: u64, page_size: u64) -> StorageResult<EventPage> {
        let state = self.state.lock();
        let named: Vec<_> = state
            .latest_events()
            .into_iter()
            .filter(|e| e.event_name.is_some())
            .collect();
        let pagination = Pagination::new(named.len() as u64, page, page_size);
        let events = named
            .into_iter()
            .skip(pagination.offset() as usize)
            .take(pagination.page_size as usize)
            .cloned()
            .collect();
        Ok(EventPage { events, pagination })
    }

    async fn get_blocks(&self, limit: u64) -> StorageResult<Vec<Block>> {
        Ok(self
            .state
            .lock()
            .blocks
            .values()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_block(&self, number: u64) -> StorageResult<Option<Block>> {
        Ok(self.state.lock().blocks.get(&number).cloned())
    }

    async fn clear(&self) -> StorageResult<()> {
        *self.state.lock() = MemoryState::default();
        Ok(())
    }
}
