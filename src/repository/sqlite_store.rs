use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, warn};

use super::block_repository::BlockRepository;
use super::contract_repository::ContractRepository;
use super::database::Database;
use super::event_repository::EventRepository;
use super::models::{
    BatchSummary, Block, BlockBatch, Contract, Event, EventFilter, EventPage, EventRecord,
    Pagination, Stats, Transaction, TransactionFilter,
};
use super::state_repository::StateRepository;
use super::transaction_repository::TransactionRepository;
use super::store::PersistenceStore;
use crate::error::StorageResult;

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// SQLite-backed [`PersistenceStore`].
///
/// rusqlite is blocking, so every operation runs on the blocking pool while
/// holding the connection lock.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    pub fn open(database_url: &str) -> StorageResult<Self> {
        Ok(Self::from_database(Database::new(database_url)?))
    }

    pub fn in_memory() -> StorageResult<Self> {
        Ok(Self::from_database(Database::in_memory()?))
    }

    pub fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let db = db.lock();
            f(&db.conn)
        })
        .await?
    }
}

fn write_batch_blocking(conn: &Connection, batch: &BlockBatch) -> StorageResult<BatchSummary> {
    let tx = conn.unchecked_transaction()?;
    let now = now_millis();
    let mut summary = BatchSummary::default();

    {
        let blocks = BlockRepository::new(&tx);
        for block in &batch.blocks {
            match blocks.insert(block, now) {
                Ok(inserted) => summary.blocks += inserted as usize,
                Err(e) => {
                    warn!("Failed to store block {}: {}", block.number, e);
                    summary.failed += 1;
                }
            }
        }

        let transactions = TransactionRepository::new(&tx);
        for transaction in &batch.transactions {
            match transactions.insert(transaction) {
                Ok(inserted) => summary.transactions += inserted as usize,
                Err(e) => {
                    warn!("Failed to store transaction {}: {}", transaction.hash, e);
                    summary.failed += 1;
                }
            }
        }

        let events = EventRepository::new(&tx);
        for event in &batch.events {
            match events.insert(event, now) {
                Ok(inserted) => summary.events += inserted as usize,
                Err(e) => {
                    warn!(
                        "Failed to store event {}#{}: {}",
                        event.transaction_hash, event.log_index, e
                    );
                    summary.failed += 1;
                }
            }
        }
    }

    tx.commit()?;
    Ok(summary)
}

#[async_trait]
impl PersistenceStore for SqliteStore {
    async fn upsert_block(&self, block: &Block) -> StorageResult<bool> {
        let block = block.clone();
        self.with_conn(move |conn| BlockRepository::new(conn).insert(&block, now_millis()))
            .await
    }

    async fn upsert_transaction(&self, transaction: &Transaction) -> StorageResult<bool> {
        let transaction = transaction.clone();
        self.with_conn(move |conn| TransactionRepository::new(conn).insert(&transaction))
            .await
    }

    async fn upsert_event(&self, event: &Event) -> StorageResult<bool> {
        let event = event.clone();
        self.with_conn(move |conn| EventRepository::new(conn).insert(&event, now_millis()))
            .await
    }

    async fn write_batch(&self, batch: &BlockBatch) -> StorageResult<BatchSummary> {
        if batch.is_empty() {
            return Ok(BatchSummary::default());
        }
        let batch = batch.clone();
        let summary = self
            .with_conn(move |conn| write_batch_blocking(conn, &batch))
            .await?;
        debug!(
            "Stored {} blocks, {} transactions, {} events",
            summary.blocks, summary.transactions, summary.events
        );
        Ok(summary)
    }

    async fn upsert_contract(&self, contract: &Contract) -> StorageResult<bool> {
        let contract = contract.clone();
        self.with_conn(move |conn| ContractRepository::new(conn).insert(&contract, now_millis()))
            .await
    }

    async fn delete_contract(&self, address: &str) -> StorageResult<bool> {
        let address = address.to_string();
        self.with_conn(move |conn| ContractRepository::new(conn).delete(&address))
            .await
    }

    async fn get_contracts(&self) -> StorageResult<Vec<Contract>> {
        self.with_conn(|conn| ContractRepository::new(conn).all())
            .await
    }

    async fn read_checkpoint(&self) -> StorageResult<Option<u64>> {
        self.with_conn(|conn| match StateRepository::new(conn).get_checkpoint()? {
            Some(checkpoint) => Ok(Some(checkpoint)),
            None => BlockRepository::new(conn).max_number(),
        })
        .await
    }

    async fn write_checkpoint(&self, block_number: u64) -> StorageResult<()> {
        self.with_conn(move |conn| StateRepository::new(conn).raise_checkpoint(block_number))
            .await
    }

    async fn get_stats(&self) -> StorageResult<Stats> {
        self.with_conn(|conn| {
            let blocks = BlockRepository::new(conn);
            Ok(Stats {
                total_events: EventRepository::new(conn).count()?,
                total_transactions: TransactionRepository::new(conn).count()?,
                total_blocks: blocks.count()?,
                monitored_contracts: ContractRepository::new(conn).count()?,
                latest_block: blocks.max_number()?,
                is_running: false,
            })
        })
        .await
    }

    async fn get_events(&self, filter: &EventFilter) -> StorageResult<Vec<EventRecord>> {
        let filter = filter.clone();
        self.with_conn(move |conn| EventRepository::new(conn).query(&filter))
            .await
    }

    async fn get_transactions(&self, filter: &TransactionFilter) -> StorageResult<Vec<Transaction>> {
        let filter = filter.clone();
        self.with_conn(move |conn| TransactionRepository::new(conn).query(&filter))
            .await
    }

    async fn get_all_events(&self, page: u64, page_size: u64) -> StorageResult<EventPage> {
        self.with_conn(move |conn| {
            let events = EventRepository::new(conn);
            let total = events.count_named()?;
            let pagination = Pagination::new(total, page, page_size);
            Ok(EventPage {
                events: events.page(pagination.page_size, pagination.offset())?,
                pagination,
            })
        })
        .await
    }

    async fn get_blocks(&self, limit: u64) -> StorageResult<Vec<Block>> {
        self.with_conn(move |conn| BlockRepository::new(conn).latest(limit))
            .await
    }

    async fn get_block(&self, number: u64) -> StorageResult<Option<Block>> {
        self.with_conn(move |conn| BlockRepository::new(conn).get(number))
            .await
    }

    async fn clear(&self) -> StorageResult<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            for table in ["events", "transactions", "blocks", "contracts", "indexer_state"] {
                tx.execute(&format!("DELETE FROM {table}"), [])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventArgs, EventValue};
    use rusqlite::params;

    fn block(number: u64) -> Block {
        Block {
            number,
            hash: format!("0x{number:064x}"),
            timestamp: 1_700_000_000 + number,
        }
    }

    fn transaction(hash: &str, block_number: u64, from: &str, to: Option<&str>) -> Transaction {
        Transaction {
            hash: hash.to_string(),
            block_number,
            from_address: from.to_string(),
            to_address: to.map(str::to_string),
            value: "1000000000000000000".to_string(),
            gas_used: 21_000,
            gas_price: "30000000000".to_string(),
            timestamp: 1_700_000_000,
            status: 1,
        }
    }

    fn event(block_number: u64, log_index: u64, name: &str) -> Event {
        let mut args = EventArgs::new();
        args.insert("amount", EventValue::BigInt("123456789012345678901234567890".into()));
        Event {
            contract_address: "0xabc".to_string(),
            event_name: name.to_string(),
            block_number,
            transaction_hash: format!("0xtx{block_number}"),
            log_index,
            args,
            timestamp: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_batch_write_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let batch = BlockBatch {
            blocks: vec![block(1), block(2)],
            transactions: vec![transaction("0xaa", 1, "0x01", Some("0x02"))],
            events: vec![event(1, 0, "Deposit"), event(2, 0, "Withdraw")],
        };

        let first = store.write_batch(&batch).await.unwrap();
        assert_eq!((first.blocks, first.transactions, first.events), (2, 1, 2));

        let second = store.write_batch(&batch).await.unwrap();
        assert_eq!(second, BatchSummary::default());

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_blocks, 2);
        assert_eq!(stats.total_transactions, 1);
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.latest_block, Some(2));
        assert!(!stats.is_running);
    }

    #[tokio::test]
    async fn test_checkpoint_falls_back_to_max_block_and_never_lowers() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.read_checkpoint().await.unwrap(), None);

        store.upsert_block(&block(40)).await.unwrap();
        assert_eq!(store.read_checkpoint().await.unwrap(), Some(40));

        store.write_checkpoint(55).await.unwrap();
        store.write_checkpoint(50).await.unwrap();
        assert_eq!(store.read_checkpoint().await.unwrap(), Some(55));
    }

    #[tokio::test]
    async fn test_event_args_round_trip_through_json() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_event(&event(9, 2, "Deposit")).await.unwrap();

        let events = store.get_events(&EventFilter::default()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].args.get("amount"),
            Some(&EventValue::String("123456789012345678901234567890".into()))
        );
    }

    #[tokio::test]
    async fn test_get_events_keeps_most_recent_duplicate() {
        let db = Database::in_memory().unwrap();
        // Simulate a legacy table without the identity constraint.
        db.conn.execute("DROP INDEX idx_events_identity", []).unwrap();
        for (name, inserted_at) in [("Old", 100_i64), ("New", 200_i64)] {
            db.conn
                .execute(
                    "INSERT INTO events (contract_address, event_name, block_number, transaction_hash, log_index, args, timestamp, inserted_at)
                     VALUES ('0xabc', ?1, 5, '0xtx', 0, '{}', 0, ?2)",
                    params![name, inserted_at],
                )
                .unwrap();
        }
        let store = SqliteStore::from_database(db);

        let events = store.get_events(&EventFilter::default()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name.as_deref(), Some("New"));
    }

    #[tokio::test]
    async fn test_opens_legacy_database_with_duplicate_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                "CREATE TABLE events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    contract_address TEXT NOT NULL,
                    event_name TEXT,
                    block_number INTEGER NOT NULL,
                    transaction_hash TEXT NOT NULL,
                    log_index INTEGER NOT NULL,
                    args TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    inserted_at INTEGER NOT NULL
                )",
                [],
            )
            .unwrap();
            for (name, inserted_at) in [("Old", 100_i64), ("New", 200_i64)] {
                conn.execute(
                    "INSERT INTO events (contract_address, event_name, block_number, transaction_hash, log_index, args, timestamp, inserted_at)
                     VALUES ('0xabc', ?1, 5, '0xtx', 0, '{}', 0, ?2)",
                    params![name, inserted_at],
                )
                .unwrap();
            }
        }

        let store = SqliteStore::open(path.to_str().unwrap()).unwrap();
        let events = store.get_events(&EventFilter::default()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name.as_deref(), Some("New"));
    }

    #[tokio::test]
    async fn test_event_filters_and_ordering() {
        let store = SqliteStore::in_memory().unwrap();
        let batch = BlockBatch {
            events: vec![
                event(10, 0, "Deposit"),
                event(10, 4, "Withdraw"),
                event(12, 1, "Deposit"),
                event(15, 0, "Deposit"),
            ],
            ..Default::default()
        };
        store.write_batch(&batch).await.unwrap();

        let events = store
            .get_events(&EventFilter {
                contract_address: Some("0xABC".into()),
                event_name: Some("Deposit".into()),
                from_block: Some(10),
                to_block: Some(12),
                ..Default::default()
            })
            .await
            .unwrap();
        let keys: Vec<_> = events.iter().map(|e| (e.block_number, e.log_index)).collect();
        assert_eq!(keys, [(12, 1), (10, 0)]);

        let limited = store
            .get_events(&EventFilter {
                limit: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        let keys: Vec<_> = limited.iter().map(|e| (e.block_number, e.log_index)).collect();
        assert_eq!(keys, [(15, 0), (12, 1)]);
    }

    #[tokio::test]
    async fn test_transactions_match_either_side_case_insensitively() {
        let store = SqliteStore::in_memory().unwrap();
        let batch = BlockBatch {
            transactions: vec![
                transaction("0x01", 1, "0xAAAA", Some("0xbbbb")),
                transaction("0x02", 2, "0xcccc", Some("0xAaAa")),
                transaction("0x03", 3, "0xcccc", None),
            ],
            ..Default::default()
        };
        store.write_batch(&batch).await.unwrap();

        let txs = store
            .get_transactions(&TransactionFilter {
                address: Some("0xaaaa".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let hashes: Vec<_> = txs.iter().map(|t| t.hash.as_str()).collect();
        assert_eq!(hashes, ["0x02", "0x01"]);

        let ranged = store
            .get_transactions(&TransactionFilter {
                from_block: Some(2),
                to_block: Some(3),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(ranged.len(), 2);
        assert_eq!(ranged[0].to_address, None);
    }

    #[tokio::test]
    async fn test_all_events_pages_cover_everything_once() {
        let store = SqliteStore::in_memory().unwrap();
        let events: Vec<_> = (0..7).map(|i| event(100 + i / 2, i % 2, "Deposit")).collect();
        store
            .write_batch(&BlockBatch {
                events,
                ..Default::default()
            })
            .await
            .unwrap();

        let first = store.get_all_events(1, 3).await.unwrap();
        assert_eq!(first.pagination.total, 7);
        assert_eq!(first.pagination.total_pages, 3);

        let mut seen = Vec::new();
        for page in 1..=first.pagination.total_pages {
            let page = store.get_all_events(page, 3).await.unwrap();
            seen.extend(page.events.into_iter().map(|e| (e.block_number, e.log_index)));
        }
        let mut expected: Vec<_> = (0..7).map(|i| (100 + i / 2, i % 2)).collect();
        expected.sort_by(|a, b| b.cmp(a));
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_contracts_and_clear() {
        let store = SqliteStore::in_memory().unwrap();
        let contract = Contract {
            address: "0xABC".into(),
            name: "LendBit".into(),
            abi: serde_json::json!([]),
        };
        assert!(store.upsert_contract(&contract).await.unwrap());
        assert!(!store.upsert_contract(&contract).await.unwrap());
        assert_eq!(store.get_contracts().await.unwrap()[0].address, "0xabc");

        store.upsert_block(&block(3)).await.unwrap();
        store.write_checkpoint(3).await.unwrap();
        store.clear().await.unwrap();

        assert!(store.get_contracts().await.unwrap().is_empty());
        assert_eq!(store.read_checkpoint().await.unwrap(), None);
        assert!(store.get_block(3).await.unwrap().is_none());
        assert!(!store.delete_contract("0xabc").await.unwrap());
    }
}
