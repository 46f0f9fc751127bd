use rusqlite::{Connection, Row, ToSql, params, params_from_iter};

use super::models::{Event, EventFilter, EventRecord};
use crate::error::{StorageError, StorageResult};
use crate::events::EventArgs;

pub struct EventRepository<'a> {
    conn: &'a Connection,
}

impl<'a> EventRepository<'a> {
    const INSERT_EVENT: &'static str = "INSERT OR IGNORE INTO events (
            contract_address, event_name, block_number, transaction_hash,
            log_index, args, timestamp, inserted_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

    // One row per (contract_address, transaction_hash, log_index): the most
    // recently inserted. Filters apply after deduplication.
    const SELECT_LATEST_EVENTS: &'static str = "SELECT id, contract_address, event_name, block_number, transaction_hash, log_index, args, timestamp, inserted_at FROM (
            SELECT *, ROW_NUMBER() OVER (
                PARTITION BY contract_address, transaction_hash, log_index
                ORDER BY inserted_at DESC, id DESC
            ) AS row_rank
            FROM events
        ) WHERE row_rank = 1";

    const ORDER_BY: &'static str = " ORDER BY block_number DESC, log_index DESC, id DESC";

    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, event: &Event, inserted_at: i64) -> StorageResult<bool> {
        let args = serde_json::to_string(&event.args)?;
        let inserted = self.conn.execute(
            Self::INSERT_EVENT,
            params![
                event.contract_address.to_lowercase(),
                event.event_name,
                event.block_number,
                event.transaction_hash,
                event.log_index,
                args,
                event.timestamp,
                inserted_at,
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn query(&self, filter: &EventFilter) -> StorageResult<Vec<EventRecord>> {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(address) = filter.normalized_address() {
            conditions.push("contract_address = ?");
            params.push(Box::new(address));
        }

        if let Some(name) = &filter.event_name {
            conditions.push("event_name = ?");
            params.push(Box::new(name.clone()));
        }

        if let Some(from_block) = filter.from_block {
            conditions.push("block_number >= ?");
            params.push(Box::new(from_block));
        }

        if let Some(to_block) = filter.to_block {
            conditions.push("block_number <= ?");
            params.push(Box::new(to_block));
        }

        let mut query = Self::SELECT_LATEST_EVENTS.to_string();
        for condition in &conditions {
            query.push_str(" AND ");
            query.push_str(condition);
        }
        query.push_str(Self::ORDER_BY);
        query.push_str(&format!(" LIMIT {}", filter.limit));

        self.collect(&query, params)
    }

    /// Events with a non-null name, deduplicated, in page order.
    pub fn page(&self, limit: u64, offset: u64) -> StorageResult<Vec<EventRecord>> {
        let query = format!(
            "{} AND event_name IS NOT NULL{} LIMIT {limit} OFFSET {offset}",
            Self::SELECT_LATEST_EVENTS,
            Self::ORDER_BY
        );
        self.collect(&query, Vec::new())
    }

    pub fn count_named(&self) -> StorageResult<u64> {
        let count = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM ({} AND event_name IS NOT NULL)",
                Self::SELECT_LATEST_EVENTS
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count(&self) -> StorageResult<u64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count)
    }

    fn collect(&self, query: &str, params: Vec<Box<dyn ToSql>>) -> StorageResult<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(query)?;
        let rows = stmt
            .query_map(params_from_iter(params), Self::row_to_raw)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawEventRow::into_record).collect()
    }

    fn row_to_raw(row: &Row) -> rusqlite::Result<RawEventRow> {
        Ok(RawEventRow {
            id: row.get(0)?,
            contract_address: row.get(1)?,
            event_name: row.get(2)?,
            block_number: row.get(3)?,
            transaction_hash: row.get(4)?,
            log_index: row.get(5)?,
            args: row.get(6)?,
            timestamp: row.get(7)?,
            inserted_at: row.get(8)?,
        })
    }
}

struct RawEventRow {
    id: i64,
    contract_address: String,
    event_name: Option<String>,
    block_number: u64,
    transaction_hash: String,
    log_index: u64,
    args: String,
    timestamp: u64,
    inserted_at: i64,
}

impl RawEventRow {
    fn into_record(self) -> StorageResult<EventRecord> {
        let args: EventArgs = serde_json::from_str(&self.args).map_err(|e| {
            StorageError::Serialization(format!("event {} args: {e}", self.id))
        })?;
        Ok(EventRecord {
            id: self.id,
            contract_address: self.contract_address,
            event_name: self.event_name,
            block_number: self.block_number,
            transaction_hash: self.transaction_hash,
            log_index: self.log_index,
            args,
            timestamp: self.timestamp,
            inserted_at: self.inserted_at,
        })
    }
}
