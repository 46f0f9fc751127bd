use rusqlite::{Connection, Row, ToSql, params, params_from_iter};

use super::models::{Transaction, TransactionFilter};
use crate::error::StorageResult;

pub struct TransactionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> TransactionRepository<'a> {
    const INSERT_TRANSACTION: &'static str = "INSERT OR IGNORE INTO transactions (
            hash, block_number, from_address, to_address,
            value, gas_used, gas_price, timestamp, status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

    const SELECT_TRANSACTION: &'static str = "SELECT hash, block_number, from_address, to_address, value, gas_used, gas_price, timestamp, status FROM transactions";

    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, transaction: &Transaction) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            Self::INSERT_TRANSACTION,
            params![
                transaction.hash,
                transaction.block_number,
                transaction.from_address.to_lowercase(),
                transaction.to_address.as_ref().map(|to| to.to_lowercase()),
                transaction.value,
                transaction.gas_used,
                transaction.gas_price,
                transaction.timestamp,
                transaction.status,
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn query(&self, filter: &TransactionFilter) -> StorageResult<Vec<Transaction>> {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(from_block) = filter.from_block {
            conditions.push("block_number >= ?");
            params.push(Box::new(from_block));
        }

        if let Some(to_block) = filter.to_block {
            conditions.push("block_number <= ?");
            params.push(Box::new(to_block));
        }

        if let Some(address) = filter.normalized_address() {
            conditions.push("(LOWER(from_address) = ? OR LOWER(to_address) = ?)");
            params.push(Box::new(address.clone()));
            params.push(Box::new(address));
        }

        let mut query = Self::SELECT_TRANSACTION.to_string();
        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }
        query.push_str(&format!(" ORDER BY block_number DESC, hash ASC LIMIT {}", filter.limit));

        let mut stmt = self.conn.prepare(&query)?;
        let transactions = stmt
            .query_map(params_from_iter(params), Self::row_to_transaction)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    pub fn count(&self) -> StorageResult<u64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count)
    }

    fn row_to_transaction(row: &Row) -> rusqlite::Result<Transaction> {
        Ok(Transaction {
            hash: row.get(0)?,
            block_number: row.get(1)?,
            from_address: row.get(2)?,
            to_address: row.get(3)?,
            value: row.get(4)?,
            gas_used: row.get(5)?,
            gas_price: row.get(6)?,
            timestamp: row.get(7)?,
            status: row.get(8)?,
        })
    }
}
