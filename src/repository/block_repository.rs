use rusqlite::{Connection, OptionalExtension, Row, params};

use super::models::Block;
use crate::error::StorageResult;

pub struct BlockRepository<'a> {
    conn: &'a Connection,
}

impl<'a> BlockRepository<'a> {
    const INSERT_BLOCK: &'static str =
        "INSERT OR IGNORE INTO blocks (number, hash, timestamp, processed_at)
         VALUES (?1, ?2, ?3, ?4)";

    const SELECT_BLOCK: &'static str = "SELECT number, hash, timestamp FROM blocks";

    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, block: &Block, processed_at: i64) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            Self::INSERT_BLOCK,
            params![block.number, block.hash, block.timestamp, processed_at],
        )?;
        Ok(inserted > 0)
    }

    pub fn get(&self, number: u64) -> StorageResult<Option<Block>> {
        let block = self
            .conn
            .query_row(
                &format!("{} WHERE number = ?1", Self::SELECT_BLOCK),
                params![number],
                Self::row_to_block,
            )
            .optional()?;
        Ok(block)
    }

    pub fn latest(&self, limit: u64) -> StorageResult<Vec<Block>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY number DESC LIMIT ?1", Self::SELECT_BLOCK))?;
        let blocks = stmt
            .query_map(params![limit], Self::row_to_block)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(blocks)
    }

    pub fn count(&self) -> StorageResult<u64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn max_number(&self) -> StorageResult<Option<u64>> {
        let max = self
            .conn
            .query_row("SELECT MAX(number) FROM blocks", [], |row| row.get(0))?;
        Ok(max)
    }

    fn row_to_block(row: &Row) -> rusqlite::Result<Block> {
        Ok(Block {
            number: row.get(0)?,
            hash: row.get(1)?,
            timestamp: row.get(2)?,
        })
    }
}
