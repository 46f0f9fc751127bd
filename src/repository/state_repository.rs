use rusqlite::{Connection, OptionalExtension, params};

use crate::error::StorageResult;

/// Scalar indexer state: the explicit checkpoint.
pub struct StateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> StateRepository<'a> {
    const UPSERT_CHECKPOINT: &'static str = "INSERT INTO indexer_state (id, checkpoint) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET checkpoint = MAX(checkpoint, excluded.checkpoint)";

    const GET_CHECKPOINT: &'static str = "SELECT checkpoint FROM indexer_state WHERE id = 1";

    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get_checkpoint(&self) -> StorageResult<Option<u64>> {
        let checkpoint = self
            .conn
            .query_row(Self::GET_CHECKPOINT, [], |row| row.get(0))
            .optional()?;
        Ok(checkpoint)
    }

    pub fn raise_checkpoint(&self, block_number: u64) -> StorageResult<()> {
        self.conn
            .execute(Self::UPSERT_CHECKPOINT, params![block_number])?;
        Ok(())
    }
}
