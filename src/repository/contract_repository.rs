use rusqlite::{Connection, Row, params};

use super::models::Contract;
use crate::error::{StorageError, StorageResult};

pub struct ContractRepository<'a> {
    conn: &'a Connection,
}

impl<'a> ContractRepository<'a> {
    const INSERT_CONTRACT: &'static str =
        "INSERT OR IGNORE INTO contracts (address, name, abi, created_at)
         VALUES (?1, ?2, ?3, ?4)";

    const DELETE_CONTRACT: &'static str = "DELETE FROM contracts WHERE address = ?1";

    const SELECT_CONTRACTS: &'static str =
        "SELECT address, name, abi FROM contracts ORDER BY created_at ASC, address ASC";

    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, contract: &Contract, created_at: i64) -> StorageResult<bool> {
        let abi = serde_json::to_string(&contract.abi)?;
        let inserted = self.conn.execute(
            Self::INSERT_CONTRACT,
            params![contract.address.to_lowercase(), contract.name, abi, created_at],
        )?;
        Ok(inserted > 0)
    }

    pub fn delete(&self, address: &str) -> StorageResult<bool> {
        let deleted = self
            .conn
            .execute(Self::DELETE_CONTRACT, params![address.to_lowercase()])?;
        Ok(deleted > 0)
    }

    pub fn all(&self) -> StorageResult<Vec<Contract>> {
        let mut stmt = self.conn.prepare(Self::SELECT_CONTRACTS)?;
        let rows = stmt
            .query_map([], Self::row_to_parts)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(address, name, abi)| {
                let abi = serde_json::from_str(&abi).map_err(|e| {
                    StorageError::Serialization(format!("contract {address} abi: {e}"))
                })?;
                Ok(Contract { address, name, abi })
            })
            .collect()
    }

    pub fn count(&self) -> StorageResult<u64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM contracts", [], |row| row.get(0))?;
        Ok(count)
    }

    fn row_to_parts(row: &Row) -> rusqlite::Result<(String, String, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    }
}
