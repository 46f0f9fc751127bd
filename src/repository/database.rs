use rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

pub struct Database {
    pub conn: Connection,
}

impl Database {
    /// Open (or create) the database at `db_path` and bring the schema up to date.
    /// An optional `sqlite:` prefix is accepted.
    pub fn new(db_path: &str) -> StorageResult<Self> {
        let db_path = db_path.strip_prefix("sqlite:").unwrap_or(db_path);
        let conn = Connection::open(db_path)
            .map_err(|e| StorageError::Connection(format!("{db_path}: {e}")))?;

        let db = Database { conn };
        db.create_tables()?;
        debug!("Database schema ready at {}", db_path);
        Ok(db)
    }

    pub fn in_memory() -> StorageResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| StorageError::Connection(e.to_string()))?;
        let db = Database { conn };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> StorageResult<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                number INTEGER PRIMARY KEY,
                hash TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                processed_at INTEGER NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS transactions (
                hash TEXT PRIMARY KEY,
                block_number INTEGER NOT NULL,
                from_address TEXT NOT NULL,
                to_address TEXT,
                value TEXT NOT NULL,
                gas_used INTEGER NOT NULL,
                gas_price TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                status INTEGER NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS contracts (
                address TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                abi TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        // event_name is nullable: legacy rows may carry an undecoded name
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS events (
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
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS indexer_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                checkpoint INTEGER NOT NULL
            )",
            [],
        )?;

        // Fails on tables that already hold duplicate events; those are
        // collapsed at read time instead.
        if let Err(e) = self.conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_events_identity
             ON events(contract_address, transaction_hash, log_index)",
            [],
        ) {
            warn!("Events table holds duplicate rows, keeping them: {}", e);
            self.conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_events_key
                 ON events(contract_address, transaction_hash, log_index)",
                [],
            )?;
        }

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_block
             ON events(block_number, log_index)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_name
             ON events(event_name)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_block
             ON transactions(block_number)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_from
             ON transactions(from_address)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_to
             ON transactions(to_address)",
            [],
        )?;

        Ok(())
    }
}
