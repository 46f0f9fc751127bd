pub mod chain;
pub mod config;
pub mod emitter;
pub mod error;
pub mod events;
pub mod indexer;
pub mod query;
pub mod registry;
pub mod repository;
pub mod rpc;

pub use chain::ChainSource;
pub use emitter::{IndexerEvent, ProgressEmitter};
pub use error::{ChainError, DecodeError, IndexerError, StorageError};
pub use indexer::{Indexer, IndexerConfig, IndexerState};
pub use registry::ContractRegistry;
pub use repository::{MemoryStore, PersistenceStore, SqliteStore};
