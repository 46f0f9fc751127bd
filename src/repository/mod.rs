pub mod block_repository;
pub mod contract_repository;
pub mod database;
pub mod event_repository;
pub mod memory_store;
pub mod models;
pub mod sqlite_store;
pub mod state_repository;
pub mod store;
pub mod transaction_repository;

pub use block_repository::BlockRepository;
pub use contract_repository::ContractRepository;
pub use database::Database;
pub use event_repository::EventRepository;
pub use memory_store::MemoryStore;
pub use models::{
    BatchSummary, Block, BlockBatch, Contract, DEFAULT_LIMIT, Event, EventFilter, EventPage,
    EventRecord, Pagination, Stats, Transaction, TransactionFilter,
};
pub use sqlite_store::SqliteStore;
pub use state_repository::StateRepository;
pub use store::PersistenceStore;
pub use transaction_repository::TransactionRepository;
