//! Error types for the indexing pipeline.
//!
//! - [`ChainError`] - upstream RPC failures, classified for retry decisions
//! - [`DecodeError`] - a single log or ABI that could not be interpreted
//! - [`StorageError`] - persistence backend failures
//! - [`IndexerError`] - top-level orchestration errors
//!
//! Unique-key conflicts are deliberately absent: the store treats them as
//! successful no-ops.

use thiserror::Error;

// =============================================================================
// Chain Errors
// =============================================================================

/// Failures reported by a [`crate::chain::ChainSource`].
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// Block, transaction or receipt does not exist upstream.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The provider throttled the request.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Generic RPC failure that may succeed on retry.
    #[error("RPC error: {0}")]
    Transient(String),

    /// The request did not complete in time.
    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    /// The provider answered with data we cannot use.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ChainError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ChainError::RateLimited(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ChainError::NotFound(_))
    }

    /// Everything except a missing item is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !self.is_not_found()
    }
}

// =============================================================================
// Decode Errors
// =============================================================================

/// A log or ABI descriptor that could not be decoded.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The log's first topic matched a known signature but the payload did not fit.
    #[error("Malformed log for {event}: {message}")]
    Malformed { event: String, message: String },

    /// The ABI descriptor could not be parsed.
    #[error("Invalid ABI for {address}: {message}")]
    InvalidAbi { address: String, message: String },

    /// The address is not a valid 20-byte hex address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Persistence backend errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be opened. Fatal at startup.
    #[error("Database connection error: {0}")]
    Connection(String),

    /// Query or statement execution failed.
    #[error("Query execution error: {0}")]
    Query(String),

    /// Stored data could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The blocking storage task panicked or was cancelled.
    #[error("Storage task failed: {0}")]
    TaskJoin(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::TaskJoin(err.to_string())
    }
}

// =============================================================================
// Indexer Errors
// =============================================================================

/// Top-level error returned by [`crate::indexer::Indexer`] operations.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IndexerError {
    /// Whether the per-block retry wrapper should try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            IndexerError::Chain(e) => e.is_retryable(),
            IndexerError::Decode(_) => false,
            IndexerError::Storage(StorageError::Serialization(_)) => false,
            IndexerError::Storage(_) => true,
        }
    }
}

pub type ChainResult<T> = Result<T, ChainError>;
pub type DecodeResult<T> = Result<T, DecodeError>;
pub type StorageResult<T> = Result<T, StorageError>;
pub type IndexerResult<T> = Result<T, IndexerError>;
