//! Port trait for the upstream blockchain data provider.
//!
//! The indexer only talks to the chain through [`ChainSource`]. The JSON-RPC
//! implementation lives in [`crate::rpc`]; tests use scripted stubs.

use std::pin::Pin;

use alloy_primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use futures::Stream;

use crate::error::ChainResult;

/// Block header data plus the ordered list of its transaction hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    pub number: u64,
    pub hash: B256,
    /// Unix seconds.
    pub timestamp: u64,
    pub transactions: Vec<B256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub hash: B256,
    pub block_number: Option<u64>,
    pub from: Address,
    /// `None` for contract creations.
    pub to: Option<Address>,
    pub value: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReceipt {
    pub gas_used: u64,
    pub effective_gas_price: u128,
    pub status: bool,
}

/// A log exactly as the provider returned it, before ABI decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
    pub log_index: Option<u64>,
}

/// Stream of newly announced block numbers.
///
/// Delivery is at-least-once: the same number may be yielded more than once.
pub type NewBlockStream = Pin<Box<dyn Stream<Item = u64> + Send>>;

#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn current_block_number(&self) -> ChainResult<u64>;

    /// Absent blocks are reported as [`crate::error::ChainError::NotFound`].
    async fn get_block(&self, number: u64) -> ChainResult<RawBlock>;

    async fn get_transaction(&self, hash: B256) -> ChainResult<RawTransaction>;

    async fn get_transaction_receipt(&self, hash: B256) -> ChainResult<RawReceipt>;

    /// Logs emitted by `address` in `[from_block, to_block]`, in chain order.
    async fn get_logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> ChainResult<Vec<RawLog>>;

    /// Start push-style delivery of every block number above `after`.
    async fn subscribe_new_blocks(&self, after: u64) -> ChainResult<NewBlockStream>;

    /// Stop any notification delivery started by [`Self::subscribe_new_blocks`].
    async fn unsubscribe(&self);
}
