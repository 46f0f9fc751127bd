use serde::{Deserialize, Serialize};

use crate::events::EventArgs;

pub const DEFAULT_LIMIT: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub number: u64,
    pub hash: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub block_number: u64,
    pub from_address: String,
    pub to_address: Option<String>,
    /// Wei, decimal string.
    pub value: String,
    pub gas_used: u64,
    /// Effective gas price in wei, decimal string.
    pub gas_price: String,
    pub timestamp: u64,
    pub status: u8,
}

/// A decoded event as produced by the decoder, before storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub contract_address: String,
    pub event_name: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u64,
    pub args: EventArgs,
    pub timestamp: u64,
}

/// A stored event row.
///
/// `event_name` is `None` for legacy rows whose name failed to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: i64,
    pub contract_address: String,
    pub event_name: Option<String>,
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u64,
    pub args: EventArgs,
    pub timestamp: u64,
    /// Unix milliseconds.
    pub inserted_at: i64,
}

impl EventRecord {
    pub fn from_event(event: &Event, id: i64, inserted_at: i64) -> Self {
        Self {
            id,
            contract_address: event.contract_address.clone(),
            event_name: Some(event.event_name.clone()),
            block_number: event.block_number,
            transaction_hash: event.transaction_hash.clone(),
            log_index: event.log_index,
            args: event.args.clone(),
            timestamp: event.timestamp,
            inserted_at,
        }
    }

    /// `(contract_address, transaction_hash, log_index)`.
    pub fn identity(&self) -> (&str, &str, u64) {
        (&self.contract_address, &self.transaction_hash, self.log_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub address: String,
    pub name: String,
    pub abi: serde_json::Value,
}

/// Everything fetched for one block or one backfill range, written together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockBatch {
    pub blocks: Vec<Block>,
    pub transactions: Vec<Transaction>,
    pub events: Vec<Event>,
}

impl BlockBatch {
    pub fn extend(&mut self, other: BlockBatch) {
        self.blocks.extend(other.blocks);
        self.transactions.extend(other.transactions);
        self.events.extend(other.events);
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.transactions.is_empty() && self.events.is_empty()
    }
}

/// Rows actually inserted by a batch write. Duplicates are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub blocks: usize,
    pub transactions: usize,
    pub events: usize,
    /// Rows that failed for reasons other than a key conflict.
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_events: u64,
    pub total_transactions: u64,
    pub total_blocks: u64,
    pub monitored_contracts: u64,
    pub latest_block: Option<u64>,
    pub is_running: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub contract_address: Option<String>,
    pub event_name: Option<String>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub limit: u64,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            contract_address: None,
            event_name: None,
            from_block: None,
            to_block: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl EventFilter {
    pub fn normalized_address(&self) -> Option<String> {
        self.contract_address
            .as_ref()
            .map(|address| address.trim().to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionFilter {
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    /// Matches sender or recipient, case-insensitively.
    pub address: Option<String>,
    pub limit: u64,
}

impl Default for TransactionFilter {
    fn default() -> Self {
        Self {
            from_block: None,
            to_block: None,
            address: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl TransactionFilter {
    pub fn normalized_address(&self) -> Option<String> {
        self.address.as_ref().map(|address| address.trim().to_lowercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

impl Pagination {
    /// Page numbers start at 1; zero page or page size are clamped to 1.
    pub fn new(total: u64, page: u64, page_size: u64) -> Self {
        let page = page.max(1);
        let page_size = page_size.max(1);
        Self {
            total,
            page,
            page_size,
            total_pages: total.div_ceil(page_size),
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventPage {
    pub events: Vec<EventRecord>,
    pub pagination: Pagination,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_total_pages_rounds_up() {
        assert_eq!(Pagination::new(0, 1, 100).total_pages, 0);
        assert_eq!(Pagination::new(100, 1, 100).total_pages, 1);
        assert_eq!(Pagination::new(101, 1, 100).total_pages, 2);
        assert_eq!(Pagination::new(7, 3, 3).offset(), 6);
    }

    #[test]
    fn test_pagination_clamps_zero_inputs() {
        let pagination = Pagination::new(5, 0, 0);
        assert_eq!(pagination.page, 1);
        assert_eq!(pagination.page_size, 1);
        assert_eq!(pagination.total_pages, 5);
        assert_eq!(pagination.offset(), 0);
    }

    #[test]
    fn test_filters_default_to_hundred_rows() {
        assert_eq!(EventFilter::default().limit, 100);
        assert_eq!(TransactionFilter::default().limit, 100);
    }
}
