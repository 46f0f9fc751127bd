use crate::events::parse_address;
use crate::query::formatters::{
    OutputFormat, format_blocks, format_contracts, format_event_page, format_events, format_stats,
    format_transactions,
};
use crate::repository::{DEFAULT_LIMIT, EventFilter, PersistenceStore, TransactionFilter};
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct EventQuery {
    pub contract: Option<String>,
    pub event: Option<String>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub limit: u64,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            contract: None,
            event: None,
            from_block: None,
            to_block: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransactionQuery {
    pub address: Option<String>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub limit: u64,
}

impl Default for TransactionQuery {
    fn default() -> Self {
        Self {
            address: None,
            from_block: None,
            to_block: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

fn validate_address(address: Option<String>) -> Result<Option<String>> {
    address
        .map(|addr| {
            parse_address(&addr)
                .map(|_| addr.trim().to_lowercase())
                .map_err(|_| anyhow::anyhow!("Invalid address format: {}", addr))
        })
        .transpose()
}

fn validate_range(from_block: Option<u64>, to_block: Option<u64>) -> Result<()> {
    if let (Some(from), Some(to)) = (from_block, to_block) {
        if from > to {
            return Err(anyhow::anyhow!(
                "--from-block ({}) must not be greater than --to-block ({})",
                from,
                to
            ));
        }
    }
    Ok(())
}

pub async fn cmd_stats(store: &dyn PersistenceStore, format: &OutputFormat) -> Result<String> {
    let stats = store.get_stats().await?;
    Ok(format_stats(&stats, format))
}

pub async fn cmd_events(
    store: &dyn PersistenceStore,
    query: EventQuery,
    format: &OutputFormat,
) -> Result<String> {
    validate_range(query.from_block, query.to_block)?;
    let filter = EventFilter {
        contract_address: validate_address(query.contract)?,
        event_name: query.event,
        from_block: query.from_block,
        to_block: query.to_block,
        limit: query.limit,
    };

    let events = store.get_events(&filter).await?;
    Ok(format_events(&events, format))
}

pub async fn cmd_transactions(
    store: &dyn PersistenceStore,
    query: TransactionQuery,
    format: &OutputFormat,
) -> Result<String> {
    validate_range(query.from_block, query.to_block)?;
    let filter = TransactionFilter {
        from_block: query.from_block,
        to_block: query.to_block,
        address: validate_address(query.address)?,
        limit: query.limit,
    };

    let transactions = store.get_transactions(&filter).await?;
    Ok(format_transactions(&transactions, format))
}

pub async fn cmd_all_events(
    store: &dyn PersistenceStore,
    page: u64,
    page_size: u64,
    format: &OutputFormat,
) -> Result<String> {
    let page = store.get_all_events(page, page_size).await?;
    Ok(format_event_page(&page, format))
}

pub async fn cmd_blocks(
    store: &dyn PersistenceStore,
    limit: u64,
    format: &OutputFormat,
) -> Result<String> {
    let blocks = store.get_blocks(limit).await?;
    Ok(format_blocks(&blocks, format))
}

pub async fn cmd_block(
    store: &dyn PersistenceStore,
    number: u64,
    format: &OutputFormat,
) -> Result<String> {
    let block = store
        .get_block(number)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Block {} not indexed", number))?;
    Ok(format_blocks(&[block], format))
}

pub async fn cmd_contracts(store: &dyn PersistenceStore, format: &OutputFormat) -> Result<String> {
    let contracts = store.get_contracts().await?;
    Ok(format_contracts(&contracts, format))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{Block, BlockBatch, MemoryStore};

    async fn store_with_blocks() -> MemoryStore {
        let store = MemoryStore::new();
        let batch = BlockBatch {
            blocks: (1..=3)
                .map(|number| Block {
                    number,
                    hash: format!("0x{number:064x}"),
                    timestamp: 1_000 + number,
                })
                .collect(),
            ..Default::default()
        };
        store.write_batch(&batch).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_cmd_blocks_json() {
        let store = store_with_blocks().await;
        let output = cmd_blocks(&store, 2, &OutputFormat::Json).await.unwrap();
        let blocks: Vec<Block> = serde_json::from_str(&output).unwrap();
        let numbers: Vec<_> = blocks.iter().map(|b| b.number).collect();
        assert_eq!(numbers, [3, 2]);
    }

    #[tokio::test]
    async fn test_cmd_block_missing_is_error() {
        let store = store_with_blocks().await;
        assert!(cmd_block(&store, 99, &OutputFormat::Table).await.is_err());
        assert!(cmd_block(&store, 2, &OutputFormat::Csv).await.unwrap().contains("1002"));
    }

    #[tokio::test]
    async fn test_cmd_events_rejects_bad_input() {
        let store = MemoryStore::new();
        let bad_address = EventQuery {
            contract: Some("0xnothex".into()),
            ..Default::default()
        };
        assert!(cmd_events(&store, bad_address, &OutputFormat::Json).await.is_err());

        let bad_range = EventQuery {
            from_block: Some(10),
            to_block: Some(5),
            ..Default::default()
        };
        assert!(cmd_events(&store, bad_range, &OutputFormat::Json).await.is_err());
    }

    #[tokio::test]
    async fn test_cmd_stats_counts_blocks() {
        let store = store_with_blocks().await;
        let output = cmd_stats(&store, &OutputFormat::Csv).await.unwrap();
        assert!(output.contains("total_blocks,3"));
        assert!(output.contains("latest_block,3"));
    }
}
