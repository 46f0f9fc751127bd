#![allow(dead_code)]

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use alloy::json_abi::JsonAbi;
use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
use async_trait::async_trait;
use contract_indexer::chain::{
    ChainSource, NewBlockStream, RawBlock, RawLog, RawReceipt, RawTransaction,
};
use contract_indexer::emitter::ProgressEmitter;
use contract_indexer::error::{ChainError, ChainResult};
use contract_indexer::indexer::{Indexer, IndexerConfig};
use contract_indexer::registry::ContractRegistry;
use contract_indexer::repository::PersistenceStore;
use parking_lot::Mutex;
use tokio::sync::mpsc;

pub const TOKEN: &str = "0x820507043F0abdC50C629B09cbC61323967331e3";
pub const SENDER: Address = Address::repeat_byte(0xAA);
pub const RECIPIENT: Address = Address::repeat_byte(0xBB);

/// In-memory chain whose blocks, transactions and logs are set up by the test.
#[derive(Default)]
pub struct ScriptedChain {
    head: AtomicU64,
    blocks: Mutex<HashMap<u64, RawBlock>>,
    transactions: Mutex<HashMap<B256, RawTransaction>>,
    receipts: Mutex<HashMap<B256, RawReceipt>>,
    logs: Mutex<Vec<RawLog>>,
    subscriber: Mutex<Option<mpsc::UnboundedSender<u64>>>,
    /// Blocks to mine the first time a given block is fetched.
    growth: Mutex<HashMap<u64, RangeInclusive<u64>>>,
    pub rate_limited: AtomicBool,
    pub block_calls: AtomicUsize,
    pub unsubscribed: AtomicBool,
}

impl ScriptedChain {
    /// Blocks in `range`, each with one transfer transaction that emits one
    /// `Transfer` log from [`TOKEN`]. The head is the end of the range.
    pub fn with_blocks(range: RangeInclusive<u64>) -> Self {
        let chain = Self::default();
        for number in range {
            chain.push_block(number);
        }
        chain
    }

    pub fn push_block(&self, number: u64) {
        let tx_hash = tx_hash(number);
        self.blocks.lock().insert(
            number,
            RawBlock {
                number,
                hash: keccak256(number.to_be_bytes()),
                timestamp: 1_700_000_000 + number * 12,
                transactions: vec![tx_hash],
            },
        );
        self.transactions.lock().insert(
            tx_hash,
            RawTransaction {
                hash: tx_hash,
                block_number: Some(number),
                from: SENDER,
                to: Some(token_address()),
                value: U256::ZERO,
            },
        );
        self.receipts.lock().insert(
            tx_hash,
            RawReceipt {
                gas_used: 51_000,
                effective_gas_price: 1_000_000_007,
                status: true,
            },
        );
        self.logs
            .lock()
            .push(transfer_log(number, U256::from(10u64).pow(U256::from(21u64)) + U256::from(number)));
        self.head.fetch_max(number, Ordering::SeqCst);
    }

    /// Mine `blocks` as soon as `trigger` is fetched, moving the head mid-run.
    pub fn grow_when_fetched(&self, trigger: u64, blocks: RangeInclusive<u64>) {
        self.growth.lock().insert(trigger, blocks);
    }

    pub fn remove_block(&self, number: u64) {
        self.blocks.lock().remove(&number);
    }

    /// Deliver a new-block notification. Returns `false` when nobody listens.
    pub fn announce(&self, number: u64) -> bool {
        match self.subscriber.lock().as_ref() {
            Some(tx) => tx.send(number).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl ChainSource for ScriptedChain {
    async fn current_block_number(&self) -> ChainResult<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_block(&self, number: u64) -> ChainResult<RawBlock> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        let grown = self.growth.lock().remove(&number);
        if let Some(blocks) = grown {
            for mined in blocks {
                self.push_block(mined);
            }
        }
        if self.rate_limited.load(Ordering::SeqCst) {
            return Err(ChainError::RateLimited("HTTP error 429".into()));
        }
        self.blocks
            .lock()
            .get(&number)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("block {number}")))
    }

    async fn get_transaction(&self, hash: B256) -> ChainResult<RawTransaction> {
        self.transactions
            .lock()
            .get(&hash)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("transaction {hash}")))
    }

    async fn get_transaction_receipt(&self, hash: B256) -> ChainResult<RawReceipt> {
        self.receipts
            .lock()
            .get(&hash)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("receipt {hash}")))
    }

    async fn get_logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> ChainResult<Vec<RawLog>> {
        Ok(self
            .logs
            .lock()
            .iter()
            .filter(|log| log.address == address)
            .filter(|log| {
                log.block_number
                    .is_some_and(|n| (from_block..=to_block).contains(&n))
            })
            .cloned()
            .collect())
    }

    async fn subscribe_new_blocks(&self, after: u64) -> ChainResult<NewBlockStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Like the RPC poller, catch up on everything above `after` first.
        for number in after.saturating_add(1)..=self.head.load(Ordering::SeqCst) {
            let _ = tx.send(number);
        }
        *self.subscriber.lock() = Some(tx);
        self.unsubscribed.store(false, Ordering::SeqCst);
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|number| (number, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn unsubscribe(&self) {
        self.subscriber.lock().take();
        self.unsubscribed.store(true, Ordering::SeqCst);
    }
}

pub fn token_address() -> Address {
    TOKEN.parse().unwrap()
}

pub fn tx_hash(number: u64) -> B256 {
    keccak256(format!("tx-{number}"))
}

/// ERC20 `Transfer` with an unnamed amount parameter.
pub fn token_abi() -> JsonAbi {
    serde_json::from_str(
        r#"[{"type":"event","name":"Transfer","anonymous":false,"inputs":[
            {"name":"from","type":"address","indexed":true},
            {"name":"to","type":"address","indexed":true},
            {"name":"","type":"uint256","indexed":false}
        ]}]"#,
    )
    .unwrap()
}

pub fn transfer_log(number: u64, amount: U256) -> RawLog {
    RawLog {
        address: token_address(),
        topics: vec![
            keccak256("Transfer(address,address,uint256)"),
            SENDER.into_word(),
            RECIPIENT.into_word(),
        ],
        data: Bytes::from(amount.to_be_bytes::<32>().to_vec()),
        block_number: Some(number),
        transaction_hash: Some(tx_hash(number)),
        log_index: Some(0),
    }
}

/// Production delays, scaled for tests that run on a paused clock.
pub fn config(batch_size: u64, start_block: Option<u64>) -> IndexerConfig {
    IndexerConfig {
        batch_size,
        start_block,
        ..Default::default()
    }
}

/// Small delays for tests that run on the real clock.
pub fn fast_config() -> IndexerConfig {
    IndexerConfig {
        block_delay: Duration::ZERO,
        transaction_delay: Duration::ZERO,
        range_delay: Duration::ZERO,
        range_error_delay: Duration::ZERO,
        rate_limit_delay: Duration::from_millis(10),
        retry_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

pub async fn build<S>(
    config: IndexerConfig,
    chain: Arc<ScriptedChain>,
    store: Arc<S>,
) -> Indexer<ScriptedChain, S>
where
    S: PersistenceStore + 'static,
{
    let registry = Arc::new(ContractRegistry::new(store.clone()));
    registry
        .add_binding(TOKEN, "Token", token_abi())
        .await
        .unwrap();
    Indexer::new(config, chain, store, registry, ProgressEmitter::new())
}
