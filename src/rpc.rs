use alloy::consensus::Transaction as ConsensusTransaction;
use alloy::network::{ReceiptResponse, TransactionResponse};
use alloy::providers::fillers::FillProvider;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, Filter, Log};
use alloy::transports::TransportResult;
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use std::future::IntoFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, timeout};
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};

use crate::chain::{ChainSource, NewBlockStream, RawBlock, RawLog, RawReceipt, RawTransaction};
use crate::error::{ChainError, ChainResult};

type AlloyFullProvider = FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::BlobGasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::NonceFiller,
                    alloy::providers::fillers::ChainIdFiller,
                >,
            >,
        >,
    >,
    alloy::providers::RootProvider,
>;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(12);
const NEW_BLOCK_CHANNEL_CAPACITY: usize = 256;

/// JSON-RPC [`ChainSource`] over one or more endpoints, rotating on failure.
///
/// New blocks are discovered by polling the head number.
#[derive(Clone)]
pub struct RpcClient {
    providers: Vec<AlloyFullProvider>,
    urls: Vec<String>,
    current_provider: Arc<AtomicUsize>,
    max_retries: usize,
    request_timeout: Duration,
    poll_interval: Duration,
    poller: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RpcClient {
    pub fn new(
        rpc_urls: &[String],
        request_timeout: Duration,
        poll_interval: Duration,
    ) -> ChainResult<Self> {
        if rpc_urls.is_empty() {
            return Err(ChainError::InvalidResponse(
                "At least one RPC URL must be provided".to_string(),
            ));
        }

        let mut providers = Vec::new();
        for url in rpc_urls {
            let parsed_url = url
                .parse()
                .map_err(|_| ChainError::InvalidResponse(format!("Invalid RPC URL: {url}")))?;
            let provider: AlloyFullProvider = ProviderBuilder::new().connect_http(parsed_url);
            providers.push(provider);
        }

        Ok(RpcClient {
            providers,
            urls: rpc_urls.to_vec(),
            current_provider: Arc::new(AtomicUsize::new(0)),
            max_retries: 5,
            request_timeout,
            poll_interval,
            poller: Arc::new(Mutex::new(None)),
        })
    }

    fn get_provider(&self) -> &AlloyFullProvider {
        let index = self.current_provider.load(Ordering::Relaxed) % self.providers.len();
        &self.providers[index]
    }

    pub fn get_current_url(&self) -> &str {
        let index = self.current_provider.load(Ordering::Relaxed) % self.urls.len();
        &self.urls[index]
    }

    pub fn rotate_provider(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);

        if self.providers.len() > 1 {
            debug!("Rotating to RPC provider #{}", next);
        }
    }

    fn get_retry_strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries)
    }

    fn handle_error(&self, error_str: &str) -> ChainError {
        let current_url = self.get_current_url();
        warn!(
            "RPC error on {}: {}, rotating provider",
            current_url, error_str
        );
        self.rotate_provider();
        classify_rpc_error(error_str)
    }

    fn handle_timeout(&self) -> ChainError {
        let current_url = self.get_current_url();
        warn!(
            "Request timeout after {} seconds on {}, rotating provider",
            self.request_timeout.as_secs(),
            current_url
        );
        self.rotate_provider();
        ChainError::Timeout(self.request_timeout.as_secs())
    }

    /// One request against the current endpoint, bounded by the request timeout.
    async fn call<'a, T, F, Fut>(&'a self, request: F) -> ChainResult<T>
    where
        F: FnOnce(&'a AlloyFullProvider) -> Fut,
        Fut: IntoFuture<Output = TransportResult<T>>,
    {
        let provider = self.get_provider();
        match timeout(self.request_timeout, request(provider).into_future()).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(self.handle_error(&e.to_string())),
            Err(_) => Err(self.handle_timeout()),
        }
    }

    pub async fn get_latest_block(&self) -> ChainResult<u64> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move { client.call(|provider| provider.get_block_number()).await }
        })
        .await
    }

    fn parse_max_results_error(error_str: &str) -> Option<(u64, u64)> {
        let re = Regex::new(r"retry with the range (\d+)-(\d+)").ok()?;
        let captures = re.captures(error_str)?;

        let from = captures.get(1)?.as_str().parse().ok()?;
        let to = captures.get(2)?.as_str().parse().ok()?;

        Some((from, to))
    }

    fn log_filter(address: Address, from_block: u64, to_block: u64) -> Filter {
        Filter::new()
            .address(address)
            .from_block(from_block)
            .to_block(to_block)
    }

    /// `eth_getLogs`, splitting the range when the provider caps the result size.
    pub async fn get_logs_split(
        &self,
        contract_address: Address,
        from_block: u64,
        to_block: u64,
    ) -> ChainResult<Vec<Log>> {
        let mut all_logs = Vec::new();
        let mut current_from = from_block;

        while current_from <= to_block {
            let filter = Self::log_filter(contract_address, current_from, to_block);
            let result = timeout(
                self.request_timeout,
                self.get_provider().get_logs(&filter).into_future(),
            )
            .await;

            match result {
                Ok(Ok(logs)) => {
                    all_logs.extend(logs);
                    break;
                }
                Ok(Err(e)) => {
                    let error_str = e.to_string();
                    if !error_str.contains("exceeds max results") {
                        return Err(self.handle_error(&error_str));
                    }
                    let Some((suggested_from, suggested_to)) =
                        Self::parse_max_results_error(&error_str)
                    else {
                        return Err(self.handle_error(&error_str));
                    };
                    if suggested_to < current_from {
                        return Err(ChainError::InvalidResponse(error_str));
                    }

                    info!(
                        "Hit max results limit for blocks {}-{}, splitting at block {}",
                        current_from, to_block, suggested_to
                    );
                    let split = Self::log_filter(contract_address, suggested_from, suggested_to);
                    let logs = self.call(|provider| provider.get_logs(&split)).await?;
                    all_logs.extend(logs);
                    current_from = suggested_to + 1;
                }
                Err(_) => return Err(self.handle_timeout()),
            }
        }

        Ok(all_logs)
    }

    /// Poll the head and forward every new block number, in order.
    fn spawn_poller(&self, mut last_seen: u64, tx: mpsc::Sender<u64>) -> JoinHandle<()> {
        let client = self.clone();
        let poll_interval = self.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires at once, catching up on blocks above `last_seen`.
            loop {
                ticker.tick().await;
                let head = match client.get_latest_block().await {
                    Ok(head) => head,
                    Err(e) => {
                        warn!("Failed to poll latest block: {}", e);
                        continue;
                    }
                };
                for number in last_seen.saturating_add(1)..=head {
                    if tx.send(number).await.is_err() {
                        debug!("New block receiver dropped, stopping poller");
                        return;
                    }
                }
                last_seen = last_seen.max(head);
            }
        })
    }
}

/// Map a provider error message onto the retry taxonomy.
pub fn classify_rpc_error(error_str: &str) -> ChainError {
    let lower = error_str.to_lowercase();
    if lower.contains("429")
        || lower.contains("-32005")
        || lower.contains("rate limit")
        || lower.contains("too many requests")
    {
        ChainError::RateLimited(error_str.to_string())
    } else {
        ChainError::Transient(error_str.to_string())
    }
}

fn raw_log(log: Log) -> RawLog {
    RawLog {
        address: log.address(),
        topics: log.topics().to_vec(),
        data: log.data().data.clone(),
        block_number: log.block_number,
        transaction_hash: log.transaction_hash,
        log_index: log.log_index,
    }
}

#[async_trait]
impl ChainSource for RpcClient {
    async fn current_block_number(&self) -> ChainResult<u64> {
        self.get_latest_block().await
    }

    async fn get_block(&self, number: u64) -> ChainResult<RawBlock> {
        let block = self
            .call(|provider| provider.get_block_by_number(BlockNumberOrTag::Number(number)))
            .await?
            .ok_or_else(|| ChainError::NotFound(format!("block {number}")))?;

        Ok(RawBlock {
            number: block.header.number,
            hash: block.header.hash,
            timestamp: block.header.timestamp,
            transactions: block.transactions.hashes().collect(),
        })
    }

    async fn get_transaction(&self, hash: B256) -> ChainResult<RawTransaction> {
        let transaction = self
            .call(|provider| provider.get_transaction_by_hash(hash))
            .await?
            .ok_or_else(|| ChainError::NotFound(format!("transaction {hash}")))?;

        Ok(RawTransaction {
            hash,
            block_number: TransactionResponse::block_number(&transaction),
            from: TransactionResponse::from(&transaction),
            to: ConsensusTransaction::to(&transaction),
            value: ConsensusTransaction::value(&transaction),
        })
    }

    async fn get_transaction_receipt(&self, hash: B256) -> ChainResult<RawReceipt> {
        let receipt = self
            .call(|provider| provider.get_transaction_receipt(hash))
            .await?
            .ok_or_else(|| ChainError::NotFound(format!("receipt {hash}")))?;

        Ok(RawReceipt {
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
            status: ReceiptResponse::status(&receipt),
        })
    }

    async fn get_logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> ChainResult<Vec<RawLog>> {
        let logs = self.get_logs_split(address, from_block, to_block).await?;
        Ok(logs.into_iter().map(raw_log).collect())
    }

    async fn subscribe_new_blocks(&self, after: u64) -> ChainResult<NewBlockStream> {
        let (tx, rx) = mpsc::channel(NEW_BLOCK_CHANNEL_CAPACITY);
        let handle = self.spawn_poller(after, tx);
        if let Some(previous) = self.poller.lock().replace(handle) {
            previous.abort();
        }
        info!(
            "Polling for new blocks every {} seconds after block {}",
            self.poll_interval.as_secs(),
            after
        );

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|number| (number, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn unsubscribe(&self) {
        if let Some(poller) = self.poller.lock().take() {
            poller.abort();
            info!("Stopped polling for new blocks");
        }
    }
}
