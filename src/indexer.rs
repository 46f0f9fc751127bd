//! Orchestrates historical backfill and live tailing.
//!
//! The indexer moves `Stopped -> Backfilling -> Live`. Backfill walks the
//! blocks between the checkpoint and the chain head, one range of
//! `batch_size` blocks at a time, writing each range as one batch. It keeps
//! going until a pass ends without the head having moved, then subscribes to
//! every block above the last one it covered. Live mode processes each
//! announced block on its own. Both rely on the store's idempotent writes,
//! so reprocessing a block is always safe.
//!
//! Every `start()` opens a new run. Work belonging to an older run stops at
//! the next range or notification boundary, and a new run only begins once
//! the previous one has released the run lock.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::B256;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainSource, NewBlockStream};
use crate::emitter::{IndexerEvent, Progress, ProgressEmitter};
use crate::error::{ChainError, IndexerError, IndexerResult};
use crate::events::{canonical_address, canonical_hash};
use crate::registry::ContractRegistry;
use crate::repository::{BatchSummary, Block, BlockBatch, Event, PersistenceStore, Stats, Transaction};

const DEFAULT_BATCH_SIZE: u64 = 50;
const BLOCK_DELAY_MS: u64 = 100;
const TRANSACTION_DELAY_MS: u64 = 50;
const RANGE_DELAY_MS: u64 = 2000;
const RANGE_ERROR_DELAY_MS: u64 = 5000;
const MAX_ATTEMPTS: u32 = 3;
const RATE_LIMIT_DELAY_MS: u64 = 5000;
const RETRY_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Blocks per backfill range.
    pub batch_size: u64,
    /// Pause between blocks of a backfill range.
    pub block_delay: Duration,
    /// Pause between transactions of a live block.
    pub transaction_delay: Duration,
    /// Pause after every persisted backfill range.
    pub range_delay: Duration,
    /// Pause after a backfill range failed.
    pub range_error_delay: Duration,
    /// Attempts per block before giving up.
    pub max_attempts: u32,
    pub rate_limit_delay: Duration,
    pub retry_delay: Duration,
    /// Lower bound for the resume point. `None` starts at the chain head.
    pub start_block: Option<u64>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            block_delay: Duration::from_millis(BLOCK_DELAY_MS),
            transaction_delay: Duration::from_millis(TRANSACTION_DELAY_MS),
            range_delay: Duration::from_millis(RANGE_DELAY_MS),
            range_error_delay: Duration::from_millis(RANGE_ERROR_DELAY_MS),
            max_attempts: MAX_ATTEMPTS,
            rate_limit_delay: Duration::from_millis(RATE_LIMIT_DELAY_MS),
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
            start_block: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerState {
    Stopped,
    Backfilling,
    Live,
}

struct Inner<C, S> {
    config: IndexerConfig,
    chain: Arc<C>,
    store: Arc<S>,
    registry: Arc<ContractRegistry>,
    emitter: ProgressEmitter,
    running: AtomicBool,
    /// Incremented by every `start()`; work carries the value it started with.
    generation: AtomicU64,
    /// Held for the whole of a backfill, so runs never overlap.
    run_lock: AsyncMutex<()>,
    state: Mutex<IndexerState>,
    checkpoint: Mutex<Option<u64>>,
    live_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

/// Cheap to clone; clones share the same running instance.
pub struct Indexer<C, S> {
    inner: Arc<Inner<C, S>>,
}

impl<C, S> Clone for Indexer<C, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, S> Indexer<C, S>
where
    C: ChainSource + 'static,
    S: PersistenceStore + 'static,
{
    pub fn new(
        config: IndexerConfig,
        chain: Arc<C>,
        store: Arc<S>,
        registry: Arc<ContractRegistry>,
        emitter: ProgressEmitter,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                chain,
                store,
                registry,
                emitter,
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                run_lock: AsyncMutex::new(()),
                state: Mutex::new(IndexerState::Stopped),
                checkpoint: Mutex::new(None),
                live_task: Mutex::new(None),
                shutdown,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Running, and no later `start()` has superseded `run`.
    fn is_current(&self, run: u64) -> bool {
        self.is_running() && self.inner.generation.load(Ordering::SeqCst) == run
    }

    pub fn state(&self) -> IndexerState {
        *self.inner.state.lock()
    }

    /// Highest block fully processed in this process, if any.
    pub fn checkpoint(&self) -> Option<u64> {
        *self.inner.checkpoint.lock()
    }

    pub fn registry(&self) -> &Arc<ContractRegistry> {
        &self.inner.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexerEvent> {
        self.inner.emitter.subscribe()
    }

    /// Backfill up to the current head, then switch to live tailing.
    ///
    /// Returns once live mode is entered, or once a concurrent [`stop`](Self::stop)
    /// interrupted the backfill. A run interrupted by `stop()` finishes its
    /// in-flight range before a new `start()` begins.
    pub async fn start(&self) -> IndexerResult<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("Indexer is already running");
            return Ok(());
        }
        let run = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.shutdown.send_replace(false);
        info!("Indexer starting...");

        let _guard = self.inner.run_lock.lock().await;
        let previous = self.inner.live_task.lock().take();
        if let Some(previous) = previous {
            if let Err(e) = previous.await {
                warn!("Previous live loop ended abnormally: {}", e);
            }
        }

        match self.run(run).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Error starting indexer: {}", e);
                if self.is_current(run) {
                    self.inner.running.store(false, Ordering::SeqCst);
                    self.set_state(IndexerState::Stopped);
                }
                Err(e)
            }
        }
    }

    async fn run(&self, run: u64) -> IndexerResult<()> {
        let head = self.inner.chain.current_block_number().await?;
        let checkpoint = self.resume_point(head).await?;
        info!("Current block: {}, last processed block: {}", head, checkpoint);

        let mut to_block = head.max(checkpoint);
        if checkpoint < head {
            self.set_state(IndexerState::Backfilling);
            let mut from_block = checkpoint;
            // Blocks produced while a pass runs are covered by the next pass.
            loop {
                self.backfill_run(run, from_block, to_block).await;
                if !self.is_current(run) {
                    break;
                }
                let latest = self.inner.chain.current_block_number().await?;
                if latest <= to_block {
                    break;
                }
                debug!("Chain advanced to {} during backfill", latest);
                from_block = to_block + 1;
                to_block = latest;
            }
        }

        if !self.is_current(run) {
            info!("Indexer stopped before entering live mode");
            return Ok(());
        }

        let stream = self.inner.chain.subscribe_new_blocks(to_block).await?;
        if !self.is_current(run) {
            self.inner.chain.unsubscribe().await;
            return Ok(());
        }

        self.set_state(IndexerState::Live);
        self.spawn_live_loop(run, stream);
        self.inner.emitter.emit(IndexerEvent::Started);
        Ok(())
    }

    /// `max(in-memory, stored, configured start)`, or the head when none is known.
    async fn resume_point(&self, head: u64) -> IndexerResult<u64> {
        let stored = self.inner.store.read_checkpoint().await?;
        let mut checkpoint = self.inner.checkpoint.lock();
        let resumed = [*checkpoint, stored, self.inner.config.start_block]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(head);
        *checkpoint = Some(resumed);
        Ok(resumed)
    }

    /// Cooperative: work in flight finishes before the flag is observed.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            info!("Indexer is not running");
            return;
        }
        self.inner.shutdown.send_replace(true);
        self.inner.chain.unsubscribe().await;
        // The live loop exits after its current block; the next start() awaits it.
        self.set_state(IndexerState::Stopped);
        info!("Indexer stopped");
        self.inner.emitter.emit(IndexerEvent::Stopped);
    }

    /// Store statistics with the live running flag filled in.
    pub async fn stats(&self) -> IndexerResult<Stats> {
        let mut stats = self.inner.store.get_stats().await?;
        stats.is_running = self.is_running();
        Ok(stats)
    }

    /// Wipe indexed data, bindings and the checkpoint.
    pub async fn clear(&self) -> IndexerResult<()> {
        if self.is_running() {
            warn!("Clearing data while the indexer is running");
        }
        self.inner.store.clear().await?;
        self.inner.registry.clear();
        *self.inner.checkpoint.lock() = None;
        info!("Database cleared");
        Ok(())
    }

    /// Process `[from_block, to_block]` range by range.
    ///
    /// A failed range is logged and skipped after a longer pause; the
    /// running flag is only checked between ranges.
    pub async fn backfill(&self, from_block: u64, to_block: u64) {
        let run = self.inner.generation.load(Ordering::SeqCst);
        self.backfill_run(run, from_block, to_block).await;
    }

    async fn backfill_run(&self, run: u64, from_block: u64, to_block: u64) {
        let config = &self.inner.config;
        let batch_size = config.batch_size.max(1);
        info!("Processing blocks from {} to {}", from_block, to_block);

        let mut range_start = from_block;
        while range_start <= to_block {
            if !self.is_current(run) {
                info!("Indexer is not running, stopping backfill at block {}", range_start);
                break;
            }
            let range_end = range_start.saturating_add(batch_size - 1).min(to_block);
            info!("Processing blocks {} to {}", range_start, range_end);

            match self.process_range(range_start, range_end).await {
                Ok(summary) => {
                    debug!(
                        "Range {}-{} stored {} blocks, {} transactions, {} events",
                        range_start, range_end, summary.blocks, summary.transactions, summary.events
                    );
                    self.inner.emitter.emit(IndexerEvent::Progress(Progress::new(
                        range_end, from_block, to_block,
                    )));
                    sleep(config.range_delay).await;
                }
                Err(e) => {
                    error!("Error processing blocks {} to {}: {}", range_start, range_end, e);
                    sleep(config.range_error_delay).await;
                }
            }

            match range_end.checked_add(1) {
                Some(next) => range_start = next,
                None => break,
            }
        }
    }

    async fn process_range(&self, from_block: u64, to_block: u64) -> IndexerResult<BatchSummary> {
        let mut batch = BlockBatch::default();
        for number in from_block..=to_block {
            let fetched = self
                .with_retry(number, move || self.fetch_block(number, Duration::ZERO))
                .await?;
            if let Some((block_batch, _)) = fetched {
                batch.extend(block_batch);
            }
            sleep(self.inner.config.block_delay).await;
        }

        let summary = self.inner.store.write_batch(&batch).await?;
        if summary.failed > 0 {
            warn!("{} rows failed in blocks {} to {}", summary.failed, from_block, to_block);
        }
        self.advance_checkpoint(to_block).await?;
        self.emit_indexed(&batch.events);
        Ok(summary)
    }

    /// Fetch, persist and checkpoint a single announced block.
    ///
    /// The whole block is retried on failure; the last error is returned once
    /// the attempts are exhausted.
    pub async fn process_live_block(&self, number: u64) -> IndexerResult<()> {
        debug!("Processing block {}", number);
        self.with_retry(number, move || self.persist_block(number)).await
    }

    async fn persist_block(&self, number: u64) -> IndexerResult<()> {
        let Some((batch, timestamp)) = self
            .fetch_block(number, self.inner.config.transaction_delay)
            .await?
        else {
            return Ok(());
        };

        self.inner.store.write_batch(&batch).await?;
        self.advance_checkpoint(number).await?;
        self.emit_indexed(&batch.events);
        self.inner.emitter.emit(IndexerEvent::BlockProcessed {
            block_number: number,
            timestamp,
        });
        Ok(())
    }

    /// Everything stored for one block, plus its timestamp.
    ///
    /// `None` when the block does not exist upstream. Missing transactions
    /// and undecodable logs are skipped; other chain errors propagate so the
    /// caller can retry the block.
    async fn fetch_block(
        &self,
        number: u64,
        transaction_delay: Duration,
    ) -> IndexerResult<Option<(BlockBatch, u64)>> {
        let raw = match self.inner.chain.get_block(number).await {
            Ok(raw) => raw,
            Err(ChainError::NotFound(_)) => {
                warn!("Block {} not found, skipping", number);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut batch = BlockBatch {
            blocks: vec![Block {
                number: raw.number,
                hash: canonical_hash(&raw.hash),
                timestamp: raw.timestamp,
            }],
            ..Default::default()
        };

        for hash in &raw.transactions {
            if let Some(transaction) = self.fetch_transaction(*hash, number, raw.timestamp).await? {
                batch.transactions.push(transaction);
            }
            if !transaction_delay.is_zero() {
                sleep(transaction_delay).await;
            }
        }

        for binding in self.inner.registry.snapshot() {
            let logs = self
                .inner
                .chain
                .get_logs(binding.address(), number, number)
                .await?;
            for log in logs {
                match binding.decoder().decode(&log, raw.timestamp) {
                    Ok(Some(event)) => batch.events.push(event),
                    Ok(None) => debug!(
                        "Unknown event from {} in block {}",
                        binding.address_str(),
                        number
                    ),
                    Err(e) => warn!(
                        "Failed to decode log {:?} of {} in block {}: {}",
                        log.log_index,
                        binding.name(),
                        number,
                        e
                    ),
                }
            }
        }

        Ok(Some((batch, raw.timestamp)))
    }

    async fn fetch_transaction(
        &self,
        hash: B256,
        block_number: u64,
        timestamp: u64,
    ) -> IndexerResult<Option<Transaction>> {
        let chain = &self.inner.chain;
        let fetched = match chain.get_transaction(hash).await {
            Ok(transaction) => chain
                .get_transaction_receipt(hash)
                .await
                .map(|receipt| (transaction, receipt)),
            Err(e) => Err(e),
        };

        let (transaction, receipt) = match fetched {
            Ok(pair) => pair,
            Err(ChainError::NotFound(_)) => {
                warn!("Transaction {} not found or receipt missing, skipping", hash);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Some(Transaction {
            hash: canonical_hash(&hash),
            block_number: transaction.block_number.unwrap_or(block_number),
            from_address: canonical_address(&transaction.from),
            to_address: transaction.to.as_ref().map(canonical_address),
            value: transaction.value.to_string(),
            gas_used: receipt.gas_used,
            gas_price: receipt.effective_gas_price.to_string(),
            timestamp,
            status: receipt.status as u8,
        }))
    }

    /// Run `op` up to `max_attempts` times, pausing longer after a rate limit.
    /// Errors that cannot succeed on another attempt are returned at once.
    async fn with_retry<T, F, Fut>(&self, block_number: u64, op: F) -> IndexerResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = IndexerResult<T>>,
    {
        let config = &self.inner.config;
        let max_attempts = config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    error!("Block {} failed permanently: {}", block_number, e);
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    error!(
                        "Giving up on block {} after {} attempts: {}",
                        block_number, attempt, e
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = match &e {
                        IndexerError::Chain(chain) if chain.is_rate_limited() => {
                            config.rate_limit_delay
                        }
                        _ => config.retry_delay,
                    };
                    warn!(
                        "Attempt {}/{} for block {} failed: {}, retrying in {:?}",
                        attempt, max_attempts, block_number, e, delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn advance_checkpoint(&self, block_number: u64) -> IndexerResult<()> {
        self.inner.store.write_checkpoint(block_number).await?;
        let mut checkpoint = self.inner.checkpoint.lock();
        *checkpoint = Some(checkpoint.map_or(block_number, |current| current.max(block_number)));
        Ok(())
    }

    fn emit_indexed(&self, events: &[Event]) {
        for event in events {
            self.inner.emitter.emit(IndexerEvent::EventIndexed {
                contract: event.contract_address.clone(),
                event: event.event_name.clone(),
                args: event.args.clone(),
                block_number: event.block_number,
                transaction_hash: event.transaction_hash.clone(),
            });
        }
    }

    fn spawn_live_loop(&self, run: u64, mut stream: NewBlockStream) {
        let indexer = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                let number = tokio::select! {
                    _ = shutdown.changed() => break,
                    next = stream.next() => match next {
                        Some(number) => number,
                        None => {
                            info!("New block stream ended");
                            break;
                        }
                    },
                };
                if !indexer.is_current(run) {
                    break;
                }
                if let Err(e) = indexer.process_live_block(number).await {
                    error!("Error processing block {}: {}", number, e);
                }
            }
            debug!("Live loop exited");
        });
        *self.inner.live_task.lock() = Some(handle);
    }

    fn set_state(&self, state: IndexerState) {
        *self.inner.state.lock() = state;
    }
}
