//! Lifecycle notifications published by the indexer.
//!
//! Consumers subscribe to a broadcast channel; a consumer that falls behind
//! misses messages instead of slowing the indexer down.

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::events::EventArgs;

const CHANNEL_CAPACITY: usize = 1024;

/// Backfill progress after a range was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    pub processed: u64,
    pub total: u64,
    /// In `[0, 100]`.
    pub percentage: f64,
}

impl Progress {
    /// Progress of a backfill over `[from, to]` that has reached `processed`.
    pub fn new(processed: u64, from: u64, to: u64) -> Self {
        let percentage = if to <= from {
            100.0
        } else {
            let done = processed.saturating_sub(from).min(to - from);
            done as f64 / (to - from) as f64 * 100.0
        };
        Self {
            processed,
            total: to,
            percentage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IndexerEvent {
    Started,
    Stopped,
    Progress(Progress),
    #[serde(rename_all = "camelCase")]
    BlockProcessed { block_number: u64, timestamp: u64 },
    #[serde(rename_all = "camelCase")]
    EventIndexed {
        contract: String,
        event: String,
        args: EventArgs,
        block_number: u64,
        transaction_hash: String,
    },
}

#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    tx: broadcast::Sender<IndexerEvent>,
}

impl Default for ProgressEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexerEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: IndexerEvent) {
        // No receivers is fine
        let _ = self.tx.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Log every lifecycle event until the emitter is dropped.
pub fn spawn_log_listener(emitter: &ProgressEmitter) -> JoinHandle<()> {
    let mut rx = emitter.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Log listener lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &IndexerEvent) {
    match event {
        IndexerEvent::Started => info!("Indexer started"),
        IndexerEvent::Stopped => info!("Indexer stopped"),
        IndexerEvent::Progress(progress) => info!(
            "Progress: {:.2}% ({}/{})",
            progress.percentage, progress.processed, progress.total
        ),
        IndexerEvent::BlockProcessed {
            block_number,
            timestamp,
        } => info!("Processed block {} ({})", block_number, timestamp),
        IndexerEvent::EventIndexed {
            contract,
            event,
            block_number,
            transaction_hash,
            ..
        } => info!(
            "Indexed {} event from {} at block {} (tx {})",
            event, contract, block_number, transaction_hash
        ),
    }
}
