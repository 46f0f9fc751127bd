use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::indexer::IndexerConfig;
use crate::registry::BindingSpec;
use crate::rpc::{DEFAULT_POLL_INTERVAL, DEFAULT_REQUEST_TIMEOUT};

const DEFAULT_DATABASE_URL: &str = "sqlite:./indexer.db";
const DEFAULT_BATCH_SIZE: u64 = 50;

#[derive(Debug, Clone)]
pub struct Config {
    pub json_rpc_urls: Vec<String>,
    pub database_url: String,
    pub batch_size: u64,
    pub start_block: Option<u64>,
    pub contracts_file: Option<PathBuf>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let urls = std::env::var("JSON_RPC_URLS")
            .or_else(|_| std::env::var("JSON_RPC_URL"))
            .context("JSON_RPC_URLS or JSON_RPC_URL must be set in .env")?;
        let json_rpc_urls = parse_rpc_urls(&urls);
        if json_rpc_urls.is_empty() {
            anyhow::bail!("JSON_RPC_URLS does not contain any URL");
        }

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let batch_size = optional_env("BATCH_SIZE")?.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            anyhow::bail!("BATCH_SIZE must be at least 1");
        }

        let poll_interval = optional_env("POLL_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let request_timeout = optional_env("REQUEST_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        Ok(Config {
            json_rpc_urls,
            database_url,
            batch_size,
            start_block: optional_env("START_BLOCK")?,
            contracts_file: std::env::var("CONTRACTS_FILE").ok().map(PathBuf::from),
            poll_interval,
            request_timeout,
        })
    }

    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            batch_size: self.batch_size,
            start_block: self.start_block,
            ..Default::default()
        }
    }

    /// Bindings from `CONTRACTS_FILE`, or none when it is unset.
    pub fn load_contracts(&self) -> Result<Vec<BindingSpec>> {
        match &self.contracts_file {
            Some(path) => load_contracts_file(path),
            None => Ok(Vec::new()),
        }
    }
}

/// `DATABASE_URL`, or the default SQLite file. Needs no RPC settings.
pub fn database_url_from_env() -> String {
    dotenv::dotenv().ok();
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

pub fn load_contracts_file(path: &Path) -> Result<Vec<BindingSpec>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read contracts file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid contracts file {}", path.display()))
}

/// Comma-separated list, blanks dropped.
pub fn parse_rpc_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

fn optional_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid {name} value: {value}")),
        Err(_) => Ok(None),
    }
}
