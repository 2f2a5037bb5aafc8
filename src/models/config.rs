//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::SourceDescriptor;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upstream request behavior
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Cycle scheduling
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Batch write strategy thresholds and timeouts
    #[serde(default)]
    pub storage: StorageConfig,

    /// PostgreSQL connection settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Shutdown drain settings
    #[serde(default)]
    pub guard: GuardConfig,

    /// Read-path cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Status / lookup HTTP server
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Upstream roster endpoints, fetched in this order
    #[serde(default = "defaults::sources")]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Parse and validate the configured sources.
    ///
    /// This is where a malformed endpoint is rejected; fetch calls only ever
    /// see descriptors that passed here.
    pub fn source_descriptors(&self) -> Result<Vec<SourceDescriptor>> {
        if self.sources.is_empty() {
            return Err(AppError::config("No sources defined"));
        }

        let mut descriptors: Vec<SourceDescriptor> = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let descriptor = SourceDescriptor::parse(&source.tag, &source.url)?;
            if descriptors.iter().any(|d| d.tag() == descriptor.tag()) {
                return Err(AppError::config(format!(
                    "Duplicate source tag: {}",
                    descriptor.tag()
                )));
            }
            descriptors.push(descriptor);
        }
        Ok(descriptors)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.fetcher.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetcher.user_agent is empty"));
        }
        if self.fetcher.timeout_ms == 0 {
            return Err(AppError::validation("fetcher.timeout_ms must be > 0"));
        }
        if self.fetcher.delay_ms > 0 && self.fetcher.timeout_ms >= self.fetcher.delay_ms {
            log::warn!(
                "fetcher.timeout_ms ({}) is not shorter than fetcher.delay_ms ({})",
                self.fetcher.timeout_ms,
                self.fetcher.delay_ms
            );
        }
        if self.scheduler.period_secs == 0 {
            return Err(AppError::validation("scheduler.period_secs must be > 0"));
        }
        if self.storage.chunk_size == 0 {
            return Err(AppError::validation("storage.chunk_size must be > 0"));
        }
        if !(self.storage.single_max < self.storage.chunked_max
            && self.storage.chunked_max < self.storage.split_max)
        {
            return Err(AppError::validation(format!(
                "storage thresholds must be strictly increasing (got {} / {} / {})",
                self.storage.single_max, self.storage.chunked_max, self.storage.split_max
            )));
        }
        if self.guard.poll_interval_ms == 0 {
            return Err(AppError::validation("guard.poll_interval_ms must be > 0"));
        }
        if self.logging.level.parse::<log::LevelFilter>().is_err() {
            return Err(AppError::validation(format!(
                "logging.level {:?} is not a log level",
                self.logging.level
            )));
        }
        if self.cache.capacity == 0 {
            return Err(AppError::validation("cache.capacity must be > 0"));
        }
        if self.database.max_connections == 0 {
            return Err(AppError::validation("database.max_connections must be > 0"));
        }
        self.source_descriptors()?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetcher: FetcherConfig::default(),
            scheduler: SchedulerConfig::default(),
            storage: StorageConfig::default(),
            database: DatabaseConfig::default(),
            guard: GuardConfig::default(),
            cache: CacheConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            sources: defaults::sources(),
        }
    }
}

/// Upstream request behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Name used in fetch log lines
    #[serde(default = "defaults::fetcher_name")]
    pub name: String,

    /// User-Agent header for upstream requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-request timeout in milliseconds
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Delay between sources (and retry backoff unit) in milliseconds
    #[serde(default = "defaults::delay_ms")]
    pub delay_ms: u64,

    /// Extra attempts per source when `retry` is enabled
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Use the retrying fetch mode
    #[serde(default = "defaults::enabled")]
    pub retry: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            name: defaults::fetcher_name(),
            user_agent: defaults::user_agent(),
            timeout_ms: defaults::timeout_ms(),
            delay_ms: defaults::delay_ms(),
            max_retries: defaults::max_retries(),
            retry: defaults::enabled(),
        }
    }
}

/// Cycle scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between cycle firings
    #[serde(default = "defaults::period_secs")]
    pub period_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period_secs: defaults::period_secs(),
        }
    }
}

/// Batch write strategy thresholds and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Largest batch written as one transaction
    #[serde(default = "defaults::single_max")]
    pub single_max: usize,

    /// Largest batch written in chunks
    #[serde(default = "defaults::chunked_max")]
    pub chunked_max: usize,

    /// Largest batch written via split create/update; above this, native bulk
    #[serde(default = "defaults::split_max")]
    pub split_max: usize,

    /// Records per chunk in chunked mode
    #[serde(default = "defaults::chunk_size")]
    pub chunk_size: usize,

    /// Pause between chunks in milliseconds
    #[serde(default = "defaults::chunk_pause_ms")]
    pub chunk_pause_ms: u64,

    /// Timeout for one chunk transaction in seconds
    #[serde(default = "defaults::chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,

    /// Timeout for any other store transaction in seconds
    #[serde(default = "defaults::transaction_timeout_secs")]
    pub transaction_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            single_max: defaults::single_max(),
            chunked_max: defaults::chunked_max(),
            split_max: defaults::split_max(),
            chunk_size: defaults::chunk_size(),
            chunk_pause_ms: defaults::chunk_pause_ms(),
            chunk_timeout_secs: defaults::chunk_timeout_secs(),
            transaction_timeout_secs: defaults::transaction_timeout_secs(),
        }
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string; usually supplied through `DATABASE_URL`
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "defaults::max_connections")]
    pub max_connections: u32,

    #[serde(default = "defaults::idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "defaults::acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: defaults::max_connections(),
            idle_timeout_secs: defaults::idle_timeout_secs(),
            acquire_timeout_secs: defaults::acquire_timeout_secs(),
        }
    }
}

/// Shutdown drain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// How often a pending drain re-checks outstanding locks
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::poll_interval_ms(),
        }
    }
}

/// Read-path cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of a cached hit
    #[serde(default = "defaults::cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Lifetime of a cached "not found"
    #[serde(default = "defaults::negative_ttl_secs")]
    pub negative_ttl_secs: u64,

    /// Most distinct lookups kept; least recently used are evicted
    #[serde(default = "defaults::cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: defaults::cache_ttl_secs(),
            negative_ttl_secs: defaults::negative_ttl_secs(),
            capacity: defaults::cache_capacity(),
        }
    }
}

/// Status / lookup HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    #[serde(default = "defaults::bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            bind: defaults::bind(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

/// One upstream roster endpoint as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Server identifier attached to every record from this source
    pub tag: String,

    /// Roster endpoint URL
    pub url: String,
}

mod defaults {
    use super::SourceConfig;

    // Fetcher defaults
    pub fn fetcher_name() -> String {
        "CnRAPI".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; roster-sync/0.1)".into()
    }
    pub fn timeout_ms() -> u64 {
        800
    }
    pub fn delay_ms() -> u64 {
        1000
    }
    pub fn max_retries() -> u32 {
        2
    }
    pub fn enabled() -> bool {
        true
    }

    // Scheduler defaults
    pub fn period_secs() -> u64 {
        60
    }

    // Storage defaults
    pub fn single_max() -> usize {
        50
    }
    pub fn chunked_max() -> usize {
        100
    }
    pub fn split_max() -> usize {
        500
    }
    pub fn chunk_size() -> usize {
        50
    }
    pub fn chunk_pause_ms() -> u64 {
        10
    }
    pub fn chunk_timeout_secs() -> u64 {
        30
    }
    pub fn transaction_timeout_secs() -> u64 {
        60
    }

    // Database defaults
    pub fn max_connections() -> u32 {
        20
    }
    pub fn idle_timeout_secs() -> u64 {
        30
    }
    pub fn acquire_timeout_secs() -> u64 {
        60
    }

    // Guard / cache / server defaults
    pub fn poll_interval_ms() -> u64 {
        200
    }
    pub fn cache_ttl_secs() -> u64 {
        30
    }
    pub fn negative_ttl_secs() -> u64 {
        10
    }
    pub fn cache_capacity() -> usize {
        1024
    }
    pub fn bind() -> String {
        "0.0.0.0:3000".into()
    }
    pub fn log_level() -> String {
        "info".into()
    }

    // Source defaults
    pub fn sources() -> Vec<SourceConfig> {
        [
            ("US1", "https://api.gtacnr.net/cnr/players?serverId=US1"),
            ("US2", "https://api.gtacnr.net/cnr/players?serverId=US2"),
            ("EU1", "https://api.gtacnr.net/cnr/players?serverId=EU1"),
            ("EU2", "https://api.gtacnr.net/cnr/players?serverId=EU2"),
            ("SEA", "https://sea.gtacnr.net/cnr/players?serverId=SEA"),
        ]
        .into_iter()
        .map(|(tag, url)| SourceConfig {
            tag: tag.to_string(),
            url: url.to_string(),
        })
        .collect()
    }
}
