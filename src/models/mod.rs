// src/models/mod.rs

//! Domain models for the roster sync service.
//!
//! This module contains the data structures shared by the fetch, transform
//! and storage stages, organized by their primary purpose.

mod config;
mod fetch;
mod player;
mod source;

// Re-export all public types
pub use config::{
    CacheConfig, Config, DatabaseConfig, FetcherConfig, GuardConfig, LoggingConfig,
    SchedulerConfig, ServerConfig, SourceConfig, StorageConfig,
};
pub use fetch::{CycleFetchResult, FetchSummary, RawFetchResult, TaggedEntry};
pub use player::{
    PlayerFilter, PlayerRecord, PlayerUpdate, PlayerView, RejectEntry, RejectReason,
    ServerAnnotation,
};
pub use source::SourceDescriptor;
