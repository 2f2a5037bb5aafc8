//! Fetch results produced once per source per cycle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::FetchError;
use crate::models::SourceDescriptor;

/// Outcome of fetching one source (after any retries).
#[derive(Debug, Clone, Serialize)]
pub struct RawFetchResult {
    pub tag: String,
    pub url: String,
    pub succeeded: bool,
    pub payload: Option<Value>,
    pub http_status: Option<u16>,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Requests made for this source, including the first
    pub attempts: u32,
}

impl RawFetchResult {
    pub fn success(source: &SourceDescriptor, status: u16, payload: Value, attempts: u32) -> Self {
        Self {
            tag: source.tag().to_string(),
            url: source.endpoint().to_string(),
            succeeded: true,
            payload: Some(payload),
            http_status: Some(status),
            error_message: None,
            timestamp: Utc::now(),
            attempts,
        }
    }

    pub fn failure(source: &SourceDescriptor, error: &FetchError, attempts: u32) -> Self {
        Self {
            tag: source.tag().to_string(),
            url: source.endpoint().to_string(),
            succeeded: false,
            payload: None,
            http_status: error.status(),
            error_message: Some(error.to_string()),
            timestamp: Utc::now(),
            attempts,
        }
    }

    /// Number of roster entries carried by the payload.
    pub fn item_count(&self) -> usize {
        match &self.payload {
            Some(Value::Array(items)) => items.len(),
            Some(_) => 1,
            None => 0,
        }
    }
}

/// A single raw roster entry decorated with its source tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEntry {
    pub source_tag: String,
    pub raw: Value,
}

/// Aggregate counters for one fetch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_time_ms: u64,
    pub avg_time_per_request_ms: u64,
    pub total_items: usize,
}

/// Everything one fetch pass produced, in source order.
#[derive(Debug, Clone, Serialize)]
pub struct CycleFetchResult {
    pub fetcher_name: String,
    pub results: Vec<RawFetchResult>,
    pub summary: FetchSummary,
}

impl CycleFetchResult {
    pub(crate) fn new(fetcher_name: &str, results: Vec<RawFetchResult>, total_time_ms: u64) -> Self {
        let total = results.len();
        let successful = results.iter().filter(|r| r.succeeded).count();
        let total_items = results.iter().map(RawFetchResult::item_count).sum();
        let avg_time_per_request_ms = if total == 0 {
            0
        } else {
            (total_time_ms as f64 / total as f64).round() as u64
        };

        Self {
            fetcher_name: fetcher_name.to_string(),
            summary: FetchSummary {
                total,
                successful,
                failed: total - successful,
                total_time_ms,
                avg_time_per_request_ms,
                total_items,
            },
            results,
        }
    }

    /// Flatten successful payloads into tagged entries.
    ///
    /// Arrays contribute one entry per element (nulls included), any other
    /// payload contributes itself as a single entry.
    pub fn entries(&self) -> Vec<TaggedEntry> {
        let mut entries = Vec::with_capacity(self.summary.total_items);
        for result in self.results.iter().filter(|r| r.succeeded) {
            match &result.payload {
                Some(Value::Array(items)) => {
                    entries.extend(items.iter().map(|raw| TaggedEntry {
                        source_tag: result.tag.clone(),
                        raw: raw.clone(),
                    }));
                }
                Some(other) => entries.push(TaggedEntry {
                    source_tag: result.tag.clone(),
                    raw: other.clone(),
                }),
                None => {}
            }
        }
        entries
    }
}
