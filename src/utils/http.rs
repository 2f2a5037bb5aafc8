// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use crate::error::Result;
use crate::models::FetcherConfig;

/// Create a configured asynchronous HTTP client.
///
/// The client-wide timeout is a backstop; each fetch also sets its own
/// per-request timeout.
pub fn create_async_client(config: &FetcherConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_millis(config.timeout_ms.max(1) * 4))
        .connect_timeout(Duration::from_millis(config.timeout_ms.max(1)))
        .build()?;
    Ok(client)
}
