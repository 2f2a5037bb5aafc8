// src/models/source.rs

//! Upstream source descriptor.

use serde::Serialize;
use url::Url;

use crate::error::{AppError, Result};

/// A validated upstream roster endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDescriptor {
    tag: String,
    endpoint: Url,
}

impl SourceDescriptor {
    /// Build a descriptor, rejecting empty tags and malformed or non-HTTP URLs.
    pub fn parse(tag: &str, endpoint: &str) -> Result<Self> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(AppError::config(format!(
                "Source tag is empty for {endpoint}"
            )));
        }

        let url = Url::parse(endpoint)
            .map_err(|e| AppError::config(format!("Invalid URL for {tag}: {endpoint} ({e})")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::config(format!(
                "Unsupported scheme for {tag}: {}",
                url.scheme()
            )));
        }

        Ok(Self {
            tag: tag.to_string(),
            endpoint: url,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}
