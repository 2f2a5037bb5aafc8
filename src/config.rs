// src/config.rs

//! Configuration loading utilities.
//!
//! A TOML file supplies the base configuration; a handful of environment
//! variables override it for container deployments.

use std::path::Path;
use std::str::FromStr;

use crate::error::{AppError, Result};
use crate::models::Config;

/// Environment variables read by [`apply_env_overrides`].
pub mod env {
    pub const DATABASE_URL: &str = "DATABASE_URL";
    pub const PORT: &str = "PORT";
    pub const SYNC_PERIOD_SECS: &str = "SYNC_PERIOD_SECS";
    pub const FETCH_DELAY_MS: &str = "FETCH_DELAY_MS";
    pub const FETCH_MAX_RETRIES: &str = "FETCH_MAX_RETRIES";
}

/// Load configuration from a TOML file.
///
/// A missing file falls back to defaults. A file that exists but does not
/// parse is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        log::warn!("Config file {:?} not found, using defaults", path);
        return Ok(Config::default());
    }
    Config::load(path)
}

/// Load, apply environment overrides and validate.
pub fn load(path: &Path) -> Result<Config> {
    resolve(load_config(path)?)
}

/// Apply process environment overrides to a loaded file, then validate.
pub fn resolve(mut config: Config) -> Result<Config> {
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Override config values from `lookup` (normally the process environment).
pub fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(url) = lookup(env::DATABASE_URL).filter(|v| !v.trim().is_empty()) {
        config.database.url = Some(url);
    }
    if let Some(port) = parse_var::<u16>(&lookup, env::PORT)? {
        let host = config
            .server
            .bind
            .rsplit_once(':')
            .map_or("0.0.0.0", |(host, _)| host);
        config.server.bind = format!("{host}:{port}");
    }
    if let Some(period) = parse_var(&lookup, env::SYNC_PERIOD_SECS)? {
        config.scheduler.period_secs = period;
    }
    if let Some(delay) = parse_var(&lookup, env::FETCH_DELAY_MS)? {
        config.fetcher.delay_ms = delay;
    }
    if let Some(retries) = parse_var(&lookup, env::FETCH_MAX_RETRIES)? {
        config.fetcher.max_retries = retries;
    }
    Ok(())
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| AppError::config(format!("{key}={raw:?}: {e}"))),
    }
}
