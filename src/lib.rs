// src/lib.rs

//! Roster Sync Library
//!
//! Periodically pulls player rosters from game-server APIs, normalizes them
//! and upserts them into PostgreSQL, with a cached read path on top.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod services;
pub mod storage;
pub mod utils;
