//! Utility modules for the roster sync service.

pub mod http;
pub mod log;
pub mod signal;
