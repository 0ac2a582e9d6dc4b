//! Cache maintenance MCP tools.
//!
//! This module provides tools for sweeping and wiping the resource cache.

pub mod clear;
pub mod remove_expired;

pub use clear::{CacheClearOutput, clear_impl};
pub use remove_expired::{CacheRemoveExpiredOutput, remove_expired_impl};
