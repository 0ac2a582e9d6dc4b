//! Core types and shared functionality for hoard.
//!
//! This crate provides:
//! - File-backed HTTP resource cache with a SQLite metadata store
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;

pub use cache::{CacheKey, CachedStream, FetchOptions, FetchProgress, Fetcher, FreshnessRecord, ResourceCache};
pub use clock::{Clock, SystemClock};
pub use config::AppConfig;
pub use error::Error;
