//! HTTP side of hoard.
//!
//! This crate provides the reqwest-backed [`Fetcher`](hoard_core::Fetcher)
//! used by the server to populate the resource cache.

pub mod fetch;

pub use fetch::{FetchConfig, HttpFetcher};
