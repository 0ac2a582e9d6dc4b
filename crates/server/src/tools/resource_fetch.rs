//! resource_fetch tool implementation.
//!
//! Makes sure a URL is cached and fresh, then reports where its bytes live.

use std::time::Duration;

use hoard_core::{CacheKey, FetchOptions, ResourceCache};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::tools::json_result;

/// Input parameters for resource_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResourceFetchParams {
    /// The http(s) URL to fetch. Must not end in `/`.
    pub url: String,

    /// Freshness window in seconds, replacing the server's Cache-Control max-age.
    #[serde(default)]
    pub max_age_secs: Option<u64>,

    /// Also return an ms-appdata URI. Fails if the cache root is not packaged storage.
    #[serde(default)]
    pub include_packaged_uri: bool,
}

/// Output structure for resource_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResourceFetchOutput {
    /// The URL as requested.
    pub url: String,
    /// Cache key derived from the URL.
    pub key: String,
    /// Absolute path of the cached file.
    pub local_path: String,
    /// Size of the cached body.
    pub size_bytes: u64,
    /// Packaged-storage URI, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packaged_uri: Option<String>,
}

/// Implementation of the resource_fetch tool.
pub async fn fetch_impl(cache: &ResourceCache, params: ResourceFetchParams) -> Result<CallToolResult, McpError> {
    if params.url.trim().is_empty() {
        return Err(ToolError::InvalidInput("url cannot be empty".into()).into());
    }

    let packaged_uri = if params.include_packaged_uri {
        let key = CacheKey::derive(&params.url)?;
        Some(cache.packaged_uri(&key)?)
    } else {
        None
    };

    let mut options = FetchOptions::default();
    if let Some(secs) = params.max_age_secs {
        options = options.max_age(Duration::from_secs(secs));
    }

    let entry = cache.resolve(&params.url, &options).await?;
    let local_path = cache.local_path(&entry.key)?;

    tracing::debug!(key = %entry.key, path = %local_path.display(), "Resolved resource");

    let output = ResourceFetchOutput {
        url: params.url,
        key: entry.key.to_string(),
        local_path: local_path.display().to_string(),
        size_bytes: entry.size()?,
        packaged_uri,
    };
    json_result(&output)
}
