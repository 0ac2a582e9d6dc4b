//! cache_clear tool implementation.
//!
//! Drops every cached file and record.

use hoard_core::ResourceCache;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::json_result;

/// Output from the cache_clear tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheClearOutput {
    pub cleared: bool,
}

/// Implementation of the cache_clear tool.
pub async fn clear_impl(cache: &ResourceCache) -> Result<CallToolResult, McpError> {
    cache.clear().await?;
    json_result(&CacheClearOutput { cleared: true })
}
