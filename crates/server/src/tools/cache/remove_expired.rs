//! cache_remove_expired tool implementation.
//!
//! Sweeps entries whose freshness window has passed.

use hoard_core::ResourceCache;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tools::json_result;

/// Output from the cache_remove_expired tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheRemoveExpiredOutput {
    /// Number of entries removed.
    pub removed: u64,
}

/// Implementation of the cache_remove_expired tool.
pub async fn remove_expired_impl(cache: &ResourceCache) -> Result<CallToolResult, McpError> {
    let removed = cache.remove_expired().await?;
    json_result(&CacheRemoveExpiredOutput { removed })
}
