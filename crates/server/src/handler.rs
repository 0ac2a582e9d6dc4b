//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use std::sync::Arc;

use crate::tools::{
    cache::{clear_impl, remove_expired_impl},
    resource_fetch::{ResourceFetchParams, fetch_impl},
};

use hoard_core::ResourceCache;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The main MCP server handler for mcp-hoard.
#[derive(Clone)]
pub struct HoardServer {
    cache: Arc<ResourceCache>,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl HoardServer {
    /// Create a new server handler over an opened cache.
    pub fn new(cache: Arc<ResourceCache>) -> Self {
        Self { cache, tool_router: Self::tool_router() }
    }

    /// Fetch a resource through the cache.
    ///
    /// Serves the cached file while it is fresh; otherwise downloads it once,
    /// however many callers ask at the same time.
    #[tool(
        description = "Fetch an http(s) resource through the local cache. Returns the cache key, the absolute path of the cached file, its size and optionally an ms-appdata URI."
    )]
    async fn resource_fetch(&self, params: Parameters<ResourceFetchParams>) -> Result<CallToolResult, McpError> {
        fetch_impl(&self.cache, params.0).await
    }

    /// Remove expired entries.
    #[tool(description = "Delete cached resources whose freshness window has passed. Returns the number removed.")]
    async fn cache_remove_expired(&self) -> Result<CallToolResult, McpError> {
        remove_expired_impl(&self.cache).await
    }

    /// Remove every entry.
    #[tool(description = "Delete every cached resource and its metadata.")]
    async fn cache_clear(&self) -> Result<CallToolResult, McpError> {
        clear_impl(&self.cache).await
    }
}

impl ServerHandler for HoardServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "mcp-hoard".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
