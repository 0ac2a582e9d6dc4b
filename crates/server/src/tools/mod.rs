//! MCP tool implementations.
//!
//! This module contains all tools exposed by the mcp-hoard server.

pub mod cache;
pub mod resource_fetch;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

use crate::error::ToolError;

/// Wrap a tool's output as pretty-printed JSON text content.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| ToolError::SerializeFailed(format!("Failed to serialize output: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::StreamExt;
    use hoard_core::cache::{FetchResponse, Fetcher};
    use hoard_core::{Clock, Error, ResourceCache};
    use rmcp::model::CallToolResult;
    use url::Url;

    /// Answers every request with the same body.
    #[derive(Debug)]
    pub struct StaticFetcher {
        body: &'static [u8],
        max_age: Option<u64>,
    }

    impl StaticFetcher {
        pub fn new(body: &'static [u8], max_age: Option<u64>) -> Self {
            Self { body, max_age }
        }
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn send(&self, _url: &Url) -> Result<FetchResponse, Error> {
            let chunk: Result<Bytes, Error> = Ok(Bytes::from_static(self.body));
            Ok(FetchResponse {
                status: 200,
                max_age: self.max_age,
                content_length: Some(self.body.len() as u64),
                body: futures_util::stream::iter(vec![chunk]).boxed(),
            })
        }
    }

    /// Clock that only moves when told to.
    #[derive(Debug, Clone)]
    pub struct TestClock(Arc<AtomicI64>);

    impl TestClock {
        pub fn at(ts: i64) -> Self {
            Self(Arc::new(AtomicI64::new(ts)))
        }

        pub fn advance(&self, secs: i64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    pub async fn open_cache(dir: &Path, body: &'static [u8], max_age: Option<u64>) -> ResourceCache {
        open_cache_with_clock(dir, body, max_age, TestClock::at(1_000)).await
    }

    pub async fn open_cache_with_clock(
        dir: &Path, body: &'static [u8], max_age: Option<u64>, clock: TestClock,
    ) -> ResourceCache {
        ResourceCache::builder(dir, "resources")
            .packaged_locations(Vec::new())
            .clock(clock)
            .open(StaticFetcher::new(body, max_age))
            .await
            .unwrap()
    }

    /// Decode the JSON text content of a tool result.
    pub fn output<T: serde::de::DeserializeOwned>(result: &CallToolResult) -> T {
        let content_val = serde_json::to_value(&result.content[0]).unwrap();
        let text = content_val
            .get("text")
            .and_then(|v| v.as_str())
            .expect("Expected text field in content");
        serde_json::from_str(text).unwrap()
    }
}
