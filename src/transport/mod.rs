pub mod http;

use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct DriverContext {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for DriverContext {
    fn default() -> Self {
        Self {
            user_agent: format!("AI-Chat2/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 60,
            retries: 2,
            retry_backoff_ms: 400,
        }
    }
}

/// Byte source the download engine pulls from.
#[async_trait]
pub trait TransferDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Size (if known) and whether ranged requests are honoured.
    async fn probe(&self, _url: &str, _ctx: &DriverContext) -> anyhow::Result<(Option<u64>, bool)> {
        Ok((None, false))
    }

    async fn download_range(
        &self,
        url: &str,
        ctx: &DriverContext,
        start: u64,
        end_inclusive: u64,
    ) -> anyhow::Result<Bytes>;

    async fn download_all(&self, url: &str, ctx: &DriverContext) -> anyhow::Result<Bytes>;
}
