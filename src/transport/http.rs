use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_RANGE, RANGE, USER_AGENT};
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::sleep;

use crate::transport::{DriverContext, TransferDriver};

#[derive(thiserror::Error, Debug)]
pub enum HttpDriverError {
    #[error("range not supported by server (verified)")]
    RangeNotSupported,

    /// 服务器忽略 Range，直接返回 200 + 全量 body
    #[error("server ignored range and returned full content")]
    RangeIgnored,

    #[error("http status error: {0}")]
    Status(StatusCode),
}

pub struct HttpDriver {
    client: reqwest::Client,
}

impl HttpDriver {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }

    fn build_headers(ctx: &DriverContext) -> anyhow::Result<HeaderMap> {
        let mut h = HeaderMap::new();
        h.insert(USER_AGENT, HeaderValue::from_str(&ctx.user_agent)?);
        Ok(h)
    }

    fn should_retry_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
    }

    pub(crate) fn backoff_delay(ctx: &DriverContext, attempt: u32) -> Duration {
        let base = ctx.retry_backoff_ms.max(1);
        let mul = 1u64 << attempt.min(16);
        Duration::from_millis(base.saturating_mul(mul).min(30_000))
    }

    async fn get_with_retries(
        &self,
        url: &str,
        ctx: &DriverContext,
        range: Option<String>,
    ) -> anyhow::Result<reqwest::Response> {
        let headers = Self::build_headers(ctx)?;

        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..=ctx.retries {
            if attempt > 0 {
                sleep(Self::backoff_delay(ctx, attempt - 1)).await;
            }

            let mut req = self
                .client
                .get(url)
                .headers(headers.clone())
                .timeout(Duration::from_secs(ctx.timeout_secs));
            if let Some(r) = &range {
                req = req.header(RANGE, r.as_str());
            }

            let resp = match req.send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(url, attempt, error = %e, "request failed");
                    last_err = Some(e.into());
                    continue;
                }
            };

            if Self::should_retry_status(resp.status()) {
                last_err = Some(HttpDriverError::Status(resp.status()).into());
                continue;
            }
            return Ok(resp);
        }

        Err(last_err.unwrap_or_else(|| HttpDriverError::Status(StatusCode::REQUEST_TIMEOUT).into()))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, CONTENT_LENGTH)?.trim().parse().ok()
}

/// Total size from `Content-Range: bytes a-b/N`; `*` means unknown.
fn range_total(headers: &HeaderMap) -> Option<u64> {
    let (_, total) = header_str(headers, CONTENT_RANGE)?.rsplit_once('/')?;
    total.trim().parse().ok()
}

fn honours_range(status: StatusCode, headers: &HeaderMap) -> bool {
    status == StatusCode::PARTIAL_CONTENT && headers.contains_key(CONTENT_RANGE)
}

#[async_trait]
impl TransferDriver for HttpDriver {
    fn name(&self) -> &'static str {
        "http-driver"
    }

    /// HEAD for the size, then `bytes=0-0`: only 206 + Content-Range counts as range support.
    async fn probe(&self, url: &str, ctx: &DriverContext) -> anyhow::Result<(Option<u64>, bool)> {
        let headers = Self::build_headers(ctx)?;

        let head = self
            .client
            .head(url)
            .headers(headers.clone())
            .timeout(Duration::from_secs(ctx.timeout_secs))
            .send()
            .await?;

        if !head.status().is_success() {
            return Err(HttpDriverError::Status(head.status()).into());
        }

        let test = self
            .client
            .get(url)
            .headers(headers)
            .timeout(Duration::from_secs(ctx.timeout_secs))
            .header(RANGE, "bytes=0-0")
            .send()
            .await?;

        let supports_ranges = honours_range(test.status(), test.headers());
        // HEAD 没给长度时用 Content-Range 里的总长
        let total = content_length(head.headers()).or_else(|| {
            supports_ranges
                .then(|| range_total(test.headers()))
                .flatten()
        });

        Ok((total, supports_ranges))
    }

    async fn download_range(
        &self,
        url: &str,
        ctx: &DriverContext,
        start: u64,
        end_inclusive: u64,
    ) -> anyhow::Result<Bytes> {
        let resp = self
            .get_with_retries(url, ctx, Some(format!("bytes={}-{}", start, end_inclusive)))
            .await?;

        match resp.status() {
            StatusCode::PARTIAL_CONTENT => Ok(resp.bytes().await?),
            StatusCode::OK => Err(HttpDriverError::RangeIgnored.into()),
            StatusCode::RANGE_NOT_SATISFIABLE => Err(HttpDriverError::RangeNotSupported.into()),
            // 其它成功码不常见，按不支持处理
            s if s.is_success() => Err(HttpDriverError::RangeNotSupported.into()),
            s => Err(HttpDriverError::Status(s).into()),
        }
    }

    async fn download_all(&self, url: &str, ctx: &DriverContext) -> anyhow::Result<Bytes> {
        let resp = self.get_with_retries(url, ctx, None).await?;
        if resp.status().is_success() {
            return Ok(resp.bytes().await?);
        }
        Err(HttpDriverError::Status(resp.status()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let ctx = DriverContext { retry_backoff_ms: 400, ..DriverContext::default() };
        assert_eq!(HttpDriver::backoff_delay(&ctx, 0), Duration::from_millis(400));
        assert_eq!(HttpDriver::backoff_delay(&ctx, 2), Duration::from_millis(1600));
        assert_eq!(HttpDriver::backoff_delay(&ctx, 20), Duration::from_millis(30_000));
    }

    #[test]
    fn range_probe_needs_partial_status_and_content_range() {
        let mut h = HeaderMap::new();
        assert!(!honours_range(StatusCode::PARTIAL_CONTENT, &h));
        h.insert(CONTENT_RANGE, HeaderValue::from_static("bytes 0-0/5"));
        assert!(honours_range(StatusCode::PARTIAL_CONTENT, &h));
        assert!(!honours_range(StatusCode::OK, &h));
        assert_eq!(range_total(&h), Some(5));
    }

    #[test]
    fn unknown_range_total_is_none() {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_RANGE, HeaderValue::from_static("bytes 0-0/*"));
        assert_eq!(range_total(&h), None);
        h.insert(CONTENT_LENGTH, HeaderValue::from_static(" 42"));
        assert_eq!(content_length(&h), Some(42));
    }

    #[test]
    fn only_transient_statuses_are_retried() {
        assert!(HttpDriver::should_retry_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(HttpDriver::should_retry_status(StatusCode::BAD_GATEWAY));
        assert!(!HttpDriver::should_retry_status(StatusCode::NOT_FOUND));
    }
}
