//! 远端资源获取。
//!
//! `Fetcher` 只负责"给定 URL 拿到字节"，是否存在由调用方根据成功与否推断。

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, CONNECTION, HeaderMap, HeaderValue, USER_AGENT};
use thiserror::Error;
use tracing::debug;

use crate::base_system::context::Config;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("resource not found (HTTP {0})")]
    NotFound(u16),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("empty response body")]
    Empty,
}

impl FetchError {
    /// 可能重试后成功的错误：网络层错误、超时、5xx、429。
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Status(code) => *code >= 500 || *code == 429,
            FetchError::NotFound(_) | FetchError::Empty => false,
        }
    }

    pub fn from_status(code: u16) -> Self {
        match code {
            404 | 410 => FetchError::NotFound(code),
            other => FetchError::Status(other),
        }
    }
}

pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        // reqwest 未启用 gzip 解码，要求服务端返回原始字节
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("image/*,*/*;q=0.8"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .unwrap_or(HeaderValue::from_static("Mozilla/5.0")),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout.max(1)))
            .connect_timeout(Duration::from_secs(config.connect_timeout.max(1)))
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            debug!(target: "fetch", url, status = status.as_u16(), "请求未成功");
            return Err(FetchError::from_status(status.as_u16()));
        }

        let bytes = resp
            .bytes()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        if bytes.is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_separates_absence_from_transient() {
        assert!(matches!(FetchError::from_status(404), FetchError::NotFound(404)));
        assert!(matches!(FetchError::from_status(410), FetchError::NotFound(410)));
        assert!(!FetchError::from_status(404).is_transient());
        assert!(FetchError::from_status(503).is_transient());
        assert!(FetchError::from_status(429).is_transient());
        assert!(!FetchError::from_status(403).is_transient());
        assert!(FetchError::Transport("reset".into()).is_transient());
        assert!(!FetchError::Empty.is_transient());
    }
}
