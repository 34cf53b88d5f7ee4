//! 页面存在性探测。
//!
//! 按后缀优先级逐个请求页面，第一个成功的后缀即写入章节目录。
//! 默认模式下任何请求失败都等同于"不存在"；严格模式只把 404/410 当作不存在，
//! 其余错误按退避重试。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use super::worker_pool::pause;
use crate::base_system::book_paths::{page_file_name, page_label};
use crate::base_system::context::Config;
use crate::network_parser::{FetchError, Fetcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    Lenient,
    Strict {
        retries: u32,
        min_wait: Duration,
        max_wait: Duration,
    },
}

impl ProbeMode {
    pub fn from_config(cfg: &Config) -> Self {
        if !cfg.strict_probe {
            return ProbeMode::Lenient;
        }
        let min_wait = Duration::from_millis(cfg.min_wait_time.max(1));
        ProbeMode::Strict {
            retries: cfg.probe_retries,
            min_wait,
            max_wait: Duration::from_millis(cfg.max_wait_time).max(min_wait),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    /// 所有后缀都失败；`last` 为最后一次请求的错误。
    #[error("page missing on remote (last error: {last:?})")]
    Missing { last: Option<FetchError> },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub struct PageProbe {
    fetcher: Arc<dyn Fetcher>,
    base_url: String,
    variants: Vec<String>,
    mode: ProbeMode,
    cancel: Arc<AtomicBool>,
}

impl PageProbe {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        base_url: &str,
        variants: Vec<String>,
        mode: ProbeMode,
    ) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            variants: variants
                .into_iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect(),
            mode,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 严格模式的重试等待在取消后立即结束。
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn from_config(fetcher: Arc<dyn Fetcher>, cfg: &Config) -> Self {
        Self::new(
            fetcher,
            &cfg.base_url,
            cfg.page_variants.clone(),
            ProbeMode::from_config(cfg),
        )
    }

    pub fn page_url(&self, series: &str, chapter_encoding: &str, page: u32, variant: &str) -> String {
        format!(
            "{}/{}/chapters/ch{}/{}{}",
            self.base_url,
            series,
            chapter_encoding,
            page_label(page),
            variant
        )
    }

    /// 页面是否存在；存在时已写入 `chapter_dir`。
    pub fn probe(&self, series: &str, chapter_encoding: &str, page: u32, chapter_dir: &Path) -> bool {
        match self.try_probe(series, chapter_encoding, page, chapter_dir) {
            Ok(_) => true,
            Err(ProbeError::Missing { .. }) => false,
            Err(err) => {
                warn!(target: "probe", series, page, "{err}");
                false
            }
        }
    }

    /// 与 `probe` 相同，但保留失败原因；成功时返回写入的文件路径。
    pub fn try_probe(
        &self,
        series: &str,
        chapter_encoding: &str,
        page: u32,
        chapter_dir: &Path,
    ) -> Result<PathBuf, ProbeError> {
        let mut last = None;
        for variant in &self.variants {
            let url = self.page_url(series, chapter_encoding, page, variant);
            match self.fetch_with_policy(&url) {
                Ok(bytes) => {
                    let dest = chapter_dir.join(page_file_name(page, variant));
                    write_page(chapter_dir, &dest, &bytes)?;
                    debug!(target: "probe", %url, bytes = bytes.len(), "页面已保存");
                    return Ok(dest);
                }
                Err(err) => {
                    debug!(target: "probe", %url, "{err}");
                    last = Some(err);
                }
            }
        }
        Err(ProbeError::Missing { last })
    }

    fn fetch_with_policy(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let ProbeMode::Strict {
            retries,
            min_wait,
            max_wait,
        } = self.mode
        else {
            return self.fetcher.fetch(url);
        };

        let mut attempt = 0u32;
        loop {
            match self.fetcher.fetch(url) {
                Ok(bytes) => return Ok(bytes),
                Err(err) if err.is_transient() && attempt < retries => {
                    let wait = backoff(min_wait, max_wait, attempt);
                    debug!(target: "probe", url, attempt, "临时错误，{}ms 后重试: {err}", wait.as_millis());
                    if !pause(wait, &self.cancel) {
                        return Err(err);
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn backoff(min_wait: Duration, max_wait: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(10)).unwrap_or(u32::MAX);
    min_wait.saturating_mul(factor).min(max_wait)
}

/// 先写临时文件再改名，避免留下半截页面。
fn write_page(dir: &Path, dest: &Path, bytes: &[u8]) -> Result<(), ProbeError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ProbeError::Io { path, source }
    };

    std::fs::create_dir_all(dir).map_err(io_err(dir))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err(dir))?;
    tmp.write_all(bytes).map_err(io_err(dest))?;
    tmp.persist(dest).map_err(|e| ProbeError::Io {
        path: dest.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}
