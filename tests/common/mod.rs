#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use manga_updater::base_system::context::Config;
use manga_updater::network_parser::{FetchError, Fetcher};

pub const BASE: &str = "http://remote/uploads/manga";

/// 内存中的远端：只有登记过的 URL 返回内容，其余一律 404。
#[derive(Default)]
pub struct MemoryRemote {
    pages: Mutex<HashMap<String, Vec<u8>>>,
    calls: Mutex<Vec<String>>,
}

impl MemoryRemote {
    pub fn page_url(series: &str, encoding: &str, page: u32, variant: &str) -> String {
        format!("{BASE}/{series}/chapters/ch{encoding}/{page:02}{variant}")
    }

    /// 登记一章的 1..=pages 页。
    pub fn add_chapter(&self, series: &str, encoding: &str, pages: u32, variant: &str) {
        let mut map = self.pages.lock().unwrap();
        for page in 1..=pages {
            map.insert(
                Self::page_url(series, encoding, page, variant),
                format!("{series}/{encoding}/{page}").into_bytes(),
            );
        }
    }

    pub fn add_raw(&self, url: String, body: Vec<u8>) {
        self.pages.lock().unwrap().insert(url, body);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn requested_chapter(&self, series: &str, encoding: &str) -> bool {
        let needle = format!("/{series}/chapters/ch{encoding}/");
        self.calls().iter().any(|url| url.contains(&needle))
    }
}

impl Fetcher for MemoryRemote {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        match self.pages.lock().unwrap().get(url) {
            Some(body) if body.is_empty() => Err(FetchError::Empty),
            Some(body) => Ok(body.clone()),
            None => Err(FetchError::NotFound(404)),
        }
    }
}

pub fn test_config(dir: &Path) -> Config {
    Config {
        base_url: BASE.to_string(),
        save_path: dir.join("Mangas").to_string_lossy().to_string(),
        data_file: dir.join("data.txt").to_string_lossy().to_string(),
        show_progress: false,
        series_workers: 2,
        download_workers: 3,
        ..Config::default()
    }
}

/// 在本地造一个已下载的章节（含一页）。
pub fn seed_chapter(root: &Path, series: &str, chapter: u32) -> PathBuf {
    let dir = root.join(series).join(format!("Chapter {chapter}"));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("01.jpg"), b"local").unwrap();
    dir
}

/// 包装 `MemoryRemote`：某个 URL 请求成功后置位取消标志，模拟中途按下 Ctrl-C。
pub struct CancelAfter {
    pub remote: MemoryRemote,
    trigger: String,
    cancel: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl CancelAfter {
    pub fn new(
        remote: MemoryRemote,
        trigger: String,
        cancel: std::sync::Arc<std::sync::atomic::AtomicBool>,
    ) -> Self {
        Self {
            remote,
            trigger,
            cancel,
        }
    }
}

impl Fetcher for CancelAfter {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let result = self.remote.fetch(url);
        if result.is_ok() && url == self.trigger {
            self.cancel.store(true, std::sync::atomic::Ordering::SeqCst);
        }
        result
    }
}
