//! 本地已下载章节扫描。
//!
//! 每次更新前重新读取目录，不缓存结果。`Chapter N` 目录下任意深度至少有一个文件才算已下载。

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tracing::{debug, error};

use crate::base_system::book_paths::{CHAPTER_PREFIX, parse_chapter_dir_name};
use crate::base_system::file_cleaner::contains_regular_file;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LocalChapters {
    pub existing: BTreeSet<u32>,
}

impl LocalChapters {
    /// 最大的已下载章节号，没有则为 0。
    pub fn last_chapter(&self) -> u32 {
        self.existing.last().copied().unwrap_or(0)
    }

    pub fn contains(&self, chapter: u32) -> bool {
        self.existing.contains(&chapter)
    }
}

pub fn existing_chapters(series_dir: &Path) -> BTreeSet<u32> {
    scan_series(series_dir).existing
}

pub fn last_chapter(series_dir: &Path) -> u32 {
    scan_series(series_dir).last_chapter()
}

pub fn scan_series(series_dir: &Path) -> LocalChapters {
    let mut out = LocalChapters::default();
    let entries = match fs::read_dir(series_dir) {
        Ok(rd) => rd,
        Err(err) => {
            error!(target: "local_state", dir = %series_dir.display(), "读取漫画目录失败: {err}");
            return out;
        }
    };

    for entry in entries.flatten() {
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(CHAPTER_PREFIX.trim_end()) {
            continue;
        }
        let Some(chapter) = parse_chapter_dir_name(&name) else {
            debug!(target: "local_state", "忽略无法识别的章节目录: {name:?}");
            continue;
        };
        match contains_regular_file(entry.path()) {
            Ok(true) => {
                out.existing.insert(chapter);
            }
            Ok(false) => {
                debug!(target: "local_state", chapter, "章节目录为空，视为未下载");
            }
            Err(err) => {
                debug!(target: "local_state", chapter, "扫描章节目录失败: {err}");
            }
        }
    }
    out
}
