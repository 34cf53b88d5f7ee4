//! 存储目录命名：`根目录/漫画名/Chapter {序号}/页面文件`。

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

pub const CHAPTER_PREFIX: &str = "Chapter ";

static RE_CHAPTER_DIR: OnceLock<Regex> = OnceLock::new();

fn re_chapter_dir() -> &'static Regex {
    RE_CHAPTER_DIR
        .get_or_init(|| Regex::new(r"^Chapter \s*(\d+)\s*$").expect("compile RE_CHAPTER_DIR"))
}

pub fn series_dir(root: &Path, series: &str) -> PathBuf {
    root.join(series)
}

pub fn chapter_dir_name(chapter: u32) -> String {
    format!("{CHAPTER_PREFIX}{chapter}")
}

pub fn chapter_dir(root: &Path, series: &str, chapter: u32) -> PathBuf {
    series_dir(root, series).join(chapter_dir_name(chapter))
}

/// 页码固定两位补零。
pub fn page_label(page: u32) -> String {
    format!("{page:02}")
}

pub fn page_file_name(page: u32, variant: &str) -> String {
    format!("{}{}", page_label(page), variant)
}

/// 解析 `Chapter N` 目录名，N 必须是正整数；其余一律返回 None。
pub fn parse_chapter_dir_name(name: &str) -> Option<u32> {
    let caps = re_chapter_dir().captures(name)?;
    let n = caps.get(1)?.as_str().parse::<u32>().ok()?;
    (n > 0).then_some(n)
}
