//! 空章节目录清理。
//!
//! 章节目录下（任意深度）没有任何普通文件即视为空，整个目录连同子目录一起删除。
//! 只处理名称形如 `Chapter N` 的目录，其它条目保持不动。

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, error, info, warn};

use super::book_paths::parse_chapter_dir_name;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub series_checked: usize,
    pub chapters_checked: usize,
    pub chapters_removed: usize,
    pub failures: usize,
}

/// 递归查找普通文件；符号链接不跟随，也不算作文件。
pub fn contains_regular_file(path: impl AsRef<Path>) -> io::Result<bool> {
    for entry in fs::read_dir(path.as_ref())? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_file() {
            return Ok(true);
        }
        if file_type.is_dir() && contains_regular_file(entry.path())? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// 遍历 `root` 下每部漫画的章节目录，删除不含文件的章节。
///
/// 根目录不存在时记录错误并返回空报告；单个目录的读写失败只影响该目录。
pub fn sweep_empty_chapters(root: &Path) -> SweepReport {
    let mut report = SweepReport::default();

    let series_entries = match fs::read_dir(root) {
        Ok(rd) => rd,
        Err(err) => {
            error!(target: "cleanup", root = %root.display(), "漫画目录不可读: {err}");
            return report;
        }
    };

    for entry in series_entries.flatten() {
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        report.series_checked += 1;
        sweep_series(&entry.path(), &mut report);
    }

    info!(
        target: "cleanup",
        series = report.series_checked,
        checked = report.chapters_checked,
        removed = report.chapters_removed,
        "清理完成：检查 {} 章，删除 {} 个空章节",
        report.chapters_checked,
        report.chapters_removed
    );
    report
}

fn sweep_series(series_path: &Path, report: &mut SweepReport) {
    let series_name = series_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    debug!(target: "cleanup", series = %series_name, "检查漫画目录");

    let chapters = match fs::read_dir(series_path) {
        Ok(rd) => rd,
        Err(err) => {
            warn!(target: "cleanup", series = %series_name, "读取目录失败: {err}");
            report.failures += 1;
            return;
        }
    };

    for entry in chapters.flatten() {
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if parse_chapter_dir_name(&name).is_none() {
            continue;
        }
        report.chapters_checked += 1;

        let path = entry.path();
        match contains_regular_file(&path) {
            Ok(true) => {}
            Ok(false) => match fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!(target: "cleanup", series = %series_name, "删除空章节: {name}");
                    report.chapters_removed += 1;
                }
                Err(err) => {
                    error!(target: "cleanup", series = %series_name, "删除 {name} 失败: {err}");
                    report.failures += 1;
                }
            },
            Err(err) => {
                warn!(target: "cleanup", series = %series_name, "扫描 {name} 失败: {err}");
                report.failures += 1;
            }
        }
    }
}
