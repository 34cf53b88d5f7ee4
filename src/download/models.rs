//! 下载相关的数据模型定义。
//!
//! 包含章节号编码格式、漫画描述、单章/单部下载结果与错误类型。

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// 章节号补零宽度。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChapterFormat {
    /// `1`, `2`, `10`
    Unpadded,
    /// `01`, `02`, `10`
    TwoDigits,
    /// `001`, `002`, `010`
    ThreeDigits,
}

impl ChapterFormat {
    /// 从宽到窄的探测顺序。
    pub const PROBE_ORDER: [ChapterFormat; 3] = [
        ChapterFormat::ThreeDigits,
        ChapterFormat::TwoDigits,
        ChapterFormat::Unpadded,
    ];

    pub fn width(self) -> usize {
        match self {
            ChapterFormat::Unpadded => 1,
            ChapterFormat::TwoDigits => 2,
            ChapterFormat::ThreeDigits => 3,
        }
    }

    pub fn from_digits(digits: u32) -> Option<Self> {
        match digits {
            1 => Some(ChapterFormat::Unpadded),
            2 => Some(ChapterFormat::TwoDigits),
            3 => Some(ChapterFormat::ThreeDigits),
            _ => None,
        }
    }

    pub fn encode(self, chapter: u32) -> String {
        format!("{:0width$}", chapter, width = self.width())
    }
}

impl std::fmt::Display for ChapterFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChapterFormat::Unpadded => f.write_str("%d"),
            ChapterFormat::TwoDigits => f.write_str("%02d"),
            ChapterFormat::ThreeDigits => f.write_str("%03d"),
        }
    }
}

/// 一部漫画：名称 + 可选的声明格式。检测到的格式由 `FormatDetector` 单独保存。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    pub name: String,
    pub hint: Option<ChapterFormat>,
}

impl Series {
    pub fn new(name: impl Into<String>, hint: Option<ChapterFormat>) -> Self {
        Self {
            name: name.into(),
            hint,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterOutcome {
    /// 第 1 页在所有候选编码下都不存在。
    Absent,
    Downloaded { pages: u32, encoding: String },
}

impl ChapterOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, ChapterOutcome::Downloaded { .. })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeriesUpdate {
    /// 回填阶段成功下载的章节数（含重新下载的最后一章）。
    pub healed: usize,
    /// 向后探测阶段发现的新章节数。
    pub discovered: usize,
    /// 向后探测实际尝试过的章节数。
    pub probed: usize,
    pub interrupted: bool,
}

impl SeriesUpdate {
    pub fn total(&self) -> usize {
        self.healed + self.discovered
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("interrupted")]
    Interrupted,
    #[error("worker pool: {0}")]
    Pool(#[from] super::worker_pool::PoolError),
}
