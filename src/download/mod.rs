//! 下载流程模块入口。
//!
//! 子模块：
//! - `models`：数据模型（ChapterFormat / Series / ChapterOutcome 等）
//! - `format`：章节号编码格式探测与锁定
//! - `probe`：单页探测与落盘
//! - `local_state`：本地已下载章节扫描
//! - `worker_pool`：有界队列工作池
//! - `progress`：CLI 进度条
//! - `downloader`：下载主流程编排

pub mod downloader;
pub mod format;
pub mod local_state;
pub mod models;
pub mod probe;
pub(crate) mod progress;
pub mod worker_pool;

pub use downloader::MangaUpdater;
pub use models::{ChapterFormat, ChapterOutcome, DownloadError, Series, SeriesUpdate};
