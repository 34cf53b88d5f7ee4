//! Manga Updater：按固定 URL 规则探测并下载漫画章节图片。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/路径/清理/漫画列表等基础设施
//! - `network_parser`：HTTP 抓取
//! - `download`：格式探测、页面探测、回填与向后探测的编排

pub mod base_system;
pub mod download;
pub mod network_parser;

pub use base_system::context::Config;
pub use download::MangaUpdater;
