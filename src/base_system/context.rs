//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigError, ConfigSpec, FieldMeta};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 远端配置
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_page_variants")]
    pub page_variants: Vec<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    // 路径配置
    #[serde(default = "default_save_path")]
    pub save_path: String,
    #[serde(default = "default_data_file")]
    pub data_file: String,

    // 并发配置
    #[serde(default)]
    pub series_workers: usize,
    #[serde(default = "default_chapter_workers")]
    pub chapter_workers: usize,
    #[serde(default)]
    pub download_workers: usize,
    #[serde(default = "default_update_timeout_hours")]
    pub update_timeout_hours: u64,
    #[serde(default = "default_download_timeout_hours")]
    pub download_timeout_hours: u64,

    // 探测配置
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default)]
    pub chapter_interval_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_false")]
    pub strict_probe: bool,
    #[serde(default = "default_probe_retries")]
    pub probe_retries: u32,
    #[serde(default = "default_min_wait_time")]
    pub min_wait_time: u64,
    #[serde(default = "default_max_wait_time")]
    pub max_wait_time: u64,

    // 界面
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            page_variants: default_page_variants(),
            user_agent: default_user_agent(),
            save_path: default_save_path(),
            data_file: default_data_file(),
            series_workers: 0,
            chapter_workers: default_chapter_workers(),
            download_workers: 0,
            update_timeout_hours: default_update_timeout_hours(),
            download_timeout_hours: default_download_timeout_hours(),
            max_consecutive_failures: default_max_consecutive_failures(),
            chapter_interval_ms: 0,
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            strict_probe: default_false(),
            probe_retries: default_probe_retries(),
            min_wait_time: default_min_wait_time(),
            max_wait_time: default_max_wait_time(),
            show_progress: default_true(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 19] = [
            FieldMeta {
                name: "base_url",
                description: "漫画图片根地址，页面地址为 {base_url}/{漫画名}/chapters/ch{章节}/{页码}{后缀}",
            },
            FieldMeta {
                name: "page_variants",
                description: "页面文件后缀，按顺序尝试",
            },
            FieldMeta {
                name: "user_agent",
                description: "请求使用的 User-Agent",
            },
            FieldMeta {
                name: "save_path",
                description: "漫画保存根目录",
            },
            FieldMeta {
                name: "data_file",
                description: "漫画列表文件，每行: 名称,章节数,格式位数(1/2/3)",
            },
            FieldMeta {
                name: "series_workers",
                description: "同时更新的漫画数（0 表示 min(CPU 核数, 5)）",
            },
            FieldMeta {
                name: "chapter_workers",
                description: "更新时每部漫画的章节并发数",
            },
            FieldMeta {
                name: "download_workers",
                description: "整部下载时的章节并发数（0 表示 min(CPU 核数, 10)）",
            },
            FieldMeta {
                name: "update_timeout_hours",
                description: "更新线程池关闭时的最长等待（小时）",
            },
            FieldMeta {
                name: "download_timeout_hours",
                description: "章节线程池关闭时的最长等待（小时）",
            },
            FieldMeta {
                name: "max_consecutive_failures",
                description: "连续多少章不存在后停止向后探测",
            },
            FieldMeta {
                name: "chapter_interval_ms",
                description: "向后探测时相邻章节之间的等待, 单位ms",
            },
            FieldMeta {
                name: "request_timeout",
                description: "请求超时时间（秒）",
            },
            FieldMeta {
                name: "connect_timeout",
                description: "连接超时时间（秒）",
            },
            FieldMeta {
                name: "strict_probe",
                description: "严格探测：区分 404 与网络错误，网络错误时重试",
            },
            FieldMeta {
                name: "probe_retries",
                description: "严格探测下的最大重试次数",
            },
            FieldMeta {
                name: "min_wait_time",
                description: "重试最小等待时间, 单位ms",
            },
            FieldMeta {
                name: "max_wait_time",
                description: "重试最大等待时间, 单位ms",
            },
            FieldMeta {
                name: "show_progress",
                description: "整部下载时是否显示进度条",
            },
        ];
        &FIELDS
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Validation("base_url 不能为空".to_string()));
        }
        if self.page_variants.iter().all(|v| v.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "page_variants 至少需要一个后缀".to_string(),
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::Validation(
                "max_consecutive_failures 必须大于 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn default_save_dir(&self) -> PathBuf {
        if self.save_path.trim().is_empty() {
            PathBuf::from(default_save_path())
        } else {
            PathBuf::from(&self.save_path)
        }
    }

    pub fn data_file_path(&self) -> PathBuf {
        PathBuf::from(&self.data_file)
    }

    pub fn series_pool_size(&self) -> usize {
        pool_size(self.series_workers, 5)
    }

    pub fn chapter_pool_size(&self) -> usize {
        self.chapter_workers.max(1)
    }

    pub fn download_pool_size(&self) -> usize {
        pool_size(self.download_workers, 10)
    }

    pub fn update_timeout(&self) -> Duration {
        Duration::from_secs(self.update_timeout_hours.max(1) * 3600)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_hours.max(1) * 3600)
    }

    pub fn chapter_interval(&self) -> Duration {
        Duration::from_millis(self.chapter_interval_ms)
    }
}

/// 0 表示按 CPU 核数自动决定，并以 `cap` 为上限。
fn pool_size(configured: usize, cap: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cores.min(cap).max(1)
}

fn default_false() -> bool {
    false
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "https://zuragtnom.site//uploads/manga".to_string()
}

fn default_page_variants() -> Vec<String> {
    vec![".jpg".to_string(), ".webp".to_string(), ".png".to_string()]
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36".to_string()
}

fn default_save_path() -> String {
    "Mangas".to_string()
}

fn default_data_file() -> String {
    "data.txt".to_string()
}

fn default_chapter_workers() -> usize {
    3
}

fn default_update_timeout_hours() -> u64 {
    5
}

fn default_download_timeout_hours() -> u64 {
    1
}

fn default_max_consecutive_failures() -> u32 {
    5
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_probe_retries() -> u32 {
    2
}

fn default_min_wait_time() -> u64 {
    500
}

fn default_max_wait_time() -> u64 {
    4000
}
