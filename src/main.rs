use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use manga_updater::base_system::config::load_or_create_with_base;
use manga_updater::base_system::context::Config;
use manga_updater::base_system::logging::{LogOptions, LogSystem};
use manga_updater::download::{ChapterFormat, MangaUpdater};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "manga-updater")]
#[command(about = "Manga chapter updater")]
struct Cli {
    /// 启用调试日志输出
    #[arg(long, default_value_t = false, global = true)]
    debug: bool,

    /// 显示版本信息后退出
    #[arg(long, default_value_t = false)]
    version: bool,

    /// 数据目录路径（用于存放 config.yml 和 logs 等文件）
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// 指定配置文件路径
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 更新保存目录下的所有漫画（默认）
    Update,
    /// 按列表文件下载整部漫画
    Download {
        /// 列表文件，默认使用配置中的 data_file
        #[arg(long)]
        list: Option<PathBuf>,
    },
    /// 下载单部漫画的 1..=CHAPTERS 章
    Fetch {
        name: String,
        chapters: u32,
        /// 章节号位数：1、2 或 3，不填则自动检测
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=3))]
        format: Option<u32>,
    },
    /// 删除不含任何文件的章节目录
    Cleanup,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("Manga Updater v{}", VERSION);
        return Ok(());
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let data_dir = cli.data_dir.as_deref();
    let _log = init_logging(cli.debug, data_dir, cancel.clone())?;
    info!(target: "startup", "当前版本: v{}", VERSION);

    let config = load_or_create_with_base::<Config>(cli.config.as_deref(), data_dir)
        .map_err(|e| anyhow!(e.to_string()))?;
    let updater = MangaUpdater::from_config(config.clone(), cancel)?;

    match cli.command.unwrap_or(Command::Update) {
        Command::Update => {
            let total = updater.update_all();
            info!(target: "startup", "本次共下载 {} 个新章节", total);
        }
        Command::Download { list } => {
            let list = list.unwrap_or_else(|| config.data_file_path());
            let processed = updater.download_from_list(&list);
            info!(target: "startup", "共处理 {} 部漫画", processed);
        }
        Command::Fetch {
            name,
            chapters,
            format,
        } => {
            let format = format.and_then(ChapterFormat::from_digits);
            updater.retrieve_series(&name, chapters, format);
        }
        Command::Cleanup => {
            let report = updater.sweep_empty_chapters();
            if report.failures > 0 {
                error!(target: "startup", "{} 个目录删除失败", report.failures);
            }
            info!(
                target: "startup",
                "清理完成：检查 {} 部漫画、{} 个章节，删除 {} 个空章节",
                report.series_checked,
                report.chapters_checked,
                report.chapters_removed
            );
        }
    }
    Ok(())
}

fn init_logging(debug: bool, base_dir: Option<&Path>, cancel: Arc<AtomicBool>) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        use_color: true,
        archive_on_exit: true,
        console: true,
    };
    LogSystem::init_with_base(opts, base_dir, cancel).map_err(|e| anyhow!(e))
}
