//! 日志系统：终端（stderr）+ `logs/latest.log`。
//!
//! 退出时把 `latest.log` 压缩为 `logs/log_<时间>.zip`，只保留最近若干份归档。
//! Ctrl-C 第一次只置位取消标志，让正在进行的更新提前收尾；第二次直接退出进程。

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{error, warn};
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::{self, time::UtcTime, writer::BoxMakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use zip::CompressionMethod;
use zip::write::FileOptions;

const ROTATE_BYTES: u64 = 10 * 1024 * 1024;
const KEEP_ARCHIVES: usize = 20;
const FLUSH_WAIT: Duration = Duration::from_millis(300);

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("subscriber init failed: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("time formatting failed: {0}")]
    Time(#[from] time::error::Format),
}

#[derive(Clone, Copy, Debug)]
pub struct LogOptions {
    /// 终端输出 DEBUG 级别（文件始终记录 DEBUG）。
    pub debug: bool,
    pub use_color: bool,
    pub archive_on_exit: bool,
    /// 关闭后只写文件。
    pub console: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            debug: false,
            use_color: true,
            archive_on_exit: true,
            console: true,
        }
    }
}

/// 日志目录与当前日志文件的位置。
#[derive(Debug, Clone)]
pub struct LogPaths {
    pub dir: PathBuf,
    pub latest: PathBuf,
}

impl LogPaths {
    /// `base_dir` 为空时使用当前目录下的 `logs/`。
    pub fn under(base_dir: Option<&Path>) -> Self {
        let dir = match base_dir {
            Some(base) => base.join("logs"),
            None => PathBuf::from("logs"),
        };
        let latest = dir.join("latest.log");
        Self { dir, latest }
    }
}

pub struct LogSystem {
    runtime: Arc<LogRuntime>,
}

impl LogSystem {
    /// `base_dir` 为空时日志写到当前目录的 `logs/`。
    pub fn init_with_base(
        options: LogOptions,
        base_dir: Option<&Path>,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self, LogError> {
        let paths = LogPaths::under(base_dir);
        fs::create_dir_all(&paths.dir)?;
        // 上次异常退出留下的大文件先归档
        if fs::metadata(&paths.latest).is_ok_and(|m| m.len() >= ROTATE_BYTES) {
            archive_latest(&paths)?;
        }

        let (file_writer, guard) = NonBlockingBuilder::default()
            .lossy(false)
            .finish(rolling::never(&paths.dir, "latest.log"));

        let console = fmt::layer()
            .with_target(false)
            .with_thread_names(options.debug)
            .with_ansi(options.use_color)
            .with_writer(if options.console {
                BoxMakeWriter::new(io::stderr)
            } else {
                BoxMakeWriter::new(io::sink)
            })
            .with_filter(if options.debug {
                LevelFilter::DEBUG
            } else {
                LevelFilter::INFO
            });

        let file = fmt::layer()
            .with_timer(UtcTime::new(format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
            )))
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_writer(file_writer)
            .with_filter(LevelFilter::DEBUG);

        if let Err(err) = tracing_subscriber::registry().with(console).with(file).try_init() {
            let msg = err.to_string();
            return Err(if msg.contains("already") {
                LogError::AlreadyInitialized
            } else {
                LogError::SubscriberInit(err)
            });
        }

        let runtime = Arc::new(LogRuntime {
            paths,
            guard: Mutex::new(Some(guard)),
            closed: AtomicBool::new(false),
            archive_on_exit: options.archive_on_exit,
        });
        runtime.install_interrupt(cancel);
        install_panic_logger();

        Ok(Self { runtime })
    }
}

/// 退出时刷新并（按配置）归档日志。
impl Drop for LogSystem {
    fn drop(&mut self) {
        self.runtime.close();
    }
}

struct LogRuntime {
    paths: LogPaths,
    guard: Mutex<Option<WorkerGuard>>,
    closed: AtomicBool,
    archive_on_exit: bool,
}

impl LogRuntime {
    fn install_interrupt(self: &Arc<Self>, cancel: Arc<AtomicBool>) {
        let runtime = Arc::clone(self);
        let presses = AtomicUsize::new(0);
        let result = ctrlc::set_handler(move || {
            if presses.fetch_add(1, Ordering::SeqCst) == 0 {
                cancel.store(true, Ordering::SeqCst);
                warn!("收到中断信号，正在停止后续任务（再次按 Ctrl-C 强制退出）");
                return;
            }
            runtime.close();
            std::process::exit(130);
        });
        if let Err(err) = result {
            warn!("无法注册 Ctrl-C 处理: {err}");
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // 丢弃 guard 会把缓冲区写完
        if let Ok(mut guard) = self.guard.lock() {
            guard.take();
        }
        if !self.archive_on_exit {
            return;
        }
        std::thread::sleep(FLUSH_WAIT);
        if let Err(err) = archive_latest(&self.paths) {
            eprintln!("failed to archive log: {err}");
        }
        if let Err(err) = prune_archives(&self.paths.dir, KEEP_ARCHIVES) {
            eprintln!("failed to prune old logs: {err}");
        }
    }
}

fn install_panic_logger() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let thread = std::thread::current();
        let name = thread.name().unwrap_or("<unnamed>");
        match info.location() {
            Some(loc) => error!("线程 {name} panic ({}:{}): {info}", loc.file(), loc.line()),
            None => error!("线程 {name} panic: {info}"),
        }
        previous(info);
    }));
}

/// 把 `latest.log` 压缩为 `log_<时间>.zip` 并删除原文件；空日志直接删除。
pub fn archive_latest(paths: &LogPaths) -> Result<Option<PathBuf>, LogError> {
    let len = match fs::metadata(&paths.latest) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if len == 0 {
        let _ = fs::remove_file(&paths.latest);
        return Ok(None);
    }

    let stamp = OffsetDateTime::now_utc().format(format_description!(
        "[year][month][day]_[hour][minute][second]"
    ))?;
    let mut target = paths.dir.join(format!("log_{stamp}.zip"));
    let mut n = 1;
    while target.exists() {
        target = paths.dir.join(format!("log_{stamp}_{n}.zip"));
        n += 1;
    }

    {
        let mut zip = zip::ZipWriter::new(File::create(&target)?);
        zip.start_file(
            format!("{stamp}.log"),
            FileOptions::default().compression_method(CompressionMethod::Deflated),
        )?;
        let mut source = File::open(&paths.latest)?;
        io::copy(&mut source, &mut zip)?;
        zip.finish()?;
    }

    let _ = fs::remove_file(&paths.latest);
    Ok(Some(target))
}

/// 只保留最新的 `keep` 份归档，返回删除的数量。
pub fn prune_archives(dir: &Path, keep: usize) -> io::Result<usize> {
    let mut archives: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension().is_some_and(|ext| ext == "zip")
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("log_"))
        })
        .collect();
    if archives.len() <= keep {
        return Ok(0);
    }
    // 文件名带时间戳，字典序即时间顺序
    archives.sort();
    let excess = archives.len() - keep;
    let mut removed = 0;
    for path in archives.into_iter().take(excess) {
        if fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}
