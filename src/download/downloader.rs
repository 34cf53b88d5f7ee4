//! 下载主流程编排。
//!
//! - 单章：第 1 页按候选编码逐个探测，命中后锁定编码，再从第 2 页起顺序下载，遇到第一个缺页即结束。
//! - 单部更新：先回填（缺失章节 + 最后一章重新下载），再从最后一章之后向后探测，
//!   连续若干章不存在即停止。
//! - 全部更新：按漫画目录并发，每部漫画内部再用独立的章节线程池。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::format::{FormatDetector, WidthInference};
use super::local_state::{self, LocalChapters};
use super::models::{ChapterFormat, ChapterOutcome, DownloadError, Series, SeriesUpdate};
use super::probe::{PageProbe, ProbeError};
use super::progress::ChapterProgress;
use super::worker_pool::{PoolError, TaskHandle, WorkerPool, pause};
use crate::base_system::book_paths::{chapter_dir, series_dir};
use crate::base_system::context::Config;
use crate::base_system::file_cleaner::{self, SweepReport};
use crate::base_system::series_list::{self, SeriesEntry};
use crate::network_parser::{Fetcher, HttpFetcher};

struct UpdaterInner {
    config: Config,
    root: PathBuf,
    probe: PageProbe,
    formats: FormatDetector,
    cancel: Arc<AtomicBool>,
}

/// 下载/更新入口。内部状态（包括已检测的编码格式）只属于这个实例。
#[derive(Clone)]
pub struct MangaUpdater {
    inner: Arc<UpdaterInner>,
}

impl MangaUpdater {
    pub fn new(config: Config, fetcher: Arc<dyn Fetcher>, cancel: Arc<AtomicBool>) -> Self {
        Self::with_formats(config, fetcher, cancel, FormatDetector::default())
    }

    pub fn with_formats(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        cancel: Arc<AtomicBool>,
        formats: FormatDetector,
    ) -> Self {
        let probe = PageProbe::from_config(fetcher, &config).with_cancel(cancel.clone());
        let root = config.default_save_dir();
        Self {
            inner: Arc::new(UpdaterInner {
                config,
                root,
                probe,
                formats,
                cancel,
            }),
        }
    }

    /// 使用 HTTP 客户端构建。
    pub fn from_config(config: Config, cancel: Arc<AtomicBool>) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new(&config)?;
        Ok(Self::new(config, Arc::new(fetcher), cancel))
    }

    pub fn with_inference(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        cancel: Arc<AtomicBool>,
        inference: Box<dyn WidthInference>,
    ) -> Self {
        Self::with_formats(config, fetcher, cancel, FormatDetector::new(inference))
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn formats(&self) -> &FormatDetector {
        &self.inner.formats
    }

    fn config(&self) -> &Config {
        &self.inner.config
    }

    fn is_cancelled(&self) -> bool {
        self.inner.cancel.load(Ordering::Relaxed)
    }

    // ── 单章 ──────────────────────────────────────────────────────

    /// 下载一章。第 1 页所有候选编码都失败时返回 `Absent`，不写任何文件。
    pub fn retrieve_chapter(
        &self,
        series: &Series,
        chapter: u32,
    ) -> Result<ChapterOutcome, DownloadError> {
        let encodings = self.inner.formats.candidate_encodings(series, chapter);
        self.retrieve_chapter_with(series, chapter, &encodings, true)
    }

    fn retrieve_chapter_with(
        &self,
        series: &Series,
        chapter: u32,
        encodings: &[String],
        detect: bool,
    ) -> Result<ChapterOutcome, DownloadError> {
        if self.is_cancelled() {
            return Err(DownloadError::Interrupted);
        }
        let name = series.name.as_str();
        let dir = chapter_dir(&self.inner.root, name, chapter);

        for encoding in encodings {
            match self.inner.probe.try_probe(name, encoding, 1, &dir) {
                Ok(_) => {
                    if detect {
                        self.inner.formats.record_detected(name, encoding);
                    }
                    debug!(target: "download", series = name, chapter, encoding = %encoding, "找到章节");
                    let pages = self.download_remaining_pages(name, chapter, encoding, &dir)?;
                    return Ok(ChapterOutcome::Downloaded {
                        pages,
                        encoding: encoding.clone(),
                    });
                }
                Err(ProbeError::Missing { .. }) => continue,
                Err(ProbeError::Io { path, source }) => {
                    return Err(DownloadError::Io { path, source });
                }
            }
        }

        debug!(target: "download", series = name, chapter, "第 1 页不存在，章节可能不存在");
        Ok(ChapterOutcome::Absent)
    }

    /// 第 1 页已落盘，从第 2 页开始直到第一个缺页。
    fn download_remaining_pages(
        &self,
        name: &str,
        chapter: u32,
        encoding: &str,
        dir: &Path,
    ) -> Result<u32, DownloadError> {
        let mut pages = 1u32;
        loop {
            if self.is_cancelled() {
                warn!(target: "download", series = name, chapter, pages, "下载中断，章节不完整");
                return Err(DownloadError::Interrupted);
            }
            match self.inner.probe.try_probe(name, encoding, pages + 1, dir) {
                Ok(_) => pages += 1,
                Err(ProbeError::Missing { .. }) => break,
                Err(ProbeError::Io { path, source }) => {
                    return Err(DownloadError::Io { path, source });
                }
            }
        }
        info!(target: "download", series = name, chapter, pages, "漫画: {} | 第 {} 章 | 下载 {} 页", name, chapter, pages);
        Ok(pages)
    }

    fn run_chapter(
        &self,
        pool: &WorkerPool,
        series: &Series,
        chapter: u32,
    ) -> Result<ChapterOutcome, DownloadError> {
        self.submit_chapter(pool, series, chapter, None)?
            .wait(&self.inner.cancel)
            .map_err(from_pool)?
    }

    fn submit_chapter(
        &self,
        pool: &WorkerPool,
        series: &Series,
        chapter: u32,
        fixed: Option<ChapterFormat>,
    ) -> Result<TaskHandle<Result<ChapterOutcome, DownloadError>>, DownloadError> {
        let this = self.clone();
        let series = series.clone();
        pool.submit(
            move || match fixed {
                Some(fmt) => this.retrieve_chapter_with(&series, chapter, &[fmt.encode(chapter)], false),
                None => this.retrieve_chapter(&series, chapter),
            },
            &self.inner.cancel,
        )
        .map_err(from_pool)
    }

    // ── 单部更新 ──────────────────────────────────────────────────

    /// 根据已知的本地章节更新一部漫画。
    pub fn update_series(&self, series: &Series, local: &LocalChapters) -> SeriesUpdate {
        let name = series.name.as_str();
        let mut result = SeriesUpdate::default();

        let mut pool = match WorkerPool::new(&format!("ch-{name}"), self.config().chapter_pool_size()) {
            Ok(p) => p,
            Err(err) => {
                error!(target: "download", series = name, "创建章节线程池失败: {err}");
                return result;
            }
        };

        self.backfill(&pool, series, local, &mut result);
        if !result.interrupted {
            self.extend(&pool, series, local.last_chapter(), &mut result);
        }

        if result.interrupted {
            pool.abort_pending();
        }
        pool.shutdown(self.config().download_timeout());
        result
    }

    /// 回填：1..=last 中缺失的章节，以及最后一章本身（可能上次只下载了一部分）。
    fn backfill(
        &self,
        pool: &WorkerPool,
        series: &Series,
        local: &LocalChapters,
        result: &mut SeriesUpdate,
    ) {
        let name = series.name.as_str();
        let last = local.last_chapter();
        let targets: Vec<u32> = (1..=last)
            .filter(|c| !local.contains(*c) || *c == last)
            .collect();
        if targets.is_empty() {
            return;
        }
        let missing = targets.len() - usize::from(local.contains(last));
        if missing > 0 {
            info!(target: "download", series = name, missing, "发现 {} 个缺失章节", missing);
        }

        let mut pending = Vec::with_capacity(targets.len());
        for chapter in targets {
            match self.submit_chapter(pool, series, chapter, None) {
                Ok(handle) => pending.push((chapter, handle)),
                Err(DownloadError::Interrupted) => {
                    result.interrupted = true;
                    break;
                }
                Err(err) => {
                    error!(target: "download", series = name, chapter, "提交任务失败: {err}");
                    break;
                }
            }
        }

        for (chapter, handle) in pending {
            match handle.wait(&self.inner.cancel).map_err(from_pool) {
                Ok(Ok(ChapterOutcome::Downloaded { .. })) => {
                    result.healed += 1;
                    if chapter == last {
                        info!(target: "download", series = name, chapter, "重新下载最后一章 {}", chapter);
                    } else {
                        info!(target: "download", series = name, chapter, "补全缺失章节 {}", chapter);
                    }
                }
                Ok(Ok(ChapterOutcome::Absent)) => {
                    warn!(target: "download", series = name, chapter, "第 {} 章在远端不存在", chapter);
                }
                Ok(Err(DownloadError::Interrupted)) | Err(DownloadError::Interrupted) => {
                    result.interrupted = true;
                    break;
                }
                Ok(Err(err)) | Err(err) => {
                    error!(target: "download", series = name, chapter, "下载失败: {err}");
                }
            }
        }
    }

    /// 向后探测：从 last+1 开始逐章尝试，连续失败达到阈值即停止。
    fn extend(&self, pool: &WorkerPool, series: &Series, last: u32, result: &mut SeriesUpdate) {
        let name = series.name.as_str();
        let threshold = self.config().max_consecutive_failures.max(1);
        let interval = self.config().chapter_interval();

        let mut current = last.saturating_add(1);
        let mut failures = 0u32;
        while failures < threshold {
            if self.is_cancelled() {
                result.interrupted = true;
                break;
            }
            result.probed += 1;

            match self.run_chapter(pool, series, current) {
                Ok(ChapterOutcome::Downloaded { .. }) => {
                    failures = 0;
                    result.discovered += 1;
                    info!(target: "download", series = name, chapter = current, "下载新章节 {}", current);
                }
                Ok(ChapterOutcome::Absent) => failures += 1,
                Err(DownloadError::Interrupted) => {
                    result.interrupted = true;
                    break;
                }
                Err(err) => {
                    error!(target: "download", series = name, chapter = current, "下载失败: {err}");
                    failures += 1;
                }
            }

            if current == u32::MAX {
                break;
            }
            current += 1;

            if failures < threshold && !interval.is_zero() && !pause(interval, &self.inner.cancel) {
                result.interrupted = true;
                break;
            }
        }

        if failures >= threshold {
            info!(target: "download", series = name, "连续 {} 章未找到，停止探测", threshold);
        }
    }

    /// 按名称更新一部漫画：重新扫描本地目录后执行回填与探测。
    pub fn update_series_by_name(&self, name: &str, hint: Option<ChapterFormat>) -> SeriesUpdate {
        let dir = series_dir(&self.inner.root, name);
        if !dir.is_dir() {
            error!(target: "download", series = name, "漫画目录不存在: {}", dir.display());
            return SeriesUpdate::default();
        }

        match hint {
            Some(fmt) => info!(target: "download", series = name, "使用声明格式 {fmt}"),
            None => info!(target: "download", series = name, "未指定格式，将自动检测"),
        }

        let local = local_state::scan_series(&dir);
        info!(target: "download", series = name, last = local.last_chapter(), "本地最后一章: {}", local.last_chapter());

        let series = Series::new(name, hint);
        let update = self.update_series(&series, &local);
        if update.total() > 0 {
            info!(
                target: "download",
                series = name,
                healed = update.healed,
                discovered = update.discovered,
                "{} 下载了 {} 个新章节",
                name,
                update.total()
            );
        } else {
            info!(target: "download", series = name, "{} 没有新的或缺失的章节", name);
        }
        update
    }

    // ── 全部更新 ──────────────────────────────────────────────────

    /// 更新保存目录下的所有漫画，返回新下载/补全的章节总数。
    pub fn update_all(&self) -> usize {
        let started = Instant::now();
        let root = &self.inner.root;
        if !root.is_dir() {
            error!(target: "download", "{} 目录不存在", root.display());
            return 0;
        }

        let names = match list_series(root) {
            Ok(names) => names,
            Err(err) => {
                error!(target: "download", "读取 {} 失败: {err}", root.display());
                return 0;
            }
        };
        let hints = series_list::format_hints(&series_list::load_series_list(
            &self.config().data_file_path(),
        ));

        let mut pool = match WorkerPool::new("series", self.config().series_pool_size()) {
            Ok(p) => p,
            Err(err) => {
                error!(target: "download", "创建更新线程池失败: {err}");
                return 0;
            }
        };

        let total = Arc::new(AtomicUsize::new(0));
        let mut pending = Vec::with_capacity(names.len());
        for name in names {
            let this = self.clone();
            let total = total.clone();
            let hint = hints.get(&name).copied();
            let submitted = pool.submit(
                move || {
                    let update = this.update_series_by_name(&name, hint);
                    total.fetch_add(update.total(), Ordering::SeqCst);
                },
                &self.inner.cancel,
            );
            match submitted {
                Ok(handle) => pending.push(handle),
                Err(PoolError::Canceled) => break,
                Err(err) => {
                    error!(target: "download", "提交更新任务失败: {err}");
                    break;
                }
            }
        }

        for handle in pending {
            match handle.wait(&self.inner.cancel) {
                Ok(()) => {}
                Err(PoolError::Canceled) => break,
                Err(err) => error!(target: "download", "更新任务异常: {err}"),
            }
        }

        if self.is_cancelled() {
            warn!(target: "download", "更新被中断，返回已完成的部分");
            pool.abort_pending();
        }
        pool.shutdown(self.config().update_timeout());

        let total = total.load(Ordering::SeqCst);
        info!(
            target: "download",
            total,
            "更新检查完成：共 {} 个新章节，用时 {:.1}s",
            total,
            started.elapsed().as_secs_f32()
        );
        total
    }

    // ── 整部下载 ──────────────────────────────────────────────────

    /// 下载 1..=chapter_count 的全部章节，返回找到的章节数。
    ///
    /// 指定格式时只使用该编码；未指定时走自动检测。
    pub fn retrieve_series(&self, name: &str, chapter_count: u32, format: Option<ChapterFormat>) -> usize {
        let started = Instant::now();
        let dir = series_dir(&self.inner.root, name);
        if let Err(err) = std::fs::create_dir_all(&dir) {
            error!(target: "download", series = name, "创建目录失败 {}: {err}", dir.display());
            return 0;
        }
        info!(target: "download", series = name, chapters = chapter_count, "开始下载：{} ({} 章)", name, chapter_count);

        let mut pool = match WorkerPool::new(&format!("dl-{name}"), self.config().download_pool_size()) {
            Ok(p) => p,
            Err(err) => {
                error!(target: "download", series = name, "创建下载线程池失败: {err}");
                return 0;
            }
        };

        let series = Series::new(name, format);
        let progress = ChapterProgress::new(self.config().show_progress, name, u64::from(chapter_count));
        let mut pending = Vec::with_capacity(chapter_count as usize);
        for chapter in 1..=chapter_count {
            match self.submit_chapter(&pool, &series, chapter, format) {
                Ok(handle) => pending.push((chapter, handle)),
                Err(err) => {
                    warn!(target: "download", series = name, chapter, "停止提交: {err}");
                    break;
                }
            }
        }

        let (mut found, mut missing) = (0usize, 0usize);
        for (chapter, handle) in pending {
            match handle.wait(&self.inner.cancel).map_err(from_pool) {
                Ok(Ok(outcome)) if outcome.is_found() => found += 1,
                Ok(Ok(_)) => {
                    missing += 1;
                    warn!(target: "download", series = name, chapter, "漫画: {} | 第 {} 章 | 未找到页面，章节可能不存在", name, chapter);
                }
                Ok(Err(DownloadError::Interrupted)) | Err(DownloadError::Interrupted) => break,
                Ok(Err(err)) | Err(err) => {
                    missing += 1;
                    error!(target: "download", series = name, chapter, "下载失败: {err}");
                }
            }
            progress.inc();
        }
        progress.finish();

        if self.is_cancelled() {
            pool.abort_pending();
        }
        pool.shutdown(self.config().download_timeout());

        info!(
            target: "download",
            series = name,
            "下载完成：{} 成功 {} 章，缺失 {} 章，用时 {:.1}s",
            name,
            found,
            missing,
            started.elapsed().as_secs_f32()
        );
        found
    }

    /// 按列表文件逐部下载，返回处理的漫画数。
    pub fn download_from_list(&self, list_path: &Path) -> usize {
        let entries = series_list::load_series_list(list_path);
        info!(target: "download", "从 {} 读取到 {} 部漫画", list_path.display(), entries.len());

        let mut processed = 0usize;
        for SeriesEntry {
            name,
            chapter_count,
            hint,
        } in entries
        {
            if self.is_cancelled() {
                warn!(target: "download", "列表下载被中断");
                break;
            }
            let Some(count) = chapter_count else {
                warn!(target: "download", series = %name, "未填写章节数，跳过");
                continue;
            };
            self.retrieve_series(&name, count, hint);
            processed += 1;
        }
        info!(target: "download", processed, "列表处理完成");
        processed
    }

    pub fn sweep_empty_chapters(&self) -> SweepReport {
        file_cleaner::sweep_empty_chapters(&self.inner.root)
    }
}

fn from_pool(err: PoolError) -> DownloadError {
    match err {
        PoolError::Canceled => DownloadError::Interrupted,
        other => DownloadError::Pool(other),
    }
}

/// 保存目录下的漫画名（只取目录），按名称排序。
fn list_series(root: &Path) -> std::io::Result<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    Ok(names)
}
