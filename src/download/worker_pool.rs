//! 固定线程数的工作池。
//!
//! 任务队列有界（容量为线程数的两倍），提交时队列满则阻塞，期间响应取消标志。
//! 每个任务通过 `TaskHandle` 取回结果，不依赖固定时长的等待。
//! `shutdown` 在超时内等待全部线程退出；超时后停止领取新任务并放弃等待。

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{self as channel, RecvTimeoutError, SendTimeoutError};
use thiserror::Error;
use tracing::{debug, error, warn};

const POLL: Duration = Duration::from_millis(200);

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("pool {0} is shut down")]
    Closed(String),
    #[error("canceled")]
    Canceled,
    #[error("task panicked or was dropped before completion")]
    Lost,
}

/// 可被取消的等待；等满 `total` 返回 true，被取消时提前返回 false。
pub fn pause(total: Duration, cancel: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return true;
        }
        thread::sleep(left.min(Duration::from_millis(100)));
    }
}

pub struct TaskHandle<T> {
    rx: channel::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// 等待任务结果；取消标志置位后立即返回 `Canceled`，任务本身不受影响。
    pub fn wait(self, cancel: &AtomicBool) -> Result<T, PoolError> {
        loop {
            match self.rx.recv_timeout(POLL) {
                Ok(v) => return Ok(v),
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.load(Ordering::Relaxed) {
                        return Err(PoolError::Canceled);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(PoolError::Lost),
            }
        }
    }
}

pub struct WorkerPool {
    name: String,
    tx: Option<channel::Sender<Job>>,
    done_rx: channel::Receiver<()>,
    handles: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(name: &str, workers: usize) -> Result<Self, PoolError> {
        let workers = workers.max(1);
        let (tx, rx) = channel::bounded::<Job>(workers * 2);
        let (done_tx, done_rx) = channel::unbounded::<()>();
        let stop = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx = rx.clone();
            let done_tx = done_tx.clone();
            let worker_stop = stop.clone();
            let thread_name = format!("{name}-{idx}");
            let handle = thread::Builder::new().name(thread_name).spawn(move || {
                loop {
                    if worker_stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let job = match rx.recv_timeout(POLL) {
                        Ok(job) => job,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };
                    if worker_stop.load(Ordering::Relaxed) {
                        break;
                    }
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!(target: "pool", "任务异常退出");
                    }
                }
                let _ = done_tx.send(());
            });
            match handle {
                Ok(h) => handles.push(h),
                Err(err) => {
                    stop.store(true, Ordering::SeqCst);
                    return Err(PoolError::Spawn(err));
                }
            }
        }

        debug!(target: "pool", pool = name, workers, "工作池已启动");
        Ok(Self {
            name: name.to_string(),
            tx: Some(tx),
            done_rx,
            handles,
            stop,
        })
    }

    /// 提交任务；队列已满时等待空位。
    pub fn submit<T, F>(&self, task: F, cancel: &AtomicBool) -> Result<TaskHandle<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let Some(tx) = self.tx.as_ref() else {
            return Err(PoolError::Closed(self.name.clone()));
        };

        let (result_tx, result_rx) = channel::bounded::<T>(1);
        let mut job: Job = Box::new(move || {
            let _ = result_tx.send(task());
        });

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(PoolError::Canceled);
            }
            match tx.send_timeout(job, POLL) {
                Ok(()) => return Ok(TaskHandle { rx: result_rx }),
                Err(SendTimeoutError::Timeout(back)) => job = back,
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(PoolError::Closed(self.name.clone()));
                }
            }
        }
    }

    /// 丢弃尚未开始的任务；正在执行的任务继续跑完。
    pub fn abort_pending(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// 关闭队列并等待线程退出。超时返回 false，此时剩余线程被放弃等待。
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        if self.tx.take().is_none() && self.handles.is_empty() {
            return true;
        }

        let deadline = Instant::now() + timeout;
        let mut finished = 0usize;
        while finished < self.handles.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.done_rx.recv_timeout(remaining) {
                Ok(()) => finished += 1,
                Err(_) => break,
            }
        }

        if finished == self.handles.len() {
            for h in self.handles.drain(..) {
                let _ = h.join();
            }
            return true;
        }

        self.stop.store(true, Ordering::SeqCst);
        warn!(
            target: "pool",
            pool = %self.name,
            "部分任务未能在 {} 秒内完成，停止等待",
            timeout.as_secs()
        );
        self.handles.clear();
        false
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // 只关闭队列，线程处理完已排队的任务后自行退出
        self.tx.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn handles_carry_results_back() {
        let mut pool = WorkerPool::new("test", 3).unwrap();
        let cancel = AtomicBool::new(false);

        let handles: Vec<_> = (1..=10u32)
            .map(|i| pool.submit(move || i * i, &cancel).unwrap())
            .collect();
        let sum: u32 = handles.into_iter().map(|h| h.wait(&cancel).unwrap()).sum();
        assert_eq!(sum, 385);
        assert!(pool.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn concurrency_never_exceeds_worker_count() {
        let mut pool = WorkerPool::new("bounded", 2).unwrap();
        let cancel = AtomicBool::new(false);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.submit(
                    move || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        running.fetch_sub(1, Ordering::SeqCst);
                    },
                    &cancel,
                )
                .unwrap()
            })
            .collect();
        for h in handles {
            h.wait(&cancel).unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(pool.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn panicking_task_reports_lost_and_pool_survives() {
        let mut pool = WorkerPool::new("panicky", 1).unwrap();
        let cancel = AtomicBool::new(false);

        let bad = pool.submit(|| -> u32 { panic!("boom") }, &cancel).unwrap();
        assert!(matches!(bad.wait(&cancel), Err(PoolError::Lost)));

        let good = pool.submit(|| 7u32, &cancel).unwrap();
        assert_eq!(good.wait(&cancel).unwrap(), 7);
        assert!(pool.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn wait_returns_early_on_cancel() {
        let mut pool = WorkerPool::new("slow", 1).unwrap();
        let cancel = AtomicBool::new(false);
        let handle = pool
            .submit(|| thread::sleep(Duration::from_millis(800)), &cancel)
            .unwrap();

        cancel.store(true, Ordering::SeqCst);
        assert!(matches!(handle.wait(&cancel), Err(PoolError::Canceled)));
        assert!(matches!(
            pool.submit(|| (), &cancel),
            Err(PoolError::Canceled)
        ));
        assert!(pool.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn shutdown_gives_up_after_timeout() {
        let mut pool = WorkerPool::new("stuck", 1).unwrap();
        let cancel = AtomicBool::new(false);
        let _handle = pool
            .submit(|| thread::sleep(Duration::from_millis(1500)), &cancel)
            .unwrap();

        let started = Instant::now();
        assert!(!pool.shutdown(Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[test]
    fn pause_waits_out_or_stops_on_cancel() {
        let cancel = AtomicBool::new(false);
        let started = Instant::now();
        assert!(pause(Duration::from_millis(150), &cancel));
        assert!(started.elapsed() >= Duration::from_millis(150));

        cancel.store(true, Ordering::SeqCst);
        let started = Instant::now();
        assert!(!pause(Duration::from_secs(30), &cancel));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let mut pool = WorkerPool::new("closed", 1).unwrap();
        assert!(pool.shutdown(Duration::from_secs(1)));
        let cancel = AtomicBool::new(false);
        assert!(matches!(pool.submit(|| (), &cancel), Err(PoolError::Closed(_))));
    }
}
