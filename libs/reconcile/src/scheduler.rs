//! Periodic task scheduling.
//!
//! A scheduler runs a named unit of work immediately and then on every tick of
//! a fixed interval. It knows nothing about what it runs: errors are logged
//! and the next tick fires regardless.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Type-erased task as stored by schedulers.
pub type BoxedTask = Box<dyn FnMut() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Something that can run tasks on a schedule.
pub trait TaskScheduler: Send + Sync {
    /// Arm `task` to run now and then periodically.
    fn schedule<F, Fut>(&self, name: &str, task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static;
}

fn boxed<F, Fut>(mut task: F) -> BoxedTask
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move || task().boxed())
}

/// Run a task exactly once, returning its error to the caller after logging it.
pub async fn run_once<F, Fut>(name: &str, task: F) -> anyhow::Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let result = task().await;
    if let Err(e) = &result {
        error!(task = %name, error = %e, "Task failed");
    }
    result
}

// =============================================================================
// Ticker Scheduler
// =============================================================================

/// Shortest tick a [`TickerTaskScheduler`] will use.
pub const MIN_TICK: Duration = Duration::from_millis(1);

/// Scheduler backed by a tokio interval.
///
/// Each tick spawns the task's future, so a run that outlasts the interval
/// never delays the next tick.
pub struct TickerTaskScheduler {
    interval: Duration,
    shutdown: watch::Receiver<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TickerTaskScheduler {
    /// Create a scheduler ticking every `interval` until `shutdown` flips to true.
    ///
    /// A period below [`MIN_TICK`] is raised to it; tokio intervals cannot be zero.
    pub fn new(interval: Duration, shutdown: watch::Receiver<bool>) -> Self {
        let interval = if interval < MIN_TICK {
            warn!(
                requested_ms = interval.as_millis() as u64,
                "Tick interval too short, using minimum"
            );
            MIN_TICK
        } else {
            interval
        };

        Self {
            interval,
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Returns the tick interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for every ticker loop to observe shutdown and exit.
    pub async fn join(&self) {
        let handles: Vec<_> = {
            let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Ticker loop panicked");
            }
        }
    }
}

impl TaskScheduler for TickerTaskScheduler {
    fn schedule<F, Fut>(&self, name: &str, task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.to_string();
        let period = self.interval;
        let mut shutdown = self.shutdown.clone();
        let mut task = boxed(task);

        let handle = tokio::spawn(async move {
            info!(
                task = %name,
                interval_ms = period.as_millis() as u64,
                "Starting scheduled task"
            );

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                if *shutdown.borrow() {
                    break;
                }

                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let run = task();
                        let name = name.clone();
                        tokio::spawn(async move {
                            match run.await {
                                Ok(()) => debug!(task = %name, "Scheduled task completed"),
                                Err(e) => error!(task = %name, error = %e, "Scheduled task failed"),
                            }
                        });
                    }
                }
            }

            info!(task = %name, "Scheduled task stopped");
        });

        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }
}

// =============================================================================
// Manual Scheduler
// =============================================================================

/// Scheduler that only records tasks; tests trigger them explicitly.
#[derive(Default)]
pub struct ManualScheduler {
    tasks: Mutex<Vec<(String, BoxedTask)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks scheduled so far.
    pub fn scheduled_count(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Names of scheduled tasks, in scheduling order.
    pub fn task_names(&self) -> Vec<String> {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Run the task scheduled at `index` once and return its result.
    pub async fn trigger(&self, index: usize) -> anyhow::Result<()> {
        let (name, run) = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            let Some((name, task)) = tasks.get_mut(index) else {
                anyhow::bail!("no task scheduled at index {index}");
            };
            (name.clone(), task())
        };

        run_once(&name, || run).await
    }
}

impl TaskScheduler for ManualScheduler {
    fn schedule<F, Fut>(&self, name: &str, task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        debug!(task = %name, "Recorded scheduled task");
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((name.to_string(), boxed(task)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_ticker_runs_immediately_and_repeatedly() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = TickerTaskScheduler::new(Duration::from_millis(10), shutdown_rx);
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        scheduler.schedule("count", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(65)).await;
        shutdown_tx.send(true).unwrap();
        scheduler.join().await;

        assert!(runs.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_ticker_keeps_running_after_errors() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = TickerTaskScheduler::new(Duration::from_millis(10), shutdown_rx);
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        scheduler.schedule("failing", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("boom"))
            }
        });

        tokio::time::sleep(Duration::from_millis(65)).await;
        shutdown_tx.send(true).unwrap();
        scheduler.join().await;

        assert!(runs.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_ticker_stops_on_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = TickerTaskScheduler::new(Duration::from_millis(10), shutdown_rx);
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        scheduler.schedule("count", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(25)).await;
        shutdown_tx.send(true).unwrap();
        scheduler.join().await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let after_join = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_join);
    }

    #[tokio::test]
    async fn test_ticker_zero_interval_is_clamped() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = TickerTaskScheduler::new(Duration::ZERO, shutdown_rx);
        assert_eq!(scheduler.interval(), MIN_TICK);

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        scheduler.schedule("count", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();

        let handles: Vec<_> = scheduler.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            handle.await.expect("ticker loop must not panic");
        }
        assert!(runs.load(Ordering::SeqCst) >= 2);
    }

    async fn succeeds() -> anyhow::Result<()> {
        Ok(())
    }

    async fn fails() -> anyhow::Result<()> {
        anyhow::bail!("nope")
    }

    #[tokio::test]
    async fn test_manual_scheduler_returns_task_error() {
        let scheduler = ManualScheduler::new();
        scheduler.schedule("ok", succeeds);
        scheduler.schedule("fails", fails);

        assert_eq!(scheduler.scheduled_count(), 2);
        assert_eq!(scheduler.task_names(), vec!["ok", "fails"]);
        assert!(scheduler.trigger(0).await.is_ok());

        let err = scheduler.trigger(1).await.unwrap_err();
        assert_eq!(err.to_string(), "nope");
        assert!(scheduler.trigger(2).await.is_err());
    }

    #[tokio::test]
    async fn test_run_once_propagates() {
        let result = run_once("once", fails).await;
        assert!(result.is_err());
    }
}
