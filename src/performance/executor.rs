//! Worker pool that runs blocking mail operations off the UI thread
//!
//! A fixed number of OS threads consume a shared FIFO queue. Each task runs
//! its payload once and then delivers exactly one of its success or error
//! callbacks on the worker thread. Payload failures (returned errors or
//! panics) are reported through the error callback and never take a worker
//! down; a panicking callback is logged and discarded.
//!
//! There is no task timeout: a payload that never returns occupies its
//! worker until the process exits.

use crate::error::ExecutorResult;
use crate::performance::task::{
    ErrorCallback, ProgressCallback, SuccessCallback, TaskContext, TaskHandle, TaskId,
};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default number of worker threads
pub const DEFAULT_MAX_WORKERS: usize = 4;
/// How long an idle worker waits on the queue before re-checking the running flag
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Worker pool settings
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Number of worker threads spawned by `start()`
    pub max_workers: usize,
    /// Bounded wait used by idle workers
    pub poll_interval: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Counters describing what the pool has done so far
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Default)]
struct StatCounters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

type Delivery = Box<dyn FnOnce() + Send + 'static>;
type JobFn = Box<dyn FnOnce(&TaskContext) -> Outcome + Send + 'static>;

/// Result of running a payload, with its callback already bound
enum Outcome {
    Succeeded(Delivery),
    Failed { description: String, deliver: Delivery },
}

struct Job {
    id: TaskId,
    cancelled: Arc<AtomicBool>,
    progress: Option<ProgressCallback>,
    run: JobFn,
}

enum QueueItem {
    Run(Job),
    Stop,
}

/// State shared between the pool owner and its workers
struct Shared {
    running: AtomicBool,
    live_workers: AtomicUsize,
    /// Jobs queued or parked, i.e. not yet handed to `execute`
    pending: AtomicUsize,
    /// Jobs a worker dequeued after the pool stopped; requeued by `stop()`
    parked: Mutex<Vec<Job>>,
    stats: StatCounters,
    poll_interval: Duration,
}

impl Shared {
    fn park(&self, job: Job) {
        lock(&self.parked).push(job);
    }
}

/// Fixed-size pool of worker threads consuming a shared task queue
///
/// # Example
/// ```rust,no_run
/// use mail_assistant::performance::TaskExecutor;
///
/// let executor = TaskExecutor::new(2);
/// executor.start()?;
///
/// executor.submit(
///     || Ok::<_, String>(vec!["msg1", "msg2"]),
///     Some(Box::new(|messages| println!("fetched {:?}", messages))),
///     Some(Box::new(|error| eprintln!("failed: {}", error))),
/// );
///
/// executor.stop();
/// # Ok::<(), mail_assistant::error::ExecutorError>(())
/// ```
pub struct TaskExecutor {
    settings: ExecutorSettings,
    sender: Sender<QueueItem>,
    receiver: Receiver<QueueItem>,
    shared: Arc<Shared>,
    /// Also serialises `start()` and `stop()`
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskExecutor {
    /// Create a stopped pool with `max_workers` workers (at least one)
    pub fn new(max_workers: usize) -> Self {
        Self::with_settings(ExecutorSettings {
            max_workers,
            ..ExecutorSettings::default()
        })
    }

    /// Create a stopped pool with custom settings
    pub fn with_settings(mut settings: ExecutorSettings) -> Self {
        if settings.max_workers == 0 {
            warn!("Worker pool configured with 0 workers, using 1");
            settings.max_workers = 1;
        }

        let (sender, receiver) = unbounded();
        let shared = Arc::new(Shared {
            running: AtomicBool::new(false),
            live_workers: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            parked: Mutex::new(Vec::new()),
            stats: StatCounters::default(),
            poll_interval: settings.poll_interval,
        });

        Self {
            settings,
            sender,
            receiver,
            shared,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the workers. Calling this on a running pool does nothing.
    pub fn start(&self) -> ExecutorResult<()> {
        let mut workers = lock(&self.workers);
        if self.shared.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.running.store(true, Ordering::SeqCst);

        for index in 0..self.settings.max_workers {
            let receiver = self.receiver.clone();
            let shared = self.shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("mail-worker-{}", index))
                .spawn(move || worker_loop(index, receiver, shared));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    error!("Failed to spawn worker {}: {}", index, e);
                    self.shutdown(&mut workers);
                    return Err(e.into());
                }
            }
        }

        info!("Worker pool started with {} workers", workers.len());
        Ok(())
    }

    /// Stop the workers and wait for them to exit
    ///
    /// Workers finish the task they are running; tasks that have not started
    /// stay queued and only run if `start()` is called again. Calling this on
    /// a stopped pool does nothing.
    pub fn stop(&self) {
        let mut workers = lock(&self.workers);
        if !self.shared.running.load(Ordering::SeqCst) {
            return;
        }
        self.shutdown(&mut workers);
        info!("Worker pool stopped");
    }

    fn shutdown(&self, workers: &mut Vec<JoinHandle<()>>) {
        self.shared.running.store(false, Ordering::SeqCst);

        for _ in 0..workers.len() {
            let _ = self.sender.send(QueueItem::Stop);
        }
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                warn!("Worker thread terminated abnormally");
            }
        }

        self.requeue_pending();
    }

    /// Drop leftover stop markers and restore unstarted jobs in submission order
    fn requeue_pending(&self) {
        let mut pending: Vec<Job> = lock(&self.shared.parked).drain(..).collect();
        pending.extend(self.receiver.try_iter().filter_map(|item| match item {
            QueueItem::Run(job) => Some(job),
            QueueItem::Stop => None,
        }));
        pending.sort_by_key(|job| job.id);

        if !pending.is_empty() {
            debug!("{} tasks left queued after stop", pending.len());
        }
        for job in pending {
            let _ = self.sender.send(QueueItem::Run(job));
        }
    }

    /// Queue a payload; returns immediately
    ///
    /// The payload's arguments are whatever the closure captures. Exactly one
    /// of `on_success`/`on_error` runs on a worker thread once the payload
    /// returns (unless the task is cancelled first).
    pub fn submit<T, E, F>(
        &self,
        payload: F,
        on_success: Option<SuccessCallback<T>>,
        on_error: Option<ErrorCallback>,
    ) -> TaskHandle
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + 'static,
    {
        self.submit_with_context(move |_| payload(), on_success, on_error, None)
    }

    /// Queue a payload that can observe cancellation and report progress
    pub fn submit_with_context<T, E, F>(
        &self,
        payload: F,
        on_success: Option<SuccessCallback<T>>,
        on_error: Option<ErrorCallback>,
        on_progress: Option<ProgressCallback>,
    ) -> TaskHandle
    where
        F: FnOnce(&TaskContext) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + 'static,
    {
        let id = TaskId::next();
        let cancelled = Arc::new(AtomicBool::new(false));

        let run: JobFn = Box::new(move |context: &TaskContext| {
            match panic::catch_unwind(AssertUnwindSafe(|| payload(context))) {
                Ok(Ok(value)) => Outcome::Succeeded(Box::new(move || {
                    if let Some(callback) = on_success {
                        callback(value);
                    }
                })),
                Ok(Err(err)) => failed(err.to_string(), on_error),
                Err(panic) => failed(
                    format!("task panicked: {}", panic_message(panic.as_ref())),
                    on_error,
                ),
            }
        });

        let job = Job {
            id,
            cancelled: cancelled.clone(),
            progress: on_progress,
            run,
        };

        debug!("Submitting {}", id);
        self.shared.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        // Both channel ends live in `self`, so the send cannot fail.
        let _ = self.sender.send(QueueItem::Run(job));

        TaskHandle::new(id, cancelled)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Number of worker threads currently alive
    pub fn live_workers(&self) -> usize {
        self.shared.live_workers.load(Ordering::SeqCst)
    }

    /// Tasks submitted but not yet picked up by a worker
    pub fn pending_tasks(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn max_workers(&self) -> usize {
        self.settings.max_workers
    }

    pub fn stats(&self) -> ExecutorStats {
        let stats = &self.shared.stats;
        ExecutorStats {
            submitted: stats.submitted.load(Ordering::Relaxed),
            succeeded: stats.succeeded.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
            cancelled: stats.cancelled.load(Ordering::Relaxed),
        }
    }
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::with_settings(ExecutorSettings::default())
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        // Signal only: joining here could hang on a payload that never returns.
        if self.shared.running.swap(false, Ordering::SeqCst) {
            let workers = lock(&self.workers).len();
            for _ in 0..workers {
                let _ = self.sender.send(QueueItem::Stop);
            }
        }
    }
}

fn failed(description: String, on_error: Option<ErrorCallback>) -> Outcome {
    let message = description.clone();
    Outcome::Failed {
        description,
        deliver: Box::new(move || {
            if let Some(callback) = on_error {
                callback(message);
            }
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps `live_workers` accurate however the worker exits
struct LiveWorker<'a>(&'a AtomicUsize);

impl<'a> LiveWorker<'a> {
    fn register(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveWorker<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn worker_loop(index: usize, receiver: Receiver<QueueItem>, shared: Arc<Shared>) {
    let _live = LiveWorker::register(&shared.live_workers);
    debug!("Worker {} started", index);

    while shared.running.load(Ordering::SeqCst) {
        match receiver.recv_timeout(shared.poll_interval) {
            Ok(QueueItem::Stop) => break,
            Ok(QueueItem::Run(job)) => {
                if !shared.running.load(Ordering::SeqCst) {
                    shared.park(job);
                    break;
                }
                shared.pending.fetch_sub(1, Ordering::SeqCst);
                execute(job, &shared);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("Worker {} exiting", index);
}

fn execute(job: Job, shared: &Shared) {
    let stats = &shared.stats;

    if job.cancelled.load(Ordering::SeqCst) {
        debug!("Skipping cancelled {}", job.id);
        stats.cancelled.fetch_add(1, Ordering::Relaxed);
        return;
    }

    debug!("Executing {}", job.id);
    let context = TaskContext::new(job.id, job.cancelled, job.progress);
    let outcome = (job.run)(&context);

    if context.is_cancelled() {
        debug!("{} was cancelled while running, dropping its result", job.id);
        stats.cancelled.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let deliver = match outcome {
        Outcome::Succeeded(deliver) => {
            stats.succeeded.fetch_add(1, Ordering::Relaxed);
            debug!("{} completed", job.id);
            deliver
        }
        Outcome::Failed {
            description,
            deliver,
        } => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!("{} failed: {}", job.id, description);
            deliver
        }
    };

    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(deliver)) {
        error!(
            "Callback for {} panicked: {}",
            job.id,
            panic_message(panic.as_ref())
        );
    }
}
