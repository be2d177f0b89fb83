//! Task identity, cancellation and callback types shared by the executor and its callers

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Unique, strictly increasing identifier assigned at submission time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Invoked with the payload's value when it succeeds
pub type SuccessCallback<T> = Box<dyn FnOnce(T) + Send + 'static>;
/// Invoked with a description of the failure when the payload fails
pub type ErrorCallback = Box<dyn FnOnce(String) + Send + 'static>;
/// Invoked for every progress report (0-100) a payload makes
pub type ProgressCallback = Box<dyn Fn(TaskId, u8) + Send + Sync + 'static>;

/// Handle returned by `submit`
///
/// Cancellation is best-effort: a task cancelled before a worker picks it up
/// never runs; a task cancelled while its payload runs finishes, but its
/// callbacks are suppressed.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, cancelled: Arc<AtomicBool>) -> Self {
        Self { id, cancelled }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Execution context handed to context-aware payloads
pub struct TaskContext {
    id: TaskId,
    cancelled: Arc<AtomicBool>,
    progress: Option<ProgressCallback>,
}

impl TaskContext {
    pub(crate) fn new(
        id: TaskId,
        cancelled: Arc<AtomicBool>,
        progress: Option<ProgressCallback>,
    ) -> Self {
        Self {
            id,
            cancelled,
            progress,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Report progress in percent (clamped to 100)
    ///
    /// Returns `false` once the task has been cancelled so long-running
    /// payloads can stop early. Nothing is forwarded after cancellation.
    pub fn report_progress(&self, percent: u8) -> bool {
        if self.is_cancelled() {
            return false;
        }
        if let Some(progress) = &self.progress {
            progress(self.id, percent.min(100));
        }
        true
    }
}
