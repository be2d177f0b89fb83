//! Background task layer
//!
//! This module keeps network-bound mail work off the UI thread:
//! - A fixed-size worker pool with success/error callbacks and cancellation
//! - A bounded LRU cache for fetch and classification results
//! - Blocking retry policies for payloads
//! - The mail processor that ties the three together

pub mod cache;
pub mod executor;
pub mod processor;
pub mod retry;
pub mod task;

// Re-export main types for easy access
pub use cache::{CacheStats, ResultCache, DEFAULT_CACHE_SIZE};
pub use executor::{ExecutorSettings, ExecutorStats, TaskExecutor};
pub use processor::{classify_cache_key, fetch_cache_key, AsyncEmailProcessor, BatchOutcome};
pub use retry::{retry_blocking, RetryError, RetryPolicy};
pub use task::{
    ErrorCallback, ProgressCallback, SuccessCallback, TaskContext, TaskHandle, TaskId,
};
