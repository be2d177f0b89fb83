//! Mail operations scheduled on the worker pool
//!
//! Every operation follows the same shape: probe the result cache, answer
//! synchronously on a hit, otherwise submit a payload whose success callback
//! stores the result before handing it to the caller. Callbacks run on a
//! worker thread; see [`crate::events::EventBridge`] for moving them onto an
//! event loop.

use crate::config::AssistantConfig;
use crate::email::{AnalyticsSink, EmailMessage, MailFetcher, MailSender, MessageClassifier};
use crate::error::{ExecutorResult, MailError, MailResult, ProcessorError, ProcessorResult};
use crate::performance::cache::ResultCache;
use crate::performance::executor::TaskExecutor;
use crate::performance::retry::{retry_blocking, RetryPolicy};
use crate::performance::task::{
    ErrorCallback, ProgressCallback, SuccessCallback, TaskContext, TaskHandle,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Joins cache key parts; a control character, absent from folder names and ids
const KEY_SEPARATOR: char = '\u{1f}';

/// Cache key for a folder fetch
pub fn fetch_cache_key(folder: &str, search_criteria: &str) -> String {
    format!("emails_{}{}{}", folder, KEY_SEPARATOR, search_criteria)
}

/// Cache key for classifying a set of messages
pub fn classify_cache_key(messages: &[EmailMessage]) -> String {
    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    format!("classify_{}", ids.join(&KEY_SEPARATOR.to_string()))
}

/// Result of a batch run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    /// Tagged copies of every message that was processed
    pub processed: Vec<EmailMessage>,
    /// Messages skipped because a collaborator failed
    pub failed: usize,
    pub replies_sent: usize,
}

/// Schedules fetch, classify, batch and send operations on a worker pool
pub struct AsyncEmailProcessor {
    fetcher: Arc<dyn MailFetcher>,
    classifier: Arc<dyn MessageClassifier>,
    analytics: Option<Arc<dyn AnalyticsSink>>,
    sender: Option<Arc<dyn MailSender>>,
    executor: TaskExecutor,
    cache: Arc<ResultCache<Vec<EmailMessage>>>,
    retry_policy: RetryPolicy,
}

impl AsyncEmailProcessor {
    /// Create the processor and start its worker pool
    pub fn new(
        config: &AssistantConfig,
        fetcher: Arc<dyn MailFetcher>,
        classifier: Arc<dyn MessageClassifier>,
    ) -> ExecutorResult<Self> {
        let executor = TaskExecutor::with_settings(config.executor_settings());
        executor.start()?;

        Ok(Self {
            fetcher,
            classifier,
            analytics: None,
            sender: None,
            executor,
            cache: Arc::new(ResultCache::new(config.cache.max_size)),
            retry_policy: config.retry_policy(),
        })
    }

    pub fn with_analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn with_sender(mut self, sender: Arc<dyn MailSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Fetch a folder in the background
    ///
    /// Returns `None` when the request was answered synchronously: either from
    /// the cache (`on_success` already ran) or because the mailbox could not
    /// be connected (`on_error` already ran). Only non-empty results are
    /// cached.
    pub fn fetch_emails_async(
        &self,
        folder: &str,
        search_criteria: &str,
        on_success: Option<SuccessCallback<Vec<EmailMessage>>>,
        on_error: Option<ErrorCallback>,
    ) -> Option<TaskHandle> {
        let cache_key = fetch_cache_key(folder, search_criteria);

        if let Some(cached) = self.cache.get(&cache_key) {
            debug!("Using {} cached messages for {}", cached.len(), cache_key);
            if let Some(callback) = on_success {
                callback(cached);
            }
            return None;
        }

        if !self.fetcher.is_connected() {
            info!("Mailbox not connected, reconnecting");
            if let Err(e) = self.fetcher.connect() {
                warn!("Mailbox connection failed: {}", e);
                if let Some(callback) = on_error {
                    callback(format!(
                        "Mailbox connection failed, please sign in again: {}",
                        e
                    ));
                }
                return None;
            }
        }

        let fetcher = self.fetcher.clone();
        let policy = self.retry_policy.clone();
        let folder = folder.to_string();
        let search_criteria = search_criteria.to_string();
        let payload = move || -> ProcessorResult<Vec<EmailMessage>> {
            retry_blocking(&policy, |attempt| {
                fetch_once(fetcher.as_ref(), &folder, &search_criteria, attempt)
            })
            .map_err(|e| ProcessorError::RetriesExhausted {
                attempts: e.attempts,
                last_error: e.last_error.to_string(),
            })
        };

        let cache = self.cache.clone();
        let store_and_forward: SuccessCallback<Vec<EmailMessage>> = Box::new(move |messages| {
            if !messages.is_empty() {
                cache.put(cache_key, messages.clone());
            }
            if let Some(callback) = on_success {
                callback(messages);
            }
        });

        Some(self.executor.submit(payload, Some(store_and_forward), on_error))
    }

    /// Classify and tag messages in the background
    ///
    /// Results are cached under the message id list; a cache hit runs
    /// `on_success` synchronously and returns `None`.
    pub fn classify_emails_async(
        &self,
        messages: Vec<EmailMessage>,
        on_success: Option<SuccessCallback<Vec<EmailMessage>>>,
        on_error: Option<ErrorCallback>,
    ) -> Option<TaskHandle> {
        let cache_key = classify_cache_key(&messages);

        if let Some(cached) = self.cache.get(&cache_key) {
            debug!("Using cached classification for {} messages", cached.len());
            if let Some(callback) = on_success {
                callback(cached);
            }
            return None;
        }

        let classifier = self.classifier.clone();
        let payload = move || -> MailResult<Vec<EmailMessage>> {
            let mut messages = messages;
            for message in messages.iter_mut() {
                let category = classifier.classify(message)?;
                message.tag(category);
            }
            Ok(messages)
        };

        let cache = self.cache.clone();
        let store_and_forward: SuccessCallback<Vec<EmailMessage>> = Box::new(move |messages| {
            cache.put(cache_key, messages.clone());
            if let Some(callback) = on_success {
                callback(messages);
            }
        });

        Some(self.executor.submit(payload, Some(store_and_forward), on_error))
    }

    /// Tag, record and optionally answer a set of messages in the background
    ///
    /// A message whose collaborator call fails is logged and counted in
    /// `BatchOutcome::failed`; the rest of the batch continues. Progress is
    /// reported once per message. Batch results are not cached.
    pub fn batch_process_async(
        &self,
        messages: Vec<EmailMessage>,
        target_category: Option<String>,
        reply_body: Option<String>,
        on_success: Option<SuccessCallback<BatchOutcome>>,
        on_error: Option<ErrorCallback>,
        on_progress: Option<ProgressCallback>,
    ) -> TaskHandle {
        info!(
            "Starting batch processing of {} messages, target category: {:?}",
            messages.len(),
            target_category
        );

        let analytics = self.analytics.clone();
        let sender = self.sender.clone();
        let payload = move |context: &TaskContext| -> ProcessorResult<BatchOutcome> {
            let total = messages.len();
            let mut outcome = BatchOutcome::default();

            for (index, message) in messages.iter().enumerate() {
                if context.is_cancelled() {
                    debug!("Batch cancelled after {} of {} messages", index, total);
                    break;
                }

                match process_message(
                    message,
                    target_category.as_deref(),
                    reply_body.as_deref(),
                    analytics.as_deref(),
                    sender.as_deref(),
                ) {
                    Ok((processed, replied)) => {
                        outcome.processed.push(processed);
                        if replied {
                            outcome.replies_sent += 1;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to process message {}: {}", message.id, e);
                        outcome.failed += 1;
                    }
                }

                context.report_progress(((index + 1) * 100 / total) as u8);
            }

            info!(
                "Batch processing finished: {}/{} messages processed",
                outcome.processed.len(),
                total
            );
            Ok(outcome)
        };

        self.executor
            .submit_with_context(payload, on_success, on_error, on_progress)
    }

    /// Send a reply in the background
    ///
    /// Returns `None` (after running `on_error`) when no sender is configured.
    pub fn send_reply_async(
        &self,
        message: &EmailMessage,
        body: String,
        attachments: Vec<PathBuf>,
        on_success: Option<SuccessCallback<bool>>,
        on_error: Option<ErrorCallback>,
    ) -> Option<TaskHandle> {
        let Some(sender) = self.sender.clone() else {
            if let Some(callback) = on_error {
                callback("No mail sender configured".to_string());
            }
            return None;
        };

        let recipient = message.sender.clone();
        let subject = message.reply_subject();
        let payload = move || sender.send(&recipient, &subject, &body, &attachments);

        Some(self.executor.submit(payload, on_success, on_error))
    }

    /// Drop cached results; `None` clears everything
    pub fn invalidate_cache(&self, pattern: Option<&str>) -> usize {
        match pattern {
            Some(pattern) => self.cache.remove_matching(pattern),
            None => {
                let removed = self.cache.len();
                self.cache.clear();
                removed
            }
        }
    }

    /// Stop the worker pool, waiting for running tasks to finish
    pub fn close(&self) {
        self.executor.stop();
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub fn cache(&self) -> &ResultCache<Vec<EmailMessage>> {
        &self.cache
    }
}

/// One fetch attempt: reconnect if needed, drop the connection on failure
fn fetch_once(
    fetcher: &dyn MailFetcher,
    folder: &str,
    search_criteria: &str,
    attempt: usize,
) -> MailResult<Vec<EmailMessage>> {
    if !fetcher.is_connected() {
        debug!("Attempt {}: mailbox not connected, reconnecting", attempt);
        fetcher.connect()?;
    }

    fetcher.fetch(folder, search_criteria).map_err(|e| {
        fetcher.close();
        e
    })
}

/// Returns the tagged copy and whether a reply went out
fn process_message(
    message: &EmailMessage,
    target_category: Option<&str>,
    reply_body: Option<&str>,
    analytics: Option<&dyn AnalyticsSink>,
    sender: Option<&dyn MailSender>,
) -> MailResult<(EmailMessage, bool)> {
    let mut copy = message.clone();
    if let Some(category) = target_category {
        copy.tag(category);
    }

    if let Some(analytics) = analytics {
        analytics.save_email(&copy)?;
    }

    let replied = match (reply_body, sender) {
        (Some(body), Some(sender)) => {
            if !sender.send(&copy.sender, &copy.reply_subject(), body, &[])? {
                return Err(MailError::send(format!(
                    "server rejected reply to {}",
                    copy.sender
                )));
            }
            true
        }
        _ => false,
    };

    Ok((copy, replied))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    struct OfflineFetcher {
        connect_attempts: AtomicUsize,
    }

    impl MailFetcher for OfflineFetcher {
        fn is_connected(&self) -> bool {
            false
        }

        fn connect(&self) -> MailResult<()> {
            self.connect_attempts.fetch_add(1, Ordering::SeqCst);
            Err(MailError::connection("authentication rejected"))
        }

        fn fetch(&self, _: &str, _: &str) -> MailResult<Vec<EmailMessage>> {
            Err(MailError::connection("not connected"))
        }

        fn close(&self) {}
    }

    struct FixedClassifier;

    impl MessageClassifier for FixedClassifier {
        fn classify(&self, _: &EmailMessage) -> MailResult<String> {
            Ok("other".to_string())
        }
    }

    fn message(id: &str) -> EmailMessage {
        EmailMessage::new(id, "a@example.com", "Hello", "Body", Utc::now())
    }

    fn processor(fetcher: Arc<dyn MailFetcher>) -> AsyncEmailProcessor {
        let mut config = AssistantConfig::default();
        config.executor.max_workers = 1;
        config.executor.poll_interval_ms = 10;
        AsyncEmailProcessor::new(&config, fetcher, Arc::new(FixedClassifier)).unwrap()
    }

    #[test]
    fn test_cache_keys() {
        assert_eq!(fetch_cache_key("INBOX", "ALL"), "emails_INBOX\u{1f}ALL");
        assert_eq!(
            classify_cache_key(&[message("3"), message("9")]),
            "classify_3\u{1f}9"
        );
    }

    #[test]
    fn test_cache_keys_do_not_collide() {
        assert_ne!(
            fetch_cache_key("Work_2024", "ALL"),
            fetch_cache_key("Work", "2024_ALL")
        );
        assert_ne!(
            classify_cache_key(&[message("1_2")]),
            classify_cache_key(&[message("1"), message("2")])
        );
    }

    #[test]
    fn test_connection_failure_reported_synchronously() {
        let fetcher = Arc::new(OfflineFetcher {
            connect_attempts: AtomicUsize::new(0),
        });
        let processor = processor(fetcher.clone());

        let (tx, rx) = mpsc::channel();
        let handle = processor.fetch_emails_async(
            "INBOX",
            "ALL",
            None,
            Some(Box::new(move |error| tx.send(error).unwrap())),
        );

        assert!(handle.is_none());
        let error = rx.try_recv().unwrap();
        assert!(error.contains("authentication rejected"));
        assert_eq!(fetcher.connect_attempts.load(Ordering::SeqCst), 1);
        assert_eq!(processor.executor().stats().submitted, 0);
        processor.close();
    }

    #[test]
    fn test_send_without_sender_fails_fast() {
        let processor = processor(Arc::new(OfflineFetcher {
            connect_attempts: AtomicUsize::new(0),
        }));

        let (tx, rx) = mpsc::channel();
        let handle = processor.send_reply_async(
            &message("1"),
            "Thanks".to_string(),
            Vec::new(),
            None,
            Some(Box::new(move |error| tx.send(error).unwrap())),
        );

        assert!(handle.is_none());
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            "No mail sender configured"
        );
        processor.close();
    }

    #[test]
    fn test_invalidate_cache() {
        let processor = processor(Arc::new(OfflineFetcher {
            connect_attempts: AtomicUsize::new(0),
        }));
        processor
            .cache()
            .put(fetch_cache_key("INBOX", "ALL"), vec![message("1")]);
        processor
            .cache()
            .put(fetch_cache_key("Sent", "ALL"), vec![message("2")]);
        processor
            .cache()
            .put(classify_cache_key(&[message("1")]), vec![message("1")]);

        assert_eq!(processor.invalidate_cache(Some("INBOX")), 1);
        assert_eq!(processor.invalidate_cache(None), 2);
        assert!(processor.cache().is_empty());
        processor.close();
    }
}
