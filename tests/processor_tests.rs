//! Mail processor against scripted collaborators

use chrono::{TimeZone, Utc};
use mail_assistant::email::{
    AnalyticsSink, EmailMessage, MailFetcher, MailSender, MessageClassifier,
};
use mail_assistant::error::{MailError, MailResult};
use mail_assistant::events::{AssistantEvent, EventBridge};
use mail_assistant::performance::{
    classify_cache_key, fetch_cache_key, AsyncEmailProcessor, BatchOutcome,
};
use mail_assistant::AssistantConfig;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn message(id: &str, sender: &str, subject: &str) -> EmailMessage {
    let date = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
    EmailMessage::new(id, sender, subject, "Hello", date)
}

fn inbox() -> Vec<EmailMessage> {
    vec![
        message("1", "billing@shop.example", "Your invoice"),
        message("2", "friend@example.com", "Lunch?"),
        message("3", "news@list.example", "Weekly digest"),
    ]
}

/// Serves INBOX, fails the first `failures` fetches and counts calls
struct ScriptedFetcher {
    connected: AtomicBool,
    failures: AtomicUsize,
    connects: AtomicUsize,
    fetches: AtomicUsize,
}

impl ScriptedFetcher {
    fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(false),
            failures: AtomicUsize::new(failures),
            connects: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        })
    }
}

impl MailFetcher for ScriptedFetcher {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connect(&self) -> MailResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn fetch(&self, folder: &str, _search_criteria: &str) -> MailResult<Vec<EmailMessage>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(MailError::fetch("server closed connection"));
        }
        match folder {
            "INBOX" => Ok(inbox()),
            _ => Ok(Vec::new()),
        }
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Labels by sender, rejects anything from `spam@`
struct SenderClassifier {
    calls: AtomicUsize,
}

impl MessageClassifier for SenderClassifier {
    fn classify(&self, message: &EmailMessage) -> MailResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if message.sender.starts_with("spam@") {
            return Err(MailError::classification("model unavailable"));
        }
        let category = if message.sender.starts_with("billing@") {
            "finance"
        } else {
            "personal"
        };
        Ok(category.to_string())
    }
}

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, String, usize)>>,
}

impl MailSender for RecordingSender {
    fn send(
        &self,
        recipient: &str,
        subject: &str,
        _body: &str,
        attachments: &[PathBuf],
    ) -> MailResult<bool> {
        self.sent.lock().unwrap().push((
            recipient.to_string(),
            subject.to_string(),
            attachments.len(),
        ));
        Ok(true)
    }
}

/// Stores messages, refusing the ids it was told to reject
struct RecordingAnalytics {
    rejected: Vec<&'static str>,
    saved: Mutex<Vec<EmailMessage>>,
}

impl AnalyticsSink for RecordingAnalytics {
    fn save_email(&self, message: &EmailMessage) -> MailResult<()> {
        if self.rejected.contains(&message.id.as_str()) {
            return Err(MailError::analytics("database locked"));
        }
        self.saved.lock().unwrap().push(message.clone());
        Ok(())
    }
}

fn test_config() -> AssistantConfig {
    let mut config = AssistantConfig::default();
    config.executor.max_workers = 2;
    config.executor.poll_interval_ms = 20;
    config.fetch.retry_delay_ms = 0;
    config.fetch.max_retry_delay_ms = 0;
    config
}

fn processor(fetcher: Arc<ScriptedFetcher>) -> (AsyncEmailProcessor, Arc<SenderClassifier>) {
    let classifier = Arc::new(SenderClassifier {
        calls: AtomicUsize::new(0),
    });
    let processor = AsyncEmailProcessor::new(&test_config(), fetcher, classifier.clone()).unwrap();
    (processor, classifier)
}

fn fetch_blocking(
    processor: &AsyncEmailProcessor,
    folder: &str,
) -> (bool, Result<Vec<EmailMessage>, String>) {
    let (tx, rx) = mpsc::channel();
    let err_tx = tx.clone();
    let handle = processor.fetch_emails_async(
        folder,
        "ALL",
        Some(Box::new(move |messages| tx.send(Ok(messages)).unwrap())),
        Some(Box::new(move |error| err_tx.send(Err(error)).unwrap())),
    );
    (handle.is_some(), rx.recv_timeout(WAIT).unwrap())
}

#[test]
fn test_second_fetch_is_served_from_cache() {
    let fetcher = ScriptedFetcher::new(0);
    let (processor, _) = processor(fetcher.clone());

    let (queued, first) = fetch_blocking(&processor, "INBOX");
    assert!(queued);
    assert_eq!(first.unwrap().len(), 3);
    assert!(processor.cache().contains_key(&fetch_cache_key("INBOX", "ALL")));

    let (queued, second) = fetch_blocking(&processor, "INBOX");
    assert!(!queued);
    assert_eq!(second.unwrap(), inbox());

    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(processor.cache().stats().hits, 1);
    processor.close();
}

#[test]
fn test_empty_fetch_is_not_cached() {
    let fetcher = ScriptedFetcher::new(0);
    let (processor, _) = processor(fetcher.clone());

    let (_, first) = fetch_blocking(&processor, "Sent");
    assert!(first.unwrap().is_empty());

    let (queued, _) = fetch_blocking(&processor, "Sent");
    assert!(queued);
    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 2);
    processor.close();
}

#[test]
fn test_fetch_reconnects_between_attempts() {
    let fetcher = ScriptedFetcher::new(2);
    let (processor, _) = processor(fetcher.clone());

    let (_, result) = fetch_blocking(&processor, "INBOX");
    assert_eq!(result.unwrap().len(), 3);

    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 3);
    // Initial connect plus one reconnect after each failed attempt.
    assert_eq!(fetcher.connects.load(Ordering::SeqCst), 3);
    processor.close();
}

#[test]
fn test_fetch_gives_up_after_max_attempts() {
    let fetcher = ScriptedFetcher::new(10);
    let (processor, _) = processor(fetcher.clone());

    let (_, result) = fetch_blocking(&processor, "INBOX");
    let error = result.unwrap_err();
    assert!(error.contains("after 3 attempts"), "{}", error);
    assert!(error.contains("server closed connection"), "{}", error);

    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 3);
    assert!(processor.cache().is_empty());
    processor.close();
}

#[test]
fn test_classification_tags_and_caches() {
    let (processor, classifier) = processor(ScriptedFetcher::new(0));

    let classify = |messages: Vec<EmailMessage>| {
        let (tx, rx) = mpsc::channel();
        let err_tx = tx.clone();
        let handle = processor.classify_emails_async(
            messages,
            Some(Box::new(move |tagged| tx.send(Ok(tagged)).unwrap())),
            Some(Box::new(move |error| err_tx.send(Err(error)).unwrap())),
        );
        (handle.is_some(), rx.recv_timeout(WAIT).unwrap())
    };

    let (queued, tagged) = classify(inbox()[..2].to_vec());
    assert!(queued);
    let tagged = tagged.unwrap();
    assert_eq!(tagged[0].category.as_deref(), Some("finance"));
    assert_eq!(tagged[1].category.as_deref(), Some("personal"));
    assert!(processor.cache().contains_key(&classify_cache_key(&inbox()[..2])));

    let (queued, cached) = classify(inbox()[..2].to_vec());
    assert!(!queued);
    assert_eq!(cached.unwrap(), tagged);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);

    let spam = vec![message("9", "spam@bulk.example", "Win")];
    let spam_key = classify_cache_key(&spam);
    let (_, failed) = classify(spam);
    assert_eq!(
        failed.unwrap_err(),
        "Classification error: model unavailable"
    );
    assert!(!processor.cache().contains_key(&spam_key));
    processor.close();
}

#[test]
fn test_batch_continues_past_failed_messages() {
    let sender = Arc::new(RecordingSender::default());
    let analytics = Arc::new(RecordingAnalytics {
        rejected: vec!["2"],
        saved: Mutex::new(Vec::new()),
    });
    let (processor, _) = processor(ScriptedFetcher::new(0));
    let processor = processor
        .with_sender(sender.clone())
        .with_analytics(analytics.clone());

    let progress = Arc::new(Mutex::new(Vec::new()));
    let recorded = progress.clone();
    let (tx, rx) = mpsc::channel();

    processor.batch_process_async(
        inbox(),
        Some("archived".to_string()),
        Some("Thanks, received.".to_string()),
        Some(Box::new(move |outcome| tx.send(outcome).unwrap())),
        None,
        Some(Box::new(move |_, percent| recorded.lock().unwrap().push(percent))),
    );

    let outcome: BatchOutcome = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.replies_sent, 2);
    let ids: Vec<&str> = outcome.processed.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "3"]);
    assert!(outcome
        .processed
        .iter()
        .all(|m| m.category.as_deref() == Some("archived")));

    assert_eq!(analytics.saved.lock().unwrap().len(), 2);
    let sent = sender.sent.lock().unwrap().clone();
    assert_eq!(
        sent,
        vec![
            (
                "billing@shop.example".to_string(),
                "Re: Your invoice".to_string(),
                0
            ),
            (
                "news@list.example".to_string(),
                "Re: Weekly digest".to_string(),
                0
            ),
        ]
    );
    assert_eq!(*progress.lock().unwrap(), vec![33, 66, 100]);
    processor.close();
}

#[test]
fn test_reply_goes_to_original_sender() {
    let sender = Arc::new(RecordingSender::default());
    let (processor, _) = processor(ScriptedFetcher::new(0));
    let processor = processor.with_sender(sender.clone());

    let (tx, rx) = mpsc::channel();
    let handle = processor.send_reply_async(
        &message("7", "friend@example.com", "Re: Lunch?"),
        "Sure".to_string(),
        vec![PathBuf::from("menu.pdf")],
        Some(Box::new(move |accepted| tx.send(accepted).unwrap())),
        None,
    );

    assert!(handle.is_some());
    assert!(rx.recv_timeout(WAIT).unwrap());
    assert_eq!(
        sender.sent.lock().unwrap()[0],
        ("friend@example.com".to_string(), "Re: Lunch?".to_string(), 1)
    );
    processor.close();
}

#[tokio::test]
async fn test_results_arrive_as_events() {
    let (processor, _) = processor(ScriptedFetcher::new(0));
    let (bridge, mut events) = EventBridge::new();

    processor.fetch_emails_async("INBOX", "ALL", bridge.on_fetched(), bridge.on_failure("fetch"));
    let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event, AssistantEvent::EmailsFetched(inbox()));

    processor.classify_emails_async(
        vec![message("9", "spam@bulk.example", "Win")],
        bridge.on_classified(),
        bridge.on_failure("classify"),
    );
    let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(
        event,
        AssistantEvent::OperationFailed {
            operation: "classify".to_string(),
            error: "Classification error: model unavailable".to_string(),
        }
    );

    tokio::task::spawn_blocking(move || processor.close())
        .await
        .unwrap();
}
