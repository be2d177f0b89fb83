//! Moves worker-thread callbacks onto an async event loop
//!
//! Task callbacks run on pool workers. A UI that may only be touched from its
//! own loop hands the processor the callbacks produced here; each one forwards
//! its result as an [`AssistantEvent`] over an unbounded channel, which the
//! loop drains with `recv().await`.

use crate::email::EmailMessage;
use crate::performance::{BatchOutcome, ErrorCallback, ProgressCallback, SuccessCallback, TaskId};
use tokio::sync::mpsc;
use tracing::debug;

/// Events delivered to the UI loop
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantEvent {
    EmailsFetched(Vec<EmailMessage>),
    EmailsClassified(Vec<EmailMessage>),
    BatchCompleted(BatchOutcome),
    ReplySent { accepted: bool },
    OperationFailed { operation: String, error: String },
    Progress { task_id: TaskId, percent: u8 },
}

/// Callback factory bound to one event channel
#[derive(Clone)]
pub struct EventBridge {
    sender: mpsc::UnboundedSender<AssistantEvent>,
}

impl EventBridge {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AssistantEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn emit(sender: &mpsc::UnboundedSender<AssistantEvent>, event: AssistantEvent) {
        // A closed receiver means the UI loop has exited; nothing to deliver to.
        if sender.send(event).is_err() {
            debug!("Event loop gone, dropping event");
        }
    }

    pub fn on_fetched(&self) -> Option<SuccessCallback<Vec<EmailMessage>>> {
        let sender = self.sender.clone();
        Some(Box::new(move |messages| {
            Self::emit(&sender, AssistantEvent::EmailsFetched(messages))
        }))
    }

    pub fn on_classified(&self) -> Option<SuccessCallback<Vec<EmailMessage>>> {
        let sender = self.sender.clone();
        Some(Box::new(move |messages| {
            Self::emit(&sender, AssistantEvent::EmailsClassified(messages))
        }))
    }

    pub fn on_batch(&self) -> Option<SuccessCallback<BatchOutcome>> {
        let sender = self.sender.clone();
        Some(Box::new(move |outcome| {
            Self::emit(&sender, AssistantEvent::BatchCompleted(outcome))
        }))
    }

    pub fn on_sent(&self) -> Option<SuccessCallback<bool>> {
        let sender = self.sender.clone();
        Some(Box::new(move |accepted| {
            Self::emit(&sender, AssistantEvent::ReplySent { accepted })
        }))
    }

    pub fn on_failure(&self, operation: impl Into<String>) -> Option<ErrorCallback> {
        let sender = self.sender.clone();
        let operation = operation.into();
        Some(Box::new(move |error| {
            Self::emit(&sender, AssistantEvent::OperationFailed { operation, error })
        }))
    }

    pub fn on_progress(&self) -> Option<ProgressCallback> {
        let sender = self.sender.clone();
        Some(Box::new(move |task_id, percent| {
            Self::emit(&sender, AssistantEvent::Progress { task_id, percent })
        }))
    }
}
