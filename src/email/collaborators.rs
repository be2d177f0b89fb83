//! Contracts for the mail services the task layer drives
//!
//! IMAP fetch, SMTP send, rule classification and analytics storage live
//! outside this crate. The processor only needs "takes arguments, returns a
//! value or an error", expressed here as traits so implementations can be
//! shared across worker threads.

use crate::email::message::EmailMessage;
use crate::error::MailResult;
use std::path::PathBuf;

/// Mailbox access (IMAP in the desktop client)
pub trait MailFetcher: Send + Sync {
    fn is_connected(&self) -> bool;

    fn connect(&self) -> MailResult<()>;

    /// Fetch the messages of `folder` matching `search_criteria`
    fn fetch(&self, folder: &str, search_criteria: &str) -> MailResult<Vec<EmailMessage>>;

    /// Drop the current connection; the next fetch reconnects
    fn close(&self);
}

/// Assigns a category label to a message
pub trait MessageClassifier: Send + Sync {
    fn classify(&self, message: &EmailMessage) -> MailResult<String>;
}

/// Outgoing mail (SMTP in the desktop client)
pub trait MailSender: Send + Sync {
    /// Returns whether the server accepted the message
    fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
        attachments: &[PathBuf],
    ) -> MailResult<bool>;
}

/// Records processed messages for reporting
pub trait AnalyticsSink: Send + Sync {
    fn save_email(&self, message: &EmailMessage) -> MailResult<()>;
}
