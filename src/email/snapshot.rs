//! Offline mailbox backed by a JSON snapshot
//!
//! The snapshot maps folder names to message lists:
//!
//! ```json
//! { "INBOX": [ { "id": "1", "sender": "a@example.com", "date": "2024-03-01T10:00:00Z" } ] }
//! ```

use crate::email::collaborators::{MailFetcher, MessageClassifier};
use crate::email::message::EmailMessage;
use crate::error::{MailError, MailResult};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Mailbox served from an in-memory folder map
pub struct SnapshotMailbox {
    folders: HashMap<String, Vec<EmailMessage>>,
    connected: AtomicBool,
}

impl SnapshotMailbox {
    pub fn new(folders: HashMap<String, Vec<EmailMessage>>) -> Self {
        Self {
            folders,
            connected: AtomicBool::new(false),
        }
    }

    /// Load a snapshot file
    pub fn load(path: &Path) -> MailResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MailError::snapshot(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let snapshot = Self::from_json(&content)?;
        info!(
            "Loaded mailbox snapshot with {} folders from {}",
            snapshot.folders.len(),
            path.display()
        );
        Ok(snapshot)
    }

    pub fn from_json(json: &str) -> MailResult<Self> {
        let folders: HashMap<String, Vec<EmailMessage>> = serde_json::from_str(json)
            .map_err(|e| MailError::snapshot(format!("Invalid snapshot: {}", e)))?;
        Ok(Self::new(folders))
    }

    pub fn folder_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.folders.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Parsed search criteria: `ALL`, `FROM <text>` or `SUBJECT <text>`
#[derive(Debug, Clone, PartialEq, Eq)]
enum SearchCriteria {
    All,
    From(String),
    Subject(String),
}

impl SearchCriteria {
    fn parse(criteria: &str) -> MailResult<Self> {
        let criteria = criteria.trim();
        if criteria.is_empty() || criteria.eq_ignore_ascii_case("ALL") {
            return Ok(SearchCriteria::All);
        }

        let unsupported =
            || MailError::fetch(format!("Unsupported search criteria: {}", criteria));
        let (keyword, rest) = criteria
            .split_once(char::is_whitespace)
            .ok_or_else(unsupported)?;
        let needle = rest.trim().trim_matches('"').to_lowercase();

        match keyword.to_ascii_uppercase().as_str() {
            "FROM" => Ok(SearchCriteria::From(needle)),
            "SUBJECT" => Ok(SearchCriteria::Subject(needle)),
            _ => Err(unsupported()),
        }
    }

    fn matches(&self, message: &EmailMessage) -> bool {
        match self {
            SearchCriteria::All => true,
            SearchCriteria::From(needle) => message.sender.to_lowercase().contains(needle),
            SearchCriteria::Subject(needle) => message.subject.to_lowercase().contains(needle),
        }
    }
}

impl MailFetcher for SnapshotMailbox {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connect(&self) -> MailResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        debug!("Snapshot mailbox connected");
        Ok(())
    }

    fn fetch(&self, folder: &str, search_criteria: &str) -> MailResult<Vec<EmailMessage>> {
        if !self.is_connected() {
            return Err(MailError::connection("mailbox is not connected"));
        }

        let criteria = SearchCriteria::parse(search_criteria)?;
        let messages = self
            .folders
            .get(folder)
            .ok_or_else(|| MailError::fetch(format!("Folder not found: {}", folder)))?;

        let selected: Vec<EmailMessage> = messages
            .iter()
            .filter(|message| criteria.matches(message))
            .cloned()
            .collect();

        debug!(
            "Fetched {} of {} messages from {}",
            selected.len(),
            messages.len(),
            folder
        );
        Ok(selected)
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Classifier for snapshots whose messages already carry labels
///
/// Keeps an existing category and falls back to a default for unlabeled
/// messages. Rule-based classification is provided by the desktop client.
pub struct PresetClassifier {
    default_category: String,
}

impl PresetClassifier {
    pub fn new(default_category: impl Into<String>) -> Self {
        Self {
            default_category: default_category.into(),
        }
    }
}

impl Default for PresetClassifier {
    fn default() -> Self {
        Self::new("other")
    }
}

impl MessageClassifier for PresetClassifier {
    fn classify(&self, message: &EmailMessage) -> MailResult<String> {
        Ok(message
            .category
            .clone()
            .unwrap_or_else(|| self.default_category.clone()))
    }
}
