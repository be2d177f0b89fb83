use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mailbox-assigned identifier for a message
///
/// Deserialization goes through [`MessageId::parse`], so `<id@host>` and
/// `id@host` name the same message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse message ID from RFC format (with or without angle brackets)
    pub fn parse(id: &str) -> Result<Self, String> {
        let cleaned = id
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
            .unwrap_or(id)
            .trim();

        if cleaned.is_empty() {
            Err("Message ID cannot be empty".to_string())
        } else {
            Ok(Self::new(cleaned))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MessageId {
    type Error = String;

    fn try_from(id: String) -> Result<Self, Self::Error> {
        Self::parse(&id)
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Attachment metadata carried with a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Email message as produced by the fetch collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: MessageId,
    pub sender: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub date: DateTime<Utc>,
    /// Set by classification or batch tagging
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl EmailMessage {
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(id),
            sender: sender.into(),
            recipient: String::new(),
            subject: subject.into(),
            body: body.into(),
            date,
            category: None,
            attachments: Vec::new(),
        }
    }

    /// Tag the message with a category, replacing any previous one
    pub fn tag(&mut self, category: impl Into<String>) -> &mut Self {
        self.category = Some(category.into());
        self
    }

    /// Subject line for a reply to this message
    pub fn reply_subject(&self) -> String {
        let trimmed = self.subject.trim_start();
        if trimmed
            .get(..3)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:"))
        {
            self.subject.clone()
        } else {
            format!("Re: {}", self.subject)
        }
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}
