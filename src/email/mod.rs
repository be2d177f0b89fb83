pub mod collaborators;
pub mod message;
pub mod snapshot;

pub use collaborators::{AnalyticsSink, MailFetcher, MailSender, MessageClassifier};
pub use message::{Attachment, EmailMessage, MessageId};
pub use snapshot::{PresetClassifier, SnapshotMailbox};
