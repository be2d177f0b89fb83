//! Error types for the task layer, its configuration and the mail collaborators

use std::io;
use thiserror::Error;

pub type ExecutorResult<T> = Result<T, ExecutorError>;
pub type MailResult<T> = Result<T, MailError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// Worker pool errors
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// The OS refused to create a worker thread
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Errors reported by the mail collaborators (fetch, classify, send, analytics)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Send error: {0}")]
    Send(String),

    #[error("Analytics error: {0}")]
    Analytics(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

impl MailError {
    /// Create a new connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        MailError::Connection(msg.into())
    }

    /// Create a new fetch error
    pub fn fetch<S: Into<String>>(msg: S) -> Self {
        MailError::Fetch(msg.into())
    }

    /// Create a new classification error
    pub fn classification<S: Into<String>>(msg: S) -> Self {
        MailError::Classification(msg.into())
    }

    /// Create a new send error
    pub fn send<S: Into<String>>(msg: S) -> Self {
        MailError::Send(msg.into())
    }

    /// Create a new analytics error
    pub fn analytics<S: Into<String>>(msg: S) -> Self {
        MailError::Analytics(msg.into())
    }

    /// Create a new snapshot error
    pub fn snapshot<S: Into<String>>(msg: S) -> Self {
        MailError::Snapshot(msg.into())
    }
}

/// Configuration file errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Could not determine the user configuration directory")]
    NoConfigDir,
}

impl ConfigError {
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        ConfigError::Invalid(msg.into())
    }
}

/// Errors produced by the mail processor's payload wrappers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("Fetching emails failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: usize, last_error: String },

    #[error(transparent)]
    Mail(#[from] MailError),
}
