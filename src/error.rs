//! Error types for clean-newsletters.

use std::path::PathBuf;
use std::time::Duration;

/// Failures that abort a whole run. Per-message failures stay in
/// `PipelineError` and end up in the run report instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Sender ledger errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Failed to create ledger directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read ledger at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to persist ledger to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize ledger: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Refusing to record an undecided status for {address}")]
    UndecidedStatus { address: String },
}

/// Mailbox provider errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}: {reason}")]
    Connection { host: String, reason: String },

    #[error("Authentication failed for {username}")]
    AuthFailed { username: String },

    #[error("{command} failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Malformed server response: {0}")]
    Protocol(String),

    #[error("Label {0} does not exist")]
    LabelNotFound(String),

    #[error("Message {0} not found")]
    MessageNotFound(String),

    #[error("Mailbox task panicked: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },
}

/// Pipeline-related errors. Each variant aborts processing of one message.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Newsletter check failed: {0}")]
    NewsletterCheck(#[source] LlmError),

    #[error("Subscription check failed: {0}")]
    SubscriptionCheck(#[source] LlmError),

    #[error("Failed to apply label {label}: {source}")]
    ApplyLabel {
        label: String,
        #[source]
        source: MailboxError,
    },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
