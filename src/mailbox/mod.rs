//! Mailbox abstraction: where candidate messages come from and where
//! labels go.

pub mod imap;
pub mod parse;

pub use imap::{ImapConfig, ImapMailbox};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;

/// A candidate message as seen by the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    /// Provider-native identifier (IMAP UID for `ImapMailbox`).
    pub id: String,
    /// From header, `Name <addr>` or a bare address.
    pub from: String,
    pub subject: String,
    /// Plain-text body (HTML stripped when no text part exists).
    pub body: String,
}

/// Mailbox provider used by the run orchestrator.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Messages to classify in this run.
    async fn list_candidate_messages(&self) -> Result<Vec<MailMessage>, MailboxError>;

    /// Create `label` if it does not exist yet. Idempotent.
    async fn ensure_label_exists(&self, label: &str) -> Result<(), MailboxError>;

    /// Attach `label` to the message with the given id.
    async fn apply_label(&self, message_id: &str, label: &str) -> Result<(), MailboxError>;

    /// Release any held connection.
    async fn close(&self) -> Result<(), MailboxError> {
        Ok(())
    }
}
