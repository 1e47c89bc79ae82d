//! Shared types for the decision pipeline.

use serde::Serialize;

use crate::store::{LedgerStatistics, SenderStatus};

// ── Labels ──────────────────────────────────────────────────────────

/// Label applied to newsletters from subscribed senders.
pub const LABEL_NEWSLETTER: &str = "Newsletter";

/// Label applied to newsletters the user should unsubscribe from.
pub const LABEL_UNSUBSCRIBE: &str = "Unsubscribe";

/// Both output labels, in the order they are ensured.
pub const LABELS: [&str; 2] = [LABEL_NEWSLETTER, LABEL_UNSUBSCRIBE];

/// Label for a decided status. `Unknown` never reaches labeling.
pub fn label_for(status: SenderStatus) -> &'static str {
    match status {
        SenderStatus::Subscribed => LABEL_NEWSLETTER,
        SenderStatus::Unsubscribed | SenderStatus::Unknown => LABEL_UNSUBSCRIBE,
    }
}

// ── Per-message outcome ─────────────────────────────────────────────

/// Where a sender's status came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// The ledger already knew the sender (or its domain).
    Ledger,
    /// The subscription check was asked.
    Oracle,
}

/// Result of processing one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Not a newsletter. No ledger write, no label.
    Skipped,
    /// Newsletter labeled according to the sender's status.
    Labeled {
        status: SenderStatus,
        label: &'static str,
        source: DecisionSource,
    },
}

impl Outcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Labeled { label, .. } => label,
        }
    }
}

/// A message that could not be processed.
#[derive(Debug, Clone, Serialize)]
pub struct MessageFailure {
    pub message_id: String,
    pub sender: String,
    pub reason: String,
}

// ── Run report ──────────────────────────────────────────────────────

/// Aggregate result of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Messages listed from the mailbox.
    pub processed: usize,
    /// Labeled `Newsletter`.
    pub newsletters: usize,
    /// Labeled `Unsubscribe`.
    pub unsubscribe: usize,
    /// Not newsletters.
    pub skipped: usize,
    /// Statuses answered by the ledger.
    pub ledger_decisions: usize,
    /// Statuses answered by the subscription check.
    pub oracle_decisions: usize,
    pub failures: Vec<MessageFailure>,
    /// Ledger counts after the batch.
    pub ledger: LedgerStatistics,
}

impl RunReport {
    /// Fold one message result into the counts.
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Skipped => self.skipped += 1,
            Outcome::Labeled { status, source, .. } => {
                match status {
                    SenderStatus::Subscribed => self.newsletters += 1,
                    _ => self.unsubscribe += 1,
                }
                match source {
                    DecisionSource::Ledger => self.ledger_decisions += 1,
                    DecisionSource::Oracle => self.oracle_decisions += 1,
                }
            }
        }
    }

    /// Human-readable end-of-run summary.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Processed {} messages: {} newsletter, {} unsubscribe, {} skipped, {} failed \
             ({} from ledger, {} from classifier)\n\
             Tracked senders: {} ({} subscribed, {} unsubscribed, {} unknown)",
            self.processed,
            self.newsletters,
            self.unsubscribe,
            self.skipped,
            self.failures.len(),
            self.ledger_decisions,
            self.oracle_decisions,
            self.ledger.total_emails,
            self.ledger.subscribed_count,
            self.ledger.unsubscribed_count,
            self.ledger.unknown_count,
        );
        for failure in &self.failures {
            out.push_str(&format!(
                "\n  failed {} from {}: {}",
                failure.message_id, failure.sender, failure.reason
            ));
        }
        out
    }
}
