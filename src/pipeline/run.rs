//! Run orchestrator: drives the pipeline over one mailbox batch.

use futures::StreamExt;
use tracing::{error, info};

use crate::error::Result;
use crate::mailbox::Mailbox;
use crate::pipeline::processor::NewsletterProcessor;
use crate::pipeline::types::{LABELS, MessageFailure, RunReport};
use crate::store::SenderLedger;

/// One classification run.
pub struct RunOrchestrator<'a> {
    processor: &'a NewsletterProcessor,
    mailbox: &'a dyn Mailbox,
    ledger: &'a SenderLedger,
    max_concurrency: usize,
}

impl<'a> RunOrchestrator<'a> {
    pub fn new(
        processor: &'a NewsletterProcessor,
        mailbox: &'a dyn Mailbox,
        ledger: &'a SenderLedger,
    ) -> Self {
        Self {
            processor,
            mailbox,
            ledger,
            max_concurrency: 1,
        }
    }

    /// Process up to `n` messages at once. Values below 1 are treated as 1.
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    /// Ensure labels, fetch the batch, and process every message.
    ///
    /// Label setup and listing failures abort the run. Per-message
    /// failures are collected in the report.
    pub async fn run(&self) -> Result<RunReport> {
        for label in LABELS {
            self.mailbox.ensure_label_exists(label).await?;
        }

        let messages = self.mailbox.list_candidate_messages().await?;
        info!(
            count = messages.len(),
            mailbox = self.mailbox.name(),
            concurrency = self.max_concurrency,
            "Processing message batch"
        );

        let mut report = RunReport {
            processed: messages.len(),
            ..Default::default()
        };

        let mut results = futures::stream::iter(messages.iter())
            .map(|message| async move { (message, self.processor.process(message).await) })
            .buffer_unordered(self.max_concurrency);

        while let Some((message, result)) = results.next().await {
            match result {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    error!(
                        id = %message.id,
                        sender = %message.from,
                        error = %e,
                        "Failed to process message"
                    );
                    report.failures.push(MessageFailure {
                        message_id: message.id.clone(),
                        sender: message.from.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        drop(results);

        report.ledger = self.ledger.statistics().await;
        info!(
            newsletters = report.newsletters,
            unsubscribe = report.unsubscribe,
            skipped = report.skipped,
            failed = report.failures.len(),
            tracked = report.ledger.total_emails,
            "Batch processing complete"
        );
        Ok(report)
    }
}
