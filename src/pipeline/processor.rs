//! Decision pipeline: classifies one message and labels it.
//!
//! Flow:
//! 1. Newsletter check (LLM) → non-newsletters are skipped untouched
//! 2. Ledger lookup → a known sender is authoritative
//! 3. Subscription check (LLM), only when the ledger has no opinion
//! 4. Ledger write (best effort) → label application (must succeed)
//!
//! Once a sender has been decided, later messages from it never reach the
//! subscription check, so LLM cost grows with distinct new senders rather
//! than with message volume.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::llm::NewsletterClassifier;
use crate::mailbox::{MailMessage, Mailbox};
use crate::pipeline::types::{DecisionSource, Outcome, label_for};
use crate::store::{SenderLedger, SenderStatus};

/// Classifies messages against the sender ledger and applies labels.
pub struct NewsletterProcessor {
    ledger: Arc<SenderLedger>,
    classifier: NewsletterClassifier,
    mailbox: Arc<dyn Mailbox>,
    /// Configured subscribed senders, always offered to the subscription check.
    seed_subscribed: Vec<String>,
}

impl NewsletterProcessor {
    pub fn new(
        ledger: Arc<SenderLedger>,
        classifier: NewsletterClassifier,
        mailbox: Arc<dyn Mailbox>,
        seed_subscribed: Vec<String>,
    ) -> Self {
        Self {
            ledger,
            classifier,
            mailbox,
            seed_subscribed,
        }
    }

    /// Process a single message through the full pipeline.
    pub async fn process(&self, message: &MailMessage) -> Result<Outcome, PipelineError> {
        debug!(id = %message.id, sender = %message.from, "Processing message");

        // Step 1: newsletter check
        let is_newsletter = self
            .classifier
            .is_newsletter(message)
            .await
            .map_err(PipelineError::NewsletterCheck)?;
        if !is_newsletter {
            debug!(id = %message.id, sender = %message.from, "Not a newsletter");
            return Ok(Outcome::Skipped);
        }

        // Step 2: ledger first, LLM only on a miss
        let (status, source) = match self.ledger.status_of(&message.from).await {
            SenderStatus::Unknown => {
                let candidates = self.candidates().await;
                let subscribed = self
                    .classifier
                    .is_subscribed(message, &candidates)
                    .await
                    .map_err(PipelineError::SubscriptionCheck)?;
                let status = SenderStatus::from_subscribed(subscribed);
                info!(
                    id = %message.id,
                    sender = %message.from,
                    status = %status,
                    candidates = candidates.len(),
                    "Classified new sender"
                );
                (status, DecisionSource::Oracle)
            }
            known => {
                debug!(sender = %message.from, status = %known, "Sender status from ledger");
                (known, DecisionSource::Ledger)
            }
        };

        // Step 3: remember, then label
        if let Err(e) = self.ledger.record_decision(&message.from, status).await {
            warn!(
                sender = %message.from,
                error = %e,
                "Failed to record sender decision, continuing"
            );
        }

        let label = label_for(status);
        self.mailbox
            .apply_label(&message.id, label)
            .await
            .map_err(|source| PipelineError::ApplyLabel {
                label: label.to_string(),
                source,
            })?;

        info!(id = %message.id, sender = %message.from, label, "Labeled message");
        Ok(Outcome::Labeled {
            status,
            label,
            source,
        })
    }

    /// Seed addresses followed by ledger-subscribed ones, without
    /// case-insensitive duplicates.
    async fn candidates(&self) -> Vec<String> {
        merge_candidates(&self.seed_subscribed, self.ledger.subscribed_addresses().await)
    }
}

fn merge_candidates(seed: &[String], learned: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    seed.iter()
        .cloned()
        .chain(learned)
        .filter(|addr| seen.insert(addr.to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::{LlmError, MailboxError};
    use crate::llm::LlmProvider;

    /// Answers the two questions independently and counts calls.
    struct ScriptedLlm {
        newsletter: &'static str,
        subscribed: &'static str,
        newsletter_calls: Mutex<usize>,
        subscription_calls: Mutex<usize>,
    }

    impl ScriptedLlm {
        fn new(newsletter: &'static str, subscribed: &'static str) -> Arc<Self> {
            Arc::new(Self {
                newsletter,
                subscribed,
                newsletter_calls: Mutex::new(0),
                subscription_calls: Mutex::new(0),
            })
        }

        fn subscription_calls(&self) -> usize {
            *self.subscription_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            if prompt.contains("Is this a newsletter?") {
                *self.newsletter_calls.lock().unwrap() += 1;
                Ok(self.newsletter.to_string())
            } else {
                *self.subscription_calls.lock().unwrap() += 1;
                Ok(self.subscribed.to_string())
            }
        }
    }

    #[derive(Default)]
    struct RecordingMailbox {
        labels: Mutex<Vec<(String, String)>>,
        fail_apply: bool,
    }

    #[async_trait]
    impl Mailbox for RecordingMailbox {
        fn name(&self) -> &str {
            "recording"
        }

        async fn list_candidate_messages(&self) -> Result<Vec<MailMessage>, MailboxError> {
            Ok(Vec::new())
        }

        async fn ensure_label_exists(&self, _label: &str) -> Result<(), MailboxError> {
            Ok(())
        }

        async fn apply_label(&self, message_id: &str, label: &str) -> Result<(), MailboxError> {
            if self.fail_apply {
                return Err(MailboxError::CommandFailed {
                    command: "UID COPY".into(),
                    reason: "NO quota exceeded".into(),
                });
            }
            self.labels
                .lock()
                .unwrap()
                .push((message_id.to_string(), label.to_string()));
            Ok(())
        }
    }

    fn message(id: &str, from: &str) -> MailMessage {
        MailMessage {
            id: id.into(),
            from: from.into(),
            subject: "Weekly digest".into(),
            body: "Top stories. Unsubscribe here.".into(),
        }
    }

    async fn setup(
        llm: Arc<ScriptedLlm>,
        mailbox: Arc<RecordingMailbox>,
        seed: Vec<String>,
    ) -> (tempfile::TempDir, Arc<SenderLedger>, NewsletterProcessor) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(
            SenderLedger::open(dir.path().join("tracker.json"))
                .await
                .unwrap(),
        );
        let classifier = NewsletterClassifier::new(llm, Duration::from_secs(5));
        let processor = NewsletterProcessor::new(ledger.clone(), classifier, mailbox, seed);
        (dir, ledger, processor)
    }

    #[test]
    fn merge_candidates_dedups_case_insensitively() {
        let merged = merge_candidates(
            &["News@A.com".to_string(), "b@b.com".to_string()],
            vec!["news@a.com".to_string(), "c@c.com".to_string()],
        );
        assert_eq!(merged, vec!["News@A.com", "b@b.com", "c@c.com"]);
    }

    #[tokio::test]
    async fn non_newsletter_is_skipped_without_ledger_write() {
        let llm = ScriptedLlm::new("NO", "YES");
        let mailbox = Arc::new(RecordingMailbox::default());
        let (_dir, ledger, processor) = setup(llm.clone(), mailbox.clone(), vec![]).await;

        let outcome = processor.process(&message("1", "friend@mail.com")).await.unwrap();

        assert_eq!(outcome, Outcome::Skipped);
        assert!(ledger.is_empty().await);
        assert!(mailbox.labels.lock().unwrap().is_empty());
        assert_eq!(llm.subscription_calls(), 0);
    }

    #[tokio::test]
    async fn known_sender_skips_subscription_check() {
        let llm = ScriptedLlm::new("YES", "NO");
        let mailbox = Arc::new(RecordingMailbox::default());
        let (_dir, ledger, processor) = setup(llm.clone(), mailbox.clone(), vec![]).await;
        ledger
            .record_decision("news@rust.org", SenderStatus::Subscribed)
            .await
            .unwrap();

        let outcome = processor.process(&message("2", "news@rust.org")).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::Labeled {
                status: SenderStatus::Subscribed,
                label: "Newsletter",
                source: DecisionSource::Ledger,
            }
        );
        assert_eq!(llm.subscription_calls(), 0);
        assert_eq!(ledger.record("news@rust.org").await.unwrap().seen_count, 2);
    }

    #[tokio::test]
    async fn new_sender_asks_with_seed_candidates() {
        let llm = ScriptedLlm::new("YES", "YES");
        let mailbox = Arc::new(RecordingMailbox::default());
        let seed = vec!["digest@weekly.dev".to_string()];
        let (_dir, ledger, processor) = setup(llm.clone(), mailbox.clone(), seed).await;

        let outcome = processor
            .process(&message("3", "Weekly <Digest@Weekly.dev>"))
            .await
            .unwrap();

        assert_eq!(outcome.label(), "Newsletter");
        assert_eq!(llm.subscription_calls(), 1);
        assert_eq!(
            ledger.status_of("digest@weekly.dev").await,
            SenderStatus::Subscribed
        );
        assert_eq!(
            *mailbox.labels.lock().unwrap(),
            vec![("3".to_string(), "Newsletter".to_string())]
        );
    }

    #[tokio::test]
    async fn empty_candidates_mean_unsubscribe() {
        let llm = ScriptedLlm::new("YES", "YES");
        let mailbox = Arc::new(RecordingMailbox::default());
        let (_dir, ledger, processor) = setup(llm.clone(), mailbox.clone(), vec![]).await;

        let outcome = processor.process(&message("4", "promo@shop.com")).await.unwrap();

        assert_eq!(outcome.label(), "Unsubscribe");
        assert_eq!(llm.subscription_calls(), 0);
        assert_eq!(
            ledger.status_of("promo@shop.com").await,
            SenderStatus::Unsubscribed
        );
    }

    #[tokio::test]
    async fn ledger_write_failure_still_labels() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("profile");
        let ledger = Arc::new(
            SenderLedger::open(profile.join("tracker.json"))
                .await
                .unwrap(),
        );
        std::fs::remove_dir(&profile).unwrap();

        let llm = ScriptedLlm::new("YES", "NO");
        let mailbox = Arc::new(RecordingMailbox::default());
        let processor = NewsletterProcessor::new(
            ledger.clone(),
            NewsletterClassifier::new(llm, Duration::from_secs(5)),
            mailbox.clone(),
            vec!["digest@weekly.dev".to_string()],
        );

        let outcome = processor.process(&message("6", "promo@shop.com")).await.unwrap();

        assert_eq!(outcome.label(), "Unsubscribe");
        assert_eq!(
            *mailbox.labels.lock().unwrap(),
            vec![("6".to_string(), "Unsubscribe".to_string())]
        );
        assert_eq!(
            ledger.status_of("promo@shop.com").await,
            SenderStatus::Unsubscribed
        );
        assert!(!profile.join("tracker.json").exists());
    }

    #[tokio::test]
    async fn label_failure_is_reported_after_ledger_write() {
        let llm = ScriptedLlm::new("YES", "NO");
        let mailbox = Arc::new(RecordingMailbox {
            fail_apply: true,
            ..Default::default()
        });
        let (_dir, ledger, processor) = setup(llm, mailbox, vec![]).await;

        let err = processor
            .process(&message("5", "promo@shop.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ApplyLabel { ref label, .. } if label == "Unsubscribe"));
        assert_eq!(ledger.len().await, 1);
    }
}
