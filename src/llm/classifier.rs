//! Newsletter classifier: two yes/no questions asked of the LLM.
//!
//! Replies are trimmed and upper-cased; only an exact `YES` counts as yes.
//! Anything else (including `NO`, empty text, or chatter) is no. Transport
//! failures and timeouts surface as `LlmError`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::LlmProvider;
use crate::mailbox::MailMessage;

/// Body preview length (characters) embedded in the newsletter prompt.
pub const BODY_PREVIEW_CHARS: usize = 500;

/// Marker appended to a truncated body preview.
const TRUNCATION_MARKER: &str = "...";

/// How a raw reply was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Yes,
    No,
    /// Neither YES nor NO. Treated as no.
    Indeterminate,
}

impl Verdict {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "YES" => Self::Yes,
            "NO" => Self::No,
            _ => Self::Indeterminate,
        }
    }

    pub fn is_yes(self) -> bool {
        self == Self::Yes
    }
}

/// Wraps an `LlmProvider` with the two classification questions.
pub struct NewsletterClassifier {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl NewsletterClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Ask whether `message` is a newsletter.
    pub async fn is_newsletter(&self, message: &MailMessage) -> Result<bool, LlmError> {
        let prompt = build_newsletter_prompt(message);
        self.ask("newsletter", &message.from, &prompt).await
    }

    /// Ask whether `message` comes from one of the `subscribed` senders.
    ///
    /// An empty list answers no without calling the LLM.
    pub async fn is_subscribed(
        &self,
        message: &MailMessage,
        subscribed: &[String],
    ) -> Result<bool, LlmError> {
        if subscribed.is_empty() {
            debug!(sender = %message.from, "No subscribed senders known, skipping LLM");
            return Ok(false);
        }
        let prompt = build_subscription_prompt(message, subscribed);
        self.ask("subscription", &message.from, &prompt).await
    }

    async fn ask(&self, question: &str, sender: &str, prompt: &str) -> Result<bool, LlmError> {
        let reply = tokio::time::timeout(self.timeout, self.llm.complete(prompt))
            .await
            .map_err(|_| LlmError::Timeout {
                provider: self.llm.model_name().to_string(),
                timeout: self.timeout,
            })??;

        let verdict = Verdict::parse(&reply);
        if verdict == Verdict::Indeterminate {
            warn!(
                question,
                sender = %sender,
                reply = %reply.chars().take(80).collect::<String>(),
                "Indeterminate LLM reply, treating as NO"
            );
        } else {
            debug!(question, sender = %sender, verdict = ?verdict, "LLM verdict");
        }
        Ok(verdict.is_yes())
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Build the "is this a newsletter?" prompt.
pub fn build_newsletter_prompt(message: &MailMessage) -> String {
    format!(
        "Analyze the following email and determine if it's a newsletter.\n\
         Consider factors like sender patterns, subject line, content structure, and unsubscribe links.\n\
         \n\
         From: {}\n\
         Subject: {}\n\
         Body preview: {}\n\
         \n\
         Is this a newsletter? Reply with only YES or NO.",
        message.from,
        message.subject,
        truncate_body(&message.body, BODY_PREVIEW_CHARS),
    )
}

/// Build the "is this from a subscribed source?" prompt.
pub fn build_subscription_prompt(message: &MailMessage, subscribed: &[String]) -> String {
    format!(
        "Given the following email and list of subscribed newsletter senders,\n\
         determine if this email is from one of the subscribed sources. Consider domain names,\n\
         sender names, and common variations.\n\
         \n\
         Email From: {}\n\
         Email Subject: {}\n\
         \n\
         Subscribed Newsletters:\n\
         {}\n\
         \n\
         Is this email from a subscribed newsletter source? Reply with only YES or NO.",
        message.from,
        message.subject,
        subscribed.join("\n"),
    )
}

/// Keep the first `max_chars` characters, appending `...` if anything was cut.
pub fn truncate_body(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &body[..cut], TRUNCATION_MARKER),
        None => body.to_string(),
    }
}
