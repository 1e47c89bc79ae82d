//! Newsletter decision pipeline.
//!
//! Every candidate message flows through:
//! 1. `Mailbox::list_candidate_messages()`: provider I/O
//! 2. `NewsletterProcessor::process()`: newsletter check, ledger lookup,
//!    subscription check on a ledger miss
//! 3. `Mailbox::apply_label()`: `Newsletter` or `Unsubscribe`
//!
//! `RunOrchestrator` drives a whole batch and builds the `RunReport`.

pub mod processor;
pub mod run;
pub mod types;

pub use processor::NewsletterProcessor;
pub use run::RunOrchestrator;
pub use types::{
    DecisionSource, LABEL_NEWSLETTER, LABEL_UNSUBSCRIBE, MessageFailure, Outcome, RunReport,
};
