//! Clean Newsletters: sorts inbox newsletters into keep and unsubscribe.

pub mod config;
pub mod error;
pub mod llm;
pub mod mailbox;
pub mod pipeline;
pub mod store;
