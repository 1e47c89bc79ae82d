//! Configuration types.
//!
//! Everything comes from environment variables. Required values fail with
//! `ConfigError`; optional ones fall back to defaults, but a value that is
//! present and unparseable is an error rather than silently ignored.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{DEFAULT_MODEL, LlmConfig};
use crate::mailbox::ImapConfig;
use crate::store::LEDGER_FILE_NAME;

/// Profile used when `GMAIL_ACCOUNT_PROFILE` is unset.
pub const DEFAULT_PROFILE: &str = "default";

/// Application config directory under `$HOME/.config`.
const APP_DIR: &str = "clean_newsletters";

/// Run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub imap: ImapConfig,
    /// Account profile; selects the ledger directory.
    pub profile: String,
    /// Static seed list of subscribed senders.
    pub subscribed_newsletters: Vec<String>,
    pub ledger_path: PathBuf,
    /// Messages processed at once.
    pub max_concurrency: usize,
}

impl Config {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("OPENROUTER_API_KEY").ok_or_else(|| ConfigError::MissingRequired {
            key: "OPENROUTER_API_KEY".into(),
            hint: "export OPENROUTER_API_KEY=sk-or-...".into(),
        })?;
        let model = get("OPENROUTER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let timeout_secs: u64 = parse_or(&get, "CLEAN_NEWSLETTERS_ORACLE_TIMEOUT_SECS", 30)?;

        let profile = get("GMAIL_ACCOUNT_PROFILE").unwrap_or_else(|| DEFAULT_PROFILE.to_string());

        let subscribed_newsletters = get("SUBSCRIBED_NEWSLETTERS")
            .map(|raw| parse_list(&raw))
            .unwrap_or_default();

        let username = get("EMAIL_USERNAME")
            .ok_or_else(|| ConfigError::MissingEnvVar("EMAIL_USERNAME".into()))?;
        let password = get("EMAIL_PASSWORD")
            .ok_or_else(|| ConfigError::MissingEnvVar("EMAIL_PASSWORD".into()))?;

        let imap = ImapConfig {
            host: get("EMAIL_IMAP_HOST").unwrap_or_else(|| "imap.gmail.com".to_string()),
            port: parse_or(&get, "EMAIL_IMAP_PORT", 993)?,
            username,
            password: SecretString::from(password),
            mailbox: get("EMAIL_MAILBOX").unwrap_or_else(|| "INBOX".to_string()),
            max_messages: parse_or(&get, "CLEAN_NEWSLETTERS_MAX_MESSAGES", 100)?,
        };

        let max_concurrency: usize = parse_or(&get, "CLEAN_NEWSLETTERS_CONCURRENCY", 1)?;
        if max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CLEAN_NEWSLETTERS_CONCURRENCY".into(),
                message: "must be at least 1".into(),
            });
        }

        let ledger_path = match get("CLEAN_NEWSLETTERS_LEDGER_PATH") {
            Some(path) => PathBuf::from(path),
            None => {
                let home = get("HOME").ok_or_else(|| ConfigError::MissingRequired {
                    key: "HOME".into(),
                    hint: "set CLEAN_NEWSLETTERS_LEDGER_PATH instead".into(),
                })?;
                default_ledger_path(&PathBuf::from(home), &profile)
            }
        };

        Ok(Self {
            llm: LlmConfig {
                api_key: SecretString::from(api_key),
                model,
                timeout: Duration::from_secs(timeout_secs),
            },
            imap,
            profile,
            subscribed_newsletters,
            ledger_path,
            max_concurrency,
        })
    }

    /// Directory holding the ledger and log files.
    pub fn profile_dir(&self) -> PathBuf {
        self.ledger_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// `<home>/.config/clean_newsletters/<profile>/newsletter_tracker.json`.
pub fn default_ledger_path(home: &std::path::Path, profile: &str) -> PathBuf {
    home.join(".config")
        .join(APP_DIR)
        .join(profile)
        .join(LEDGER_FILE_NAME)
}

/// Split a comma-separated list, trimming entries and dropping empties.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}
