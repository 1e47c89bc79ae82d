//! Sender record types and address normalization.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Classification status of a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderStatus {
    /// The user wants this newsletter.
    Subscribed,
    /// The user should unsubscribe from this sender.
    Unsubscribed,
    /// The ledger has no opinion. Never written by `record_decision`.
    Unknown,
}

impl SenderStatus {
    /// Map a subscription verdict onto a decided status.
    pub fn from_subscribed(subscribed: bool) -> Self {
        if subscribed {
            Self::Subscribed
        } else {
            Self::Unsubscribed
        }
    }

    /// Whether this is a terminal decision (not `Unknown`).
    pub fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Short label for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscribed => "subscribed",
            Self::Unsubscribed => "unsubscribed",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SenderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger entry per normalized sender address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderRecord {
    /// Lowercased sender address (also the ledger key).
    #[serde(alias = "email")]
    pub address: String,
    /// Part after `@`, empty for malformed addresses.
    #[serde(default)]
    pub domain: String,
    pub status: SenderStatus,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub seen_count: u64,
    /// Last time `status` actually changed.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_last_action"
    )]
    pub last_action: Option<DateTime<Utc>>,
}

impl SenderRecord {
    /// Create a record for a first observation.
    pub fn new(address: String, status: SenderStatus, now: DateTime<Utc>) -> Self {
        let domain = derive_domain(&address).to_string();
        Self {
            address,
            domain,
            status,
            first_seen: now,
            last_seen: now,
            seen_count: 1,
            last_action: None,
        }
    }

    /// Register another observation. Returns `true` if the status flipped.
    pub fn observe(&mut self, status: SenderStatus, now: DateTime<Utc>) -> bool {
        self.seen_count += 1;
        self.last_seen = now;
        if self.status == status {
            return false;
        }
        self.status = status;
        self.last_action = Some(now);
        true
    }

    /// Fold a duplicate record (same normalized address) into this one.
    ///
    /// Counts add up, the seen window widens, and the most recently
    /// observed record's status wins.
    pub(crate) fn absorb(&mut self, other: SenderRecord) {
        self.seen_count += other.seen_count;
        self.first_seen = self.first_seen.min(other.first_seen);
        if other.last_seen > self.last_seen {
            self.last_seen = other.last_seen;
            self.status = other.status;
        }
        self.last_action = match (self.last_action, other.last_action) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Normalize a sender into the ledger key.
///
/// Accepts either a bare address or the `Name <addr>` display form and
/// returns the trimmed, lowercased address.
pub fn normalize_address(raw: &str) -> String {
    let trimmed = raw.trim();
    let bare = match (trimmed.rfind('<'), trimmed.rfind('>')) {
        (Some(start), Some(end)) if end > start => &trimmed[start + 1..end],
        _ => trimmed,
    };
    bare.trim().to_lowercase()
}

/// Domain part of a normalized address, or `""` when there is no `@`.
pub fn derive_domain(address: &str) -> &str {
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .unwrap_or("")
}

/// Files written by older versions store a zero timestamp instead of
/// omitting `last_action`.
fn deserialize_last_action<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(value.filter(|ts| ts.year() > 1))
}
