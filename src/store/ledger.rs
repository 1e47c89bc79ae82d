//! Sender ledger: persistent address → classification store.
//!
//! The whole map lives in memory behind a single `RwLock` and is rewritten
//! to disk (write-through) on every `record_decision`. Reads never touch disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::store::sender::{SenderRecord, SenderStatus, derive_domain, normalize_address};

/// Ledger file name inside the profile directory.
pub const LEDGER_FILE_NAME: &str = "newsletter_tracker.json";

/// Aggregate counts over the whole ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStatistics {
    pub total_emails: usize,
    pub subscribed_count: usize,
    pub unsubscribed_count: usize,
    pub unknown_count: usize,
}

/// Persistent, lock-guarded sender ledger.
pub struct SenderLedger {
    path: PathBuf,
    records: RwLock<BTreeMap<String, SenderRecord>>,
}

impl SenderLedger {
    /// Open the ledger at `path`, creating its directory if needed.
    ///
    /// A missing file yields an empty ledger. Any other read or parse
    /// failure is an error: the ledger refuses to start on corrupt state.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_private_dir(parent)
                .await
                .map_err(|source| LedgerError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let records = match fs::read(&path).await {
            Ok(raw) => {
                let stored: BTreeMap<String, SenderRecord> = serde_json::from_slice(&raw)
                    .map_err(|source| LedgerError::Corrupt {
                        path: path.clone(),
                        source,
                    })?;
                rekey(stored)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(LedgerError::Read { path, source }),
        };

        info!(
            path = %path.display(),
            senders = records.len(),
            "Sender ledger loaded"
        );

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one observation of `address` with a decided status.
    ///
    /// Holds the write lock across the mutation and the disk write. If the
    /// write fails the in-memory change is kept and the error is returned.
    pub async fn record_decision(
        &self,
        address: &str,
        status: SenderStatus,
    ) -> Result<(), LedgerError> {
        let key = normalize_address(address);
        if !status.is_known() {
            return Err(LedgerError::UndecidedStatus { address: key });
        }

        let now = Utc::now();
        let mut records = self.records.write().await;

        match records.get_mut(&key) {
            Some(record) => {
                let previous = record.status;
                if record.observe(status, now) {
                    info!(
                        sender = %key,
                        from = %previous,
                        to = %status,
                        "Sender status changed"
                    );
                } else {
                    debug!(sender = %key, seen = record.seen_count, "Sender observed again");
                }
            }
            None => {
                debug!(sender = %key, status = %status, "New sender recorded");
                records.insert(key.clone(), SenderRecord::new(key, status, now));
            }
        }

        self.persist(&records).await
    }

    /// Look up the stored status for `address`.
    ///
    /// Falls back to other senders at the same domain when the address has
    /// never been seen. Among several domain matches the most recently seen
    /// record wins; equal timestamps resolve to the lowest address.
    pub async fn status_of(&self, address: &str) -> SenderStatus {
        let key = normalize_address(address);
        let records = self.records.read().await;

        if let Some(record) = records.get(&key) {
            return record.status;
        }

        let domain = derive_domain(&key);
        if domain.is_empty() {
            return SenderStatus::Unknown;
        }

        let matched = records
            .values()
            .filter(|r| r.domain == domain && r.status.is_known())
            .fold(None::<&SenderRecord>, |best, r| match best {
                Some(b) if b.last_seen >= r.last_seen => Some(b),
                _ => Some(r),
            });

        match matched {
            Some(record) => {
                debug!(
                    sender = %key,
                    via = %record.address,
                    status = %record.status,
                    "Status resolved by domain"
                );
                record.status
            }
            None => SenderStatus::Unknown,
        }
    }

    /// Exact-key snapshot of one record.
    pub async fn record(&self, address: &str) -> Option<SenderRecord> {
        let key = normalize_address(address);
        self.records.read().await.get(&key).cloned()
    }

    /// Addresses currently marked `Subscribed`, in key order.
    pub async fn subscribed_addresses(&self) -> Vec<String> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.status == SenderStatus::Subscribed)
            .map(|r| r.address.clone())
            .collect()
    }

    /// Total and per-status counts.
    pub async fn statistics(&self) -> LedgerStatistics {
        let records = self.records.read().await;
        let mut stats = LedgerStatistics {
            total_emails: records.len(),
            ..Default::default()
        };
        for record in records.values() {
            match record.status {
                SenderStatus::Subscribed => stats.subscribed_count += 1,
                SenderStatus::Unsubscribed => stats.unsubscribed_count += 1,
                SenderStatus::Unknown => stats.unknown_count += 1,
            }
        }
        stats
    }

    /// Number of tracked senders.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether no sender has been recorded yet.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Rewrite the snapshot to disk. Called at teardown so a process whose
    /// last write failed gets one more chance to converge.
    pub async fn flush(&self) -> Result<(), LedgerError> {
        let records = self.records.write().await;
        self.persist(&records).await
    }

    async fn persist(&self, records: &BTreeMap<String, SenderRecord>) -> Result<(), LedgerError> {
        let payload = serde_json::to_vec_pretty(records)?;
        write_snapshot(&self.path, &payload)
            .await
            .map_err(|source| LedgerError::Persist {
                path: self.path.clone(),
                source,
            })
    }
}

/// Re-key loaded records by normalized address, merging collisions.
fn rekey(stored: BTreeMap<String, SenderRecord>) -> BTreeMap<String, SenderRecord> {
    let mut records: BTreeMap<String, SenderRecord> = BTreeMap::new();
    for (raw_key, mut record) in stored {
        let key = normalize_address(&raw_key);
        record.address = key.clone();
        record.domain = derive_domain(&key).to_string();
        match records.get_mut(&key) {
            Some(existing) => {
                warn!(sender = %key, "Merging duplicate ledger entries");
                existing.absorb(record);
            }
            None => {
                records.insert(key, record);
            }
        }
    }
    records
}

async fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(dir).await
}

/// Write `payload` to a sibling temp file and rename it over `path`.
async fn write_snapshot(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let result = async {
        let mut file = options.open(&temp_path).await?;
        file.write_all(payload).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, path).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&temp_path).await;
    }
    result
}
