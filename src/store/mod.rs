//! Persistence layer: the file-backed sender ledger.

pub mod ledger;
pub mod sender;

pub use ledger::{LEDGER_FILE_NAME, LedgerStatistics, SenderLedger};
pub use sender::{SenderRecord, SenderStatus, normalize_address};
