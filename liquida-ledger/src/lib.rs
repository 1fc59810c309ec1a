//! Commission ledger: storage backends plus the services that book,
//! void, settle and report commission entries.

mod audit;
mod clock;
mod contracts;
mod directory;
mod entries;
mod entry;
mod error;
mod ledger;
mod memory;
mod query;
mod reports;
mod repository;
mod rules;
mod settlement;
mod settlements;
mod sqlite;

pub use audit::{AuditReport, AuditViolation};
pub use clock::{Clock, ManualClock, SystemClock};
pub use entries::EntryOutcome;
pub use entry::{EntryState, LedgerEntry, Movement, RecipientType, VoidOutcome};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{CommissionLedger, LedgerOptions};
pub use memory::MemoryCommissionStore;
pub use query::{EntryQuery, RuleFilter};
pub use reports::{CommissionSummary, RecipientSummary};
pub use repository::CommissionStore;
pub use settlement::{start_of_day, AttachOutcome, CloseOutcome, Settlement, SettlementState};
pub use sqlite::SqliteCommissionStore;
