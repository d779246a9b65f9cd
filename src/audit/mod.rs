//! Audit trail and query history.

pub mod entry;
pub mod history;
pub mod store;
pub mod trail;

pub use entry::{AuditEntry, AuditEntryBuilder, Category, DatabaseContext, Metrics, Severity, UnknownName};
pub use history::{ExecutionStatus, HistoryEntry, HistoryStore, MemoryHistoryStore, QueryKind};
pub use store::{AuditError, AuditFilter, AuditStore, MemoryAuditStore};
pub use trail::{age_cutoff, AuditTrail};
