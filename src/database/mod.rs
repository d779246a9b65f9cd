pub mod audit;
pub mod documents;
pub mod history;
pub mod manager;
pub mod sql_filter;

pub use audit::PgAuditStore;
pub use documents::PgDocumentStore;
pub use history::PgHistoryStore;
pub use manager::{DatabaseError, DatabaseManager};
