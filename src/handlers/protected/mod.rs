// Protected handlers: every route sits behind jwt_auth_middleware, passes the
// security gate and checks the caller's role capabilities.
pub mod audit;
pub mod history;
pub mod query;
pub mod session;
pub mod utils;
pub mod write;

pub use audit::{audit_clear, audit_export, audit_list, audit_prune};
pub use history::history_get;
pub use query::query_post;
pub use session::csrf_get;
pub use write::{delete_post, update_post};
