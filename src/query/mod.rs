//! Query translation, sanitization and execution.
//!
//! Quick filters flow through [`ValueCoercer`] and [`FilterTranslator`];
//! free-form JSON goes through [`QuerySanitizer`]. Either way the result is a
//! [`FilterExpr`] that [`QueryExecutor`] runs as part of a [`QueryPlan`].

pub mod coerce;
pub mod error;
pub mod executor;
pub mod field;
pub mod projection;
pub mod sanitize;
pub mod translate;
pub mod types;

pub use coerce::ValueCoercer;
pub use error::QueryError;
pub use executor::{QueryExecutor, QueryOutput, WriteOutput};
pub use projection::ProjectionBuilder;
pub use sanitize::QuerySanitizer;
pub use translate::FilterTranslator;
pub use types::{
    FilterExpr, Namespace, Projection, QueryPlan, QuickOp, SortDirection, SortSpec, TypeTag, TypedValue,
    UpdateExpr, UpdateOp,
};
