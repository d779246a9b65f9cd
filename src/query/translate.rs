use serde_json::{json, Map, Value};

use super::error::QueryError;
use super::field;
use super::types::{FilterExpr, QuickOp, TypedValue};

/// Builds single-field filter expressions from the quick-filter form
pub struct FilterTranslator;

impl FilterTranslator {
    /// Pattern operators match against `raw`, never the coerced value: numbers
    /// and dates have no lexical substring semantics.
    pub fn translate(field: &str, op: QuickOp, value: &TypedValue, raw: &str) -> Result<FilterExpr, QueryError> {
        let field = field.trim();
        field::validate(field)?;

        let predicate = match op {
            QuickOp::Equals => value.to_json(),
            QuickOp::Contains => pattern(&regex::escape(raw)),
            QuickOp::Starts => pattern(&format!("^{}", regex::escape(raw))),
            QuickOp::Ends => pattern(&format!("{}$", regex::escape(raw))),
            QuickOp::Gt => json!({ "$gt": value.to_json() }),
            QuickOp::Lt => json!({ "$lt": value.to_json() }),
            QuickOp::Gte => json!({ "$gte": value.to_json() }),
            QuickOp::Lte => json!({ "$lte": value.to_json() }),
        };

        let mut map = Map::new();
        map.insert(field.to_string(), predicate);
        Ok(FilterExpr::from_map(map))
    }
}

fn pattern(regex: &str) -> Value {
    json!({ "$regex": regex, "$options": "i" })
}
