use chrono::DateTime;
use serde_json::{Map, Value};

use super::error::QueryError;
use super::field;
use super::types::{FilterExpr, UpdateExpr, UpdateOp};

/// Operators allowed as document-level keys
const LOGICAL_OPERATORS: [&str; 3] = ["$and", "$or", "$nor"];

/// Operators allowed inside a field predicate
const FIELD_OPERATORS: [&str; 14] = [
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$all", "$exists", "$regex", "$options", "$not",
    "$size",
];

/// Named separately so the rejection message can say why
const CODE_EXECUTION_OPERATORS: [&str; 5] = ["$where", "$expr", "$function", "$accumulator", "$eval"];

const REGEX_OPTIONS: &str = "imsx";
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Structural allow-list validator for free-form JSON filters.
///
/// Every key at every depth must be a valid field path or an allow-listed
/// operator in a position where that operator makes sense. Input that passes
/// is returned unchanged; nothing is rewritten.
#[derive(Debug, Clone)]
pub struct QuerySanitizer {
    max_depth: usize,
}

impl QuerySanitizer {
    pub fn new(max_depth: u32) -> Self {
        Self { max_depth: max_depth.max(1) as usize }
    }

    pub fn sanitize(&self, raw: &str) -> Result<FilterExpr, QueryError> {
        let map = parse_object(raw)?;
        self.check_filter(&map, 1)?;
        Ok(FilterExpr::from_map(map))
    }

    /// Validate a bulk-update document (`$set`, `$unset`, `$inc` only)
    pub fn sanitize_update(&self, raw: &str) -> Result<UpdateExpr, QueryError> {
        let map = parse_object(raw)?;
        if map.is_empty() {
            return Err(QueryError::invalid_query("update document is empty"));
        }

        let mut update = UpdateExpr::default();
        for (key, fields) in map {
            reject_code_execution(&key)?;
            let op = match key.as_str() {
                "$set" => UpdateOp::Set,
                "$unset" => UpdateOp::Unset,
                "$inc" => UpdateOp::Inc,
                other => return Err(not_permitted(other)),
            };

            let Value::Object(fields) = fields else {
                return Err(QueryError::invalid_query(format!("{} requires an object of fields", key)));
            };
            if fields.is_empty() {
                return Err(QueryError::invalid_query(format!("{} has no fields", key)));
            }

            for (path, operand) in fields {
                check_field_name(&path)?;
                if path == "_id" || path.starts_with("_id.") {
                    return Err(QueryError::invalid_query("_id cannot be modified"));
                }
                match op {
                    UpdateOp::Set => self.check_literal(&operand, 2)?,
                    UpdateOp::Unset => {}
                    UpdateOp::Inc => {
                        if !operand.is_number() {
                            return Err(QueryError::invalid_query(format!("$inc on '{}' requires a number", path)));
                        }
                    }
                }
                update.push(op, path, operand);
            }
        }
        Ok(update)
    }

    fn guard(&self, depth: usize) -> Result<(), QueryError> {
        if depth > self.max_depth {
            Err(QueryError::invalid_query(format!(
                "query nesting exceeds the maximum depth of {}",
                self.max_depth
            )))
        } else {
            Ok(())
        }
    }

    fn check_filter(&self, map: &Map<String, Value>, depth: usize) -> Result<(), QueryError> {
        self.guard(depth)?;
        for (key, value) in map {
            if key.starts_with('$') {
                reject_code_execution(key)?;
                if !LOGICAL_OPERATORS.contains(&key.as_str()) {
                    return Err(not_permitted(key));
                }
                self.check_logical(key, value, depth)?;
            } else {
                check_field_name(key)?;
                self.check_field_value(value, depth + 1)?;
            }
        }
        Ok(())
    }

    fn check_logical(&self, op: &str, value: &Value, depth: usize) -> Result<(), QueryError> {
        let Value::Array(clauses) = value else {
            return Err(QueryError::invalid_query(format!("{} requires an array", op)));
        };
        if clauses.is_empty() {
            return Err(QueryError::invalid_query(format!("{} requires at least one clause", op)));
        }
        for clause in clauses {
            match clause {
                Value::Object(map) => self.check_filter(map, depth + 1)?,
                _ => return Err(QueryError::invalid_query(format!("{} clauses must be objects", op))),
            }
        }
        Ok(())
    }

    fn check_field_value(&self, value: &Value, depth: usize) -> Result<(), QueryError> {
        match value {
            Value::Object(map) if map.keys().any(|k| k.starts_with('$')) && !is_literal_wrapper(map) => {
                self.check_operators(map, depth)
            }
            other => self.check_literal(other, depth),
        }
    }

    fn check_operators(&self, map: &Map<String, Value>, depth: usize) -> Result<(), QueryError> {
        self.guard(depth)?;
        if map.keys().any(|k| !k.starts_with('$')) {
            return Err(QueryError::invalid_query("cannot mix operators and field names in one predicate"));
        }
        if map.contains_key("$options") && !map.contains_key("$regex") {
            return Err(QueryError::invalid_query("$options requires $regex"));
        }

        for (op, operand) in map {
            reject_code_execution(op)?;
            if !FIELD_OPERATORS.contains(&op.as_str()) {
                return Err(not_permitted(op));
            }

            match op.as_str() {
                "$in" | "$nin" | "$all" => {
                    let Value::Array(items) = operand else {
                        return Err(QueryError::invalid_query(format!("{} requires an array", op)));
                    };
                    self.guard(depth + 1)?;
                    for item in items {
                        self.check_literal(item, depth + 2)?;
                    }
                }
                "$exists" => match operand {
                    Value::Bool(_) => {}
                    Value::Number(n) if n.as_u64().map_or(false, |n| n <= 1) => {}
                    _ => return Err(QueryError::invalid_query("$exists requires true or false")),
                },
                "$regex" => {
                    let Value::String(pattern) = operand else {
                        return Err(QueryError::invalid_query("$regex requires a string"));
                    };
                    regex::RegexBuilder::new(pattern)
                        .size_limit(REGEX_SIZE_LIMIT)
                        .build()
                        .map_err(|_| QueryError::invalid_query("$regex is not a valid pattern"))?;
                }
                "$options" => match operand {
                    Value::String(flags) if flags.chars().all(|c| REGEX_OPTIONS.contains(c)) => {}
                    _ => return Err(QueryError::invalid_query("$options may only contain i, m, s, x")),
                },
                "$size" => {
                    if operand.as_u64().is_none() {
                        return Err(QueryError::invalid_query("$size requires a non-negative integer"));
                    }
                }
                "$not" => match operand {
                    Value::Object(inner) if !inner.is_empty() && !is_literal_wrapper(inner) => {
                        self.check_operators(inner, depth + 1)?
                    }
                    _ => return Err(QueryError::invalid_query("$not requires an operator object")),
                },
                _ => self.check_literal(operand, depth + 1)?,
            }
        }
        Ok(())
    }

    /// Literal values: scalars, arrays of literals, embedded documents with
    /// field-name keys, and the `$date` / `$oid` wrappers.
    fn check_literal(&self, value: &Value, depth: usize) -> Result<(), QueryError> {
        match value {
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(()),
            Value::Array(items) => {
                self.guard(depth)?;
                items.iter().try_for_each(|item| self.check_literal(item, depth + 1))
            }
            Value::Object(map) => {
                self.guard(depth)?;
                if map.keys().any(|k| k.starts_with('$')) {
                    return check_literal_wrapper(map);
                }
                for (key, inner) in map {
                    check_field_name(key)?;
                    self.check_literal(inner, depth + 1)?;
                }
                Ok(())
            }
        }
    }
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, QueryError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(QueryError::invalid_query("query is empty"));
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(QueryError::invalid_query("query must be a JSON object")),
        Err(e) => Err(QueryError::invalid_query(format!("malformed JSON: {}", e))),
    }
}

fn check_field_name(key: &str) -> Result<(), QueryError> {
    if field::is_valid(key) {
        Ok(())
    } else {
        Err(QueryError::invalid_query(format!("invalid field name '{}'", key)))
    }
}

fn reject_code_execution(key: &str) -> Result<(), QueryError> {
    if CODE_EXECUTION_OPERATORS.contains(&key) {
        Err(QueryError::invalid_query(format!(
            "operator '{}' executes server-side code and is not permitted",
            key
        )))
    } else {
        Ok(())
    }
}

fn not_permitted(key: &str) -> QueryError {
    QueryError::invalid_query(format!("operator '{}' is not permitted here", key))
}

fn is_literal_wrapper(map: &Map<String, Value>) -> bool {
    map.len() == 1 && (map.contains_key("$date") || map.contains_key("$oid"))
}

fn check_literal_wrapper(map: &Map<String, Value>) -> Result<(), QueryError> {
    if !is_literal_wrapper(map) {
        let key = map.keys().find(|k| k.starts_with('$')).map(String::as_str).unwrap_or("$");
        reject_code_execution(key)?;
        return Err(not_permitted(key));
    }

    match (map.get("$date"), map.get("$oid")) {
        (Some(Value::String(s)), _) if DateTime::parse_from_rfc3339(s).is_ok() => Ok(()),
        (Some(_), _) => Err(QueryError::invalid_query("$date requires an RFC 3339 timestamp string")),
        (_, Some(Value::String(s))) if s.len() == 24 && s.chars().all(|c| c.is_ascii_hexdigit()) => Ok(()),
        _ => Err(QueryError::invalid_query("$oid requires a 24-digit hexadecimal string")),
    }
}
