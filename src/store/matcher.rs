//! In-process evaluation of canonical filter expressions.
//!
//! A filter is compiled once per request into a [`Matcher`] so regexes are
//! built a single time, then evaluated against every document.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

use crate::query::field;
use crate::query::FilterExpr;

#[derive(Debug)]
pub struct Matcher {
    root: Clause,
}

#[derive(Debug)]
enum Clause {
    And(Vec<Clause>),
    Or(Vec<Clause>),
    Nor(Vec<Clause>),
    Field { path: String, predicates: Vec<Predicate> },
}

#[derive(Debug)]
enum Predicate {
    Eq(Value),
    Ne(Value),
    Cmp(Ordering, bool, Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    All(Vec<Value>),
    Exists(bool),
    Regex(Regex),
    Size(u64),
    Not(Vec<Predicate>),
}

impl Matcher {
    pub fn compile(filter: &FilterExpr) -> Result<Self, String> {
        Ok(Self {
            root: compile_document(filter.as_map())?,
        })
    }

    pub fn matches(&self, document: &Value) -> bool {
        self.root.eval(document)
    }
}

fn compile_document(map: &Map<String, Value>) -> Result<Clause, String> {
    let mut clauses = Vec::with_capacity(map.len());
    for (key, value) in map {
        let clause = match key.as_str() {
            "$and" => Clause::And(compile_list(key, value)?),
            "$or" => Clause::Or(compile_list(key, value)?),
            "$nor" => Clause::Nor(compile_list(key, value)?),
            path if path.starts_with('$') => return Err(format!("unsupported operator {}", path)),
            path => Clause::Field {
                path: path.to_string(),
                predicates: compile_field(value)?,
            },
        };
        clauses.push(clause);
    }
    Ok(Clause::And(clauses))
}

fn compile_list(op: &str, value: &Value) -> Result<Vec<Clause>, String> {
    let Value::Array(items) = value else {
        return Err(format!("{} requires an array", op));
    };
    items
        .iter()
        .map(|item| match item {
            Value::Object(map) => compile_document(map),
            _ => Err(format!("{} clauses must be objects", op)),
        })
        .collect()
}

fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            !map.is_empty() && !is_wrapper(map) && map.keys().all(|k| k.starts_with('$'))
        }
        _ => false,
    }
}

fn is_wrapper(map: &Map<String, Value>) -> bool {
    map.len() == 1 && (map.contains_key("$date") || map.contains_key("$oid"))
}

fn compile_field(value: &Value) -> Result<Vec<Predicate>, String> {
    let Value::Object(ops) = value else {
        return Ok(vec![Predicate::Eq(value.clone())]);
    };
    if !is_operator_object(value) {
        return Ok(vec![Predicate::Eq(value.clone())]);
    }

    let mut predicates = Vec::with_capacity(ops.len());
    for (op, operand) in ops {
        let predicate = match op.as_str() {
            "$eq" => Predicate::Eq(operand.clone()),
            "$ne" => Predicate::Ne(operand.clone()),
            "$gt" => Predicate::Cmp(Ordering::Greater, false, operand.clone()),
            "$gte" => Predicate::Cmp(Ordering::Greater, true, operand.clone()),
            "$lt" => Predicate::Cmp(Ordering::Less, false, operand.clone()),
            "$lte" => Predicate::Cmp(Ordering::Less, true, operand.clone()),
            "$in" => Predicate::In(array_operand(op, operand)?),
            "$nin" => Predicate::Nin(array_operand(op, operand)?),
            "$all" => Predicate::All(array_operand(op, operand)?),
            "$exists" => Predicate::Exists(exists_flag(operand)),
            "$size" => Predicate::Size(
                operand
                    .as_u64()
                    .ok_or_else(|| "$size requires a non-negative integer".to_string())?,
            ),
            "$regex" => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| "$regex requires a string".to_string())?;
                let options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
                Predicate::Regex(build_regex(pattern, options)?)
            }
            "$options" => continue,
            "$not" => Predicate::Not(compile_field(operand)?),
            other => return Err(format!("unsupported operator {}", other)),
        };
        predicates.push(predicate);
    }
    Ok(predicates)
}

/// `$exists` takes a boolean or 0/1
pub(crate) fn exists_flag(operand: &Value) -> bool {
    operand
        .as_bool()
        .or_else(|| operand.as_u64().map(|n| n != 0))
        .unwrap_or(true)
}

fn array_operand(op: &str, operand: &Value) -> Result<Vec<Value>, String> {
    operand
        .as_array()
        .cloned()
        .ok_or_else(|| format!("{} requires an array", op))
}

fn build_regex(pattern: &str, options: &str) -> Result<Regex, String> {
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| e.to_string())
}

impl Clause {
    fn eval(&self, document: &Value) -> bool {
        match self {
            Clause::And(clauses) => clauses.iter().all(|c| c.eval(document)),
            Clause::Or(clauses) => clauses.iter().any(|c| c.eval(document)),
            Clause::Nor(clauses) => !clauses.iter().any(|c| c.eval(document)),
            Clause::Field { path, predicates } => {
                let value = field::lookup(document, path);
                predicates.iter().all(|p| p.eval(value))
            }
        }
    }
}

impl Predicate {
    fn eval(&self, value: Option<&Value>) -> bool {
        match self {
            Predicate::Eq(literal) => equals(value, literal),
            Predicate::Ne(literal) => !equals(value, literal),
            Predicate::Cmp(direction, inclusive, literal) => candidates(value).any(|candidate| {
                match compare_same_type(candidate, literal) {
                    Some(Ordering::Equal) => *inclusive,
                    Some(ordering) => ordering == *direction,
                    None => false,
                }
            }),
            Predicate::In(literals) => literals.iter().any(|l| equals(value, l)),
            Predicate::Nin(literals) => !literals.iter().any(|l| equals(value, l)),
            Predicate::All(literals) => match value {
                Some(Value::Array(items)) => {
                    !literals.is_empty()
                        && literals
                            .iter()
                            .all(|l| items.iter().any(|item| values_equal(item, l)))
                }
                _ => false,
            },
            Predicate::Exists(expected) => value.is_some() == *expected,
            Predicate::Regex(regex) => {
                candidates(value).any(|c| c.as_str().map_or(false, |s| regex.is_match(s)))
            }
            Predicate::Size(size) => {
                matches!(value, Some(Value::Array(items)) if items.len() as u64 == *size)
            }
            Predicate::Not(inner) => !inner.iter().all(|p| p.eval(value)),
        }
    }
}

/// The value itself, plus its elements when it is an array
fn candidates<'a>(value: Option<&'a Value>) -> Box<dyn Iterator<Item = &'a Value> + 'a> {
    match value {
        None => Box::new(std::iter::empty()),
        Some(Value::Array(items)) => Box::new(std::iter::once(value).flatten().chain(items.iter())),
        Some(v) => Box::new(std::iter::once(v)),
    }
}

/// Missing fields equal `null`; arrays match when any element does
fn equals(value: Option<&Value>, literal: &Value) -> bool {
    match value {
        None => literal.is_null(),
        Some(v) => candidates(Some(v)).any(|c| values_equal(c, literal)),
    }
}

#[derive(Debug)]
enum Scalar<'a> {
    Null,
    Number(f64),
    String(&'a str),
    Date(DateTime<Utc>),
    Oid(&'a str),
    Bool(bool),
    Object,
    Array,
}

fn scalar(value: &Value) -> Scalar<'_> {
    match value {
        Value::Null => Scalar::Null,
        Value::Bool(b) => Scalar::Bool(*b),
        Value::Number(n) => n.as_f64().map(Scalar::Number).unwrap_or(Scalar::Null),
        Value::String(s) => Scalar::String(s),
        Value::Array(_) => Scalar::Array,
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(raw)) = map.get("$date") {
                    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
                        return Scalar::Date(dt.with_timezone(&Utc));
                    }
                }
                if let Some(Value::String(id)) = map.get("$oid") {
                    return Scalar::Oid(id);
                }
            }
            Scalar::Object
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (scalar(a), scalar(b)) {
        (Scalar::Null, Scalar::Null) => true,
        (Scalar::Number(x), Scalar::Number(y)) => x == y,
        (Scalar::String(x), Scalar::String(y)) => x == y,
        (Scalar::Bool(x), Scalar::Bool(y)) => x == y,
        (Scalar::Date(x), Scalar::Date(y)) => x == y,
        (Scalar::Oid(x), Scalar::Oid(y)) => x.eq_ignore_ascii_case(y),
        (Scalar::Object, Scalar::Object) | (Scalar::Array, Scalar::Array) => a == b,
        _ => false,
    }
}

/// Range comparisons only hold between values of the same type
fn compare_same_type(a: &Value, b: &Value) -> Option<Ordering> {
    match (scalar(a), scalar(b)) {
        (Scalar::Number(x), Scalar::Number(y)) => x.partial_cmp(&y),
        (Scalar::String(x), Scalar::String(y)) => Some(x.cmp(y)),
        (Scalar::Bool(x), Scalar::Bool(y)) => Some(x.cmp(&y)),
        (Scalar::Date(x), Scalar::Date(y)) => Some(x.cmp(&y)),
        (Scalar::Oid(x), Scalar::Oid(y)) => Some(x.to_ascii_lowercase().cmp(&y.to_ascii_lowercase())),
        _ => None,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value.map(scalar) {
        None | Some(Scalar::Null) => 0,
        Some(Scalar::Number(_)) => 1,
        Some(Scalar::String(_)) => 2,
        Some(Scalar::Object) => 3,
        Some(Scalar::Array) => 4,
        Some(Scalar::Oid(_)) => 5,
        Some(Scalar::Bool(_)) => 6,
        Some(Scalar::Date(_)) => 7,
    }
}

/// Ascending sort order across types: missing/null, numbers, strings,
/// objects, arrays, identifiers, booleans, dates
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (rank_a, rank_b) = (type_rank(a), type_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }
    match (a, b) {
        (Some(a), Some(b)) => compare_same_type(a, b).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QuerySanitizer;
    use serde_json::json;

    fn matcher(raw: &str) -> Matcher {
        let filter = QuerySanitizer::new(10).sanitize(raw).unwrap();
        Matcher::compile(&filter).unwrap()
    }

    #[test]
    fn empty_filter_matches_everything() {
        let m = Matcher::compile(&FilterExpr::match_all()).unwrap();
        assert!(m.matches(&json!({ "a": 1 })));
        assert!(m.matches(&json!({})));
    }

    #[test]
    fn equality_and_nulls() {
        let m = matcher(r#"{"status": "active"}"#);
        assert!(m.matches(&json!({ "status": "active" })));
        assert!(!m.matches(&json!({ "status": "ACTIVE" })));

        let m = matcher(r#"{"deleted": null}"#);
        assert!(m.matches(&json!({})));
        assert!(m.matches(&json!({ "deleted": null })));
        assert!(!m.matches(&json!({ "deleted": false })));
    }

    #[test]
    fn arrays_match_any_element() {
        let m = matcher(r#"{"tags": "red"}"#);
        assert!(m.matches(&json!({ "tags": ["blue", "red"] })));
        assert!(!m.matches(&json!({ "tags": ["blue"] })));

        let m = matcher(r#"{"scores": {"$gt": 90}}"#);
        assert!(m.matches(&json!({ "scores": [50, 95] })));
    }

    #[test]
    fn comparisons_stay_within_type() {
        let m = matcher(r#"{"age": {"$gte": 18}}"#);
        assert!(m.matches(&json!({ "age": 18 })));
        assert!(m.matches(&json!({ "age": 21.5 })));
        assert!(!m.matches(&json!({ "age": 15 })));
        assert!(!m.matches(&json!({ "age": "30" })));
        assert!(!m.matches(&json!({})));
    }

    #[test]
    fn date_wrappers_compare_as_instants() {
        let m = matcher(r#"{"created": {"$lt": {"$date": "2024-01-02T00:00:00Z"}}}"#);
        assert!(m.matches(&json!({ "created": { "$date": "2024-01-01T12:00:00+00:00" } })));
        assert!(!m.matches(&json!({ "created": { "$date": "2024-01-03T00:00:00Z" } })));
        assert!(!m.matches(&json!({ "created": "2023-01-01" })));
    }

    #[test]
    fn set_and_existence_operators() {
        let doc = json!({ "status": "new", "tags": ["a", "b", "c"] });
        assert!(matcher(r#"{"status": {"$in": ["new", "open"]}}"#).matches(&doc));
        assert!(!matcher(r#"{"status": {"$nin": ["new"]}}"#).matches(&doc));
        assert!(matcher(r#"{"tags": {"$all": ["a", "c"]}}"#).matches(&doc));
        assert!(!matcher(r#"{"tags": {"$all": ["a", "z"]}}"#).matches(&doc));
        assert!(matcher(r#"{"tags": {"$size": 3}}"#).matches(&doc));
        assert!(matcher(r#"{"missing": {"$exists": false}}"#).matches(&doc));
        assert!(!matcher(r#"{"status": {"$exists": false}}"#).matches(&doc));
        assert!(matcher(r#"{"missing": {"$ne": "x"}}"#).matches(&doc));
    }

    #[test]
    fn regex_and_negation() {
        let doc = json!({ "email": "Ada@Example.com" });
        assert!(matcher(r#"{"email": {"$regex": "example\\.com$", "$options": "i"}}"#).matches(&doc));
        assert!(!matcher(r#"{"email": {"$regex": "example\\.com$"}}"#).matches(&doc));
        assert!(matcher(r#"{"email": {"$not": {"$regex": "^bob"}}}"#).matches(&doc));
    }

    #[test]
    fn logical_operators() {
        let doc = json!({ "a": 1, "b": 2 });
        assert!(matcher(r#"{"$or": [{"a": 5}, {"b": 2}]}"#).matches(&doc));
        assert!(!matcher(r#"{"$and": [{"a": 1}, {"b": 3}]}"#).matches(&doc));
        assert!(matcher(r#"{"$nor": [{"a": 5}, {"b": 5}]}"#).matches(&doc));
    }

    #[test]
    fn sort_order_ranks_types() {
        let mut values = vec![json!("b"), json!(3), json!(null), json!(true), json!("a"), json!(1)];
        values.sort_by(|a, b| sort_order(Some(a), Some(b)));
        assert_eq!(values, vec![json!(null), json!(1), json!(3), json!("a"), json!("b"), json!(true)]);
        assert_eq!(sort_order(None, Some(&json!(0))), Ordering::Less);
    }
}
