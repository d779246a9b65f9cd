use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};

use super::error::QueryError;
use super::field;

/// Declared type of a quick-filter value, selected next to the input box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    String,
    Number,
    Bool,
    Null,
    Date,
    Identifier,
}

impl TypeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::String => "string",
            TypeTag::Number => "number",
            TypeTag::Bool => "bool",
            TypeTag::Null => "null",
            TypeTag::Date => "date",
            TypeTag::Identifier => "identifier",
        }
    }
}

impl FromStr for TypeTag {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "" | "string" | "str" | "text" => TypeTag::String,
            "number" | "int" | "integer" | "float" | "double" => TypeTag::Number,
            "bool" | "boolean" => TypeTag::Bool,
            "null" => TypeTag::Null,
            "date" | "datetime" => TypeTag::Date,
            "identifier" | "id" | "objectid" | "oid" => TypeTag::Identifier,
            other => {
                return Err(QueryError::invalid_value("type", format!("unknown value type '{}'", other)))
            }
        })
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coerced quick-filter value
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
    Date(DateTime<Utc>),
    /// Lower-case 24-hex-digit store identifier
    Identifier(String),
}

impl TypedValue {
    /// Canonical filter literal; dates and identifiers use extended-JSON wrappers
    pub fn to_json(&self) -> Value {
        match self {
            TypedValue::String(s) => Value::String(s.clone()),
            TypedValue::Integer(i) => json!(i),
            TypedValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            TypedValue::Bool(b) => Value::Bool(*b),
            TypedValue::Null => Value::Null,
            TypedValue::Date(dt) => json!({ "$date": format_date(dt) }),
            TypedValue::Identifier(id) => json!({ "$oid": id }),
        }
    }

    /// Re-serialize into the raw form the coercer accepts
    pub fn to_raw(&self) -> String {
        match self {
            TypedValue::String(s) => s.clone(),
            TypedValue::Integer(i) => i.to_string(),
            // Debug keeps the fractional marker so "1.0" stays a float
            TypedValue::Float(f) => format!("{:?}", f),
            TypedValue::Bool(b) => b.to_string(),
            TypedValue::Null => "null".to_string(),
            TypedValue::Date(dt) => format_date(dt),
            TypedValue::Identifier(id) => id.clone(),
        }
    }
}

pub fn format_date(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Quick-filter operator; exactly one per quick filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuickOp {
    Equals,
    Contains,
    Starts,
    Ends,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl QuickOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuickOp::Equals => "equals",
            QuickOp::Contains => "contains",
            QuickOp::Starts => "starts",
            QuickOp::Ends => "ends",
            QuickOp::Gt => "gt",
            QuickOp::Lt => "lt",
            QuickOp::Gte => "gte",
            QuickOp::Lte => "lte",
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, QuickOp::Contains | QuickOp::Starts | QuickOp::Ends)
    }
}

impl FromStr for QuickOp {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "" | "equals" | "eq" | "=" => QuickOp::Equals,
            "contains" | "like" => QuickOp::Contains,
            "starts" | "starts_with" | "begins" => QuickOp::Starts,
            "ends" | "ends_with" => QuickOp::Ends,
            "gt" | ">" => QuickOp::Gt,
            "lt" | "<" => QuickOp::Lt,
            "gte" | ">=" => QuickOp::Gte,
            "lte" | "<=" => QuickOp::Lte,
            other => {
                return Err(QueryError::invalid_query(format!(
                    "unsupported quick filter operator '{}'",
                    other
                )))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// Lenient parse of the `sort_order` form field; anything unrecognised sorts ascending
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "desc" | "descending" | "-1" => SortDirection::Desc,
            _ => SortDirection::Asc,
        }
    }

    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(field: &str, direction: SortDirection) -> Result<Self, QueryError> {
        let field = field.trim();
        field::validate(field)?;
        Ok(Self { field: field.to_string(), direction })
    }
}

/// Validated filter expression. Only the translator and the sanitizer construct
/// these, so every key is either a field path or an allow-listed operator.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct FilterExpr(Map<String, Value>);

impl FilterExpr {
    pub fn match_all() -> Self {
        Self(Map::new())
    }

    pub(crate) fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

/// Update operator applied by bulk updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdateOp {
    #[serde(rename = "$set")]
    Set,
    #[serde(rename = "$unset")]
    Unset,
    #[serde(rename = "$inc")]
    Inc,
}

impl UpdateOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateOp::Set => "$set",
            UpdateOp::Unset => "$unset",
            UpdateOp::Inc => "$inc",
        }
    }
}

/// Validated update document: `(operator, field path, operand)` triples
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateExpr {
    actions: Vec<(UpdateOp, String, Value)>,
}

impl UpdateExpr {
    pub(crate) fn push(&mut self, op: UpdateOp, field: String, operand: Value) {
        self.actions.push((op, field, operand));
    }

    pub fn actions(&self) -> &[(UpdateOp, String, Value)] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        for (op, field, operand) in &self.actions {
            let entry = out
                .entry(op.as_str().to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(fields) = entry {
                fields.insert(field.clone(), operand.clone());
            }
        }
        Value::Object(out)
    }
}

/// Inclusion projection; empty never occurs (builder returns `None` instead)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    fields: Vec<String>,
}

impl Projection {
    pub(crate) fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    /// Keep `_id` plus the projected paths of a document
    pub fn apply(&self, document: &Value) -> Value {
        let Value::Object(source) = document else {
            return document.clone();
        };

        let mut out = Map::new();
        if let Some(id) = source.get("_id") {
            out.insert("_id".to_string(), id.clone());
        }
        for path in &self.fields {
            if let Some(value) = field::lookup(document, path) {
                field::insert(&mut out, path, value.clone());
            }
        }
        Value::Object(out)
    }
}

impl Serialize for Projection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for field in &self.fields {
            map.serialize_entry(field, &1)?;
        }
        map.end()
    }
}

/// Database + collection a plan runs against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: &str, collection: &str) -> Result<Self, QueryError> {
        if !field::is_valid_namespace_name(database) {
            return Err(QueryError::invalid_query(format!("invalid database name '{}'", database)));
        }
        if !field::is_valid_namespace_name(collection) {
            return Err(QueryError::invalid_query(format!("invalid collection name '{}'", collection)));
        }
        Ok(Self {
            database: database.to_string(),
            collection: collection.to_string(),
        })
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Everything the executor needs for one read; built once per request
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub namespace: Namespace,
    pub filter: FilterExpr,
    pub sort: Option<SortSpec>,
    pub limit: Option<u32>,
    pub projection: Option<Projection>,
    pub timeout: Option<Duration>,
}

impl QueryPlan {
    pub fn new(namespace: Namespace, filter: FilterExpr) -> Self {
        Self {
            namespace,
            filter,
            sort: None,
            limit: None,
            projection: None,
            timeout: None,
        }
    }

    pub fn sort(mut self, sort: Option<SortSpec>) -> Self {
        self.sort = sort;
        self
    }

    pub fn limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }

    pub fn projection(mut self, projection: Option<Projection>) -> Self {
        self.projection = projection;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}
