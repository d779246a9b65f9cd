//! Compiles canonical filter and update expressions into parameterised SQL
//! over a JSONB `data` column. Field paths and literals are always bound,
//! never spliced into the statement text.

use serde_json::{Map, Value};
use sqlx::postgres::PgArguments;
use sqlx::Postgres;

use crate::query::{field, FilterExpr, UpdateExpr, UpdateOp};
use crate::store::matcher::exists_flag;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Json(Value),
    Text(String),
    TextArray(Vec<String>),
    Int(i64),
}

pub fn bind_param<'q>(
    q: sqlx::query::Query<'q, Postgres, PgArguments>,
    p: &SqlParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match p {
        SqlParam::Json(v) => q.bind(v.clone()),
        SqlParam::Text(s) => q.bind(s.clone()),
        SqlParam::TextArray(a) => q.bind(a.clone()),
        SqlParam::Int(i) => q.bind(*i),
    }
}

pub struct SqlFilter {
    param_values: Vec<SqlParam>,
    param_index: usize,
}

impl SqlFilter {
    /// `starting_param_index` is the number of placeholders already used by
    /// the surrounding statement
    pub fn new(starting_param_index: usize) -> Self {
        Self {
            param_values: vec![],
            param_index: starting_param_index,
        }
    }

    pub fn generate(filter: &FilterExpr, starting_param_index: usize) -> Result<(String, Vec<SqlParam>), String> {
        let mut sql_filter = Self::new(starting_param_index);
        let clause = sql_filter.where_clause(filter)?;
        Ok((clause, sql_filter.into_params()))
    }

    pub fn into_params(self) -> Vec<SqlParam> {
        self.param_values
    }

    pub fn where_clause(&mut self, filter: &FilterExpr) -> Result<String, String> {
        self.document(filter.as_map())
    }

    /// Nested `jsonb_set` / `#-` chain producing the updated document
    pub fn update_expression(&mut self, update: &UpdateExpr) -> Result<String, String> {
        let mut expr = "data".to_string();
        for (op, path, operand) in update.actions() {
            let target = self.path(path);
            expr = match op {
                UpdateOp::Set => {
                    let value = self.param(SqlParam::Json(operand.clone()));
                    format!("jsonb_set({}, {}, {}::jsonb, true)", expr, target, value)
                }
                UpdateOp::Unset => format!("({} #- {})", expr, target),
                UpdateOp::Inc => {
                    let by = operand
                        .as_f64()
                        .map(|_| operand.to_string())
                        .ok_or_else(|| format!("$inc on {} requires a number", path))?;
                    let by = self.param(SqlParam::Text(by));
                    format!(
                        "jsonb_set({expr}, {target}, to_jsonb(COALESCE(({expr} #>> {target})::numeric, 0) + {by}::numeric), true)",
                        expr = expr,
                        target = target,
                        by = by
                    )
                }
            };
        }
        Ok(expr)
    }

    fn document(&mut self, map: &Map<String, Value>) -> Result<String, String> {
        if map.is_empty() {
            return Ok("TRUE".to_string());
        }

        let mut conditions = Vec::with_capacity(map.len());
        for (key, value) in map {
            let condition = match key.as_str() {
                "$and" => self.logical(value, " AND ")?,
                "$or" => self.logical(value, " OR ")?,
                "$nor" => format!("NOT COALESCE({}, FALSE)", self.logical(value, " OR ")?),
                other if other.starts_with('$') => return Err(format!("unsupported operator {}", other)),
                path => self.field_condition(path, value)?,
            };
            conditions.push(condition);
        }
        Ok(join(conditions, " AND "))
    }

    fn logical(&mut self, value: &Value, joiner: &str) -> Result<String, String> {
        let clauses = value.as_array().ok_or_else(|| "logical operators require an array".to_string())?;
        let mut parts = Vec::with_capacity(clauses.len());
        for clause in clauses {
            let map = clause
                .as_object()
                .ok_or_else(|| "logical clauses must be objects".to_string())?;
            parts.push(self.document(map)?);
        }
        if parts.is_empty() {
            return Err("logical operators require at least one clause".to_string());
        }
        Ok(join(parts, joiner))
    }

    fn field_condition(&mut self, path: &str, value: &Value) -> Result<String, String> {
        if !field::is_valid(path) {
            return Err(format!("invalid field path {}", path));
        }
        let column = format!("(data #> {})", self.path(path));
        self.predicates(&column, value)
    }

    fn predicates(&mut self, column: &str, value: &Value) -> Result<String, String> {
        let Some(ops) = operator_object(value) else {
            return Ok(self.equals(column, value));
        };

        let mut conditions = Vec::with_capacity(ops.len());
        for (op, operand) in ops {
            let condition = match op.as_str() {
                "$eq" => self.equals(column, operand),
                "$ne" => format!("NOT COALESCE({}, FALSE)", self.equals(column, operand)),
                "$gt" => self.compare(column, ">", operand),
                "$gte" => self.compare(column, ">=", operand),
                "$lt" => self.compare(column, "<", operand),
                "$lte" => self.compare(column, "<=", operand),
                "$in" => self.any_of(column, operand)?,
                "$nin" => format!("NOT COALESCE({}, FALSE)", self.any_of(column, operand)?),
                "$all" => {
                    let items = operand.as_array().ok_or_else(|| "$all requires an array".to_string())?;
                    if items.is_empty() {
                        "FALSE".to_string()
                    } else {
                        format!("COALESCE({} @> {}::jsonb, FALSE)", column, self.param(SqlParam::Json(operand.clone())))
                    }
                }
                "$exists" => {
                    if exists_flag(operand) {
                        format!("{} IS NOT NULL", column)
                    } else {
                        format!("{} IS NULL", column)
                    }
                }
                "$size" => {
                    let size = operand
                        .as_i64()
                        .filter(|n| *n >= 0)
                        .ok_or_else(|| "$size requires a non-negative integer".to_string())?;
                    format!(
                        "CASE WHEN jsonb_typeof({c}) = 'array' THEN jsonb_array_length({c}) = {n} ELSE FALSE END",
                        c = column,
                        n = self.param(SqlParam::Int(size))
                    )
                }
                "$regex" => {
                    let pattern = operand.as_str().ok_or_else(|| "$regex requires a string".to_string())?;
                    let options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
                    let op = if options.contains('i') { "~*" } else { "~" };
                    format!(
                        "CASE WHEN jsonb_typeof({c}) = 'string' THEN ({c} #>> '{{}}') {op} {p} ELSE FALSE END",
                        c = column,
                        op = op,
                        p = self.param(SqlParam::Text(pattern.to_string()))
                    )
                }
                "$options" => continue,
                "$not" => format!("NOT COALESCE({}, FALSE)", self.predicates(column, operand)?),
                other => return Err(format!("unsupported operator {}", other)),
            };
            conditions.push(condition);
        }
        Ok(join(conditions, " AND "))
    }

    /// Missing matches null; arrays match when they contain the literal
    fn equals(&mut self, column: &str, literal: &Value) -> String {
        if literal.is_null() {
            return format!("({c} IS NULL OR {c} = 'null'::jsonb)", c = column);
        }
        if let Some(date) = date_literal(literal) {
            let p = self.param(SqlParam::Text(date.to_string()));
            return format!("{} = {}::timestamptz", date_column(column), p);
        }
        let p = self.param(SqlParam::Json(literal.clone()));
        format!(
            "({c} = {p}::jsonb OR (jsonb_typeof({c}) = 'array' AND {c} @> jsonb_build_array({p}::jsonb)))",
            c = column,
            p = p
        )
    }

    /// Only values of the same JSON type compare; dates compare as instants
    fn compare(&mut self, column: &str, op: &str, literal: &Value) -> String {
        if let Some(date) = date_literal(literal) {
            let p = self.param(SqlParam::Text(date.to_string()));
            return format!("{} {} {}::timestamptz", date_column(column), op, p);
        }
        let p = self.param(SqlParam::Json(literal.clone()));
        format!(
            "CASE WHEN jsonb_typeof({c}) = jsonb_typeof({p}::jsonb) THEN {c} {op} {p}::jsonb \
             WHEN jsonb_typeof({c}) = 'array' THEN EXISTS (SELECT 1 FROM jsonb_array_elements({c}) AS e(v) \
             WHERE jsonb_typeof(e.v) = jsonb_typeof({p}::jsonb) AND e.v {op} {p}::jsonb) ELSE FALSE END",
            c = column,
            op = op,
            p = p
        )
    }

    fn any_of(&mut self, column: &str, operand: &Value) -> Result<String, String> {
        let items = operand.as_array().ok_or_else(|| "$in/$nin require an array".to_string())?;
        if items.is_empty() {
            return Ok("FALSE".to_string());
        }
        let parts: Vec<String> = items.iter().map(|item| self.equals(column, item)).collect();
        Ok(join(parts, " OR "))
    }

    fn path(&mut self, path: &str) -> String {
        format!("{}::text[]", self.param(SqlParam::TextArray(field::segments(path))))
    }

    fn param(&mut self, value: SqlParam) -> String {
        self.param_values.push(value);
        self.param_index += 1;
        format!("${}", self.param_index)
    }
}

fn join(parts: Vec<String>, joiner: &str) -> String {
    if parts.len() == 1 {
        parts.into_iter().next().unwrap_or_default()
    } else {
        format!("({})", parts.join(joiner))
    }
}

fn operator_object(value: &Value) -> Option<&Map<String, Value>> {
    let map = value.as_object()?;
    let is_wrapper = map.len() == 1 && (map.contains_key("$date") || map.contains_key("$oid"));
    (!map.is_empty() && !is_wrapper && map.keys().all(|k| k.starts_with('$'))).then_some(map)
}

fn date_literal(value: &Value) -> Option<&str> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.get("$date")?.as_str()
}

/// Stored `{"$date": ...}` wrapper as an instant, NULL for anything else
fn date_column(column: &str) -> String {
    format!(
        "(CASE WHEN jsonb_typeof({c}) = 'object' AND {c} ? '$date' THEN ({c} ->> '$date')::timestamptz END)",
        c = column
    )
}
