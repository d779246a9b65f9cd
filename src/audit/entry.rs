use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::query::Namespace;
use crate::security::{Actor, RequestMeta};

/// A category or severity name outside the closed set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown audit {kind} '{value}'")]
pub struct UnknownName {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Category {
    Authentication,
    Data,
    System,
    Security,
    User,
}

impl Category {
    /// Unknown values normalize to `System`
    pub fn parse(raw: &str) -> Self {
        raw.parse().unwrap_or(Category::System)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Authentication => "authentication",
            Category::Data => "data",
            Category::System => "system",
            Category::Security => "security",
            Category::User => "user",
        }
    }
}

impl FromStr for Category {
    type Err = UnknownName;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "authentication" | "auth" => Ok(Category::Authentication),
            "data" => Ok(Category::Data),
            "system" => Ok(Category::System),
            "security" => Ok(Category::Security),
            "user" => Ok(Category::User),
            _ => Err(UnknownName { kind: "category", value: raw.to_string() }),
        }
    }
}

impl From<String> for Category {
    fn from(raw: String) -> Self {
        Category::parse(&raw)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Unknown values normalize to `Info`
    pub fn parse(raw: &str) -> Self {
        raw.parse().unwrap_or(Severity::Info)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = UnknownName;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            _ => Err(UnknownName { kind: "severity", value: raw.to_string() }),
        }
    }
}

impl From<String> for Severity {
    fn from(raw: String) -> Self {
        Severity::parse(&raw)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseContext {
    pub database: String,
    pub collection: Option<String>,
}

impl From<&Namespace> for DatabaseContext {
    fn from(namespace: &Namespace) -> Self {
        Self {
            database: namespace.database.clone(),
            collection: Some(namespace.collection.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub duration_ms: Option<u64>,
    pub memory_bytes: Option<u64>,
}

/// Immutable record of one gated action or query execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub category: Category,
    pub severity: Severity,
    pub actor: Option<Actor>,
    pub request: Option<RequestMeta>,
    pub database: Option<DatabaseContext>,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub metrics: Metrics,
}

impl AuditEntry {
    pub fn builder(action: impl Into<String>, category: Category) -> AuditEntryBuilder {
        AuditEntryBuilder {
            entry: AuditEntry {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                action: action.into(),
                category,
                severity: Severity::Info,
                actor: None,
                request: None,
                database: None,
                details: Value::Null,
                metrics: Metrics::default(),
            },
        }
    }
}

pub struct AuditEntryBuilder {
    entry: AuditEntry,
}

impl AuditEntryBuilder {
    pub fn severity(mut self, severity: Severity) -> Self {
        self.entry.severity = severity;
        self
    }

    pub fn actor(mut self, actor: &Actor) -> Self {
        self.entry.actor = Some(actor.clone());
        self
    }

    pub fn request(mut self, request: &RequestMeta) -> Self {
        self.entry.request = Some(request.clone());
        self
    }

    pub fn namespace(mut self, namespace: &Namespace) -> Self {
        self.entry.database = Some(namespace.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.entry.details = details;
        self
    }

    pub fn duration(mut self, elapsed: Duration) -> Self {
        self.entry.metrics.duration_ms = Some(elapsed.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    pub fn memory_bytes(mut self, bytes: u64) -> Self {
        self.entry.metrics.memory_bytes = Some(bytes);
        self
    }

    /// Override the timestamp (imports, tests)
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.entry.timestamp = timestamp;
        self
    }

    pub fn build(self) -> AuditEntry {
        self.entry
    }
}
