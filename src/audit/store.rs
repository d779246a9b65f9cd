use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use super::entry::{AuditEntry, Category, Severity};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Backend(#[from] sqlx::Error),

    #[error("audit serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Criteria shared by retrieval and export. Every set field must match.
/// Category and severity must name a known value; unlike stored entries
/// they are never normalized.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    /// Case-insensitive substring of the action name
    pub action: Option<String>,
    pub username: Option<String>,
    #[serde(default, deserialize_with = "known_name")]
    pub category: Option<Category>,
    #[serde(default, deserialize_with = "known_name")]
    pub severity: Option<Severity>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(action) = self.action.as_deref().filter(|a| !a.is_empty()) {
            if !entry.action.to_lowercase().contains(&action.to_lowercase()) {
                return false;
            }
        }
        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            if entry.actor.as_ref().map(|a| a.username.as_str()) != Some(username) {
                return false;
            }
        }
        if self.category.map_or(false, |c| c != entry.category) {
            return false;
        }
        if self.severity.map_or(false, |s| s != entry.severity) {
            return false;
        }
        if self.from.map_or(false, |from| entry.timestamp < from) {
            return false;
        }
        if self.to.map_or(false, |to| entry.timestamp > to) {
            return false;
        }
        true
    }
}

fn known_name<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) => name.parse().map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// Durable home of audit entries. Entries are only ever appended, or
/// removed wholesale by age or by an explicit clear.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError>;

    /// Matching entries, newest first
    async fn query(&self, filter: &AuditFilter, limit: usize) -> Result<Vec<AuditEntry>, AuditError>;

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError>;

    async fn clear(&self) -> Result<u64, AuditError>;
}

#[derive(Default)]
pub struct MemoryAuditStore {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.entries
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(entry.clone());
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter, limit: usize) -> Result<Vec<AuditEntry>, AuditError> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        let mut matched: Vec<AuditEntry> = entries.iter().filter(|e| filter.matches(e)).cloned().collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        Ok((before - entries.len()) as u64)
    }

    async fn clear(&self) -> Result<u64, AuditError> {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }
}
