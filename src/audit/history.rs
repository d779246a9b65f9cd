use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::AuditError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Quick,
    Custom,
    Browse,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Quick => "quick",
            QueryKind::Custom => "custom",
            QueryKind::Browse => "browse",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "quick" => QueryKind::Quick,
            "custom" => QueryKind::Custom,
            _ => QueryKind::Browse,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
        }
    }
}

/// Lightweight per-actor record of a query run from the console
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub username: String,
    pub query_type: QueryKind,
    pub namespace: String,
    pub description: String,
    pub result_count: u64,
    pub status: ExecutionStatus,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append and trim the actor's history to the retention count
    async fn append(&self, entry: &HistoryEntry) -> Result<(), AuditError>;

    /// The actor's entries, newest first
    async fn recent(&self, username: &str, limit: usize) -> Result<Vec<HistoryEntry>, AuditError>;

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError>;
}

pub struct MemoryHistoryStore {
    per_actor: usize,
    entries: Mutex<HashMap<String, VecDeque<HistoryEntry>>>,
}

impl MemoryHistoryStore {
    pub fn new(per_actor: usize) -> Self {
        Self {
            per_actor,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<HistoryEntry>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, entry: &HistoryEntry) -> Result<(), AuditError> {
        let mut entries = self.lock();
        let actor = entries.entry(entry.username.clone()).or_default();
        actor.push_back(entry.clone());
        while actor.len() > self.per_actor {
            actor.pop_front();
        }
        Ok(())
    }

    async fn recent(&self, username: &str, limit: usize) -> Result<Vec<HistoryEntry>, AuditError> {
        let entries = self.lock();
        Ok(entries
            .get(username)
            .map(|actor| actor.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        let mut entries = self.lock();
        let mut removed = 0;
        for actor in entries.values_mut() {
            let before = actor.len();
            actor.retain(|e| e.timestamp >= cutoff);
            removed += (before - actor.len()) as u64;
        }
        entries.retain(|_, actor| !actor.is_empty());
        Ok(removed)
    }
}
