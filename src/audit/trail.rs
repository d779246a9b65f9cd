use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use super::entry::{AuditEntry, Category, Severity};
use super::store::{AuditError, AuditFilter, AuditStore};
use crate::security::Actor;

const EXPORT_LIMIT: usize = 100_000;

/// Instant `days` before `now`; `None` when that lies outside chrono's
/// range, in which case nothing is old enough to remove.
pub fn age_cutoff(now: DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    Duration::try_days(i64::from(days)).and_then(|age| now.checked_sub_signed(age))
}

/// Front door for audit writes and reads.
///
/// `record` never fails: when the durable store rejects a write the entry is
/// parked in a bounded in-memory queue (oldest dropped first) and retried
/// after the next successful write.
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
    fallback: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn AuditStore>, capacity: usize) -> Self {
        Self {
            store,
            fallback: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub async fn record(&self, entry: AuditEntry) {
        match self.store.append(&entry).await {
            Ok(()) => {
                if self.pending() > 0 {
                    self.flush().await;
                }
            }
            Err(err) => {
                tracing::warn!(action = %entry.action, error = %err, "audit store write failed; queueing entry");
                self.enqueue(entry);
            }
        }
    }

    /// Entries waiting in the fallback queue
    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    /// Retry queued entries in order; stops at the first failure and returns
    /// how many were written.
    pub async fn flush(&self) -> usize {
        let batch: Vec<AuditEntry> = self.queue().drain(..).collect();
        let mut written = 0;
        let mut remaining = batch.into_iter();

        while let Some(entry) = remaining.next() {
            if let Err(err) = self.store.append(&entry).await {
                tracing::warn!(error = %err, "audit flush interrupted");
                let mut queue = self.queue();
                let unsent: Vec<AuditEntry> = std::iter::once(entry).chain(remaining).collect();
                for entry in unsent.into_iter().rev() {
                    queue.push_front(entry);
                }
                while queue.len() > self.capacity {
                    queue.pop_back();
                }
                break;
            }
            written += 1;
        }

        if written > 0 {
            tracing::info!(written, "flushed queued audit entries");
        }
        written
    }

    /// Newest first, including entries still waiting in the fallback queue
    pub async fn query(&self, filter: &AuditFilter, limit: usize) -> Result<Vec<AuditEntry>, AuditError> {
        let mut entries = self.store.query(filter, limit).await?;
        entries.extend(self.queue().iter().filter(|e| filter.matches(e)).cloned());
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limit);
        Ok(entries)
    }

    /// Remove entries older than `max_age_days`; returns the count removed
    pub async fn prune(&self, max_age_days: u32) -> Result<u64, AuditError> {
        self.prune_at(max_age_days, Utc::now()).await
    }

    pub async fn prune_at(&self, max_age_days: u32, now: DateTime<Utc>) -> Result<u64, AuditError> {
        let Some(cutoff) = age_cutoff(now, max_age_days) else {
            tracing::info!(max_age_days, "prune age predates every entry; nothing removed");
            return Ok(0);
        };
        let mut removed = self.store.prune_before(cutoff).await?;
        {
            let mut queue = self.queue();
            let before = queue.len();
            queue.retain(|e| e.timestamp >= cutoff);
            removed += (before - queue.len()) as u64;
        }
        tracing::info!(max_age_days, removed, "pruned audit log");
        Ok(removed)
    }

    /// JSON array of matching entries, newest first
    pub async fn export(&self, filter: &AuditFilter) -> Result<String, AuditError> {
        let entries = self.query(filter, EXPORT_LIMIT).await?;
        Ok(serde_json::to_string_pretty(&entries)?)
    }

    /// Wipe the log. The wipe itself is then recorded.
    pub async fn clear(&self, actor: Option<&Actor>) -> Result<u64, AuditError> {
        let mut removed = self.store.clear().await?;
        {
            let mut queue = self.queue();
            removed += queue.len() as u64;
            queue.clear();
        }

        let mut builder = AuditEntry::builder("audit_log_cleared", Category::Security)
            .severity(Severity::Warning)
            .details(json!({ "removed": removed }));
        if let Some(actor) = actor {
            builder = builder.actor(actor);
        }
        self.record(builder.build()).await;
        Ok(removed)
    }

    fn enqueue(&self, entry: AuditEntry) {
        if self.capacity == 0 {
            tracing::warn!(action = %entry.action, "audit fallback disabled; dropping entry");
            return;
        }
        let mut queue = self.queue();
        while queue.len() >= self.capacity {
            if let Some(dropped) = queue.pop_front() {
                tracing::warn!(action = %dropped.action, "audit fallback full; dropping oldest entry");
            }
        }
        queue.push_back(entry);
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<AuditEntry>> {
        match self.fallback.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditStore;

    fn entry(action: &str, at: DateTime<Utc>) -> AuditEntry {
        AuditEntry::builder(action, Category::Data).at(at).build()
    }

    #[tokio::test]
    async fn clear_records_itself() {
        let store = Arc::new(MemoryAuditStore::new());
        let trail = AuditTrail::new(store.clone(), 10);
        let now = Utc::now();
        trail.record(entry("a", now)).await;
        trail.record(entry("b", now)).await;

        assert_eq!(trail.clear(None).await.unwrap(), 2);
        let remaining = trail.query(&AuditFilter::default(), 10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].action, "audit_log_cleared");
        assert_eq!(remaining[0].category, Category::Security);
        assert_eq!(remaining[0].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn prune_with_huge_age_removes_nothing() {
        let trail = AuditTrail::new(Arc::new(MemoryAuditStore::new()), 10);
        trail.record(entry("ancient", Utc::now() - Duration::days(3650))).await;

        assert_eq!(trail.prune(u32::MAX).await.unwrap(), 0);
        assert_eq!(trail.prune(100_000_000).await.unwrap(), 0);
        assert_eq!(trail.query(&AuditFilter::default(), 10).await.unwrap().len(), 1);
    }

    #[test]
    fn age_cutoff_is_none_out_of_range() {
        let now = Utc::now();
        assert_eq!(age_cutoff(now, 2), Some(now - Duration::days(2)));
        assert_eq!(age_cutoff(now, u32::MAX), None);
    }

    #[tokio::test]
    async fn export_is_a_json_array() {
        let trail = AuditTrail::new(Arc::new(MemoryAuditStore::new()), 10);
        trail.record(entry("query_executed", Utc::now())).await;
        let exported = trail.export(&AuditFilter::default()).await.unwrap();
        let parsed: Vec<AuditEntry> = serde_json::from_str(&exported).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].action, "query_executed");
    }
}
