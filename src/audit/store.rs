use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::retention::{retention_cutoff, window_start};
use super::{ActivityStats, AuditFilter, AuditRecord, AuditStoreError, Page, StoreResult, MAX_PAGE_LIMIT};
use crate::authz::Entity;

/// Append-only persistence for audit records. There is no update path.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Inserts one record and returns it as stored, digest included.
    async fn append(&self, record: AuditRecord) -> StoreResult<AuditRecord>;

    /// Matching records newest-first.
    async fn query(&self, filter: &AuditFilter, page: Page) -> StoreResult<Vec<AuditRecord>>;

    async fn count(&self, filter: &AuditFilter) -> StoreResult<u64>;

    /// Record counts per action for records at or after `since`.
    async fn count_by_action(&self, actor_id: Option<Uuid>, since: DateTime<Utc>) -> StoreResult<BTreeMap<String, u64>>;

    /// Deletes records strictly older than `cutoff`.
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    async fn entity_history(&self, entity_type: Entity, entity_id: &str, limit: Option<u32>) -> StoreResult<Vec<AuditRecord>> {
        self.query(&AuditFilter::for_entity(entity_type, entity_id), Page::new(limit, None))
            .await
    }

    async fn activity_stats(&self, actor_id: Option<Uuid>, window_days: i64) -> StoreResult<ActivityStats> {
        let since = window_start("days", Utc::now(), window_days)?;
        let by_action = self.count_by_action(actor_id, since).await?;

        Ok(ActivityStats {
            user_id: actor_id,
            window_days,
            since,
            total: by_action.values().sum(),
            by_action,
        })
    }

    /// Deletes records older than `retention_days`. The cutoff is taken once, up front.
    async fn cleanup(&self, retention_days: i64) -> StoreResult<u64> {
        let cutoff = retention_cutoff(Utc::now(), retention_days)?;
        let deleted = self.delete_before(cutoff).await?;
        tracing::info!(retention_days, %cutoff, deleted, "audit retention cleanup finished");
        Ok(deleted)
    }

    /// Ids of stored records whose digest no longer matches their content.
    async fn verify(&self) -> StoreResult<Vec<Uuid>> {
        let filter = AuditFilter {
            end: Some(Utc::now()),
            ..AuditFilter::default()
        };
        let mut tampered = Vec::new();
        let mut offset = 0;

        loop {
            let batch = self
                .query(&filter, Page::new(Some(MAX_PAGE_LIMIT), Some(offset)))
                .await?;
            tampered.extend(batch.iter().filter(|r| !r.is_intact()).map(|r| r.id));
            if batch.len() < MAX_PAGE_LIMIT as usize {
                break;
            }
            offset += MAX_PAGE_LIMIT;
        }

        Ok(tampered)
    }
}

/// Runs a store operation under a caller-supplied time limit.
pub async fn with_timeout<T, F>(limit: Duration, operation: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| AuditStoreError::TimedOut)?
}

/// Process-local store, used for `AUDIT_STORE=memory` and in tests.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Every stored record, oldest first.
    pub async fn snapshot(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, record: AuditRecord) -> StoreResult<AuditRecord> {
        let record = record.sealed();
        self.records.write().await.push(record.clone());
        Ok(record)
    }

    async fn query(&self, filter: &AuditFilter, page: Page) -> StoreResult<Vec<AuditRecord>> {
        filter.validate()?;
        let records = self.records.read().await;

        // Insertion order breaks timestamp ties, newest insert first.
        let mut matching: Vec<(usize, &AuditRecord)> = records
            .iter()
            .enumerate()
            .filter(|(_, record)| filter.matches(record))
            .collect();
        matching.sort_by(|(ia, a), (ib, b)| b.timestamp.cmp(&a.timestamp).then(ib.cmp(ia)));

        Ok(matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn count(&self, filter: &AuditFilter) -> StoreResult<u64> {
        filter.validate()?;
        let records = self.records.read().await;
        Ok(records.iter().filter(|record| filter.matches(record)).count() as u64)
    }

    async fn count_by_action(&self, actor_id: Option<Uuid>, since: DateTime<Utc>) -> StoreResult<BTreeMap<String, u64>> {
        let records = self.records.read().await;
        let mut counts = BTreeMap::new();
        for record in records.iter() {
            if record.timestamp >= since && actor_id.map_or(true, |actor| record.actor_id == actor) {
                *counts.entry(record.action.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|record| record.timestamp >= cutoff);
        Ok((before - records.len()) as u64)
    }
}
