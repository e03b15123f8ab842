use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{AuditFilter, AuditRecord, AuditStore, AuditStoreError, Page, StoreResult};
use crate::db::row_parsers::audit_record_from_row;

const SELECT_COLUMNS: &str = "SELECT id, occurred_at, actor_id, action, entity_type, entity_id, details, reason, sensitive, outcome, digest FROM audit_logs";

/// `audit_logs` table backed store. Timestamps are integer unix milliseconds.
#[derive(Debug, Clone)]
pub struct SqliteAuditStore {
    pool: SqlitePool,
}

impl SqliteAuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &AuditFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(actor) = filter.actor_id {
        builder.push(" AND actor_id = ").push_bind(actor.to_string());
    }
    if let Some(entity) = filter.entity_type {
        builder.push(" AND entity_type = ").push_bind(entity.as_str());
    }
    if let Some(entity_id) = &filter.entity_id {
        builder.push(" AND entity_id = ").push_bind(entity_id.clone());
    }
    if let Some(action) = &filter.action {
        builder.push(" AND action = ").push_bind(action.clone());
    }
    if let Some(start) = filter.start {
        builder.push(" AND occurred_at >= ").push_bind(start.timestamp_millis());
    }
    if let Some(end) = filter.end {
        builder.push(" AND occurred_at <= ").push_bind(end.timestamp_millis());
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn append(&self, record: AuditRecord) -> StoreResult<AuditRecord> {
        let record = record.sealed();
        let details = record
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AuditStoreError::Encoding(e.to_string()))?;

        sqlx::query(
            "INSERT INTO audit_logs (id, occurred_at, actor_id, action, entity_type, entity_id, details, reason, sensitive, outcome, digest) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.timestamp.timestamp_millis())
        .bind(record.actor_id.to_string())
        .bind(&record.action)
        .bind(record.entity_type.as_str())
        .bind(&record.entity_id)
        .bind(details)
        .bind(&record.reason)
        .bind(record.sensitive)
        .bind(record.outcome.as_str())
        .bind(&record.digest)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn query(&self, filter: &AuditFilter, page: Page) -> StoreResult<Vec<AuditRecord>> {
        filter.validate()?;

        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        push_filter(&mut builder, filter);
        builder
            .push(" ORDER BY occurred_at DESC, rowid DESC LIMIT ")
            .push_bind(i64::from(page.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(page.offset));

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(audit_record_from_row).collect()
    }

    async fn count(&self, filter: &AuditFilter) -> StoreResult<u64> {
        filter.validate()?;

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM audit_logs");
        push_filter(&mut builder, filter);
        let total = builder.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(total.max(0) as u64)
    }

    async fn count_by_action(&self, actor_id: Option<Uuid>, since: DateTime<Utc>) -> StoreResult<BTreeMap<String, u64>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT action, COUNT(*) AS total FROM audit_logs WHERE occurred_at >= ",
        );
        builder.push_bind(since.timestamp_millis());
        if let Some(actor) = actor_id {
            builder.push(" AND actor_id = ").push_bind(actor.to_string());
        }
        builder.push(" GROUP BY action");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let action: String = row.try_get("action")?;
            let total: i64 = row.try_get("total")?;
            counts.insert(action, total.max(0) as u64);
        }
        Ok(counts)
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM audit_logs WHERE occurred_at < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
