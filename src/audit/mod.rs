//! Audit trail: record model, declarative per-operation configuration, the
//! interceptor that writes records around guarded calls, and the append-only
//! store with query, retention and export.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::Entity;
use crate::utils::utc_now_millis;

pub mod config;
pub mod export;
pub mod interceptor;
pub mod redact;
pub mod retention;
pub mod sqlite;
pub mod store;

pub use config::{extract, AuditConfig};
pub use export::{export_records, ExportArtifact, ExportFormat, ExportOptions};
pub use interceptor::AuditInterceptor;
pub use retention::{retention_cutoff, spawn_retention_task};
pub use sqlite::SqliteAuditStore;
pub use store::{with_timeout, AuditStore, MemoryAuditStore};

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(thiserror::Error, Debug)]
pub enum AuditStoreError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("audit store operation timed out")]
    TimedOut,
    #[error("failed to encode audit data: {0}")]
    Encoding(String),
}

impl From<sqlx::Error> for AuditStoreError {
    fn from(value: sqlx::Error) -> Self {
        Self::Unavailable(value.to_string())
    }
}

pub type StoreResult<T> = Result<T, AuditStoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

impl AuditOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::Denied => "denied",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditOutcome {
    type Err = AuditStoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "success" => Ok(AuditOutcome::Success),
            "failure" => Ok(AuditOutcome::Failure),
            "denied" => Ok(AuditOutcome::Denied),
            other => Err(AuditStoreError::Encoding(format!("unknown outcome {other}"))),
        }
    }
}

/// One immutable entry in the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor_id: Uuid,
    #[schema(example = "request.update")]
    pub action: String,
    #[schema(value_type = String, example = "REQUEST")]
    pub entity_type: Entity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub sensitive: bool,
    pub outcome: AuditOutcome,
    /// SHA-256 over the record content, fixed when the record is written.
    #[serde(default)]
    pub digest: String,
}

impl AuditRecord {
    pub fn new(actor_id: Uuid, action: impl Into<String>, entity_type: Entity, outcome: AuditOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: utc_now_millis(),
            actor_id,
            action: action.into(),
            entity_type,
            entity_id: None,
            details: None,
            reason: None,
            sensitive: false,
            outcome,
            digest: String::new(),
        }
    }

    pub fn with_entity_id(mut self, entity_id: Option<String>) -> Self {
        self.entity_id = entity_id;
        self
    }

    pub fn with_details(mut self, details: Option<Value>) -> Self {
        self.details = details;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_sensitive(mut self, sensitive: bool) -> Self {
        self.sensitive = sensitive;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn compute_digest(&self) -> String {
        let details = self
            .details
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_default();

        let id = self.id.to_string();
        let timestamp = self.timestamp.timestamp_millis().to_string();
        let actor = self.actor_id.to_string();
        let parts: [&str; 10] = [
            &id,
            &timestamp,
            &actor,
            &self.action,
            self.entity_type.as_str(),
            self.entity_id.as_deref().unwrap_or(""),
            &details,
            self.reason.as_deref().unwrap_or(""),
            if self.sensitive { "1" } else { "0" },
            self.outcome.as_str(),
        ];

        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0x1f_u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Returns the record with its timestamp cut to stored precision and its digest filled in.
    pub fn sealed(mut self) -> Self {
        self.timestamp = self.timestamp.trunc_subsecs(3);
        self.digest = self.compute_digest();
        self
    }

    pub fn is_intact(&self) -> bool {
        self.digest == self.compute_digest()
    }
}

/// Selection criteria shared by query, history, export and stats.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    pub actor_id: Option<Uuid>,
    pub entity_type: Option<Entity>,
    pub entity_id: Option<String>,
    pub action: Option<String>,
    /// Inclusive lower bound.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub end: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn for_actor(actor_id: Uuid) -> Self {
        Self {
            actor_id: Some(actor_id),
            ..Self::default()
        }
    }

    pub fn for_entity(entity_type: Entity, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type),
            entity_id: Some(entity_id.into()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> StoreResult<()> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(AuditStoreError::Validation(
                    "startDate must not be after endDate".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.actor_id.map_or(true, |actor| record.actor_id == actor)
            && self.entity_type.map_or(true, |entity| record.entity_type == entity)
            && self
                .entity_id
                .as_deref()
                .map_or(true, |id| record.entity_id.as_deref() == Some(id))
            && self.action.as_deref().map_or(true, |action| record.action == action)
            && self.start.map_or(true, |start| record.timestamp >= start)
            && self.end.map_or(true, |end| record.timestamp <= end)
    }
}

/// Offset paging with the limit clamped into `1..=MAX_PAGE_LIMIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditPage {
    pub items: Vec<AuditRecord>,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ActivityStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    pub window_days: i64,
    pub since: DateTime<Utc>,
    pub total: u64,
    pub by_action: BTreeMap<String, u64>,
}
