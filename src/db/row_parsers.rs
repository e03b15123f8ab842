use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::audit::{AuditOutcome, AuditRecord, AuditStoreError};
use crate::authz::Entity;
use crate::errors::AppError;
use crate::models::request::SongRequest;

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite CURRENT_TIMESTAMP form
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(s).map_err(|e| AppError::internal(format!("invalid uuid: {}", e)))
}

pub fn song_request_from_row(row: &SqliteRow) -> Result<SongRequest, AppError> {
    let id_s: String = row.try_get("id").map_err(|e| AppError::internal(format!("missing id: {}", e)))?;
    let owner_id_s: String = row.try_get("owner_id").map_err(|e| AppError::internal(format!("missing owner_id: {}", e)))?;
    let song_title: String = row.try_get("song_title").map_err(|e| AppError::internal(format!("missing song_title: {}", e)))?;
    let artist: Option<String> = row.try_get("artist").map_err(|e| AppError::internal(format!("missing artist: {}", e)))?;
    let note: Option<String> = row.try_get("note").map_err(|e| AppError::internal(format!("missing note: {}", e)))?;
    let status_s: String = row.try_get("status").map_err(|e| AppError::internal(format!("missing status: {}", e)))?;
    let created_at_s: String = row.try_get("created_at").map_err(|e| AppError::internal(format!("missing created_at: {}", e)))?;
    let updated_at_s: String = row.try_get("updated_at").map_err(|e| AppError::internal(format!("missing updated_at: {}", e)))?;

    Ok(SongRequest {
        id: parse_uuid(&id_s)?,
        owner_id: parse_uuid(&owner_id_s)?,
        song_title,
        artist,
        note,
        status: status_s.parse()?,
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
    })
}

fn encoding(column: &str, err: impl std::fmt::Display) -> AuditStoreError {
    AuditStoreError::Encoding(format!("audit_logs.{column}: {err}"))
}

/// Rebuilds a stored audit record. The digest is carried over as stored so tampering stays detectable.
pub fn audit_record_from_row(row: &SqliteRow) -> Result<AuditRecord, AuditStoreError> {
    let id_s: String = row.try_get("id")?;
    let occurred_at: i64 = row.try_get("occurred_at")?;
    let actor_id_s: String = row.try_get("actor_id")?;
    let action: String = row.try_get("action")?;
    let entity_type_s: String = row.try_get("entity_type")?;
    let entity_id: Option<String> = row.try_get("entity_id")?;
    let details_s: Option<String> = row.try_get("details")?;
    let reason: Option<String> = row.try_get("reason")?;
    let sensitive: bool = row.try_get("sensitive")?;
    let outcome_s: String = row.try_get("outcome")?;
    let digest: String = row.try_get("digest")?;

    let details = details_s
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| encoding("details", e))?;

    Ok(AuditRecord {
        id: Uuid::parse_str(&id_s).map_err(|e| encoding("id", e))?,
        timestamp: Utc
            .timestamp_millis_opt(occurred_at)
            .single()
            .ok_or_else(|| encoding("occurred_at", occurred_at))?,
        actor_id: Uuid::parse_str(&actor_id_s).map_err(|e| encoding("actor_id", e))?,
        action,
        entity_type: entity_type_s
            .parse::<Entity>()
            .map_err(|e| encoding("entity_type", e))?,
        entity_id,
        details,
        reason,
        sensitive,
        outcome: outcome_s.parse::<AuditOutcome>()?,
        digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_and_sqlite_timestamps() {
        let a = parse_datetime("2024-05-01T08:30:00Z").unwrap();
        let b = parse_datetime("2024-05-01 08:30:00").unwrap();
        assert_eq!(a, b);
        assert!(parse_datetime("not a date").is_err());
    }
}
