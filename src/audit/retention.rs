use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use tokio::task::JoinHandle;

use super::{AuditStore, AuditStoreError, StoreResult};

fn validate_window(name: &str, days: i64) -> StoreResult<()> {
    if days <= 0 {
        return Err(AuditStoreError::Validation(format!(
            "{name} must be a positive number of days, got {days}"
        )));
    }
    Ok(())
}

pub(crate) fn window_start(name: &str, now: DateTime<Utc>, days: i64) -> StoreResult<DateTime<Utc>> {
    validate_window(name, days)?;
    chrono::Duration::try_days(days)
        .and_then(|window| now.checked_sub_signed(window))
        .map(|start| start.trunc_subsecs(3))
        .ok_or_else(|| AuditStoreError::Validation(format!("{name} {days} is out of range")))
}

/// Oldest timestamp that survives a cleanup with the given retention.
///
/// Truncated to whole milliseconds, the precision records are stored at.
pub fn retention_cutoff(now: DateTime<Utc>, retention_days: i64) -> StoreResult<DateTime<Utc>> {
    window_start("retentionDays", now, retention_days)
}

/// Periodically runs `cleanup(retention_days)` against the store.
///
/// The first tick fires immediately. Failures are logged and the loop keeps going.
pub fn spawn_retention_task(
    store: Arc<dyn AuditStore>,
    retention_days: i64,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match store.cleanup(retention_days).await {
                Ok(deleted) => tracing::debug!(deleted, "scheduled audit cleanup"),
                Err(err) => tracing::error!(error = %err, "scheduled audit cleanup failed"),
            }
        }
    })
}
