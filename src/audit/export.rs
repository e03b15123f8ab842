use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use utoipa::ToSchema;

use super::{AuditFilter, AuditRecord, AuditStore, AuditStoreError, Page, StoreResult, MAX_PAGE_LIMIT};

pub const CSV_HEADER: [&str; 7] = ["timestamp", "actor", "action", "entityType", "entityId", "details", "reason"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            ExportFormat::Json => "audit-logs.json",
            ExportFormat::Csv => "audit-logs.csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = AuditStoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(AuditStoreError::Validation(format!(
                "unsupported export format {other}, expected json or csv"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    pub page_size: u32,
    /// Checked between pages.
    pub deadline: Option<Duration>,
}

impl ExportOptions {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size: page_size.clamp(1, MAX_PAGE_LIMIT),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::new(MAX_PAGE_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportArtifact {
    pub format: ExportFormat,
    pub record_count: usize,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

enum Sink {
    Json(Vec<AuditRecord>),
    Csv(csv::Writer<Vec<u8>>),
}

impl Sink {
    fn new(format: ExportFormat) -> StoreResult<Self> {
        match format {
            ExportFormat::Json => Ok(Sink::Json(Vec::new())),
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_writer(Vec::new());
                writer.write_record(CSV_HEADER).map_err(csv_error)?;
                Ok(Sink::Csv(writer))
            }
        }
    }

    fn push(&mut self, records: Vec<AuditRecord>) -> StoreResult<()> {
        match self {
            Sink::Json(all) => all.extend(records),
            Sink::Csv(writer) => {
                for record in &records {
                    writer.write_record(csv_row(record)).map_err(csv_error)?;
                }
            }
        }
        Ok(())
    }

    fn finish(self, count: usize) -> StoreResult<Vec<u8>> {
        match self {
            Sink::Json(records) => {
                let document = json!({
                    "exported_at": Utc::now(),
                    "count": count,
                    "records": records,
                });
                serde_json::to_vec_pretty(&document).map_err(|e| AuditStoreError::Encoding(e.to_string()))
            }
            Sink::Csv(writer) => writer
                .into_inner()
                .map_err(|e| AuditStoreError::Encoding(e.to_string())),
        }
    }
}

fn csv_error(err: csv::Error) -> AuditStoreError {
    AuditStoreError::Encoding(err.to_string())
}

fn csv_row(record: &AuditRecord) -> [String; 7] {
    [
        record.timestamp.to_rfc3339(),
        record.actor_id.to_string(),
        record.action.clone(),
        record.entity_type.to_string(),
        record.entity_id.clone().unwrap_or_default(),
        record.details.as_ref().map(|d| d.to_string()).unwrap_or_default(),
        record.reason.clone().unwrap_or_default(),
    ]
}

/// Serializes every record matching `filter`, paging through [`AuditStore::query`].
///
/// The upper time bound is fixed when the export starts, so records appended
/// meanwhile cannot shift later pages.
pub async fn export_records(
    store: &dyn AuditStore,
    filter: &AuditFilter,
    format: ExportFormat,
    options: ExportOptions,
) -> StoreResult<ExportArtifact> {
    filter.validate()?;

    let started = Instant::now();
    let now = Utc::now();
    let snapshot = AuditFilter {
        end: Some(filter.end.map_or(now, |end| end.min(now))),
        ..filter.clone()
    };
    if let (Some(start), Some(end)) = (snapshot.start, snapshot.end) {
        if start > end {
            return Ok(ExportArtifact {
                format,
                record_count: 0,
                bytes: Sink::new(format)?.finish(0)?,
            });
        }
    }

    let page_size = options.page_size.clamp(1, MAX_PAGE_LIMIT);
    let mut sink = Sink::new(format)?;
    let mut offset = 0u32;
    let mut total = 0usize;

    loop {
        if let Some(deadline) = options.deadline {
            if started.elapsed() > deadline {
                tracing::warn!(exported = total, "audit export exceeded its deadline");
                return Err(AuditStoreError::TimedOut);
            }
        }

        let batch = store
            .query(&snapshot, Page::new(Some(page_size), Some(offset)))
            .await?;
        let fetched = batch.len();
        total += fetched;
        sink.push(batch)?;

        if fetched < page_size as usize {
            break;
        }
        offset += page_size;
    }

    tracing::debug!(format = %format, records = total, "audit export finished");

    Ok(ExportArtifact {
        format,
        record_count: total,
        bytes: sink.finish(total)?,
    })
}
