use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::{
    export_records, with_timeout, ActivityStats, AuditFilter, AuditPage, AuditRecord, ExportFormat, ExportOptions, Page,
};
use crate::authz::{AuthContext, Entity};
use crate::call::CallContext;
use crate::errors::{AppError, AppResult};
use crate::operations;
use crate::utils::parse_timestamp;

const DEFAULT_STATS_DAYS: i64 = 30;

/// Filters shared by the query and export endpoints. Dates accept RFC 3339 or
/// `YYYY-MM-DD`; a bare `endDate` covers the whole day.
#[derive(Debug, Default, Clone, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct AuditQueryParams {
    pub user_id: Option<String>,
    /// `REQUEST`, `SONG`, `AUDIT_LOG`, ...
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// Defaults to 50, capped at 100.
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AuditQueryParams {
    fn filter(&self) -> AppResult<AuditFilter> {
        let filter = AuditFilter {
            actor_id: self.user_id.as_deref().map(parse_user_id).transpose()?,
            entity_type: self.entity_type.as_deref().map(parse_entity).transpose()?,
            entity_id: non_empty(&self.entity_id),
            action: non_empty(&self.action),
            start: self.start_date.as_deref().map(|raw| parse_timestamp(raw, false)).transpose()?,
            end: self.end_date.as_deref().map(|raw| parse_timestamp(raw, true)).transpose()?,
        };
        filter.validate()?;
        Ok(filter)
    }

    fn page(&self) -> Page {
        Page::new(self.limit, self.offset)
    }

    fn call(&self, ctx: &AuthContext) -> CallContext {
        let fields = [
            ("userId", &self.user_id),
            ("entityType", &self.entity_type),
            ("entityId", &self.entity_id),
            ("action", &self.action),
            ("startDate", &self.start_date),
            ("endDate", &self.end_date),
        ];
        fields
            .into_iter()
            .filter_map(|(name, value)| value.as_deref().map(|value| (name, value)))
            .fold(CallContext::new(ctx.user_id()), |call, (name, value)| call.with_query(name, value))
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct HistoryParams {
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct StatsParams {
    pub user_id: Option<String>,
    /// Trailing window in days, default 30.
    pub days: Option<i64>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct CleanupParams {
    pub retention_days: Option<i64>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ExportParams {
    /// `json` (default) or `csv`.
    pub format: Option<String>,
    pub user_id: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl ExportParams {
    fn as_query(&self) -> AuditQueryParams {
        AuditQueryParams {
            user_id: self.user_id.clone(),
            entity_type: self.entity_type.clone(),
            entity_id: self.entity_id.clone(),
            action: self.action.clone(),
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
            limit: None,
            offset: None,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CleanupResponse {
    pub deleted: u64,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn parse_user_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::validation(format!("userId is not a valid id: {raw}")))
}

fn parse_entity(raw: &str) -> AppResult<Entity> {
    let entity = raw.parse::<Entity>().map_err(|err| AppError::validation(err.to_string()))?;
    if entity.is_wildcard() {
        return Err(AppError::validation("entityType must name a concrete entity"));
    }
    Ok(entity)
}

#[utoipa::path(
    get,
    path = "/audit-logs",
    tag = "Audit",
    params(AuditQueryParams),
    responses(
        (status = 200, description = "Matching records, newest first", body = AuditPage),
        (status = 400, description = "Malformed filter"),
        (status = 403, description = "Missing AUDIT_LOG:VIEW"),
        (status = 503, description = "Audit store unavailable, retry later")
    )
)]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    ctx: AuthContext,
    Query(params): Query<AuditQueryParams>,
) -> AppResult<Json<AuditPage>> {
    let call = params.call(&ctx);

    let page = state
        .pipeline
        .run(operations::AUDIT_QUERY, &ctx, &call, || query_page(&state, &params, None))
        .await?;

    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/audit-logs/entity/{entity_type}/{entity_id}",
    tag = "Audit",
    params(
        ("entity_type" = String, Path, description = "Entity type, e.g. REQUEST"),
        ("entity_id" = String, Path, description = "Entity id"),
        HistoryParams
    ),
    responses(
        (status = 200, description = "History of one entity, newest first", body = [AuditRecord]),
        (status = 403, description = "Missing AUDIT_LOG:VIEW")
    )
)]
pub async fn entity_history(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path((entity_type, entity_id)): Path<(String, String)>,
    Query(params): Query<HistoryParams>,
) -> AppResult<Json<Vec<AuditRecord>>> {
    let call = CallContext::new(ctx.user_id())
        .with_param("entity_type", &entity_type)
        .with_param("entity_id", &entity_id);

    let history = state
        .pipeline
        .run(operations::AUDIT_ENTITY_HISTORY, &ctx, &call, || async {
            let entity = parse_entity(&entity_type)?;
            let records = with_timeout(
                state.config.audit.query_timeout,
                state.audit_store.entity_history(entity, &entity_id, params.limit),
            )
            .await?;
            Ok(records)
        })
        .await?;

    Ok(Json(history))
}

#[utoipa::path(
    get,
    path = "/audit-logs/stats",
    tag = "Audit",
    params(StatsParams),
    responses(
        (status = 200, description = "Record counts per action in the trailing window", body = ActivityStats),
        (status = 400, description = "Non-positive window"),
        (status = 403, description = "Missing ANALYTICS:VIEW")
    )
)]
pub async fn activity_stats(
    State(state): State<AppState>,
    ctx: AuthContext,
    Query(params): Query<StatsParams>,
) -> AppResult<Json<ActivityStats>> {
    let mut call = CallContext::new(ctx.user_id());
    if let Some(user_id) = &params.user_id {
        call = call.with_query("userId", user_id);
    }

    let stats = state
        .pipeline
        .run(operations::AUDIT_STATS, &ctx, &call, || async {
            let user_id = params.user_id.as_deref().map(parse_user_id).transpose()?;
            stats_for(&state, user_id, params.days).await
        })
        .await?;

    Ok(Json(stats))
}

#[utoipa::path(
    get,
    path = "/audit-logs/my-activity",
    tag = "Audit",
    params(AuditQueryParams),
    responses((status = 200, description = "The caller's own records; any userId is ignored", body = AuditPage))
)]
pub async fn my_activity(
    State(state): State<AppState>,
    ctx: AuthContext,
    Query(params): Query<AuditQueryParams>,
) -> AppResult<Json<AuditPage>> {
    let call = params.call(&ctx);

    let page = state
        .pipeline
        .run(operations::AUDIT_MY_ACTIVITY, &ctx, &call, || {
            query_page(&state, &params, Some(ctx.user_id()))
        })
        .await?;

    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/audit-logs/my-stats",
    tag = "Audit",
    params(StatsParams),
    responses((status = 200, description = "The caller's own counts; any userId is ignored", body = ActivityStats))
)]
pub async fn my_stats(
    State(state): State<AppState>,
    ctx: AuthContext,
    Query(params): Query<StatsParams>,
) -> AppResult<Json<ActivityStats>> {
    let call = CallContext::new(ctx.user_id());

    let stats = state
        .pipeline
        .run(operations::AUDIT_MY_STATS, &ctx, &call, || {
            stats_for(&state, Some(ctx.user_id()), params.days)
        })
        .await?;

    Ok(Json(stats))
}

#[utoipa::path(
    delete,
    path = "/audit-logs/cleanup",
    tag = "Audit",
    params(CleanupParams),
    responses(
        (status = 200, description = "Records older than the retention window were deleted", body = CleanupResponse),
        (status = 400, description = "Missing or non-positive retentionDays"),
        (status = 403, description = "Missing AUDIT_LOG:DELETE")
    )
)]
pub async fn cleanup(
    State(state): State<AppState>,
    ctx: AuthContext,
    Query(params): Query<CleanupParams>,
) -> AppResult<Json<CleanupResponse>> {
    let mut call = CallContext::new(ctx.user_id());
    if let Some(days) = params.retention_days {
        call = call.with_query("retentionDays", days);
    }

    let response = state
        .pipeline
        .run(operations::AUDIT_CLEANUP, &ctx, &call, || async {
            let days = params
                .retention_days
                .ok_or_else(|| AppError::validation("retentionDays is required"))?;
            let deleted = state.audit_store.cleanup(days).await?;
            Ok(CleanupResponse { deleted })
        })
        .await?;

    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/audit-logs/export",
    tag = "Audit",
    params(ExportParams),
    responses(
        (status = 200, description = "audit-logs.json or audit-logs.csv attachment", body = String, content_type = "application/octet-stream"),
        (status = 400, description = "Unknown format or malformed filter"),
        (status = 403, description = "Missing AUDIT_LOG:EXPORT"),
        (status = 503, description = "Audit store unavailable or export deadline exceeded")
    )
)]
pub async fn export(
    State(state): State<AppState>,
    ctx: AuthContext,
    Query(params): Query<ExportParams>,
) -> AppResult<Response> {
    let query = params.as_query();
    let mut call = query.call(&ctx);
    if let Some(format) = &params.format {
        call = call.with_query("format", format);
    }

    let artifact = state
        .pipeline
        .run(operations::AUDIT_EXPORT, &ctx, &call, || async {
            let format: ExportFormat = params.format.as_deref().unwrap_or("json").parse()?;
            let filter = query.filter()?;
            let options = ExportOptions::new(state.config.audit.export_page_size)
                .with_deadline(state.config.audit.query_timeout);
            let artifact = export_records(state.audit_store.as_ref(), &filter, format, options).await?;
            Ok(artifact)
        })
        .await?;

    let disposition = format!("attachment; filename=\"{}\"", artifact.format.file_name());
    Ok((
        [
            (header::CONTENT_TYPE, artifact.format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.bytes,
    )
        .into_response())
}

async fn query_page(state: &AppState, params: &AuditQueryParams, forced_actor: Option<Uuid>) -> AppResult<AuditPage> {
    let filter = match forced_actor {
        // Self-scoped views ignore any caller-supplied userId, valid or not.
        Some(actor) => {
            let scoped = AuditQueryParams {
                user_id: None,
                ..params.clone()
            };
            AuditFilter {
                actor_id: Some(actor),
                ..scoped.filter()?
            }
        }
        None => params.filter()?,
    };

    let page = params.page();
    let items = with_timeout(state.config.audit.query_timeout, state.audit_store.query(&filter, page)).await?;

    Ok(AuditPage {
        items,
        limit: page.limit,
        offset: page.offset,
    })
}

async fn stats_for(state: &AppState, user_id: Option<Uuid>, days: Option<i64>) -> AppResult<ActivityStats> {
    let days = days.unwrap_or(DEFAULT_STATS_DAYS);
    let stats = with_timeout(
        state.config.audit.query_timeout,
        state.audit_store.activity_stats(user_id, days),
    )
    .await?;
    Ok(stats)
}
