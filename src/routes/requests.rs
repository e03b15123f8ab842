use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use sqlx::SqlitePool;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::app::AppState;
use crate::audit::Page;
use crate::authz::AuthContext;
use crate::call::CallContext;
use crate::db::row_parsers;
use crate::errors::{AppError, AppResult};
use crate::models::request::{RequestStatus, SongRequest, SongRequestCreate, SongRequestUpdate};
use crate::operations::{self, BEFORE_ATTRIBUTE, OWNER_ATTRIBUTE};
use crate::utils::utc_now;

const SELECT_REQUEST: &str =
    "SELECT id, owner_id, song_title, artist, note, status, created_at, updated_at FROM song_requests";

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RequestListParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[utoipa::path(
    get,
    path = "/requests",
    tag = "Requests",
    params(RequestListParams),
    responses(
        (status = 200, description = "Song requests, newest first", body = [SongRequest]),
        (status = 403, description = "Missing REQUEST:VIEW")
    )
)]
pub async fn list_requests(
    State(state): State<AppState>,
    ctx: AuthContext,
    Query(params): Query<RequestListParams>,
) -> AppResult<Json<Vec<SongRequest>>> {
    let page = Page::new(params.limit, params.offset);
    let call = CallContext::new(ctx.user_id())
        .with_query("limit", page.limit)
        .with_query("offset", page.offset);

    let requests = state
        .pipeline
        .run(operations::REQUEST_LIST, &ctx, &call, || async {
            let rows = sqlx::query(&format!("{SELECT_REQUEST} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"))
                .bind(i64::from(page.limit))
                .bind(i64::from(page.offset))
                .fetch_all(&state.pool)
                .await?;
            rows.iter().map(row_parsers::song_request_from_row).collect::<AppResult<Vec<_>>>()
        })
        .await?;

    Ok(Json(requests))
}

#[utoipa::path(
    post,
    path = "/requests",
    tag = "Requests",
    request_body = SongRequestCreate,
    responses(
        (status = 201, description = "Song request created", body = SongRequest),
        (status = 400, description = "Invalid payload"),
        (status = 403, description = "Missing REQUEST:CREATE")
    )
)]
pub async fn create_request(
    State(state): State<AppState>,
    ctx: AuthContext,
    Json(payload): Json<SongRequestCreate>,
) -> AppResult<(StatusCode, Json<SongRequest>)> {
    let call = CallContext::new(ctx.user_id()).with_body(&payload);

    let created = state
        .pipeline
        .run(operations::REQUEST_CREATE, &ctx, &call, || async {
            payload.validate()?;
            insert_request(&state.pool, ctx.user_id(), &payload).await
        })
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    put,
    path = "/requests/{id}",
    tag = "Requests",
    params(("id" = Uuid, Path, description = "Song request id")),
    request_body = SongRequestUpdate,
    responses(
        (status = 200, description = "Song request updated", body = SongRequest),
        (status = 403, description = "Missing REQUEST:UPDATE, or not the owner"),
        (status = 404, description = "No such request")
    )
)]
pub async fn update_request(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<SongRequestUpdate>,
) -> AppResult<Json<SongRequest>> {
    let existing = fetch_request(&state.pool, id).await?;
    let call = ownership_call(&ctx, id, existing.as_ref())?.with_body(&payload);

    let updated = state
        .pipeline
        .run(operations::REQUEST_UPDATE, &ctx, &call, || async {
            if existing.is_none() {
                return Err(AppError::not_found(format!("song request {id}")));
            }
            payload.validate()?;
            apply_update(&state.pool, id, &payload).await
        })
        .await?;

    Ok(Json(updated))
}

#[utoipa::path(
    delete,
    path = "/requests/{id}",
    tag = "Requests",
    params(("id" = Uuid, Path, description = "Song request id")),
    responses(
        (status = 204, description = "Song request deleted"),
        (status = 403, description = "Missing REQUEST:DELETE, or not the owner"),
        (status = 404, description = "No such request")
    )
)]
pub async fn delete_request(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let existing = fetch_request(&state.pool, id).await?;
    let call = ownership_call(&ctx, id, existing.as_ref())?;

    state
        .pipeline
        .run(operations::REQUEST_DELETE, &ctx, &call, || async {
            let result = sqlx::query("DELETE FROM song_requests WHERE id = ?")
                .bind(id.to_string())
                .execute(&state.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(AppError::not_found(format!("song request {id}")));
            }
            Ok(())
        })
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Call inputs for an owner-checked operation: the route id plus the owner and
/// prior state of the targeted request, when it exists.
fn ownership_call(ctx: &AuthContext, id: Uuid, existing: Option<&SongRequest>) -> AppResult<CallContext> {
    let mut call = CallContext::new(ctx.user_id()).with_param("id", id);
    if let Some(request) = existing {
        let before = serde_json::to_value(request).map_err(|err| AppError::internal(err.to_string()))?;
        call = call
            .with_attribute(OWNER_ATTRIBUTE, request.owner_id.to_string())
            .with_attribute(BEFORE_ATTRIBUTE, before);
    }
    Ok(call)
}

async fn fetch_request(pool: &SqlitePool, id: Uuid) -> AppResult<Option<SongRequest>> {
    let row = sqlx::query(&format!("{SELECT_REQUEST} WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_parsers::song_request_from_row).transpose()
}

async fn insert_request(pool: &SqlitePool, owner_id: Uuid, payload: &SongRequestCreate) -> AppResult<SongRequest> {
    let id = Uuid::new_v4();
    let now = utc_now().to_rfc3339();

    sqlx::query(
        "INSERT INTO song_requests (id, owner_id, song_title, artist, note, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(owner_id.to_string())
    .bind(payload.song_title.trim())
    .bind(&payload.artist)
    .bind(&payload.note)
    .bind(RequestStatus::Pending.as_str())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    fetch_request(pool, id)
        .await?
        .ok_or_else(|| AppError::internal("song request vanished after insert"))
}

async fn apply_update(pool: &SqlitePool, id: Uuid, payload: &SongRequestUpdate) -> AppResult<SongRequest> {
    let result = sqlx::query(
        "UPDATE song_requests SET song_title = COALESCE(?, song_title), artist = COALESCE(?, artist), note = COALESCE(?, note), status = COALESCE(?, status), updated_at = ? WHERE id = ?",
    )
    .bind(payload.song_title.as_deref().map(str::trim))
    .bind(&payload.artist)
    .bind(&payload.note)
    .bind(payload.status.map(RequestStatus::as_str))
    .bind(utc_now().to_rfc3339())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("song request {id}")));
    }

    fetch_request(pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("song request {id}")))
}
