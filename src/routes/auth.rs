use axum::extract::State;
use axum::Json;

use crate::app::AppState;
use crate::authz::{AuthContext, AuthContextSummary};
use crate::call::CallContext;
use crate::errors::AppResult;
use crate::operations;

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses(
        (status = 200, description = "Caller's resolved roles and permissions", body = AuthContextSummary),
        (status = 401, description = "Missing or invalid bearer token")
    )
)]
pub async fn me(State(state): State<AppState>, ctx: AuthContext) -> AppResult<Json<AuthContextSummary>> {
    let call = CallContext::new(ctx.user_id());
    let summary = state
        .pipeline
        .run(operations::AUTH_ME, &ctx, &call, || async { Ok(ctx.summary()) })
        .await?;

    Ok(Json(summary))
}
