use std::sync::Arc;

use axum::http::Method;
use axum::routing::{delete, get, put};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::audit::{AuditInterceptor, AuditStore, MemoryAuditStore, SqliteAuditStore};
use crate::authz::{AuthContextResolver, PermissionGuard, PolicyCatalog};
use crate::config::{AppConfig, AuditBackend};
use crate::docs;
use crate::errors::AppError;
use crate::jwt::JwtConfig;
use crate::operations;
use crate::pipeline::Pipeline;
use crate::relay::BroadcastRelay;
use crate::routes::{audit, auth, health, requests};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub config: Arc<AppConfig>,
    pub resolver: Arc<AuthContextResolver>,
    pub pipeline: Arc<Pipeline>,
    pub audit_store: Arc<dyn AuditStore>,
    /// Subscribe here for `audit.recorded` and `security.denied` events.
    pub relay: BroadcastRelay,
}

impl AppState {
    /// Builds state with the audit backend named in `config`.
    pub fn new(pool: SqlitePool, jwt: JwtConfig, config: AppConfig) -> Result<Self, AppError> {
        let store: Arc<dyn AuditStore> = match config.audit.backend {
            AuditBackend::Sqlite => Arc::new(SqliteAuditStore::new(pool.clone())),
            AuditBackend::Memory => Arc::new(MemoryAuditStore::new()),
        };
        Self::with_store(pool, jwt, config, store)
    }

    pub fn with_store(
        pool: SqlitePool,
        jwt: JwtConfig,
        config: AppConfig,
        audit_store: Arc<dyn AuditStore>,
    ) -> Result<Self, AppError> {
        let catalog = Arc::new(PolicyCatalog::load(config.catalog_path.as_deref())?);
        let relay = BroadcastRelay::default();

        let interceptor = AuditInterceptor::new(audit_store.clone(), Arc::new(relay.clone()))
            .with_append_timeout(config.audit.append_timeout);
        let registry = operations::registry()?;
        tracing::info!(operations = ?registry.ids(), "operation registry built");
        let pipeline = Pipeline::new(PermissionGuard::new(catalog.clone()), interceptor, registry)
            .with_denial_audit(config.audit.record_denials);

        Ok(Self {
            pool,
            jwt: Arc::new(jwt),
            config: Arc::new(config),
            resolver: Arc::new(AuthContextResolver::new(catalog)),
            pipeline: Arc::new(pipeline),
            audit_store,
            relay,
        })
    }

    pub fn from_env(pool: SqlitePool) -> Result<Self, AppError> {
        Self::new(pool, JwtConfig::from_env()?, AppConfig::from_env()?)
    }
}

pub fn router(state: AppState) -> Result<Router, AppError> {
    let openapi = docs::build_openapi(state.config.port)?;

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new().route("/me", get(auth::me));

    let audit_routes = Router::new()
        .route("/", get(audit::list_audit_logs))
        .route("/entity/:entity_type/:entity_id", get(audit::entity_history))
        .route("/stats", get(audit::activity_stats))
        .route("/my-activity", get(audit::my_activity))
        .route("/my-stats", get(audit::my_stats))
        .route("/cleanup", delete(audit::cleanup))
        .route("/export", get(audit::export));

    let request_routes = Router::new()
        .route("/", get(requests::list_requests).post(requests::create_request))
        .route("/:id", put(requests::update_request).delete(requests::delete_request));

    let router = Router::new()
        .route("/api/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/audit-logs", audit_routes)
        .nest("/requests", request_routes)
        .with_state(state)
        .merge(docs::swagger_routes(openapi)?)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    router(AppState::from_env(pool)?)
}
