//! Per-operation guard and audit wiring.
//!
//! Every guarded operation is registered once at startup under a stable id with
//! its permission requirement and audit configuration. A call then runs through
//! two stages: `authorize` (guard, denial audit) and `execute` (handler inside
//! the audit interceptor).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;

use crate::audit::{AuditConfig, AuditInterceptor};
use crate::authz::{AuthContext, Decision, PermissionGuard, PermissionRequirement};
use crate::call::CallContext;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct Operation {
    pub id: &'static str,
    requirement: Option<PermissionRequirement>,
    audit: Option<AuditConfig>,
    record_denials: bool,
}

impl Operation {
    /// Any authenticated caller may run it.
    pub fn authenticated(id: &'static str) -> Self {
        Self {
            id,
            requirement: None,
            audit: None,
            record_denials: true,
        }
    }

    pub fn guarded(id: &'static str, requirement: PermissionRequirement) -> Self {
        Self {
            requirement: Some(requirement),
            ..Self::authenticated(id)
        }
    }

    pub fn audited(mut self, config: AuditConfig) -> Self {
        self.audit = Some(config);
        self
    }

    pub fn without_denial_audit(mut self) -> Self {
        self.record_denials = false;
        self
    }

    pub fn requirement(&self) -> Option<&PermissionRequirement> {
        self.requirement.as_ref()
    }

    pub fn audit(&self) -> Option<&AuditConfig> {
        self.audit.as_ref()
    }
}

#[derive(Debug, Default)]
pub struct OperationRegistry {
    operations: HashMap<&'static str, Operation>,
}

impl OperationRegistry {
    pub fn builder() -> OperationRegistryBuilder {
        OperationRegistryBuilder::default()
    }

    pub fn get(&self, id: &str) -> Option<&Operation> {
        self.operations.get(id)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<_> = self.operations.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[derive(Debug, Default)]
pub struct OperationRegistryBuilder {
    operations: Vec<Operation>,
}

impl OperationRegistryBuilder {
    pub fn register(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn build(self) -> AppResult<OperationRegistry> {
        let mut operations = HashMap::with_capacity(self.operations.len());
        for operation in self.operations {
            let id = operation.id;
            if operations.insert(id, operation).is_some() {
                return Err(AppError::configuration(format!("operation {id} registered twice")));
            }
        }
        Ok(OperationRegistry { operations })
    }
}

#[derive(Clone)]
pub struct Pipeline {
    guard: PermissionGuard,
    interceptor: AuditInterceptor,
    registry: Arc<OperationRegistry>,
    record_denials: bool,
}

impl Pipeline {
    pub fn new(guard: PermissionGuard, interceptor: AuditInterceptor, registry: OperationRegistry) -> Self {
        Self {
            guard,
            interceptor,
            registry: Arc::new(registry),
            record_denials: true,
        }
    }

    /// Global switch over per-operation denial auditing.
    pub fn with_denial_audit(mut self, enabled: bool) -> Self {
        self.record_denials = enabled;
        self
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn interceptor(&self) -> &AuditInterceptor {
        &self.interceptor
    }

    pub fn operation(&self, id: &str) -> AppResult<&Operation> {
        self.registry
            .get(id)
            .ok_or_else(|| AppError::internal(format!("operation {id} is not registered")))
    }

    pub async fn authorize(&self, operation: &Operation, ctx: &AuthContext, call: &CallContext) -> AppResult<()> {
        let Some(requirement) = operation.requirement() else {
            return Ok(());
        };

        match self.guard.check(ctx, requirement, call) {
            Decision::Granted(_) => Ok(()),
            Decision::Denied { reason } => {
                tracing::info!(
                    user_id = %ctx.user_id(),
                    operation = operation.id,
                    reason = %reason,
                    "operation denied"
                );
                if self.record_denials && operation.record_denials {
                    self.interceptor
                        .record_denial(operation.audit(), requirement, ctx, call, &reason)
                        .await;
                }
                Err(AppError::forbidden(reason))
            }
        }
    }

    pub async fn execute<T, F, Fut>(
        &self,
        operation: &Operation,
        ctx: &AuthContext,
        call: &CallContext,
        handler: F,
    ) -> AppResult<T>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        match operation.audit() {
            Some(config) => self.interceptor.intercept(config, ctx, call, handler).await,
            None => handler().await,
        }
    }

    /// Authorize, then execute. A denied call never reaches `handler`.
    pub async fn run<T, F, Fut>(&self, id: &str, ctx: &AuthContext, call: &CallContext, handler: F) -> AppResult<T>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let operation = self.operation(id)?;
        self.authorize(operation, ctx, call).await?;
        self.execute(operation, ctx, call, handler).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::audit::{extract, AuditOutcome, MemoryAuditStore};
    use crate::authz::{Action, AuthContextResolver, Entity, Identity, PolicyCatalog};
    use crate::relay::NoopRelay;

    fn setup(record_denials: bool) -> (Pipeline, AuthContextResolver, Arc<MemoryAuditStore>) {
        let catalog = Arc::new(PolicyCatalog::builtin().unwrap());
        let store = Arc::new(MemoryAuditStore::new());
        let registry = OperationRegistry::builder()
            .register(
                Operation::guarded("song.create", PermissionRequirement::new(Entity::Song, Action::Create))
                    .audited(AuditConfig::new("song.create", Entity::Song).entity_id(extract::result_field("id"))),
            )
            .register(
                Operation::guarded(
                    "request.update",
                    PermissionRequirement::new(Entity::Request, Action::Update).owned_by_attribute("owner_id"),
                )
                .audited(AuditConfig::new("request.update", Entity::Request).entity_id(extract::param("id"))),
            )
            .register(Operation::authenticated("me"))
            .build()
            .unwrap();
        let pipeline = Pipeline::new(
            PermissionGuard::new(catalog.clone()),
            AuditInterceptor::new(store.clone(), Arc::new(NoopRelay)),
            registry,
        )
        .with_denial_audit(record_denials);
        (pipeline, AuthContextResolver::new(catalog), store)
    }

    fn ctx(resolver: &AuthContextResolver, user: Uuid, role: &str) -> AuthContext {
        resolver.resolve(&Identity::new(user).with_roles([role])).unwrap()
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let result = OperationRegistry::builder()
            .register(Operation::authenticated("x"))
            .register(Operation::authenticated("x"))
            .build();
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[tokio::test]
    async fn denied_call_never_runs_handler_and_is_audited_once() {
        let (pipeline, resolver, store) = setup(true);
        let player = ctx(&resolver, Uuid::new_v4(), "player");
        let ran = AtomicBool::new(false);
        let flag = &ran;

        let result = pipeline
            .run("song.create", &player, &CallContext::new(player.user_id()), || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(json!({"id": "s-1"}))
            })
            .await;

        assert!(matches!(result, Err(AppError::Forbidden(ref reason)) if reason.contains("SONG:CREATE")));
        assert!(!ran.load(Ordering::SeqCst));
        let records = store.snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AuditOutcome::Denied);
    }

    #[tokio::test]
    async fn granted_call_runs_and_is_audited_once() {
        let (pipeline, resolver, store) = setup(true);
        let singer = ctx(&resolver, Uuid::new_v4(), "singer");

        let value = pipeline
            .run("song.create", &singer, &CallContext::new(singer.user_id()), || async {
                Ok(json!({"id": "s-1"}))
            })
            .await
            .unwrap();

        assert_eq!(value["id"], json!("s-1"));
        let records = store.snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AuditOutcome::Success);
        assert_eq!(records[0].entity_id.as_deref(), Some("s-1"));
    }

    #[tokio::test]
    async fn owner_passes_self_service_other_user_does_not() {
        let (pipeline, resolver, store) = setup(true);
        let owner = Uuid::new_v4();
        let singer = ctx(&resolver, owner, "singer");
        let stranger = ctx(&resolver, Uuid::new_v4(), "singer");
        let call = CallContext::new(owner)
            .with_param("id", "r-1")
            .with_attribute("owner_id", owner.to_string());

        assert!(pipeline.run("request.update", &singer, &call, || async { Ok(()) }).await.is_ok());
        assert!(matches!(
            pipeline.run("request.update", &stranger, &call, || async { Ok(()) }).await,
            Err(AppError::Forbidden(_))
        ));

        let outcomes: Vec<_> = store.snapshot().await.iter().map(|r| r.outcome).collect();
        assert_eq!(outcomes, [AuditOutcome::Success, AuditOutcome::Denied]);
    }

    #[tokio::test]
    async fn denial_audit_can_be_switched_off() {
        let (pipeline, resolver, store) = setup(false);
        let viewer = ctx(&resolver, Uuid::new_v4(), "viewer");

        let result = pipeline
            .run("song.create", &viewer, &CallContext::default(), || async { Ok(()) })
            .await;

        assert!(result.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn authenticated_operation_skips_guard_and_audit() {
        let (pipeline, resolver, store) = setup(true);
        let viewer = ctx(&resolver, Uuid::new_v4(), "viewer");

        let value = pipeline
            .run("me", &viewer, &CallContext::default(), || async { Ok(7) })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert!(store.is_empty().await);
        assert!(matches!(
            pipeline.run("nope", &viewer, &CallContext::default(), || async { Ok(()) }).await,
            Err(AppError::Internal(_))
        ));
    }
}
