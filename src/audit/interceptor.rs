use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};

use super::redact::redact;
use super::{with_timeout, AuditConfig, AuditOutcome, AuditRecord, AuditStore};
use crate::authz::{AuthContext, PermissionRequirement};
use crate::call::CallContext;
use crate::errors::AppResult;
use crate::relay::{NotificationRelay, AUDIT_RECORDED, SECURITY_DENIED};

const DEFAULT_APPEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Wraps an operation and writes one audit record for it.
///
/// The wrapped operation's value or error is always handed back untouched.
/// Problems on the audit path (extractors, store, relay) are logged and dropped.
#[derive(Clone)]
pub struct AuditInterceptor {
    store: Arc<dyn AuditStore>,
    relay: Arc<dyn NotificationRelay>,
    append_timeout: Duration,
}

impl AuditInterceptor {
    pub fn new(store: Arc<dyn AuditStore>, relay: Arc<dyn NotificationRelay>) -> Self {
        Self {
            store,
            relay,
            append_timeout: DEFAULT_APPEND_TIMEOUT,
        }
    }

    pub fn with_append_timeout(mut self, timeout: Duration) -> Self {
        self.append_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    pub fn relay(&self) -> &Arc<dyn NotificationRelay> {
        &self.relay
    }

    pub async fn intercept<T, F, Fut>(
        &self,
        config: &AuditConfig,
        ctx: &AuthContext,
        call: &CallContext,
        operation: F,
    ) -> AppResult<T>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let outcome = operation().await;

        if outcome.is_err() && config.skip_on_error {
            tracing::debug!(action = %config.action, "operation failed, audit skipped");
            return outcome;
        }

        let result = match &outcome {
            Ok(value) if config.needs_result() => match serde_json::to_value(value) {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::warn!(action = %config.action, error = %err, "audit could not serialize operation result");
                    None
                }
            },
            _ => None,
        };

        let mut record = self.build_record(config, ctx, call, result.as_ref(), match &outcome {
            Ok(_) => AuditOutcome::Success,
            Err(_) => AuditOutcome::Failure,
        });
        if let Err(err) = &outcome {
            record = record.with_reason(err.to_string());
        }

        self.write(record, config.notify).await;
        outcome
    }

    /// Records a guard denial and raises a security event. The operation itself never ran.
    pub async fn record_denial(
        &self,
        config: Option<&AuditConfig>,
        requirement: &PermissionRequirement,
        ctx: &AuthContext,
        call: &CallContext,
        reason: &str,
    ) {
        let required = requirement.permission().to_string();
        let record = match config {
            Some(config) => self.build_record(config, ctx, call, None, AuditOutcome::Denied),
            None => AuditRecord::new(ctx.user_id(), required.clone(), requirement.entity, AuditOutcome::Denied),
        }
        .with_details(Some(json!({ "required": required })))
        .with_reason(reason);

        self.relay.publish(
            SECURITY_DENIED,
            json!({
                "actor_id": record.actor_id,
                "action": record.action,
                "entity_type": record.entity_type,
                "entity_id": record.entity_id,
                "required": required,
                "reason": reason,
            }),
        );
        self.write(record, false).await;
    }

    fn build_record(
        &self,
        config: &AuditConfig,
        ctx: &AuthContext,
        call: &CallContext,
        result: Option<&Value>,
        outcome: AuditOutcome,
    ) -> AuditRecord {
        let entity_id = config
            .entity_id_extractor()
            .and_then(|extract| run_extractor(&config.action, "entity_id", || (**extract)(call, result)));
        let details = config
            .details_extractor()
            .and_then(|extract| run_extractor(&config.action, "details", || (**extract)(call, result)))
            .map(|details| if config.sensitive { redact(details) } else { details });

        AuditRecord::new(ctx.user_id(), config.action.clone(), config.entity_type, outcome)
            .with_entity_id(entity_id)
            .with_details(details)
            .with_sensitive(config.sensitive)
    }

    async fn write(&self, record: AuditRecord, notify: bool) {
        let action = record.action.clone();
        match with_timeout(self.append_timeout, self.store.append(record)).await {
            Ok(stored) => {
                tracing::debug!(action = %stored.action, outcome = %stored.outcome, "audit record written");
                if notify {
                    self.relay.publish(
                        AUDIT_RECORDED,
                        json!({
                            "action": stored.action,
                            "entity_type": stored.entity_type,
                            "entity_id": stored.entity_id,
                            "actor_id": stored.actor_id,
                        }),
                    );
                }
            }
            Err(err) => {
                tracing::error!(action = %action, error = %err, "failed to write audit record");
            }
        }
    }
}

/// Runs one extractor; an error or a panic leaves the field absent.
fn run_extractor<R>(action: &str, field: &str, extract: impl FnOnce() -> anyhow::Result<Option<R>>) -> Option<R> {
    match catch_unwind(AssertUnwindSafe(extract)) {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            tracing::warn!(action, field, error = %err, "audit extractor failed");
            None
        }
        Err(_) => {
            tracing::warn!(action, field, "audit extractor panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::audit::redact::REDACTED;
    use crate::audit::{extract, AuditFilter, AuditStoreError, MemoryAuditStore, Page, StoreResult};
    use crate::authz::{Action, AuthContextResolver, Entity, Identity, PolicyCatalog};
    use crate::errors::AppError;
    use crate::relay::BroadcastRelay;

    struct FailingStore;

    #[async_trait]
    impl AuditStore for FailingStore {
        async fn append(&self, _record: AuditRecord) -> StoreResult<AuditRecord> {
            Err(AuditStoreError::Unavailable("disk on fire".to_string()))
        }
        async fn query(&self, _filter: &AuditFilter, _page: Page) -> StoreResult<Vec<AuditRecord>> {
            Err(AuditStoreError::Unavailable("disk on fire".to_string()))
        }
        async fn count(&self, _filter: &AuditFilter) -> StoreResult<u64> {
            Err(AuditStoreError::Unavailable("disk on fire".to_string()))
        }
        async fn count_by_action(&self, _actor: Option<Uuid>, _since: DateTime<Utc>) -> StoreResult<BTreeMap<String, u64>> {
            Err(AuditStoreError::Unavailable("disk on fire".to_string()))
        }
        async fn delete_before(&self, _cutoff: DateTime<Utc>) -> StoreResult<u64> {
            Err(AuditStoreError::Unavailable("disk on fire".to_string()))
        }
    }

    struct SlowStore(Arc<MemoryAuditStore>);

    #[async_trait]
    impl AuditStore for SlowStore {
        async fn append(&self, record: AuditRecord) -> StoreResult<AuditRecord> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            self.0.append(record).await
        }
        async fn query(&self, filter: &AuditFilter, page: Page) -> StoreResult<Vec<AuditRecord>> {
            self.0.query(filter, page).await
        }
        async fn count(&self, filter: &AuditFilter) -> StoreResult<u64> {
            self.0.count(filter).await
        }
        async fn count_by_action(&self, actor: Option<Uuid>, since: DateTime<Utc>) -> StoreResult<BTreeMap<String, u64>> {
            self.0.count_by_action(actor, since).await
        }
        async fn delete_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
            self.0.delete_before(cutoff).await
        }
    }

    fn context(role: &str) -> AuthContext {
        let catalog = Arc::new(PolicyCatalog::builtin().unwrap());
        AuthContextResolver::new(catalog)
            .resolve(&Identity::new(Uuid::new_v4()).with_roles([role]))
            .unwrap()
    }

    fn interceptor() -> (AuditInterceptor, Arc<MemoryAuditStore>, BroadcastRelay) {
        let store = Arc::new(MemoryAuditStore::new());
        let relay = BroadcastRelay::default();
        (
            AuditInterceptor::new(store.clone(), Arc::new(relay.clone())),
            store,
            relay,
        )
    }

    #[tokio::test]
    async fn success_writes_exactly_one_record() {
        let (interceptor, store, _) = interceptor();
        let ctx = context("singer");
        let config = AuditConfig::new("request.create", Entity::Request).entity_id(extract::result_field("id"));
        let call = CallContext::new(ctx.user_id());

        let value = interceptor
            .intercept(&config, &ctx, &call, || async { Ok(json!({"id": "r-1"})) })
            .await
            .unwrap();

        assert_eq!(value, json!({"id": "r-1"}));
        let records = store.snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AuditOutcome::Success);
        assert_eq!(records[0].entity_id.as_deref(), Some("r-1"));
        assert_eq!(records[0].actor_id, ctx.user_id());
    }

    #[tokio::test]
    async fn skip_on_error_writes_nothing_and_keeps_error() {
        let (interceptor, store, _) = interceptor();
        let ctx = context("admin");
        let config = AuditConfig::new("request.delete", Entity::Request).skip_on_error();

        let result: AppResult<()> = interceptor
            .intercept(&config, &ctx, &CallContext::default(), || async {
                Err(AppError::not_found("request r-9"))
            })
            .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn failure_is_recorded_with_reason() {
        let (interceptor, store, _) = interceptor();
        let ctx = context("admin");
        let config = AuditConfig::new("request.update", Entity::Request).entity_id(extract::param("id"));
        let call = CallContext::new(ctx.user_id()).with_param("id", "r-3");

        let result: AppResult<()> = interceptor
            .intercept(&config, &ctx, &call, || async { Err(AppError::validation("bad status")) })
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        let records = store.snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AuditOutcome::Failure);
        assert_eq!(records[0].entity_id.as_deref(), Some("r-3"));
        assert!(records[0].reason.as_deref().unwrap_or_default().contains("bad status"));
    }

    #[tokio::test]
    async fn store_outage_does_not_touch_business_result() {
        let interceptor = AuditInterceptor::new(Arc::new(FailingStore), Arc::new(BroadcastRelay::default()));
        let ctx = context("manager");
        let config = AuditConfig::new("song.create", Entity::Song).notify();

        let ok = interceptor
            .intercept(&config, &ctx, &CallContext::default(), || async { Ok(42) })
            .await;
        assert_eq!(ok.unwrap(), 42);

        let err: AppResult<i32> = interceptor
            .intercept(&config, &ctx, &CallContext::default(), || async {
                Err(AppError::forbidden("nope"))
            })
            .await;
        assert!(matches!(err, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn slow_store_is_abandoned_after_append_timeout() {
        let memory = Arc::new(MemoryAuditStore::new());
        let relay = BroadcastRelay::default();
        let mut rx = relay.subscribe();
        let interceptor = AuditInterceptor::new(Arc::new(SlowStore(memory.clone())), Arc::new(relay.clone()))
            .with_append_timeout(Duration::from_millis(20));
        let ctx = context("admin");
        let config = AuditConfig::new("request.create", Entity::Request).notify();

        let started = std::time::Instant::now();
        let value = interceptor
            .intercept(&config, &ctx, &CallContext::default(), || async { Ok("created") })
            .await
            .unwrap();

        assert_eq!(value, "created");
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(memory.is_empty().await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sensitive_details_are_redacted() {
        let (interceptor, store, _) = interceptor();
        let ctx = context("admin");
        let config = AuditConfig::new("user.update", Entity::User)
            .details(extract::body())
            .sensitive();
        let call = CallContext::new(ctx.user_id()).with_body(&json!({
            "email": "a@b.c",
            "password": "hunter22",
            "nested": {"api_token": "abc"}
        }));

        interceptor
            .intercept(&config, &ctx, &call, || async { Ok(()) })
            .await
            .unwrap();

        let record = &store.snapshot().await[0];
        let details = record.details.as_ref().unwrap();
        assert!(record.sensitive);
        assert_eq!(details["password"], json!(REDACTED));
        assert_eq!(details["nested"]["api_token"], json!(REDACTED));
        assert_eq!(details["email"], json!("a@b.c"));
    }

    #[tokio::test]
    async fn panicking_extractor_leaves_field_absent() {
        let (interceptor, store, _) = interceptor();
        let ctx = context("admin");
        let config = AuditConfig::new("event.update", Entity::Event)
            .entity_id(|_, _| panic!("extractor bug"))
            .details(|_, _| Err(anyhow::anyhow!("no details")));

        interceptor
            .intercept(&config, &ctx, &CallContext::default(), || async { Ok("done") })
            .await
            .unwrap();

        let records = store.snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entity_id, None);
        assert_eq!(records[0].details, None);
    }

    #[tokio::test]
    async fn notify_publishes_after_write() {
        let (interceptor, _, relay) = interceptor();
        let mut rx = relay.subscribe();
        let ctx = context("admin");
        let config = AuditConfig::new("request.create", Entity::Request).notify();

        interceptor
            .intercept(&config, &ctx, &CallContext::default(), || async { Ok(()) })
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, AUDIT_RECORDED);
        assert_eq!(event.payload["action"], json!("request.create"));
    }

    #[tokio::test]
    async fn denial_writes_denied_record_and_security_event() {
        let (interceptor, store, relay) = interceptor();
        let mut rx = relay.subscribe();
        let ctx = context("player");
        let requirement = PermissionRequirement::new(Entity::Song, Action::Create);
        let config = AuditConfig::new("song.create", Entity::Song);

        interceptor
            .record_denial(Some(&config), &requirement, &ctx, &CallContext::default(), "missing permission SONG:CREATE")
            .await;

        let records = store.snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AuditOutcome::Denied);
        assert_eq!(records[0].action, "song.create");
        assert_eq!(records[0].details, Some(json!({"required": "SONG:CREATE"})));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, SECURITY_DENIED);
    }
}
