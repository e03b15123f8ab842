//! The guarded operations this service exposes, with their permission
//! requirements and audit settings.

use crate::audit::{extract, AuditConfig};
use crate::authz::{Action, Entity, PermissionRequirement};
use crate::errors::AppResult;
use crate::pipeline::{Operation, OperationRegistry};

pub const AUTH_ME: &str = "auth.me";

pub const REQUEST_LIST: &str = "request.list";
pub const REQUEST_CREATE: &str = "request.create";
pub const REQUEST_UPDATE: &str = "request.update";
pub const REQUEST_DELETE: &str = "request.delete";

pub const AUDIT_QUERY: &str = "audit.query";
pub const AUDIT_ENTITY_HISTORY: &str = "audit.entity_history";
pub const AUDIT_STATS: &str = "audit.stats";
pub const AUDIT_MY_ACTIVITY: &str = "audit.my_activity";
pub const AUDIT_MY_STATS: &str = "audit.my_stats";
pub const AUDIT_CLEANUP: &str = "audit.cleanup";
pub const AUDIT_EXPORT: &str = "audit.export";

/// Call attribute holding the owner id of the song request being changed.
pub const OWNER_ATTRIBUTE: &str = "owner_id";
/// Call attribute holding the song request as it was before the change.
pub const BEFORE_ATTRIBUTE: &str = "before";

const REQUEST_FIELDS: &[&str] = &["song_title", "artist", "note"];
const EXPORT_QUERY_FIELDS: &[&str] = &["format", "userId", "entityType", "entityId", "startDate", "endDate"];

pub fn registry() -> AppResult<OperationRegistry> {
    OperationRegistry::builder()
        .register(Operation::authenticated(AUTH_ME))
        .register(Operation::guarded(
            REQUEST_LIST,
            PermissionRequirement::new(Entity::Request, Action::View),
        ))
        .register(
            Operation::guarded(REQUEST_CREATE, PermissionRequirement::new(Entity::Request, Action::Create)).audited(
                AuditConfig::new("request.create", Entity::Request)
                    .entity_id(extract::result_field("id"))
                    .details(extract::body_fields(REQUEST_FIELDS))
                    .notify(),
            ),
        )
        .register(
            Operation::guarded(
                REQUEST_UPDATE,
                PermissionRequirement::new(Entity::Request, Action::Update).owned_by_attribute(OWNER_ATTRIBUTE),
            )
            .audited(
                AuditConfig::new("request.update", Entity::Request)
                    .entity_id(extract::param("id"))
                    .details(extract::before_after(BEFORE_ATTRIBUTE))
                    .notify(),
            ),
        )
        .register(
            Operation::guarded(
                REQUEST_DELETE,
                PermissionRequirement::new(Entity::Request, Action::Delete).owned_by_attribute(OWNER_ATTRIBUTE),
            )
            .audited(
                AuditConfig::new("request.delete", Entity::Request)
                    .entity_id(extract::param("id"))
                    .details(extract::before_after(BEFORE_ATTRIBUTE))
                    .skip_on_error()
                    .notify(),
            ),
        )
        .register(Operation::guarded(
            AUDIT_QUERY,
            PermissionRequirement::new(Entity::AuditLog, Action::View),
        ))
        .register(Operation::guarded(
            AUDIT_ENTITY_HISTORY,
            PermissionRequirement::new(Entity::AuditLog, Action::View),
        ))
        .register(Operation::guarded(
            AUDIT_STATS,
            PermissionRequirement::new(Entity::Analytics, Action::View),
        ))
        .register(Operation::authenticated(AUDIT_MY_ACTIVITY))
        .register(Operation::authenticated(AUDIT_MY_STATS))
        .register(
            Operation::guarded(AUDIT_CLEANUP, PermissionRequirement::new(Entity::AuditLog, Action::Delete)).audited(
                AuditConfig::new("audit.cleanup", Entity::AuditLog)
                    .details(extract::query_and_result(&["retentionDays"]))
                    .notify(),
            ),
        )
        .register(
            Operation::guarded(AUDIT_EXPORT, PermissionRequirement::new(Entity::AuditLog, Action::Export)).audited(
                AuditConfig::new("audit.export", Entity::AuditLog).details(extract::query_and_result(EXPORT_QUERY_FIELDS)),
            ),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_with_every_operation() {
        let registry = registry().unwrap();
        for id in [
            AUTH_ME,
            REQUEST_LIST,
            REQUEST_CREATE,
            REQUEST_UPDATE,
            REQUEST_DELETE,
            AUDIT_QUERY,
            AUDIT_ENTITY_HISTORY,
            AUDIT_STATS,
            AUDIT_MY_ACTIVITY,
            AUDIT_MY_STATS,
            AUDIT_CLEANUP,
            AUDIT_EXPORT,
        ] {
            assert!(registry.get(id).is_some(), "{id} missing");
        }
        assert_eq!(registry.len(), 12);

        let ids = registry.ids();
        assert_eq!(ids.len(), 12);
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn self_scoped_operations_carry_no_requirement() {
        let registry = registry().unwrap();
        assert!(registry.get(AUDIT_MY_ACTIVITY).unwrap().requirement().is_none());
        assert!(registry.get(AUDIT_MY_STATS).unwrap().requirement().is_none());
        assert!(registry.get(REQUEST_UPDATE).unwrap().requirement().unwrap().owner().is_some());
    }

    #[test]
    fn admin_actions_are_audited() {
        let registry = registry().unwrap();
        assert!(registry.get(AUDIT_CLEANUP).unwrap().audit().is_some());
        assert!(registry.get(AUDIT_EXPORT).unwrap().audit().is_some());
        assert!(registry.get(AUDIT_QUERY).unwrap().audit().is_none());
    }
}
