use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::catalog::PolicyCatalog;
use super::context::AuthContext;
use super::permission::{Action, Entity, Permission};
use crate::call::CallContext;

/// Computes the owner of the resource a call targets, from the call's own inputs.
pub type OwnerResolver = Arc<dyn Fn(&CallContext) -> Option<Uuid> + Send + Sync>;

/// The (entity, action) an operation needs, plus an optional ownership check
/// for callers holding only the self-service form of the permission.
#[derive(Clone)]
pub struct PermissionRequirement {
    pub entity: Entity,
    pub action: Action,
    owner: Option<OwnerResolver>,
}

impl PermissionRequirement {
    pub fn new(entity: Entity, action: Action) -> Self {
        Self {
            entity,
            action,
            owner: None,
        }
    }

    pub fn with_owner<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&CallContext) -> Option<Uuid> + Send + Sync + 'static,
    {
        self.owner = Some(Arc::new(resolver));
        self
    }

    /// Owner taken from a call attribute the handler resolved for this request.
    pub fn owned_by_attribute(self, attribute: &'static str) -> Self {
        self.with_owner(move |call| call.attribute_uuid(attribute))
    }

    pub fn owner(&self) -> Option<&OwnerResolver> {
        self.owner.as_ref()
    }

    pub fn permission(&self) -> Permission {
        Permission::new(self.entity, self.action)
    }
}

impl fmt::Debug for PermissionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionRequirement")
            .field("entity", &self.entity)
            .field("action", &self.action)
            .field("owner", &self.owner.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantBasis {
    SuperAdmin,
    Role { role: String, permission: Permission },
    Owner { permission: Permission },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Granted(GrantBasis),
    Denied { reason: String },
}

impl Decision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Decision::Granted(_))
    }

    pub fn denial_reason(&self) -> Option<&str> {
        match self {
            Decision::Denied { reason } => Some(reason),
            Decision::Granted(_) => None,
        }
    }
}

/// Pure grant/deny decision over a resolved context.
///
/// Evaluation order:
/// 1. catalog grant for the held roles (super admin short-circuits) -> allow
/// 2. self-service permission and the call's resolved owner is the caller -> allow
/// 3. deny, naming the missing permission
#[derive(Debug, Clone)]
pub struct PermissionGuard {
    catalog: Arc<PolicyCatalog>,
}

impl PermissionGuard {
    pub fn new(catalog: Arc<PolicyCatalog>) -> Self {
        Self { catalog }
    }

    pub fn check(&self, ctx: &AuthContext, requirement: &PermissionRequirement, call: &CallContext) -> Decision {
        let (entity, action) = (requirement.entity, requirement.action);

        if let Some(grant) = self.catalog.best_match(ctx.roles(), entity, action) {
            let basis = if grant.bypass {
                GrantBasis::SuperAdmin
            } else {
                GrantBasis::Role {
                    role: grant.role,
                    permission: grant.permission,
                }
            };
            tracing::debug!(
                user_id = %ctx.user_id(),
                permission = %requirement.permission(),
                basis = ?basis,
                "permission granted"
            );
            return Decision::Granted(basis);
        }

        let self_service = ctx.self_service_permission(entity, action);

        if let (Some(permission), Some(resolver)) = (self_service, requirement.owner()) {
            if (**resolver)(call) == Some(ctx.user_id()) {
                tracing::debug!(
                    user_id = %ctx.user_id(),
                    permission = %permission,
                    "self-service permission granted to owner"
                );
                return Decision::Granted(GrantBasis::Owner { permission });
            }
        }

        let reason = match self_service {
            Some(_) => format!(
                "missing permission {}; self-service access covers only resources you own",
                requirement.permission()
            ),
            None => format!("missing permission {}", requirement.permission()),
        };

        tracing::debug!(
            user_id = %ctx.user_id(),
            permission = %requirement.permission(),
            "permission denied"
        );
        Decision::Denied { reason }
    }

    /// Checks a bare (entity, action) pair with no ownership fallback.
    pub fn check_pair(&self, ctx: &AuthContext, entity: Entity, action: Action) -> Decision {
        self.check(ctx, &PermissionRequirement::new(entity, action), &CallContext::default())
    }
}
