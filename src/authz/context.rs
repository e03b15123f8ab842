use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use super::catalog::PolicyCatalog;
use super::permission::{Action, Entity, Permission, Scope};
use crate::errors::{AppError, AppResult};

/// A verified caller as it comes out of credential verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl Identity {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            roles: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Resolved snapshot of a caller for one request. Fields are private so the
/// context cannot change after the resolver builds it.
#[derive(Debug, Clone)]
pub struct AuthContext {
    user_id: Uuid,
    roles: BTreeSet<String>,
    permissions: HashSet<Permission>,
    attributes: BTreeMap<String, Value>,
}

impl AuthContext {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn permissions(&self) -> &HashSet<Permission> {
        &self.permissions
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// The self-service permission covering the pair, if one is held.
    pub fn self_service_permission(&self, entity: Entity, action: Action) -> Option<Permission> {
        self.permissions
            .iter()
            .filter(|perm| perm.scope == Scope::Own && perm.covers(entity, action))
            .max_by_key(|perm| perm.specificity())
            .copied()
    }

    pub fn summary(&self) -> AuthContextSummary {
        let mut permissions: Vec<String> = self.permissions.iter().map(ToString::to_string).collect();
        permissions.sort();

        AuthContextSummary {
            user_id: self.user_id,
            roles: self.roles.iter().cloned().collect(),
            permissions,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthContextSummary {
    pub user_id: Uuid,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

/// Turns a verified identity into an [`AuthContext`] against one catalog snapshot.
#[derive(Debug, Clone)]
pub struct AuthContextResolver {
    catalog: Arc<PolicyCatalog>,
}

impl AuthContextResolver {
    pub fn new(catalog: Arc<PolicyCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<PolicyCatalog> {
        &self.catalog
    }

    pub fn resolve(&self, identity: &Identity) -> AppResult<AuthContext> {
        if identity.user_id.is_nil() {
            return Err(AppError::unauthorized("identity has no user id"));
        }

        let mut roles = BTreeSet::new();
        for role in &identity.roles {
            if self.catalog.contains_role(role) {
                roles.insert(role.clone());
            } else {
                tracing::warn!(
                    user_id = %identity.user_id,
                    role = %role,
                    "dropping role unknown to the policy catalog"
                );
            }
        }

        let permissions = self.catalog.resolve_permissions(&roles);

        Ok(AuthContext {
            user_id: identity.user_id,
            roles,
            permissions,
            attributes: identity.attributes.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::roles;

    fn resolver() -> AuthContextResolver {
        AuthContextResolver::new(Arc::new(PolicyCatalog::builtin().unwrap()))
    }

    #[test]
    fn resolves_union_of_role_permissions() {
        let resolver = resolver();
        let identity = Identity::new(Uuid::new_v4()).with_roles([roles::SINGER, roles::VIEWER]);
        let ctx = resolver.resolve(&identity).unwrap();

        let expected = resolver
            .catalog()
            .resolve_permissions([roles::SINGER, roles::VIEWER]);
        assert_eq!(ctx.permissions(), &expected);
        assert!(ctx.has_role(roles::SINGER));
        assert!(ctx.has_role(roles::VIEWER));
    }

    #[test]
    fn resolution_is_deterministic() {
        let resolver = resolver();
        let identity = Identity::new(Uuid::new_v4()).with_roles([roles::PLAYER, roles::MANAGER]);

        let first = resolver.resolve(&identity).unwrap();
        let second = resolver.resolve(&identity).unwrap();
        assert_eq!(first.roles(), second.roles());
        assert_eq!(first.permissions(), second.permissions());
    }

    #[test]
    fn drops_unknown_roles() {
        let identity = Identity::new(Uuid::new_v4()).with_roles(["ghost", roles::PLAYER]);
        let ctx = resolver().resolve(&identity).unwrap();
        assert!(!ctx.has_role("ghost"));
        assert_eq!(ctx.roles().len(), 1);
    }

    #[test]
    fn nil_user_is_unauthenticated() {
        let identity = Identity::new(Uuid::nil()).with_roles([roles::ADMIN]);
        assert!(matches!(
            resolver().resolve(&identity),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn finds_self_service_permission() {
        let identity = Identity::new(Uuid::new_v4()).with_roles([roles::SINGER]);
        let ctx = resolver().resolve(&identity).unwrap();
        assert_eq!(
            ctx.self_service_permission(Entity::Request, Action::Update),
            Some(Permission::own(Entity::Request, Action::Update))
        );
        assert_eq!(ctx.self_service_permission(Entity::Song, Action::Delete), None);
    }
}
