use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::errors::{CatalogError, CatalogResult};
use super::permission::{Action, Entity, Permission, Scope};
use super::roles;

/// Role definitions shipped with the service, used when no catalog file is configured.
const BUILTIN_ROLES: &[(&str, &str, &[&str])] = &[
    (roles::SUPER_ADMIN, "Unrestricted access to every operation", &["*:*"]),
    (
        roles::ADMIN,
        "Manages users, catalog data and the audit trail",
        &[
            "USER:*",
            "EVENT:*",
            "REQUEST:*",
            "WISH_SONG:*",
            "SONG:*",
            "SINGER:*",
            "PLAYER:*",
            "AUDIT_LOG:*",
            "ANALYTICS:VIEW",
        ],
    ),
    (
        roles::MANAGER,
        "Runs events and moderates requests",
        &[
            "EVENT:*",
            "REQUEST:*",
            "WISH_SONG:*",
            "SONG:*",
            "SINGER:VIEW",
            "PLAYER:VIEW",
            "AUDIT_LOG:VIEW",
            "ANALYTICS:VIEW",
        ],
    ),
    (
        roles::SINGER,
        "Maintains a repertoire and files song requests",
        &[
            "SONG:VIEW",
            "SONG:CREATE",
            "SONG:UPDATE",
            "EVENT:VIEW",
            "REQUEST:VIEW",
            "REQUEST:CREATE",
            "REQUEST:UPDATE:OWN",
            "REQUEST:DELETE:OWN",
            "WISH_SONG:VIEW",
            "SINGER:UPDATE:OWN",
        ],
    ),
    (
        roles::PLAYER,
        "Performs at events",
        &[
            "SONG:VIEW",
            "EVENT:VIEW",
            "REQUEST:VIEW",
            "WISH_SONG:VIEW",
            "PLAYER:UPDATE:OWN",
        ],
    ),
    (
        roles::VIEWER,
        "Read-only access to public data",
        &["EVENT:VIEW", "SONG:VIEW", "REQUEST:VIEW", "WISH_SONG:VIEW"],
    ),
];

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Role {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[schema(value_type = Vec<String>)]
    pub permissions: Vec<Permission>,
}

impl Role {
    pub fn new(name: impl Into<String>, permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            name: name.into(),
            description: None,
            permissions: permissions.into_iter().collect(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    #[serde(default = "default_super_admin_role")]
    super_admin_role: String,
    roles: Vec<RoleDocument>,
}

#[derive(Debug, Deserialize)]
struct RoleDocument {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    permissions: Vec<String>,
}

fn default_super_admin_role() -> String {
    roles::SUPER_ADMIN.to_string()
}

/// The permission that satisfied a grant, with the role that carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantMatch {
    pub role: String,
    pub permission: Permission,
    pub bypass: bool,
}

/// Static role → permission table. Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct PolicyCatalog {
    roles: HashMap<String, Role>,
    super_admin_role: String,
}

impl PolicyCatalog {
    /// Builds a catalog from explicit roles. Duplicate or empty role names and an
    /// absent super admin role are rejected.
    pub fn from_roles(super_admin_role: impl Into<String>, roles: Vec<Role>) -> CatalogResult<Self> {
        let super_admin_role = super_admin_role.into();
        let mut by_name = HashMap::with_capacity(roles.len());

        for role in roles {
            if role.name.trim().is_empty() {
                return Err(CatalogError::EmptyRoleName);
            }
            if by_name.contains_key(&role.name) {
                return Err(CatalogError::DuplicateRole(role.name));
            }
            by_name.insert(role.name.clone(), role);
        }

        if !by_name.contains_key(&super_admin_role) {
            return Err(CatalogError::MissingRole(super_admin_role));
        }

        Ok(Self {
            roles: by_name,
            super_admin_role,
        })
    }

    pub fn builtin() -> CatalogResult<Self> {
        let parsed = BUILTIN_ROLES
            .iter()
            .map(|(name, description, permissions)| {
                Ok(Role::new(*name, parse_permissions(permissions)?).with_description(*description))
            })
            .collect::<CatalogResult<Vec<_>>>()?;

        Self::from_roles(roles::SUPER_ADMIN, parsed)
    }

    pub fn from_json_str(raw: &str) -> CatalogResult<Self> {
        let document: CatalogDocument = serde_json::from_str(raw)?;

        let parsed = document
            .roles
            .into_iter()
            .map(|doc| {
                let permissions = parse_permissions(&doc.permissions)?;
                Ok(Role {
                    name: doc.name,
                    description: doc.description,
                    permissions,
                })
            })
            .collect::<CatalogResult<Vec<_>>>()?;

        let catalog = Self::from_roles(document.super_admin_role, parsed)?;
        for required in roles::REQUIRED {
            if !catalog.roles.contains_key(*required) {
                return Err(CatalogError::MissingRole(required.to_string()));
            }
        }

        Ok(catalog)
    }

    pub fn from_path(path: &Path) -> CatalogResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Loads the catalog file when a path is given, the built-in table otherwise.
    pub fn load(path: Option<&Path>) -> CatalogResult<Self> {
        let catalog = match path {
            Some(path) => Self::from_path(path)?,
            None => Self::builtin()?,
        };

        tracing::info!(
            roles = catalog.roles.len(),
            source = %path.map(|p| p.display().to_string()).unwrap_or_else(|| "builtin".to_string()),
            "policy catalog loaded"
        );

        Ok(catalog)
    }

    pub fn super_admin_role(&self) -> &str {
        &self.super_admin_role
    }

    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    pub fn contains_role(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    /// Role names in sorted order.
    pub fn role_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.roles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_super_admin<I, S>(&self, role_names: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        role_names
            .into_iter()
            .any(|name| name.as_ref() == self.super_admin_role)
    }

    /// The permissions a single role holds. Unknown roles hold nothing.
    pub fn permissions_for(&self, role_name: &str) -> HashSet<Permission> {
        if role_name == self.super_admin_role {
            return HashSet::from([Permission::ALL]);
        }

        self.roles
            .get(role_name)
            .map(|role| role.permissions.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Union of the permissions of every named role.
    pub fn resolve_permissions<I, S>(&self, role_names: I) -> HashSet<Permission>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        role_names
            .into_iter()
            .flat_map(|name| self.permissions_for(name.as_ref()))
            .collect()
    }

    /// Most specific unscoped permission among the held roles covering the pair.
    /// The super admin role short-circuits without consulting any role table.
    pub fn best_match<I, S>(&self, role_names: I, entity: Entity, action: Action) -> Option<GrantMatch>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<S> = role_names.into_iter().collect();

        if self.is_super_admin(names.iter().map(|name| name.as_ref())) {
            return Some(GrantMatch {
                role: self.super_admin_role.clone(),
                permission: Permission::ALL,
                bypass: true,
            });
        }

        names
            .iter()
            .filter_map(|name| self.roles.get(name.as_ref()))
            .flat_map(|role| {
                role.permissions
                    .iter()
                    .filter(|perm| perm.scope == Scope::Any && perm.covers(entity, action))
                    .map(move |perm| (role, perm))
            })
            .max_by(|(role_a, a), (role_b, b)| {
                a.specificity()
                    .cmp(&b.specificity())
                    .then_with(|| role_b.name.cmp(&role_a.name))
            })
            .map(|(role, perm)| GrantMatch {
                role: role.name.clone(),
                permission: *perm,
                bypass: false,
            })
    }

    pub fn is_granted<I, S>(&self, role_names: I, entity: Entity, action: Action) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.best_match(role_names, entity, action).is_some()
    }
}

fn parse_permissions<S: AsRef<str>>(raw: &[S]) -> CatalogResult<Vec<Permission>> {
    raw.iter().map(|value| value.as_ref().parse()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PolicyCatalog {
        PolicyCatalog::builtin().expect("builtin catalog must load")
    }

    #[test]
    fn every_resolved_permission_is_granted() {
        let catalog = catalog();
        for name in catalog.role_names() {
            for perm in catalog.permissions_for(name) {
                if perm.scope != Scope::Any {
                    continue;
                }
                let entities: Vec<Entity> = if perm.entity.is_wildcard() {
                    Entity::CONCRETE.to_vec()
                } else {
                    vec![perm.entity]
                };
                let actions: Vec<Action> = if perm.action.is_wildcard() {
                    Action::CONCRETE.to_vec()
                } else {
                    vec![perm.action]
                };
                for entity in &entities {
                    for action in &actions {
                        assert!(
                            catalog.is_granted([name], *entity, *action),
                            "{name} should be granted {entity}:{action}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn grants_nothing_outside_the_role_union() {
        let catalog = catalog();
        let held = [roles::SINGER, roles::PLAYER];
        let union = catalog.resolve_permissions(held);

        for entity in Entity::CONCRETE {
            for action in Action::CONCRETE {
                let in_union = union
                    .iter()
                    .any(|perm| perm.scope == Scope::Any && perm.covers(entity, action));
                let individually = catalog.is_granted([roles::SINGER], entity, action)
                    || catalog.is_granted([roles::PLAYER], entity, action);

                assert_eq!(catalog.is_granted(held, entity, action), in_union);
                assert_eq!(catalog.is_granted(held, entity, action), individually);
            }
        }
    }

    #[test]
    fn player_cannot_create_songs_but_singer_can() {
        let catalog = catalog();
        assert!(!catalog.is_granted([roles::PLAYER], Entity::Song, Action::Create));
        assert!(catalog.is_granted([roles::SINGER], Entity::Song, Action::Create));
    }

    #[test]
    fn super_admin_bypasses_empty_catalog_entry() {
        let catalog = PolicyCatalog::from_roles("root", vec![Role::new("root", [])]).unwrap();
        let grant = catalog
            .best_match(["root"], Entity::System, Action::Delete)
            .expect("super admin is always granted");
        assert!(grant.bypass);
    }

    #[test]
    fn self_service_permissions_do_not_grant_outright() {
        let catalog = catalog();
        assert!(!catalog.is_granted([roles::SINGER], Entity::Request, Action::Update));
    }

    #[test]
    fn best_match_prefers_exact_permission() {
        let catalog = PolicyCatalog::from_roles(
            roles::SUPER_ADMIN,
            vec![
                Role::new(roles::SUPER_ADMIN, []),
                Role::new("broad", [Permission::new(Entity::All, Action::View)]),
                Role::new("narrow", [Permission::new(Entity::Song, Action::View)]),
            ],
        )
        .unwrap();

        let grant = catalog
            .best_match(["broad", "narrow"], Entity::Song, Action::View)
            .unwrap();
        assert_eq!(grant.role, "narrow");
        assert_eq!(grant.permission.specificity(), 2);
    }

    #[test]
    fn rejects_duplicate_roles() {
        let raw = r#"{"roles": [
            {"name": "super_admin", "permissions": []},
            {"name": "viewer", "permissions": ["SONG:VIEW"]},
            {"name": "viewer", "permissions": ["EVENT:VIEW"]}
        ]}"#;
        assert!(matches!(
            PolicyCatalog::from_json_str(raw),
            Err(CatalogError::DuplicateRole(name)) if name == "viewer"
        ));
    }

    #[test]
    fn rejects_missing_required_role() {
        let raw = r#"{"roles": [{"name": "super_admin"}, {"name": "admin", "permissions": ["*:*"]}]}"#;
        assert!(matches!(
            PolicyCatalog::from_json_str(raw),
            Err(CatalogError::MissingRole(_))
        ));
    }

    #[test]
    fn rejects_unparseable_permission() {
        let raw = r#"{"roles": [{"name": "super_admin", "permissions": ["SONG:SING"]}]}"#;
        assert!(matches!(
            PolicyCatalog::from_json_str(raw),
            Err(CatalogError::InvalidPermission(_))
        ));
    }

    #[test]
    fn loads_full_catalog_document() {
        let roles_json: Vec<String> = roles::REQUIRED
            .iter()
            .map(|name| format!(r#"{{"name": "{name}", "permissions": ["EVENT:VIEW"]}}"#))
            .collect();
        let raw = format!(r#"{{"roles": [{}]}}"#, roles_json.join(","));

        let catalog = PolicyCatalog::from_json_str(&raw).unwrap();
        assert_eq!(catalog.role_names().len(), roles::REQUIRED.len());
        assert!(catalog.is_granted([roles::VIEWER], Entity::Event, Action::View));
        assert!(!catalog.is_granted([roles::VIEWER], Entity::Song, Action::View));
    }
}
