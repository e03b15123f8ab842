//! Authorization module - policy catalog, caller context and permission guard
//!
//! This module implements the RBAC/ABAC decision path with support for:
//! - Static role catalogs (built-in or loaded from a JSON file at startup)
//! - Wildcard entities and actions
//! - Super admin bypass
//! - Self-service permissions granted only to the owner of the target resource

mod catalog;
mod context;
mod errors;
mod guard;
mod permission;

pub use catalog::{GrantMatch, PolicyCatalog, Role};
pub use context::{AuthContext, AuthContextResolver, AuthContextSummary, Identity};
pub use errors::{CatalogError, CatalogResult};
pub use guard::{Decision, GrantBasis, OwnerResolver, PermissionGuard, PermissionRequirement};
pub use permission::{Action, Entity, Permission, Scope};

/// Well-known role names
pub mod roles {
    pub const SUPER_ADMIN: &str = "super_admin";
    pub const ADMIN: &str = "admin";
    pub const MANAGER: &str = "manager";
    pub const SINGER: &str = "singer";
    pub const PLAYER: &str = "player";
    pub const VIEWER: &str = "viewer";

    /// Roles every catalog file must define.
    pub const REQUIRED: &[&str] = &[SUPER_ADMIN, ADMIN, MANAGER, SINGER, PLAYER, VIEWER];
}
