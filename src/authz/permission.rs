use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::errors::CatalogError;

/// Entity kinds a permission can target. `All` is the `*` wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub enum Entity {
    #[serde(rename = "*")]
    All,
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "EVENT")]
    Event,
    #[serde(rename = "REQUEST")]
    Request,
    #[serde(rename = "WISH_SONG")]
    WishSong,
    #[serde(rename = "SONG")]
    Song,
    #[serde(rename = "SINGER")]
    Singer,
    #[serde(rename = "PLAYER")]
    Player,
    #[serde(rename = "AUDIT_LOG")]
    AuditLog,
    #[serde(rename = "SYSTEM")]
    System,
    #[serde(rename = "ANALYTICS")]
    Analytics,
}

impl Entity {
    pub const CONCRETE: [Entity; 10] = [
        Entity::User,
        Entity::Event,
        Entity::Request,
        Entity::WishSong,
        Entity::Song,
        Entity::Singer,
        Entity::Player,
        Entity::AuditLog,
        Entity::System,
        Entity::Analytics,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Entity::All => "*",
            Entity::User => "USER",
            Entity::Event => "EVENT",
            Entity::Request => "REQUEST",
            Entity::WishSong => "WISH_SONG",
            Entity::Song => "SONG",
            Entity::Singer => "SINGER",
            Entity::Player => "PLAYER",
            Entity::AuditLog => "AUDIT_LOG",
            Entity::System => "SYSTEM",
            Entity::Analytics => "ANALYTICS",
        }
    }

    pub fn is_wildcard(self) -> bool {
        self == Entity::All
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Entity {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        if normalized == "*" {
            return Ok(Entity::All);
        }
        Entity::CONCRETE
            .into_iter()
            .find(|entity| entity.as_str() == normalized)
            .ok_or_else(|| CatalogError::UnknownEntity(value.to_string()))
    }
}

/// Actions a permission can grant. `All` is the `*` wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub enum Action {
    #[serde(rename = "*")]
    All,
    #[serde(rename = "VIEW")]
    View,
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "EXPORT")]
    Export,
}

impl Action {
    pub const CONCRETE: [Action; 5] = [
        Action::View,
        Action::Create,
        Action::Update,
        Action::Delete,
        Action::Export,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::All => "*",
            Action::View => "VIEW",
            Action::Create => "CREATE",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
            Action::Export => "EXPORT",
        }
    }

    pub fn is_wildcard(self) -> bool {
        self == Action::All
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        if normalized == "*" {
            return Ok(Action::All);
        }
        Action::CONCRETE
            .into_iter()
            .find(|action| action.as_str() == normalized)
            .ok_or_else(|| CatalogError::UnknownAction(value.to_string()))
    }
}

/// `Any` grants the pair outright; `Own` only when the caller owns the target resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Any,
    Own,
}

/// An (entity, action) pair with a scope, written `ENTITY:ACTION` or `ENTITY:ACTION:OWN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Permission {
    pub entity: Entity,
    pub action: Action,
    pub scope: Scope,
}

impl Permission {
    pub const ALL: Permission = Permission {
        entity: Entity::All,
        action: Action::All,
        scope: Scope::Any,
    };

    pub fn new(entity: Entity, action: Action) -> Self {
        Self {
            entity,
            action,
            scope: Scope::Any,
        }
    }

    pub fn own(entity: Entity, action: Action) -> Self {
        Self {
            entity,
            action,
            scope: Scope::Own,
        }
    }

    /// Whether this permission covers the requested pair, ignoring scope.
    pub fn covers(&self, entity: Entity, action: Action) -> bool {
        (self.entity.is_wildcard() || self.entity == entity)
            && (self.action.is_wildcard() || self.action == action)
    }

    /// 2 = exact entity and action, 1 = one wildcard, 0 = both wildcards.
    pub fn specificity(&self) -> u8 {
        u8::from(!self.entity.is_wildcard()) + u8::from(!self.action.is_wildcard())
    }

    pub fn is_self_service(&self) -> bool {
        self.scope == Scope::Own
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Scope::Any => write!(f, "{}:{}", self.entity, self.action),
            Scope::Own => write!(f, "{}:{}:OWN", self.entity, self.action),
        }
    }
}

impl FromStr for Permission {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.trim().split(':').collect();
        let invalid = || CatalogError::InvalidPermission(value.to_string());

        let (entity, action, scope) = match parts.as_slice() {
            [entity, action] => (entity, action, Scope::Any),
            [entity, action, scope] if scope.eq_ignore_ascii_case("own") => (entity, action, Scope::Own),
            [entity, action, scope] if scope.eq_ignore_ascii_case("any") => (entity, action, Scope::Any),
            _ => return Err(invalid()),
        };

        Ok(Permission {
            entity: entity.parse().map_err(|_| invalid())?,
            action: action.parse().map_err(|_| invalid())?,
            scope,
        })
    }
}

impl Serialize for Permission {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_self_service_permissions() {
        let plain: Permission = "song:create".parse().unwrap();
        assert_eq!(plain, Permission::new(Entity::Song, Action::Create));

        let own: Permission = "REQUEST:UPDATE:OWN".parse().unwrap();
        assert_eq!(own, Permission::own(Entity::Request, Action::Update));
        assert_eq!(own.to_string(), "REQUEST:UPDATE:OWN");
    }

    #[test]
    fn wildcards_cover_every_concrete_value() {
        let any_view: Permission = "*:VIEW".parse().unwrap();
        for entity in Entity::CONCRETE {
            assert!(any_view.covers(entity, Action::View));
            assert!(!any_view.covers(entity, Action::Delete));
        }

        let all_song: Permission = "SONG:*".parse().unwrap();
        for action in Action::CONCRETE {
            assert!(all_song.covers(Entity::Song, action));
        }
        assert!(!all_song.covers(Entity::Singer, Action::View));
    }

    #[test]
    fn specificity_ranks_exact_over_wildcard() {
        assert_eq!(Permission::new(Entity::Song, Action::Create).specificity(), 2);
        assert_eq!(Permission::new(Entity::All, Action::Create).specificity(), 1);
        assert_eq!(Permission::ALL.specificity(), 0);
    }

    #[test]
    fn rejects_malformed_permissions() {
        for raw in ["SONG", "SONG:FLY", "PLANET:VIEW", "SONG:VIEW:MAYBE", "a:b:c:d", ""] {
            assert!(raw.parse::<Permission>().is_err(), "{raw} should not parse");
        }
    }

    #[test]
    fn serializes_as_string_form() {
        let perm = Permission::own(Entity::Request, Action::Delete);
        let json = serde_json::to_value(perm).unwrap();
        assert_eq!(json, serde_json::json!("REQUEST:DELETE:OWN"));
        let back: Permission = serde_json::from_value(json).unwrap();
        assert_eq!(back, perm);
    }
}
