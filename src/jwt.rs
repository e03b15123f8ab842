use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{AuthContext, Identity};
use crate::errors::AppError;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Arc<Vec<u8>>,
    pub exp_hours: i64,
}

impl JwtConfig {
    pub fn new(secret: impl Into<Vec<u8>>, exp_hours: i64) -> Self {
        Self {
            secret: Arc::new(secret.into()),
            exp_hours,
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| AppError::configuration("JWT_SECRET not set"))?;
        let exp_hours = std::env::var("JWT_EXP_HOURS")
            .map(|val| val.parse::<i64>())
            .unwrap_or(Ok(24))
            .map_err(|_| AppError::configuration("JWT_EXP_HOURS must be a valid integer"))?;

        Ok(Self::new(secret.into_bytes(), exp_hours))
    }

    pub fn encode<I, S>(&self, user_id: Uuid, roles: I) -> Result<String, AppError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        use chrono::{Duration, Utc};

        let now = Utc::now();
        let exp = Duration::try_hours(self.exp_hours)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| AppError::configuration(format!("JWT_EXP_HOURS {} is out of range", self.exp_hours)))?;

        let claims = Claims {
            sub: user_id,
            roles: roles.into_iter().map(Into::into).collect(),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|err| AppError::token(err.to_string()))
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| AppError::token(err.to_string()))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: usize,
    pub iat: usize,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Identity::new(claims.sub).with_roles(claims.roles)
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let path = parts.uri.path().to_string();

        let Some(token) = bearer_token(parts) else {
            tracing::warn!(path = %path, "request without bearer credential");
            return Err(AppError::unauthorized("Authorization header missing"));
        };

        let claims = state.jwt.decode(token).map_err(|err| {
            tracing::warn!(path = %path, error = %err, "rejected bearer credential");
            err
        })?;

        state.resolver.resolve(&Identity::from(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_expiry_is_a_configuration_error() {
        let jwt = JwtConfig::new("unit-secret", i64::MAX);
        let result = jwt.encode(Uuid::new_v4(), ["admin"]);
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[test]
    fn roles_survive_a_round_trip() {
        let jwt = JwtConfig::new("unit-secret", 1);
        let user = Uuid::new_v4();
        let token = jwt.encode(user, ["singer", "viewer"]).unwrap();
        let claims = jwt.decode(&token).unwrap();

        assert_eq!(claims.sub, user);
        assert_eq!(claims.roles, ["singer", "viewer"]);
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let token = JwtConfig::new("one", 1).encode(Uuid::new_v4(), ["admin"]).unwrap();
        assert!(matches!(JwtConfig::new("two", 1).decode(&token), Err(AppError::Token(_))));
    }
}
