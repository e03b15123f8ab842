use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::audit::MAX_PAGE_LIMIT;
use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditBackend {
    Sqlite,
    Memory,
}

impl FromStr for AuditBackend {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(AuditBackend::Sqlite),
            "memory" => Ok(AuditBackend::Memory),
            other => Err(AppError::configuration(format!(
                "AUDIT_STORE must be sqlite or memory, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditSettings {
    pub backend: AuditBackend,
    pub query_timeout: Duration,
    pub export_page_size: u32,
    pub retention_days: Option<i64>,
    pub retention_interval: Duration,
    pub record_denials: bool,
    /// Upper bound on one audit write; a slower store loses the record, not the call.
    pub append_timeout: Duration,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            backend: AuditBackend::Sqlite,
            query_timeout: Duration::from_secs(30),
            export_page_size: MAX_PAGE_LIMIT,
            retention_days: None,
            retention_interval: Duration::from_secs(86_400),
            record_denials: true,
            append_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub catalog_path: Option<PathBuf>,
    pub audit: AuditSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            catalog_path: None,
            audit: AuditSettings::default(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, AppError> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| AppError::configuration(format!("{name} has an invalid value: {raw}"))),
        _ => Ok(None),
    }
}

impl AppConfig {
    /// Reads every setting except `DATABASE_URL` and the JWT secret, which
    /// belong to the pool and to [`crate::jwt::JwtConfig`].
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = AuditSettings::default();

        let retention_days = env_parse::<i64>("AUDIT_RETENTION_DAYS")?;
        if let Some(days) = retention_days {
            if days <= 0 {
                return Err(AppError::configuration(format!(
                    "AUDIT_RETENTION_DAYS must be positive, got {days}"
                )));
            }
        }

        let backend = match std::env::var("AUDIT_STORE") {
            Ok(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => defaults.backend,
        };

        Ok(Self {
            port: env_parse("APP_PORT")?.unwrap_or(8000),
            catalog_path: std::env::var_os("POLICY_CATALOG_PATH")
                .filter(|raw| !raw.is_empty())
                .map(PathBuf::from),
            audit: AuditSettings {
                backend,
                query_timeout: env_parse::<u64>("AUDIT_QUERY_TIMEOUT_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.query_timeout),
                export_page_size: env_parse::<u32>("AUDIT_EXPORT_PAGE_SIZE")?
                    .unwrap_or(defaults.export_page_size)
                    .clamp(1, MAX_PAGE_LIMIT),
                retention_days,
                retention_interval: env_parse::<u64>("AUDIT_RETENTION_INTERVAL_SECS")?
                    .map(|secs| Duration::from_secs(secs.max(1)))
                    .unwrap_or(defaults.retention_interval),
                record_denials: env_parse::<bool>("AUDIT_RECORD_DENIALS")?.unwrap_or(defaults.record_denials),
                append_timeout: env_parse::<u64>("AUDIT_APPEND_TIMEOUT_MS")?
                    .map(|ms| Duration::from_millis(ms.max(1)))
                    .unwrap_or(defaults.append_timeout),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names() {
        assert_eq!("SQLite".parse::<AuditBackend>().unwrap(), AuditBackend::Sqlite);
        assert_eq!("memory".parse::<AuditBackend>().unwrap(), AuditBackend::Memory);
        assert!("postgres".parse::<AuditBackend>().is_err());
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.audit.export_page_size, 100);
        assert_eq!(config.audit.query_timeout, Duration::from_secs(30));
        assert!(config.audit.record_denials);
        assert!(config.audit.retention_days.is_none());
        assert_eq!(config.audit.append_timeout, Duration::from_secs(5));
    }
}
