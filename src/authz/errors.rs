/// Failures while parsing permissions or loading the policy catalog.
///
/// Fatal when loading a catalog. Handlers parsing an `entityType` filter map
/// `UnknownEntity` to a validation error themselves.
#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("invalid permission: {0}")]
    InvalidPermission(String),
    #[error("duplicate role: {0}")]
    DuplicateRole(String),
    #[error("missing role: {0}")]
    MissingRole(String),
    #[error("role name must not be empty")]
    EmptyRoleName,
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type CatalogResult<T> = Result<T, CatalogError>;
