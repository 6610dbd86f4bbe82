use nbcache_db::StoreError;
use nbcache_notebook::{CanonicalError, NbReadError, NbValidityError};

/// Errors produced by cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache contract was violated, e.g. a duplicate ingest without
    /// `overwrite` or an unsupported notebook version.
    #[error("caching error: {0}")]
    Caching(String),

    /// Metadata and on-disk state disagree, e.g. a fingerprint present in the
    /// database whose directory is missing.
    #[error("retrieval error: {0}")]
    Retrieval(String),

    #[error(transparent)]
    Validity(#[from] NbValidityError),

    #[error(transparent)]
    Read(#[from] NbReadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<CanonicalError> for CacheError {
    fn from(err: CanonicalError) -> Self {
        CacheError::Caching(err.to_string())
    }
}

impl CacheError {
    /// Whether this is a "not found" failure (pk, uri or fingerprint).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CacheError::Store(StoreError::CacheNotFound(_) | StoreError::ProjectNotFound(_))
        )
    }
}
