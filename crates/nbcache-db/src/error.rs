use std::path::PathBuf;

/// Errors produced by the metadata store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("project record not found for {0}")]
    ProjectNotFound(String),

    #[error("cache record not found for {0}")]
    CacheNotFound(String),

    #[error("URI already in project: {0}")]
    UriExists(String),

    #[error("fingerprint already in cache: {0}")]
    FingerprintExists(String),

    #[error("read recipe must be a mapping with a non-empty \"name\"")]
    InvalidReadRecipe,

    #[error("asset {asset:?} is not in folder {folder}")]
    AssetOutsideFolder { asset: String, folder: PathBuf },

    #[error("failed to encode record field: {0}")]
    Encode(#[from] serde_json::Error),

    /// The database is corrupted or unreachable; clearing the cache root
    /// recreates it from scratch.
    #[error("unexpected error accessing the cache database (it may need to be cleared): {0}")]
    Unavailable(#[source] rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err)
    }
}
