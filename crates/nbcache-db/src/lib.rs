//! Persistent metadata store for the notebook cache.
//!
//! A single-file SQLite database (`global.db` under the cache root) with
//! three tables: `settings`, `nbproject` and `nbcache`. Every public
//! operation is a single transaction; concurrent access from multiple
//! worker threads or processes is serialized by SQLite itself.

mod error;
mod records;
mod store;

pub use error::StoreError;
pub use records::{validate_assets, validate_read_recipe, CacheRecord, ProjectRecord};
pub use store::{Database, DB_NAME};

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch.
///
/// A clock set before 1970 degrades to 0 rather than failing record writes.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
