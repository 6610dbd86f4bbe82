//! Content-addressed cache for executed notebooks.
//!
//! The cache pairs a metadata database (`nbcache-db`) with an on-disk
//! artifact tree keyed by notebook fingerprint:
//!
//! ```text
//! cache_root/
//!   __version__.txt
//!   global.db
//!   executed/
//!     <fingerprint>/
//!       base.ipynb
//!       artifacts/...
//! ```
//!
//! [`NotebookCache`] owns both stores jointly and is the only mutator of
//! either. Handles are cheap to clone and lazily reopen the database, so a
//! clone can be handed to a worker thread.

mod artifacts;
mod diff;
mod engine;
mod error;
mod paths;
mod registry;
mod util;

pub use artifacts::ArtifactBundle;
pub use diff::{CacheDiff, CellChange, MetadataChange};
pub use engine::{
    CacheBundle, CacheBundleOut, IngestOptions, NotebookCache, CACHE_LIMIT_KEY,
    DEFAULT_CACHE_LIMIT, DEFAULT_MERGE_NB_METADATA, SCHEMA_VERSION,
};
pub use error::CacheError;
pub use paths::{default_cache_root, CACHE_ROOT_ENV, DEFAULT_CACHE_DIR_NAME};
pub use registry::{NbRef, ProjectNb};
pub use util::atomic_write;

pub use nbcache_db::{CacheRecord, ProjectRecord, StoreError};
