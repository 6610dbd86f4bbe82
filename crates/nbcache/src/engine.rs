use crate::artifacts::{self, ArtifactBundle};
use crate::diff::{self, CacheDiff};
use crate::error::CacheError;
use crate::paths;
use crate::util::atomic_write;
use nbcache_db::{CacheRecord, Database, StoreError};
use nbcache_notebook::{
    canonicalize, read_ipynb, upgrade, validate_executed, Cell, Notebook,
};
use serde_json::Value;
use std::cell::OnceCell;
use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Settings key holding the maximum number of cached notebooks.
pub const CACHE_LIMIT_KEY: &str = "cache_limit";

/// Cache limit applied when no setting is stored.
pub const DEFAULT_CACHE_LIMIT: i64 = 1000;

/// Schema version written to `__version__.txt` on first initialization.
pub const SCHEMA_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Notebook-level metadata keys merged from the cache by default.
pub const DEFAULT_MERGE_NB_METADATA: &[&str] = &["kernelspec", "language_info", "widgets"];

/// A notebook and its associated data, ready to be cached.
#[derive(Clone, Debug)]
pub struct CacheBundle {
    pub nb: Notebook,
    /// The origin URI of the notebook.
    pub uri: String,
    /// Artifacts created during the notebook execution.
    pub artifacts: Option<ArtifactBundle>,
    /// Additional data related to the execution, e.g. its duration.
    pub data: Value,
    /// The traceback, if the execution excepted. Bookkeeping for the
    /// executor; not persisted on the cache record.
    pub traceback: Option<String>,
}

impl CacheBundle {
    pub fn new(nb: Notebook, uri: impl Into<String>) -> Self {
        Self {
            nb,
            uri: uri.into(),
            artifacts: None,
            data: Value::Object(serde_json::Map::new()),
            traceback: None,
        }
    }
}

/// A cached notebook read back out of the store.
#[derive(Clone, Debug)]
pub struct CacheBundleOut {
    pub nb: Notebook,
    pub record: CacheRecord,
    pub artifacts: ArtifactBundle,
}

/// Options for [`NotebookCache::ingest`].
#[derive(Clone, Debug)]
pub struct IngestOptions {
    /// Assert that execution counts are consecutive and start at 1.
    pub check_validity: bool,
    /// Allow overwrite of a cached notebook with a matching fingerprint.
    pub overwrite: bool,
    pub description: String,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            check_validity: true,
            overwrite: false,
            description: String::new(),
        }
    }
}

/// Handle to a notebook cache rooted at a directory.
///
/// The handle is a lightweight value: the root path plus a lazily opened
/// database connection. Cloning produces a handle with no open connection,
/// so clones can be moved to worker threads which reopen the database
/// themselves.
pub struct NotebookCache {
    root: PathBuf,
    db: OnceCell<Database>,
}

impl Clone for NotebookCache {
    fn clone(&self) -> Self {
        Self::new(self.root.clone())
    }
}

impl fmt::Debug for NotebookCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotebookCache")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl NotebookCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            db: OnceCell::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open the metadata database, initializing the cache root on first
    /// access: the directory is created, the schema written, and
    /// `__version__.txt` stamped with the current schema version.
    pub(crate) fn db(&self) -> Result<&Database, CacheError> {
        if let Some(db) = self.db.get() {
            return Ok(db);
        }
        fs::create_dir_all(&self.root)?;
        let version_file = paths::version_file(&self.root);
        if !version_file.exists() {
            atomic_write(&version_file, SCHEMA_VERSION.as_bytes())?;
        }
        let db = Database::open(&self.root)?;
        Ok(self.db.get_or_init(|| db))
    }

    /// The schema version of the cache, if it has been initialized.
    pub fn version(&self) -> Option<String> {
        let text = fs::read_to_string(paths::version_file(&self.root)).ok()?;
        Some(text.trim().to_string())
    }

    /// Clear the cache completely, removing the root directory.
    pub fn clear(&mut self) -> Result<(), CacheError> {
        artifacts::clear_all(&self.root)?;
        self.db = OnceCell::new();
        Ok(())
    }

    pub fn cache_limit(&self) -> Result<i64, CacheError> {
        let value = self.db()?.get_setting(CACHE_LIMIT_KEY)?;
        Ok(value
            .as_ref()
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_CACHE_LIMIT))
    }

    pub fn set_cache_limit(&self, limit: i64) -> Result<(), CacheError> {
        if limit <= 0 {
            return Err(CacheError::Caching(format!(
                "cache limit must be a positive integer, got {limit}"
            )));
        }
        self.db()?.set_setting(CACHE_LIMIT_KEY, &Value::from(limit))?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<Value>, CacheError> {
        Ok(self.db()?.get_setting(key)?)
    }

    pub fn set_setting(&self, key: &str, value: &Value) -> Result<(), CacheError> {
        Ok(self.db()?.set_setting(key, value)?)
    }

    // -- ingest -----------------------------------------------------------

    /// Commit an executed notebook, returning its cache record.
    ///
    /// Non-code source text (e.g. markdown) is not stored in the cache.
    /// Errors raised before the record is created leave the store untouched;
    /// later errors may leave a partial on-disk state which a re-ingest with
    /// `overwrite = true` repairs.
    pub fn ingest(
        &self,
        bundle: CacheBundle,
        options: IngestOptions,
    ) -> Result<CacheRecord, CacheError> {
        if options.check_validity {
            validate_executed(&bundle.nb, &bundle.uri)?;
        }

        let (canonical_nb, fingerprint) = canonicalize(&bundle.nb)?;
        let fingerprint = fingerprint.as_str();

        if paths::notebook_path(&self.root, fingerprint).exists() {
            if !options.overwrite {
                return Err(CacheError::Caching(
                    "notebook already exists in cache and overwrite=false".to_string(),
                ));
            }
            artifacts::remove_record_dir(&self.root, fingerprint)?;
        }

        let db = self.db()?;
        match db.cache_by_fingerprint(fingerprint) {
            Ok(stale) => db.remove_caches(&[stale.pk])?,
            Err(StoreError::CacheNotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let record = db.create_cache(
            &bundle.uri,
            fingerprint,
            &bundle.data,
            &options.description,
        )?;

        artifacts::write_notebook(&self.root, fingerprint, &canonical_nb.to_json_pretty()?)?;
        artifacts::write_artifacts(&self.root, fingerprint, bundle.artifacts.as_ref())?;

        tracing::debug!(
            target = "nbcache.engine",
            pk = record.pk,
            fingerprint,
            uri = %bundle.uri,
            "cached notebook"
        );

        self.truncate()?;
        Ok(record)
    }

    /// Commit an executed notebook file via the standard reader.
    ///
    /// `artifact_paths` must be in the same folder as the notebook (or a
    /// subfolder); `uri` defaults to the path itself.
    pub fn ingest_file(
        &self,
        path: impl AsRef<Path>,
        uri: Option<&str>,
        artifact_paths: Vec<PathBuf>,
        data: Value,
        options: IngestOptions,
    ) -> Result<CacheRecord, CacheError> {
        let path = path.as_ref();
        let nb = read_ipynb(path)?;
        let folder = path.parent().unwrap_or(Path::new("")).to_path_buf();
        let mut bundle = CacheBundle::new(
            nb,
            uri.map(str::to_string)
                .unwrap_or_else(|| path.display().to_string()),
        );
        bundle.artifacts = Some(ArtifactBundle::new(artifact_paths, folder, true)?);
        bundle.data = data;
        self.ingest(bundle, options)
    }

    // -- lookup / retrieval -----------------------------------------------

    /// Match a notebook to a cached record by fingerprint.
    pub fn lookup(&self, nb: &Notebook) -> Result<CacheRecord, CacheError> {
        let (_, fingerprint) = canonicalize(nb)?;
        Ok(self.db()?.cache_by_fingerprint(fingerprint.as_str())?)
    }

    pub fn lookup_file(&self, path: impl AsRef<Path>) -> Result<CacheRecord, CacheError> {
        self.lookup(&read_ipynb(path.as_ref())?)
    }

    pub fn cache_record(&self, pk: i64) -> Result<CacheRecord, CacheError> {
        Ok(self.db()?.cache_by_pk(pk)?)
    }

    pub fn cache_records(&self) -> Result<Vec<CacheRecord>, CacheError> {
        Ok(self.db()?.caches_all()?)
    }

    /// Fetch a cached notebook bundle by primary key, touching its
    /// last-accessed time.
    pub fn retrieve(&self, pk: i64) -> Result<CacheBundleOut, CacheError> {
        let db = self.db()?;
        let record = db.cache_by_pk(pk)?;
        db.touch(pk)?;

        let nb_path = paths::notebook_path(&self.root, &record.fingerprint);
        if !nb_path.exists() {
            return Err(CacheError::Retrieval(format!(
                "notebook file does not exist for cache record pk {pk}"
            )));
        }
        let nb = Notebook::from_json_str(&fs::read_to_string(&nb_path)?)?;
        let artifacts = ArtifactBundle::from_dir(paths::artifact_dir(&self.root, &record.fingerprint));
        Ok(CacheBundleOut {
            nb,
            record,
            artifacts,
        })
    }

    /// The artifact directory of a cached notebook, for read/copy use.
    pub fn artifact_dir(&self, pk: i64) -> Result<PathBuf, CacheError> {
        let record = self.db()?.cache_by_pk(pk)?;
        Ok(paths::artifact_dir(&self.root, &record.fingerprint))
    }

    // -- merge / diff -----------------------------------------------------

    /// Match a notebook against the cache and return a merged version: the
    /// input's code cells are replaced, in order, by the cached executed
    /// cells, and selected notebook metadata is copied over.
    ///
    /// `nb_meta` / `cell_meta` restrict which metadata keys are taken from
    /// the cache (`None` means all). Input cell ids are preserved where the
    /// format carries them.
    pub fn merge(
        &self,
        nb: &Notebook,
        nb_meta: Option<&[&str]>,
        cell_meta: Option<&[&str]>,
    ) -> Result<(i64, Notebook), CacheError> {
        let pk = self.lookup(nb)?.pk;
        let cached = self.retrieve(pk)?.nb;

        let mut merged = upgrade(nb).map_err(CacheError::from)?;
        match nb_meta {
            None => merged.metadata = cached.metadata.clone(),
            Some(keys) => {
                for key in keys {
                    if let Some(value) = cached.metadata.get(*key) {
                        merged.metadata.insert((*key).to_string(), value.clone());
                    }
                }
            }
        }

        let mut cached_cells: VecDeque<Cell> = cached.cells.into_iter().collect();
        for cell in merged.cells.iter_mut() {
            let Cell::Code(input) = cell else {
                continue;
            };
            let Some(Cell::Code(mut executed)) = cached_cells.pop_front() else {
                break;
            };
            if let Some(keys) = cell_meta {
                let mut metadata = input.metadata.clone();
                for key in keys {
                    if let Some(value) = executed.metadata.get(*key) {
                        metadata.insert((*key).to_string(), value.clone());
                    }
                }
                executed.metadata = metadata;
            }
            executed.id = if merged.nbformat_minor >= 5 {
                input.id.clone()
            } else {
                None
            };
            *cell = Cell::Code(executed);
        }

        Ok((pk, merged))
    }

    pub fn merge_file(
        &self,
        path: impl AsRef<Path>,
        nb_meta: Option<&[&str]>,
        cell_meta: Option<&[&str]>,
    ) -> Result<(i64, Notebook), CacheError> {
        self.merge(&read_ipynb(path.as_ref())?, nb_meta, cell_meta)
    }

    /// Structurally diff a notebook against a cached one.
    ///
    /// Non-code content is absent from the cache and is not diffed.
    pub fn diff(&self, pk: i64, nb: &Notebook, uri: &str) -> Result<CacheDiff, CacheError> {
        let cached = self.retrieve(pk)?.nb;
        let (other, _) = canonicalize(nb)?;
        Ok(diff::diff_notebooks(pk, uri, &cached, &other))
    }

    pub fn diff_file(&self, pk: i64, path: impl AsRef<Path>) -> Result<CacheDiff, CacheError> {
        let path = path.as_ref();
        self.diff(pk, &read_ipynb(path)?, &path.display().to_string())
    }

    // -- eviction ---------------------------------------------------------

    /// Remove a cached notebook: its on-disk directory and metadata record.
    pub fn evict(&self, pk: i64) -> Result<(), CacheError> {
        let db = self.db()?;
        let record = db.cache_by_pk(pk)?;
        if !paths::notebook_path(&self.root, &record.fingerprint).exists() {
            return Err(CacheError::Retrieval(format!(
                "notebook file does not exist for cache record pk {pk}"
            )));
        }
        artifacts::remove_record_dir(&self.root, &record.fingerprint)?;
        db.remove_caches(&[pk])?;
        Ok(())
    }

    /// Delete the oldest cached notebooks beyond the cache limit. Idempotent.
    pub fn truncate(&self) -> Result<(), CacheError> {
        let limit = self.cache_limit()?;
        let db = self.db()?;
        for pk in db.evictable_pks(limit)? {
            let record = db.cache_by_pk(pk)?;
            if let Err(err) = artifacts::remove_record_dir(&self.root, &record.fingerprint) {
                // An orphaned record (e.g. after a crash mid-ingest) should
                // still be evictable.
                tracing::debug!(
                    target = "nbcache.engine",
                    pk,
                    fingerprint = %record.fingerprint,
                    error = %err,
                    "evicting record whose directory could not be removed"
                );
            }
            db.remove_caches(&[pk])?;
            tracing::debug!(
                target = "nbcache.engine",
                pk,
                fingerprint = %record.fingerprint,
                "evicted cached notebook beyond cache limit"
            );
        }
        Ok(())
    }
}
