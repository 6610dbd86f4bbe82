//! Project registry: the list of notebooks slated for execution.
//!
//! A thin facade over the metadata store's `nbproject` table, plus the
//! reader indirection that turns a registered URI back into a notebook tree.

use crate::engine::NotebookCache;
use crate::error::CacheError;
use nbcache_db::{CacheRecord, ProjectRecord, StoreError};
use nbcache_notebook::{canonicalize, get_reader, NbReadError, Notebook, ReadRecipe};
use std::io;
use std::path::{Path, PathBuf};

/// A notebook read from the project.
#[derive(Clone, Debug)]
pub struct ProjectNb {
    pub pk: i64,
    pub uri: String,
    pub nb: Notebook,
    /// File paths required to run the notebook, as registered.
    pub assets: Vec<String>,
}

/// A project notebook reference: by primary key or by URI.
#[derive(Clone, Copy, Debug)]
pub enum NbRef<'a> {
    Pk(i64),
    Uri(&'a str),
}

impl From<i64> for NbRef<'_> {
    fn from(pk: i64) -> Self {
        NbRef::Pk(pk)
    }
}

impl<'a> From<&'a str> for NbRef<'a> {
    fn from(uri: &'a str) -> Self {
        NbRef::Uri(uri)
    }
}

impl NotebookCache {
    /// Add a notebook to the project. Idempotent on the URI: when the URI is
    /// already registered, the existing record is returned.
    ///
    /// The recipe's reader must be registered, and every asset must resolve
    /// under the notebook's folder.
    pub fn add_notebook(
        &self,
        uri: impl AsRef<Path>,
        recipe: &ReadRecipe,
        assets: &[String],
    ) -> Result<ProjectRecord, CacheError> {
        if get_reader(&recipe.name).is_none() {
            return Err(NbReadError::UnknownReader(recipe.name.clone()).into());
        }
        let uri = absolutize(uri.as_ref())?;
        let recipe_value = serde_json::to_value(recipe)?;
        Ok(self.db()?.create_project(
            &uri.display().to_string(),
            &recipe_value,
            assets,
            false,
        )?)
    }

    /// Remove a notebook from the project.
    pub fn remove_notebook(&self, nb: NbRef<'_>) -> Result<(), CacheError> {
        let db = self.db()?;
        match nb {
            NbRef::Pk(pk) => db.remove_projects_by_pks(&[pk])?,
            NbRef::Uri(uri) => db.remove_projects_by_uris(&[uri.to_string()])?,
        }
        Ok(())
    }

    pub fn project_record(&self, nb: NbRef<'_>) -> Result<ProjectRecord, CacheError> {
        let db = self.db()?;
        Ok(match nb {
            NbRef::Pk(pk) => db.project_by_pk(pk)?,
            NbRef::Uri(uri) => db.project_by_uri(uri)?,
        })
    }

    /// All project records ordered by primary key, optionally filtered.
    ///
    /// When both filters are given, a record is kept if it matches either
    /// one, so mixed pk/uri selections address the union.
    pub fn project_records(
        &self,
        filter_uris: Option<&[String]>,
        filter_pks: Option<&[i64]>,
    ) -> Result<Vec<ProjectRecord>, CacheError> {
        let mut records = self.db()?.projects_all()?;
        match (filter_uris, filter_pks) {
            (None, None) => {}
            (Some(uris), None) => records.retain(|record| uris.contains(&record.uri)),
            (None, Some(pks)) => records.retain(|record| pks.contains(&record.pk)),
            (Some(uris), Some(pks)) => records
                .retain(|record| uris.contains(&record.uri) || pks.contains(&record.pk)),
        }
        Ok(records)
    }

    /// Read a project notebook via the reader named in its read recipe.
    pub fn project_notebook(&self, nb: NbRef<'_>) -> Result<ProjectNb, CacheError> {
        let record = self.project_record(nb)?;
        let path = Path::new(&record.uri);
        if !path.exists() {
            return Err(NbReadError::Io {
                uri: record.uri.clone(),
                source: io::Error::new(
                    io::ErrorKind::NotFound,
                    "the URI of the project record no longer exists",
                ),
            }
            .into());
        }
        let reader_name = record
            .reader_name()
            .ok_or_else(|| NbReadError::UnknownReader(String::new()))?;
        let reader = get_reader(reader_name)
            .ok_or_else(|| NbReadError::UnknownReader(reader_name.to_string()))?;
        let notebook = reader(path)?;
        Ok(ProjectNb {
            pk: record.pk,
            uri: record.uri,
            nb: notebook,
            assets: record.assets,
        })
    }

    /// Record (or clear, with `None`) the traceback of a failed execution on
    /// a project record.
    pub fn set_traceback(&self, uri: &str, traceback: Option<&str>) -> Result<(), CacheError> {
        Ok(self.db()?.set_traceback(uri, traceback)?)
    }

    pub fn clear_tracebacks(&self, pks: &[i64]) -> Result<(), CacheError> {
        Ok(self.db()?.clear_tracebacks(pks)?)
    }

    /// The cache record matching a project notebook's current content, if
    /// any.
    pub fn cached_for_notebook(&self, nb: NbRef<'_>) -> Result<Option<CacheRecord>, CacheError> {
        let project_nb = self.project_notebook(nb)?;
        let (_, fingerprint) = canonicalize(&project_nb.nb)?;
        match self.db()?.cache_by_fingerprint(fingerprint.as_str()) {
            Ok(record) => Ok(Some(record)),
            Err(StoreError::CacheNotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Project records whose current fingerprint has no cache record.
    pub fn list_unexecuted(
        &self,
        filter_uris: Option<&[String]>,
        filter_pks: Option<&[i64]>,
    ) -> Result<Vec<ProjectRecord>, CacheError> {
        let mut unexecuted = Vec::new();
        for record in self.project_records(filter_uris, filter_pks)? {
            if self.cached_for_notebook(NbRef::Pk(record.pk))?.is_none() {
                unexecuted.push(record);
            }
        }
        Ok(unexecuted)
    }
}

fn absolutize(path: &Path) -> Result<PathBuf, CacheError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
