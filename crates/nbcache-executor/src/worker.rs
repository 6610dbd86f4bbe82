use crate::coordinator::WorkingDir;
use crate::driver::CellExecutor;
use nbcache::{ArtifactBundle, CacheBundle, CacheError, IngestOptions, NbRef, NotebookCache, ProjectNb};
use nbcache_notebook::Notebook;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Terminal state of a single notebook execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Succeeded,
    /// A cell-level failure: the traceback is stored on the project record
    /// and the notebook is not cached.
    Excepted,
    /// An infrastructure or IO failure; no traceback is stored.
    Errored,
}

/// Run one notebook through load -> execute -> ingest.
///
/// Every failure is downgraded to an [`Outcome`]; this function never
/// propagates an error to the coordinator.
pub(crate) fn execute_single(
    cache: &NotebookCache,
    driver: &dyn CellExecutor,
    pk: i64,
    uri: &str,
    working_dir: WorkingDir,
    timeout: Option<Duration>,
    allow_errors: bool,
) -> Outcome {
    let project_nb = match cache.project_notebook(NbRef::Pk(pk)) {
        Ok(project_nb) => project_nb,
        Err(err) => {
            tracing::error!(
                target = "nbcache.executor",
                uri,
                error = %err,
                "failed retrieving notebook"
            );
            return Outcome::Errored;
        }
    };

    tracing::info!(target = "nbcache.executor", uri, "executing notebook");
    let sandbox = match working_dir {
        WorkingDir::InPlace => None,
        WorkingDir::Sandboxed => match Sandbox::create(&project_nb) {
            Ok(sandbox) => Some(sandbox),
            Err(err) => {
                tracing::error!(
                    target = "nbcache.executor",
                    uri,
                    error = %err,
                    "failed preparing sandbox directory"
                );
                return Outcome::Errored;
            }
        },
    };
    let cwd = match &sandbox {
        Some(sandbox) => sandbox.dir.path().to_path_buf(),
        None => Path::new(&project_nb.uri)
            .parent()
            .unwrap_or(Path::new("."))
            .to_path_buf(),
    };

    let mut nb = project_nb.nb.clone();
    let (timeout, allow_errors) = apply_metadata_overrides(&nb, timeout, allow_errors);

    let started = Instant::now();
    let executed = driver.execute(&mut nb, &cwd, timeout, allow_errors, false);
    let duration = started.elapsed();

    if let Err(exec_err) = executed {
        tracing::warn!(
            target = "nbcache.executor",
            uri,
            error = %exec_err,
            "execution excepted"
        );
        if let Err(err) = cache.set_traceback(&project_nb.uri, Some(&exec_err.traceback())) {
            tracing::error!(
                target = "nbcache.executor",
                uri,
                error = %err,
                "failed recording traceback"
            );
            return Outcome::Errored;
        }
        return Outcome::Excepted;
    }

    tracing::info!(
        target = "nbcache.executor",
        uri,
        seconds = duration.as_secs_f64(),
        "execution successful"
    );

    let artifacts = match &sandbox {
        Some(sandbox) => match sandbox.new_files() {
            Ok(bundle) => Some(bundle),
            Err(err) => {
                tracing::error!(
                    target = "nbcache.executor",
                    uri,
                    error = %err,
                    "failed collecting artifacts"
                );
                return Outcome::Errored;
            }
        },
        None => None,
    };

    let mut bundle = CacheBundle::new(nb, project_nb.uri.clone());
    bundle.artifacts = artifacts;
    bundle.data = json!({"execution_seconds": duration.as_secs_f64()});
    let options = IngestOptions {
        check_validity: false,
        overwrite: true,
        ..IngestOptions::default()
    };
    if let Err(err) = cache.ingest(bundle, options) {
        tracing::error!(
            target = "nbcache.executor",
            uri,
            error = %err,
            "failed caching executed notebook"
        );
        return Outcome::Errored;
    }

    Outcome::Succeeded
}

/// Apply a notebook's own `metadata.execution.{timeout, allow_errors}`.
fn apply_metadata_overrides(
    nb: &Notebook,
    timeout: Option<Duration>,
    allow_errors: bool,
) -> (Option<Duration>, bool) {
    let Some(execution) = nb.metadata.get("execution") else {
        return (timeout, allow_errors);
    };
    let timeout = match execution.get("timeout").and_then(serde_json::Value::as_i64) {
        Some(secs) if secs > 0 => Some(Duration::from_secs(secs as u64)),
        Some(_) => None,
        None => timeout,
    };
    let allow_errors = execution
        .get("allow_errors")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(allow_errors);
    (timeout, allow_errors)
}

/// A temporary execution directory with the notebook's assets copied in.
///
/// The directory is removed on drop, on every exit path.
struct Sandbox {
    dir: tempfile::TempDir,
    /// Relative paths of the copied assets, for artifact filtering.
    asset_paths: BTreeSet<PathBuf>,
}

impl Sandbox {
    fn create(project_nb: &ProjectNb) -> Result<Self, CacheError> {
        let dir = tempfile::tempdir()?;
        let folder = Path::new(&project_nb.uri)
            .parent()
            .unwrap_or(Path::new(""))
            .to_path_buf();

        let mut asset_paths = BTreeSet::new();
        for asset in &project_nb.assets {
            let path = Path::new(asset);
            let source = if path.is_absolute() {
                path.to_path_buf()
            } else {
                folder.join(path)
            };
            let rel = source
                .strip_prefix(&folder)
                .map_err(|_| {
                    CacheError::Caching(format!(
                        "asset {} is not in folder {}",
                        source.display(),
                        folder.display()
                    ))
                })?
                .to_path_buf();
            let dest = dir.path().join(&rel);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&source, &dest)?;
            asset_paths.insert(rel);
        }

        Ok(Self { dir, asset_paths })
    }

    /// Files present in the sandbox that were not copied in as assets.
    fn new_files(&self) -> Result<ArtifactBundle, CacheError> {
        let all = ArtifactBundle::from_dir(self.dir.path());
        let new_paths: Vec<PathBuf> = all
            .relative_paths()
            .into_iter()
            .filter(|rel| !self.asset_paths.contains(rel))
            .collect();
        ArtifactBundle::new(new_paths, self.dir.path().to_path_buf(), false)
    }
}
