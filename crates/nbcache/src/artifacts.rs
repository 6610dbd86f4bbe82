use crate::error::CacheError;
use crate::paths;
use crate::util::atomic_write;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A set of files belonging to a notebook, addressed relative to a folder.
///
/// Used both for artifacts produced by an execution (relative to the
/// notebook's folder or a sandbox directory) and for files read back out of
/// the cache (relative to the cached `artifacts/` directory).
#[derive(Clone, Debug)]
pub struct ArtifactBundle {
    folder: PathBuf,
    paths: Vec<PathBuf>,
}

impl ArtifactBundle {
    /// Build a bundle from explicit paths, all of which must live under
    /// `in_folder` (or a subfolder). Relative paths are resolved against it.
    pub fn new(
        paths: impl IntoIterator<Item = PathBuf>,
        in_folder: impl Into<PathBuf>,
        check_existence: bool,
    ) -> Result<Self, CacheError> {
        let folder = in_folder.into();
        let mut resolved = Vec::new();
        for path in paths {
            let absolute = if path.is_absolute() {
                path
            } else {
                folder.join(path)
            };
            if absolute.strip_prefix(&folder).is_err() {
                return Err(CacheError::Caching(format!(
                    "artifact path {} is not in folder {}",
                    absolute.display(),
                    folder.display()
                )));
            }
            if check_existence && !absolute.is_file() {
                return Err(CacheError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("artifact path is not a file: {}", absolute.display()),
                )));
            }
            resolved.push(absolute);
        }
        Ok(Self {
            folder,
            paths: resolved,
        })
    }

    /// Bundle every file found under `folder`. Missing folders give an empty
    /// bundle.
    pub fn from_dir(folder: impl Into<PathBuf>) -> Self {
        let folder = folder.into();
        let mut paths = Vec::new();
        if folder.is_dir() {
            for entry in walkdir::WalkDir::new(&folder)
                .follow_links(false)
                .sort_by_file_name()
            {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        tracing::debug!(
                            target = "nbcache.store",
                            folder = %folder.display(),
                            error = %err,
                            "skipping unreadable artifact entry"
                        );
                        continue;
                    }
                };
                if entry.file_type().is_file() {
                    paths.push(entry.into_path());
                }
            }
        }
        Self { folder, paths }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Paths relative to the bundle folder.
    pub fn relative_paths(&self) -> Vec<PathBuf> {
        self.iter().map(|(rel, _)| rel).collect()
    }

    /// Yield `(relative path, absolute path)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (PathBuf, &Path)> {
        self.paths.iter().filter_map(|path| {
            let rel = path.strip_prefix(&self.folder).ok()?;
            Some((rel.to_path_buf(), path.as_path()))
        })
    }
}

/// Write the canonical notebook text for a fingerprint, atomically, UTF-8.
pub(crate) fn write_notebook(root: &Path, fingerprint: &str, text: &str) -> Result<(), CacheError> {
    atomic_write(&paths::notebook_path(root, fingerprint), text.as_bytes())?;
    Ok(())
}

/// Mirror an artifact bundle under `executed/<fp>/artifacts/`.
///
/// Any existing artifact directory is removed first, so the tree always
/// reflects exactly one execution.
pub(crate) fn write_artifacts(
    root: &Path,
    fingerprint: &str,
    bundle: Option<&ArtifactBundle>,
) -> Result<(), CacheError> {
    let dir = paths::artifact_dir(root, fingerprint);
    if dir.exists() {
        fs::remove_dir_all(&dir)?;
    }
    let Some(bundle) = bundle else {
        return Ok(());
    };
    for (rel, source) in bundle.iter() {
        let dest = dir.join(&rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, &dest)?;
    }
    Ok(())
}

/// Delete the entire `executed/<fp>` directory.
pub(crate) fn remove_record_dir(root: &Path, fingerprint: &str) -> Result<(), CacheError> {
    fs::remove_dir_all(paths::record_dir(root, fingerprint))?;
    Ok(())
}

/// Delete the cache root recursively.
pub(crate) fn clear_all(root: &Path) -> Result<(), CacheError> {
    if root.exists() {
        fs::remove_dir_all(root)?;
    }
    Ok(())
}
