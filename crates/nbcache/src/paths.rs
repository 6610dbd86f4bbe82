use std::path::{Path, PathBuf};

/// Environment variable overriding the default cache root.
pub const CACHE_ROOT_ENV: &str = "JUPYTERCACHE";

/// Directory name used for the cache root when no override is set.
pub const DEFAULT_CACHE_DIR_NAME: &str = ".jupyter_cache";

pub(crate) const VERSION_FILE: &str = "__version__.txt";
pub(crate) const EXECUTED_DIR: &str = "executed";
pub(crate) const NOTEBOOK_FILE: &str = "base.ipynb";
pub(crate) const ARTIFACTS_DIR: &str = "artifacts";

/// The default cache root: `$JUPYTERCACHE` if set, else `<cwd>/.jupyter_cache`.
pub fn default_cache_root() -> std::io::Result<PathBuf> {
    if let Some(root) = std::env::var_os(CACHE_ROOT_ENV) {
        return Ok(PathBuf::from(root));
    }
    Ok(std::env::current_dir()?.join(DEFAULT_CACHE_DIR_NAME))
}

/// `cache_root/executed/<fingerprint>/`
pub(crate) fn record_dir(root: &Path, fingerprint: &str) -> PathBuf {
    root.join(EXECUTED_DIR).join(fingerprint)
}

/// `cache_root/executed/<fingerprint>/base.ipynb`
pub(crate) fn notebook_path(root: &Path, fingerprint: &str) -> PathBuf {
    record_dir(root, fingerprint).join(NOTEBOOK_FILE)
}

/// `cache_root/executed/<fingerprint>/artifacts/`
pub(crate) fn artifact_dir(root: &Path, fingerprint: &str) -> PathBuf {
    record_dir(root, fingerprint).join(ARTIFACTS_DIR)
}

pub(crate) fn version_file(root: &Path) -> PathBuf {
    root.join(VERSION_FILE)
}
