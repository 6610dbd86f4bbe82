use crate::error::StoreError;
use serde::Serialize;
use serde_json::Value;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// A record of an executed, cached notebook.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CacheRecord {
    pub pk: i64,
    /// MD5 hex digest of the canonical notebook projection. Unique.
    pub fingerprint: String,
    /// URI the notebook was cached from; informational only.
    pub uri: String,
    pub description: String,
    /// Extra execution data, such as the wall-clock duration.
    pub data: Value,
    /// Creation time, milliseconds since the unix epoch.
    pub created: i64,
    /// Last retrieval time, milliseconds since the unix epoch.
    pub accessed: i64,
}

/// A record of a notebook registered in the project.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectRecord {
    pub pk: i64,
    /// Absolute path of the notebook file. Unique.
    pub uri: String,
    /// How to read the URI into a notebook tree; a mapping with a `name` key
    /// identifying the reader.
    pub read_recipe: Value,
    /// Files required for the notebook to run, within the URI's folder.
    pub assets: Vec<String>,
    /// Data on how to execute the notebook.
    pub exec_data: Option<Value>,
    pub created: i64,
    /// Set when the last execution of the notebook excepted.
    pub traceback: Option<String>,
}

impl ProjectRecord {
    /// The reader name from the read recipe, if present.
    pub fn reader_name(&self) -> Option<&str> {
        self.read_recipe.get("name").and_then(Value::as_str)
    }
}

/// Check that a read recipe is a mapping with a non-empty `name`.
pub fn validate_read_recipe(recipe: &Value) -> Result<(), StoreError> {
    match recipe.get("name").and_then(Value::as_str) {
        Some(name) if !name.is_empty() => Ok(()),
        _ => Err(StoreError::InvalidReadRecipe),
    }
}

/// Check that every asset path resolves under the folder of `uri`.
///
/// Relative asset paths are resolved against the folder; the containment
/// check is lexical (`..` segments are collapsed without touching the
/// filesystem), so assets need not exist yet at registration time.
pub fn validate_assets(uri: &str, assets: &[String]) -> Result<(), StoreError> {
    let folder = Path::new(uri).parent().unwrap_or(Path::new(""));
    let folder_normalized = normalize_logical_path(folder);
    for asset in assets {
        let path = Path::new(asset);
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            folder.join(path)
        };
        if !normalize_logical_path(&absolute).starts_with(&folder_normalized) {
            return Err(StoreError::AssetOutsideFolder {
                asset: asset.clone(),
                folder: folder.to_path_buf(),
            });
        }
    }
    Ok(())
}

/// Collapse `.` and `..` segments without consulting the filesystem.
fn normalize_logical_path(path: &Path) -> PathBuf {
    let mut has_root = false;
    let mut stack: Vec<OsString> = Vec::new();

    for component in path.components() {
        match component {
            Component::Prefix(prefix) => stack.push(prefix.as_os_str().to_owned()),
            Component::RootDir => has_root = true,
            Component::CurDir => {}
            Component::ParentDir => {
                if stack.last().is_some_and(|last| last != "..") {
                    stack.pop();
                } else if !has_root {
                    stack.push(OsString::from(".."));
                }
            }
            Component::Normal(segment) => stack.push(segment.to_owned()),
        }
    }

    let mut out = PathBuf::new();
    if has_root {
        out.push(std::path::MAIN_SEPARATOR.to_string());
    }
    out.extend(stack);
    out
}
