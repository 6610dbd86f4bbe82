use nbcache_notebook::{Cell, Notebook};
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write as _;

/// A structural diff of a notebook against a cached one.
///
/// Only content that the cache stores is compared: projected notebook
/// metadata and code cells.
#[derive(Clone, Debug, Serialize)]
pub struct CacheDiff {
    /// Primary key of the cached notebook.
    pub pk: i64,
    /// URI of the other notebook.
    pub uri: String,
    pub metadata: Vec<MetadataChange>,
    pub cells: Vec<CellChange>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetadataChange {
    pub key: String,
    pub cached: Option<Value>,
    pub other: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CellChange {
    /// The code cell at this position differs in source.
    Changed {
        index: usize,
        cached_source: String,
        other_source: String,
    },
    /// A code cell present only in the other notebook.
    Added { index: usize, source: String },
    /// A code cell present only in the cached notebook.
    Removed { index: usize, source: String },
}

impl CacheDiff {
    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty() && self.cells.is_empty()
    }

    /// A plain-text rendering for terminal output.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "nbdiff");
        let _ = writeln!(out, "--- cached pk={}", self.pk);
        let _ = writeln!(out, "+++ other: {}", self.uri);
        if self.is_empty() {
            let _ = writeln!(out, "(no differences)");
            return out;
        }
        for change in &self.metadata {
            let _ = writeln!(out, "## modified metadata key {:?}", change.key);
            if let Some(cached) = &change.cached {
                let _ = writeln!(out, "-  {cached}");
            }
            if let Some(other) = &change.other {
                let _ = writeln!(out, "+  {other}");
            }
        }
        for change in &self.cells {
            match change {
                CellChange::Changed {
                    index,
                    cached_source,
                    other_source,
                } => {
                    let _ = writeln!(out, "## modified code cell {index}");
                    for line in cached_source.lines() {
                        let _ = writeln!(out, "-  {line}");
                    }
                    for line in other_source.lines() {
                        let _ = writeln!(out, "+  {line}");
                    }
                }
                CellChange::Added { index, source } => {
                    let _ = writeln!(out, "## inserted code cell {index}");
                    for line in source.lines() {
                        let _ = writeln!(out, "+  {line}");
                    }
                }
                CellChange::Removed { index, source } => {
                    let _ = writeln!(out, "## deleted code cell {index}");
                    for line in source.lines() {
                        let _ = writeln!(out, "-  {line}");
                    }
                }
            }
        }
        out
    }
}

/// Compare two canonical notebooks (non-code cells already dropped).
pub(crate) fn diff_notebooks(pk: i64, uri: &str, cached: &Notebook, other: &Notebook) -> CacheDiff {
    let mut metadata = Vec::new();
    let keys: std::collections::BTreeSet<&String> =
        cached.metadata.keys().chain(other.metadata.keys()).collect();
    for key in keys {
        let cached_value = cached.metadata.get(key.as_str());
        let other_value = other.metadata.get(key.as_str());
        if cached_value != other_value {
            metadata.push(MetadataChange {
                key: key.to_string(),
                cached: cached_value.cloned(),
                other: other_value.cloned(),
            });
        }
    }

    let cached_sources: Vec<&str> = code_sources(cached);
    let other_sources: Vec<&str> = code_sources(other);
    let mut cells = Vec::new();
    for index in 0..cached_sources.len().max(other_sources.len()) {
        match (cached_sources.get(index), other_sources.get(index)) {
            (Some(cached_source), Some(other_source)) if cached_source != other_source => {
                cells.push(CellChange::Changed {
                    index,
                    cached_source: (*cached_source).to_string(),
                    other_source: (*other_source).to_string(),
                });
            }
            (Some(_), Some(_)) => {}
            (None, Some(source)) => cells.push(CellChange::Added {
                index,
                source: (*source).to_string(),
            }),
            (Some(source), None) => cells.push(CellChange::Removed {
                index,
                source: (*source).to_string(),
            }),
            (None, None) => {}
        }
    }

    CacheDiff {
        pk,
        uri: uri.to_string(),
        metadata,
        cells,
    }
}

fn code_sources(nb: &Notebook) -> Vec<&str> {
    nb.cells
        .iter()
        .filter_map(|cell| match cell {
            Cell::Code(code) => Some(code.source.as_str()),
            Cell::Other(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbcache_notebook::CodeCell;

    fn nb_with_sources(sources: &[&str]) -> Notebook {
        let mut nb = Notebook::new(4);
        for source in sources {
            nb.cells.push(Cell::Code(CodeCell::new(*source)));
        }
        nb
    }

    #[test]
    fn equal_notebooks_have_an_empty_diff() {
        let nb = nb_with_sources(&["a = 1", "b = 2"]);
        let diff = diff_notebooks(1, "x.ipynb", &nb, &nb.clone());
        assert!(diff.is_empty());
        assert!(diff.to_text().contains("(no differences)"));
    }

    #[test]
    fn changed_added_and_removed_cells_are_reported() {
        let cached = nb_with_sources(&["a = 1", "b = 2", "c = 3"]);
        let other = nb_with_sources(&["a = 1", "b = 20"]);
        let diff = diff_notebooks(1, "x.ipynb", &cached, &other);
        assert_eq!(
            diff.cells,
            vec![
                CellChange::Changed {
                    index: 1,
                    cached_source: "b = 2".to_string(),
                    other_source: "b = 20".to_string(),
                },
                CellChange::Removed {
                    index: 2,
                    source: "c = 3".to_string(),
                },
            ]
        );
    }

    #[test]
    fn metadata_differences_are_reported() {
        let mut cached = nb_with_sources(&["a = 1"]);
        cached
            .metadata
            .insert("kernelspec".to_string(), serde_json::json!({"name": "py3"}));
        let other = nb_with_sources(&["a = 1"]);
        let diff = diff_notebooks(1, "x.ipynb", &cached, &other);
        assert_eq!(diff.metadata.len(), 1);
        assert_eq!(diff.metadata[0].key, "kernelspec");
        assert!(diff.metadata[0].other.is_none());
    }
}
