use crate::nb::{Cell, CodeCell, Metadata, Notebook, OtherCell};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Error raised when a notebook cannot be read.
#[derive(Debug, thiserror::Error)]
pub enum NbReadError {
    #[error("no reader registered with name {0:?}")]
    UnknownReader(String),

    #[error("failed to read notebook {uri}: {source}")]
    Io {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse notebook {uri}: {reason}")]
    Parse { uri: String, reason: String },
}

/// A function that reads a file URI and returns a notebook tree.
pub type ReaderFn = Arc<dyn Fn(&Path) -> Result<Notebook, NbReadError> + Send + Sync>;

/// How to read a registered notebook: the reader name plus any reader-specific
/// options, stored verbatim on the project record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReadRecipe {
    pub name: String,
    #[serde(flatten)]
    pub extra: Metadata,
}

impl ReadRecipe {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extra: Metadata::new(),
        }
    }
}

impl Default for ReadRecipe {
    /// The standard JSON notebook reader.
    fn default() -> Self {
        Self::new("ipynb")
    }
}

fn registry() -> &'static RwLock<BTreeMap<String, ReaderFn>> {
    static READERS: OnceLock<RwLock<BTreeMap<String, ReaderFn>>> = OnceLock::new();
    READERS.get_or_init(|| {
        let mut map: BTreeMap<String, ReaderFn> = BTreeMap::new();
        map.insert("ipynb".to_string(), Arc::new(|path: &Path| read_ipynb(path)));
        map.insert(
            "percent".to_string(),
            Arc::new(|path: &Path| read_percent(path)),
        );
        RwLock::new(map)
    })
}

/// Register a reader under `name`, replacing any existing one.
pub fn register_reader(name: impl Into<String>, reader: ReaderFn) {
    registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.into(), reader);
}

/// Look up a reader by name.
pub fn get_reader(name: &str) -> Option<ReaderFn> {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
}

/// Names of all registered readers, sorted.
pub fn list_readers() -> Vec<String> {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect()
}

/// Standard reader for the JSON notebook format.
pub fn read_ipynb(path: &Path) -> Result<Notebook, NbReadError> {
    let text = std::fs::read_to_string(path).map_err(|source| NbReadError::Io {
        uri: path.display().to_string(),
        source,
    })?;
    Notebook::from_json_str(&text).map_err(|err| NbReadError::Parse {
        uri: path.display().to_string(),
        reason: err.to_string(),
    })
}

/// Reader for percent-format scripts (`# %%` cell markers).
///
/// Markdown and raw cells are comment blocks introduced by `# %% [markdown]`
/// or `# %% [raw]`; everything else is a code cell. Content before the first
/// marker becomes a leading code cell if it is non-blank.
pub fn read_percent(path: &Path) -> Result<Notebook, NbReadError> {
    let text = std::fs::read_to_string(path).map_err(|source| NbReadError::Io {
        uri: path.display().to_string(),
        source,
    })?;
    Ok(parse_percent(&text))
}

fn parse_percent(text: &str) -> Notebook {
    enum Kind {
        Code,
        Other(&'static str),
    }

    let mut nb = Notebook::new(4);
    let mut kind = Kind::Code;
    let mut lines: Vec<&str> = Vec::new();
    let mut seen_marker = false;

    let flush = |kind: &Kind, lines: &mut Vec<&str>, seen_marker: bool, nb: &mut Notebook| {
        // Drop a blank preamble, but keep any real content before the first
        // marker as a leading code cell.
        if !seen_marker && lines.iter().all(|line| line.trim().is_empty()) {
            lines.clear();
            return;
        }
        let source = lines.join("\n").trim_matches('\n').to_string();
        lines.clear();
        match kind {
            Kind::Code => nb.cells.push(Cell::Code(CodeCell::new(source))),
            Kind::Other(cell_type) => nb.cells.push(Cell::Other(OtherCell {
                cell_type: cell_type.to_string(),
                id: None,
                source,
                metadata: Metadata::new(),
                extra: Metadata::new(),
            })),
        }
    };

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("# %%") {
            flush(&kind, &mut lines, seen_marker, &mut nb);
            seen_marker = true;
            let rest = rest.trim();
            kind = if rest.starts_with("[markdown]") {
                Kind::Other("markdown")
            } else if rest.starts_with("[raw]") {
                Kind::Other("raw")
            } else {
                Kind::Code
            };
        } else if matches!(kind, Kind::Other(_)) {
            lines.push(line.strip_prefix("# ").unwrap_or(line.strip_prefix('#').unwrap_or(line)));
        } else {
            lines.push(line);
        }
    }
    flush(&kind, &mut lines, seen_marker, &mut nb);

    nb
}
