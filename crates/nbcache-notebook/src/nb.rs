use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Notebook-level and cell-level metadata mapping.
///
/// A `BTreeMap` keeps serialization key order stable, which the canonical
/// projection relies on.
pub type Metadata = BTreeMap<String, Value>;

/// An in-memory notebook tree: an ordered list of cells plus metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub nbformat: i64,
    pub nbformat_minor: i64,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub cells: Vec<Cell>,
}

impl Notebook {
    /// An empty v4 notebook at the given minor version.
    pub fn new(nbformat_minor: i64) -> Self {
        Self {
            nbformat: 4,
            nbformat_minor,
            metadata: Metadata::new(),
            cells: Vec::new(),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize the notebook as pretty-printed UTF-8 JSON.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn code_cells(&self) -> impl Iterator<Item = &CodeCell> {
        self.cells.iter().filter_map(|cell| match cell {
            Cell::Code(code) => Some(code),
            Cell::Other(_) => None,
        })
    }

    pub fn code_cell_count(&self) -> usize {
        self.code_cells().count()
    }
}

/// A single notebook cell.
///
/// The cache only distinguishes code cells from everything else; markdown and
/// raw cells are both `Other`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawCell", into = "RawCell")]
pub enum Cell {
    Code(CodeCell),
    Other(OtherCell),
}

impl Cell {
    pub fn is_code(&self) -> bool {
        matches!(self, Cell::Code(_))
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Cell::Code(code) => code.id.as_deref(),
            Cell::Other(other) => other.id.as_deref(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CodeCell {
    /// Cell id, present from format v4.5 onwards.
    pub id: Option<String>,
    pub source: String,
    pub metadata: Metadata,
    pub execution_count: Option<i64>,
    /// Output records are carried opaquely; the cache never inspects them.
    pub outputs: Vec<Value>,
    /// Unrecognized cell fields, preserved verbatim.
    pub extra: Metadata,
}

impl CodeCell {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn with_count(source: impl Into<String>, execution_count: i64) -> Self {
        Self {
            source: source.into(),
            execution_count: Some(execution_count),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OtherCell {
    /// The original cell type, e.g. `markdown` or `raw`.
    pub cell_type: String,
    pub id: Option<String>,
    pub source: String,
    pub metadata: Metadata,
    /// Unrecognized cell fields (e.g. `attachments`), preserved verbatim.
    pub extra: Metadata,
}

impl OtherCell {
    pub fn markdown(source: impl Into<String>) -> Self {
        Self {
            cell_type: "markdown".to_string(),
            id: None,
            source: source.into(),
            metadata: Metadata::new(),
            extra: Metadata::new(),
        }
    }
}

/// The on-disk shape of a cell, shared by every cell type.
///
/// Code cells must serialize `execution_count` and `outputs` even when null or
/// empty, while other cell types must omit them; the double-`Option` keeps
/// "absent" distinct from "null".
#[derive(Clone, Debug, Serialize, Deserialize)]
struct RawCell {
    cell_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, deserialize_with = "multiline_string")]
    source: String,
    #[serde(default)]
    metadata: Metadata,
    #[serde(
        default,
        deserialize_with = "some_nullable_count",
        skip_serializing_if = "Option::is_none"
    )]
    execution_count: Option<Option<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    outputs: Option<Vec<Value>>,
    #[serde(flatten)]
    extra: Metadata,
}

impl From<RawCell> for Cell {
    fn from(raw: RawCell) -> Self {
        if raw.cell_type == "code" {
            Cell::Code(CodeCell {
                id: raw.id,
                source: raw.source,
                metadata: raw.metadata,
                execution_count: raw.execution_count.flatten(),
                outputs: raw.outputs.unwrap_or_default(),
                extra: raw.extra,
            })
        } else {
            Cell::Other(OtherCell {
                cell_type: raw.cell_type,
                id: raw.id,
                source: raw.source,
                metadata: raw.metadata,
                extra: raw.extra,
            })
        }
    }
}

impl From<Cell> for RawCell {
    fn from(cell: Cell) -> Self {
        match cell {
            Cell::Code(code) => RawCell {
                cell_type: "code".to_string(),
                id: code.id,
                source: code.source,
                metadata: code.metadata,
                execution_count: Some(code.execution_count),
                outputs: Some(code.outputs),
                extra: code.extra,
            },
            Cell::Other(other) => RawCell {
                cell_type: other.cell_type,
                id: other.id,
                source: other.source,
                metadata: other.metadata,
                execution_count: None,
                outputs: None,
                extra: other.extra,
            },
        }
    }
}

/// Notebook source text is either a plain string or a list of line strings
/// (each carrying its own trailing newline); normalize to a single string.
fn multiline_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Repr::deserialize(deserializer)? {
        Repr::One(text) => text,
        Repr::Many(lines) => lines.concat(),
    })
}

fn some_nullable_count<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(Option::<i64>::deserialize(deserializer)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_cell_round_trips_through_json() {
        let json = r#"{
            "cell_type": "code",
            "id": "abc123",
            "source": ["print(1)\n", "print(2)"],
            "metadata": {"tags": []},
            "execution_count": 3,
            "outputs": [{"output_type": "stream", "name": "stdout", "text": "1\n2\n"}]
        }"#;
        let cell: Cell = serde_json::from_str(json).unwrap();
        let Cell::Code(code) = &cell else {
            panic!("expected a code cell");
        };
        assert_eq!(code.source, "print(1)\nprint(2)");
        assert_eq!(code.execution_count, Some(3));
        assert_eq!(code.outputs.len(), 1);

        let back = serde_json::to_value(&cell).unwrap();
        assert_eq!(back["cell_type"], "code");
        assert_eq!(back["execution_count"], 3);
        assert_eq!(back["source"], "print(1)\nprint(2)");
    }

    #[test]
    fn unexecuted_code_cell_serializes_null_count_and_empty_outputs() {
        let cell = Cell::Code(CodeCell::new("x = 1"));
        let value = serde_json::to_value(&cell).unwrap();
        assert!(value.get("execution_count").is_some());
        assert_eq!(value["execution_count"], Value::Null);
        assert_eq!(value["outputs"], serde_json::json!([]));
        assert!(value.get("id").is_none());
    }

    #[test]
    fn markdown_cell_omits_code_only_fields() {
        let cell = Cell::Other(OtherCell::markdown("# Title"));
        let value = serde_json::to_value(&cell).unwrap();
        assert_eq!(value["cell_type"], "markdown");
        assert!(value.get("execution_count").is_none());
        assert!(value.get("outputs").is_none());
    }

    #[test]
    fn unknown_cell_fields_are_preserved() {
        let json = r#"{
            "cell_type": "markdown",
            "source": "see ![img](attachment:img.png)",
            "metadata": {},
            "attachments": {"img.png": {"image/png": "aGk="}}
        }"#;
        let cell: Cell = serde_json::from_str(json).unwrap();
        let value = serde_json::to_value(&cell).unwrap();
        assert!(value["attachments"]["img.png"].is_object());
    }
}
