use crate::nb::{Cell, Metadata, Notebook};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The only notebook major format the cache accepts.
pub const NB_FORMAT_MAJOR: i64 = 4;

/// The minor version pinned in the canonical projection.
///
/// v4.5 introduced cell ids, which are not part of the cached content, so
/// notebooks are always projected down to 4.4 for hashing.
pub const CANONICAL_MINOR: i64 = 4;

const MAX_MINOR: i64 = 5;

/// Notebook-metadata keys hashed by default.
pub const DEFAULT_NB_METADATA_KEYS: &[&str] = &["kernelspec"];

/// Errors from normalizing a notebook into its canonical form.
#[derive(Debug, thiserror::Error)]
pub enum CanonicalError {
    #[error("notebook format v{0} is not supported by the cache (requires v4)")]
    UnsupportedMajor(i64),

    #[error("notebook format v4.{0} is not yet supported by the cache (maximum 4.{MAX_MINOR})")]
    UnsupportedMinor(i64),

    #[error("failed to serialize canonical projection: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A stable MD5 fingerprint stored as a lowercase hex string.
///
/// Two notebooks with equal fingerprints are treated as execution-equivalent.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the MD5 fingerprint of the canonical notebook text.
    pub fn from_canonical_text(text: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(text.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Fingerprint {
    fn from(hex: String) -> Self {
        Self(hex)
    }
}

/// Which metadata keys survive into the canonical projection.
#[derive(Clone, Copy, Debug)]
pub struct CanonicalizeOptions<'a> {
    /// Notebook-metadata keys to hash; `None` keeps all.
    pub nb_metadata_keys: Option<&'a [&'a str]>,
    /// Cell-metadata keys to hash; `None` keeps all.
    pub cell_metadata_keys: Option<&'a [&'a str]>,
}

impl Default for CanonicalizeOptions<'_> {
    fn default() -> Self {
        Self {
            nb_metadata_keys: Some(DEFAULT_NB_METADATA_KEYS),
            cell_metadata_keys: None,
        }
    }
}

/// Upgrade a deep copy of the notebook to format version 4.4.
///
/// Notebooks of any accepted minor version (<= 4.5) hash identically because
/// the projection pins `nbformat_minor` to 4. Minor versions below 4 are
/// raised to 4.4 so the stored form is consistent; 4.5 is kept as-is so cell
/// ids survive where the format has them.
pub fn upgrade(nb: &Notebook) -> Result<Notebook, CanonicalError> {
    if nb.nbformat != NB_FORMAT_MAJOR {
        return Err(CanonicalError::UnsupportedMajor(nb.nbformat));
    }
    if nb.nbformat_minor > MAX_MINOR {
        return Err(CanonicalError::UnsupportedMinor(nb.nbformat_minor));
    }
    let mut nb = nb.clone();
    nb.nbformat_minor = nb.nbformat_minor.max(CANONICAL_MINOR);
    Ok(nb)
}

/// Canonicalize with the default metadata allow-lists.
pub fn canonicalize(nb: &Notebook) -> Result<(Notebook, Fingerprint), CanonicalError> {
    canonicalize_with(nb, CanonicalizeOptions::default())
}

/// Convert a notebook to its canonical form and fingerprint.
///
/// The returned notebook is the upgraded input with non-code cells dropped
/// (this is what gets stored on disk). The fingerprint is the MD5 digest of a
/// projection that keeps only what the cache treats as meaningful input:
/// allow-listed metadata and code-cell sources, with `execution_count` and
/// `outputs` blanked and cell ids omitted.
pub fn canonicalize_with(
    nb: &Notebook,
    options: CanonicalizeOptions<'_>,
) -> Result<(Notebook, Fingerprint), CanonicalError> {
    let mut nb = upgrade(nb)?;
    nb.cells.retain(Cell::is_code);

    let cells = nb
        .cells
        .iter()
        .filter_map(|cell| match cell {
            Cell::Code(code) => Some(CellProjection {
                cell_type: "code",
                source: &code.source,
                metadata: filter_keys(&code.metadata, options.cell_metadata_keys),
                execution_count: None,
                outputs: Vec::new(),
            }),
            Cell::Other(_) => None,
        })
        .collect();

    let projection = Projection {
        nbformat: NB_FORMAT_MAJOR,
        nbformat_minor: CANONICAL_MINOR,
        metadata: filter_keys(&nb.metadata, options.nb_metadata_keys),
        cells,
    };

    let text = serde_json::to_string(&projection)?;
    let fingerprint = Fingerprint::from_canonical_text(&text);
    Ok((nb, fingerprint))
}

fn filter_keys(metadata: &Metadata, keys: Option<&[&str]>) -> Metadata {
    match keys {
        None => metadata.clone(),
        Some(keys) => metadata
            .iter()
            .filter(|(k, _)| keys.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

/// The hashed shape of a notebook. Field order is the serialization order.
#[derive(Serialize)]
struct Projection<'a> {
    nbformat: i64,
    nbformat_minor: i64,
    metadata: Metadata,
    cells: Vec<CellProjection<'a>>,
}

#[derive(Serialize)]
struct CellProjection<'a> {
    cell_type: &'static str,
    source: &'a str,
    metadata: Metadata,
    execution_count: Option<i64>,
    outputs: Vec<Value>,
}
