//! Notebook tree model, canonicalization and fingerprinting.
//!
//! This crate implements the pure, filesystem-free building blocks of the
//! notebook cache:
//! - a serde model for the v4 notebook format
//! - canonical projection and MD5 fingerprinting
//! - the executed-notebook validity check
//! - readers that turn a file into a notebook tree, and their registry

mod canonical;
mod nb;
mod read;
mod validate;

pub use canonical::{
    canonicalize, canonicalize_with, upgrade, CanonicalError, CanonicalizeOptions, Fingerprint,
    CANONICAL_MINOR, DEFAULT_NB_METADATA_KEYS, NB_FORMAT_MAJOR,
};
pub use nb::{Cell, CodeCell, Metadata, Notebook, OtherCell};
pub use read::{
    get_reader, list_readers, read_ipynb, read_percent, register_reader, NbReadError, ReadRecipe,
    ReaderFn,
};
pub use validate::{validate_executed, NbValidityError};
