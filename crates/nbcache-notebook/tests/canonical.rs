use nbcache_notebook::{
    canonicalize, canonicalize_with, Cell, CanonicalizeOptions, CodeCell, Notebook, OtherCell,
};
use serde_json::json;

fn sample_nb() -> Notebook {
    let mut nb = Notebook::new(5);
    nb.metadata.insert(
        "kernelspec".to_string(),
        json!({"name": "python3", "display_name": "Python 3"}),
    );
    nb.metadata
        .insert("language_info".to_string(), json!({"name": "python"}));
    nb.cells.push(Cell::Other(OtherCell::markdown("# Intro")));
    let mut cell = CodeCell::with_count("print('hello')", 1);
    cell.id = Some("cell-1".to_string());
    cell.outputs
        .push(json!({"output_type": "stream", "name": "stdout", "text": "hello\n"}));
    nb.cells.push(Cell::Code(cell));
    nb.cells.push(Cell::Code(CodeCell::with_count("1 + 1", 2)));
    nb
}

#[test]
fn fingerprint_is_deterministic() {
    let nb = sample_nb();
    let (_, fp_a) = canonicalize(&nb).unwrap();
    let (_, fp_b) = canonicalize(&nb).unwrap();
    assert_eq!(fp_a, fp_b);
    assert_eq!(fp_a.as_str().len(), 32);
    assert!(fp_a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn non_code_cells_do_not_affect_the_fingerprint() {
    let nb = sample_nb();
    let (_, fp) = canonicalize(&nb).unwrap();

    let mut edited = nb.clone();
    edited.cells[0] = Cell::Other(OtherCell::markdown("# A completely different intro"));
    edited
        .cells
        .push(Cell::Other(OtherCell::markdown("appendix")));
    let (_, fp_edited) = canonicalize(&edited).unwrap();
    assert_eq!(fp, fp_edited);
}

#[test]
fn cell_ids_execution_counts_and_outputs_do_not_affect_the_fingerprint() {
    let nb = sample_nb();
    let (_, fp) = canonicalize(&nb).unwrap();

    let mut edited = nb.clone();
    for cell in &mut edited.cells {
        if let Cell::Code(code) = cell {
            code.id = Some("renamed".to_string());
            code.execution_count = None;
            code.outputs.clear();
        }
    }
    let (_, fp_edited) = canonicalize(&edited).unwrap();
    assert_eq!(fp, fp_edited);
}

#[test]
fn minor_version_does_not_affect_the_fingerprint() {
    let nb = sample_nb();
    let (_, fp) = canonicalize(&nb).unwrap();

    let mut v44 = nb.clone();
    v44.nbformat_minor = 4;
    for cell in &mut v44.cells {
        if let Cell::Code(code) = cell {
            code.id = None;
        }
    }
    let (_, fp_v44) = canonicalize(&v44).unwrap();
    assert_eq!(fp, fp_v44);
}

#[test]
fn non_allowlisted_notebook_metadata_is_ignored() {
    let nb = sample_nb();
    let (_, fp) = canonicalize(&nb).unwrap();

    let mut edited = nb.clone();
    edited
        .metadata
        .insert("language_info".to_string(), json!({"name": "rust"}));
    edited.metadata.insert("authors".to_string(), json!(["a"]));
    let (_, fp_edited) = canonicalize(&edited).unwrap();
    assert_eq!(fp, fp_edited);
}

#[test]
fn allowlisted_notebook_metadata_is_hashed() {
    let nb = sample_nb();
    let (_, fp) = canonicalize(&nb).unwrap();

    let mut edited = nb.clone();
    edited
        .metadata
        .insert("kernelspec".to_string(), json!({"name": "python2"}));
    let (_, fp_edited) = canonicalize(&edited).unwrap();
    assert_ne!(fp, fp_edited);
}

#[test]
fn code_source_changes_the_fingerprint() {
    let nb = sample_nb();
    let (_, fp) = canonicalize(&nb).unwrap();

    let mut edited = nb.clone();
    if let Cell::Code(code) = &mut edited.cells[1] {
        code.source = "print('goodbye')".to_string();
    }
    let (_, fp_edited) = canonicalize(&edited).unwrap();
    assert_ne!(fp, fp_edited);
}

#[test]
fn cell_metadata_changes_the_fingerprint_by_default() {
    let nb = sample_nb();
    let (_, fp) = canonicalize(&nb).unwrap();

    let mut edited = nb.clone();
    if let Cell::Code(code) = &mut edited.cells[1] {
        code.metadata.insert("tags".to_string(), json!(["slow"]));
    }
    let (_, fp_edited) = canonicalize(&edited).unwrap();
    assert_ne!(fp, fp_edited);
}

#[test]
fn cell_metadata_allowlist_restricts_hashing() {
    let nb = sample_nb();
    let options = CanonicalizeOptions {
        cell_metadata_keys: Some(&["tags"]),
        ..CanonicalizeOptions::default()
    };
    let (_, fp) = canonicalize_with(&nb, options).unwrap();

    let mut edited = nb.clone();
    if let Cell::Code(code) = &mut edited.cells[1] {
        code.metadata
            .insert("collapsed".to_string(), json!(true));
    }
    let (_, fp_edited) = canonicalize_with(&edited, options).unwrap();
    assert_eq!(fp, fp_edited);
}

#[test]
fn canonical_notebook_drops_non_code_cells_but_keeps_outputs() {
    let nb = sample_nb();
    let (canonical, _) = canonicalize(&nb).unwrap();
    assert_eq!(canonical.cells.len(), 2);
    assert!(canonical.cells.iter().all(Cell::is_code));
    let Cell::Code(first) = &canonical.cells[0] else {
        unreachable!();
    };
    assert_eq!(first.execution_count, Some(1));
    assert_eq!(first.outputs.len(), 1);
    assert_eq!(canonical.nbformat_minor, 5);
}

#[test]
fn old_minor_versions_are_upgraded_to_4_4() {
    let mut nb = sample_nb();
    nb.nbformat_minor = 2;
    for cell in &mut nb.cells {
        if let Cell::Code(code) = cell {
            code.id = None;
        }
    }

    let (canonical, fp) = canonicalize(&nb).unwrap();
    assert_eq!(canonical.nbformat_minor, 4);

    // Raising the minor does not change the fingerprint.
    let (_, fp_v45) = canonicalize(&sample_nb()).unwrap();
    assert_eq!(fp, fp_v45);
}

#[test]
fn unsupported_versions_are_rejected() {
    let mut nb = sample_nb();
    nb.nbformat_minor = 6;
    assert!(canonicalize(&nb).is_err());

    let mut nb = sample_nb();
    nb.nbformat = 3;
    assert!(canonicalize(&nb).is_err());
}
