use crate::nb::{Cell, Notebook};

/// A notebook failed the executed-notebook invariant.
///
/// Code cells of a validly executed notebook carry the strictly increasing
/// execution counts 1, 2, 3, ... with no gaps and no nulls.
#[derive(Debug, thiserror::Error)]
#[error(
    "cell {cell_index} of notebook {uri:?} has execution_count {found:?}, expected {expected}"
)]
pub struct NbValidityError {
    /// Origin URI of the offending notebook.
    pub uri: String,
    /// Index of the offending cell within the full cell list.
    pub cell_index: usize,
    pub expected: i64,
    pub found: Option<i64>,
}

/// Check that a notebook has been executed correctly.
pub fn validate_executed(nb: &Notebook, uri: &str) -> Result<(), NbValidityError> {
    let mut expected = 1_i64;
    for (cell_index, cell) in nb.cells.iter().enumerate() {
        let Cell::Code(code) = cell else {
            continue;
        };
        if code.execution_count != Some(expected) {
            return Err(NbValidityError {
                uri: uri.to_string(),
                cell_index,
                expected,
                found: code.execution_count,
            });
        }
        expected += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nb::{CodeCell, OtherCell};

    fn nb_with_counts(counts: &[Option<i64>]) -> Notebook {
        let mut nb = Notebook::new(4);
        nb.cells.push(Cell::Other(OtherCell::markdown("intro")));
        for (i, count) in counts.iter().enumerate() {
            let mut cell = CodeCell::new(format!("x = {i}"));
            cell.execution_count = *count;
            nb.cells.push(Cell::Code(cell));
        }
        nb
    }

    #[test]
    fn consecutive_counts_are_valid() {
        let nb = nb_with_counts(&[Some(1), Some(2), Some(3)]);
        assert!(validate_executed(&nb, "a.ipynb").is_ok());
    }

    #[test]
    fn empty_notebook_is_valid() {
        let nb = Notebook::new(4);
        assert!(validate_executed(&nb, "a.ipynb").is_ok());
    }

    #[test]
    fn null_count_is_invalid() {
        let err = validate_executed(&nb_with_counts(&[Some(1), None]), "a.ipynb").unwrap_err();
        assert_eq!(err.cell_index, 2);
        assert_eq!(err.expected, 2);
        assert_eq!(err.found, None);
        assert_eq!(err.uri, "a.ipynb");
    }

    #[test]
    fn gap_in_counts_is_invalid() {
        let err = validate_executed(&nb_with_counts(&[Some(1), Some(3)]), "b.ipynb").unwrap_err();
        assert_eq!(err.expected, 2);
        assert_eq!(err.found, Some(3));
    }

    #[test]
    fn counts_must_start_at_one() {
        let err = validate_executed(&nb_with_counts(&[Some(2)]), "c.ipynb").unwrap_err();
        assert_eq!(err.expected, 1);
    }
}
