use crate::domain::model::CharMatrix;

/// Picks the alignment to pair with a tree.
///
/// Repository order of matrices is arbitrary, so the first matrix with as
/// many rows as the tree has taxa wins. Without an exact match the first
/// matrix is used. Returns `None` only for an empty collection.
pub fn select_matrix_index(matrices: &[CharMatrix], taxon_count: usize) -> Option<usize> {
    if matrices.is_empty() {
        return None;
    }
    let index = matrices
        .iter()
        .position(|matrix| matrix.len() == taxon_count)
        .unwrap_or(0);
    Some(index)
}

pub fn select_matrix(matrices: &[CharMatrix], taxon_count: usize) -> Option<&CharMatrix> {
    select_matrix_index(matrices, taxon_count).map(|index| &matrices[index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::MatrixRow;

    fn matrix(title: &str, rows: usize) -> CharMatrix {
        CharMatrix {
            title: Some(title.to_string()),
            data_type: Some("DNA".to_string()),
            rows: (0..rows)
                .map(|i| MatrixRow {
                    taxon: format!("taxon_{}", i),
                    sequence: "ACGT".to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_exact_row_count_wins() {
        let matrices = vec![matrix("morph", 12), matrix("cytb", 20), matrix("nd2", 15)];
        assert_eq!(select_matrix_index(&matrices, 15), Some(2));
        assert_eq!(select_matrix(&matrices, 20).unwrap().title.as_deref(), Some("cytb"));
    }

    #[test]
    fn test_first_of_several_matches() {
        let matrices = vec![matrix("a", 10), matrix("b", 20), matrix("c", 20)];
        assert_eq!(select_matrix_index(&matrices, 20), Some(1));
    }

    #[test]
    fn test_falls_back_to_first_matrix() {
        let matrices = vec![matrix("a", 10), matrix("b", 11)];
        assert_eq!(select_matrix_index(&matrices, 99), Some(0));
        assert_eq!(select_matrix(&matrices, 0).unwrap().title.as_deref(), Some("a"));
    }

    #[test]
    fn test_empty_collection() {
        assert_eq!(select_matrix_index(&[], 4), None);
        assert!(select_matrix(&[], 4).is_none());
    }

    #[test]
    fn test_selection_is_repeatable() {
        let matrices = vec![matrix("a", 3), matrix("b", 4), matrix("c", 4)];
        let first = select_matrix_index(&matrices, 4);
        for _ in 0..5 {
            assert_eq!(select_matrix_index(&matrices, 4), first);
        }
    }
}
