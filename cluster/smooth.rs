use crate::solver::Grouping;
use ndarray::{Array2, ArrayView2};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmoothError {
    #[error(
        "The {axis} grouping covers {assigned} nodes but the matrix has {expected} on that axis."
    )]
    GroupingShapeMismatch {
        axis: &'static str,
        assigned: usize,
        expected: usize,
    },

    #[error(
        "The {axis} grouping is not a dense partition: group id {group} is out of range or group {group} is empty."
    )]
    InvalidGrouping { axis: &'static str, group: usize },
}

/// Replaces every (row group x column group) block of `x` with the mean of
/// the original entries in that block.
///
/// This is the final smoothing step: given the fused partitions from a
/// chosen path point, it produces the cluster-constant matrix implied by the
/// *original, unmasked* data. Pure and idempotent: applying it again with
/// the same groupings returns the same matrix, since each block is already
/// constant at its own mean.
pub fn block_means(
    x: ArrayView2<f64>,
    row_groups: &Grouping,
    col_groups: &Grouping,
) -> Result<Array2<f64>, SmoothError> {
    validate_grouping(row_groups, x.nrows(), "row")?;
    validate_grouping(col_groups, x.ncols(), "column")?;

    let mut sums = Array2::<f64>::zeros((row_groups.n_groups, col_groups.n_groups));
    let mut counts = Array2::<f64>::zeros((row_groups.n_groups, col_groups.n_groups));
    for ((i, j), &value) in x.indexed_iter() {
        let block = [row_groups.assignment[i], col_groups.assignment[j]];
        sums[block] += value;
        counts[block] += 1.0;
    }

    // Every group on each axis is non-empty, so every block has a count.
    let means = &sums / &counts;

    let mut out = Array2::zeros(x.dim());
    for ((i, j), value) in out.indexed_iter_mut() {
        *value = means[[row_groups.assignment[i], col_groups.assignment[j]]];
    }
    Ok(out)
}

/// Checks that the grouping covers exactly the axis indices and that its ids
/// form a dense partition of `0..n_groups` with no empty group.
fn validate_grouping(
    grouping: &Grouping,
    expected: usize,
    axis: &'static str,
) -> Result<(), SmoothError> {
    if grouping.len() != expected {
        return Err(SmoothError::GroupingShapeMismatch {
            axis,
            assigned: grouping.len(),
            expected,
        });
    }
    let mut seen = vec![false; grouping.n_groups];
    for &id in &grouping.assignment {
        if id >= grouping.n_groups {
            return Err(SmoothError::InvalidGrouping { axis, group: id });
        }
        seen[id] = true;
    }
    if let Some(empty) = seen.iter().position(|&s| !s) {
        return Err(SmoothError::InvalidGrouping { axis, group: empty });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn grouping(assignment: Vec<usize>, n_groups: usize) -> Grouping {
        Grouping {
            assignment,
            n_groups,
        }
    }

    #[test]
    fn fills_each_block_with_its_mean() {
        let x = array![
            [1.0, 1.0, 5.0],
            [3.0, 3.0, 7.0],
            [10.0, 10.0, 20.0],
        ];
        let rows = grouping(vec![0, 0, 1], 2);
        let cols = grouping(vec![0, 0, 1], 2);
        let smoothed = block_means(x.view(), &rows, &cols).unwrap();

        // Top-left block mean = (1+1+3+3)/4 = 2; top-right = (5+7)/2 = 6;
        // bottom-left = 10; bottom-right = 20.
        let expected = array![
            [2.0, 2.0, 6.0],
            [2.0, 2.0, 6.0],
            [10.0, 10.0, 20.0],
        ];
        for (&got, &want) in smoothed.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(got, want, epsilon = 1e-12);
        }
    }

    #[test]
    fn singleton_groupings_reproduce_the_input() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let rows = Grouping::singletons(2);
        let cols = Grouping::singletons(2);
        let smoothed = block_means(x.view(), &rows, &cols).unwrap();
        assert_eq!(smoothed, x);
    }

    #[test]
    fn idempotent_under_repeated_application() {
        let x = array![
            [1.0, 2.0, 9.0],
            [2.0, 1.0, 8.0],
            [7.0, 7.5, 0.0],
        ];
        let rows = grouping(vec![0, 0, 1], 2);
        let cols = grouping(vec![0, 0, 1], 2);
        let once = block_means(x.view(), &rows, &cols).unwrap();
        let twice = block_means(once.view(), &rows, &cols).unwrap();
        for (&a, &b) in once.iter().zip(twice.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn rejects_mismatched_or_sparse_groupings() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let short = grouping(vec![0], 1);
        let cols = Grouping::singletons(2);
        assert!(matches!(
            block_means(x.view(), &short, &cols),
            Err(SmoothError::GroupingShapeMismatch { axis: "row", .. })
        ));

        // Group id 2 with n_groups = 2 is out of range.
        let out_of_range = grouping(vec![0, 2], 2);
        assert!(matches!(
            block_means(x.view(), &out_of_range, &cols),
            Err(SmoothError::InvalidGrouping { axis: "row", group: 2 })
        ));

        // Group 1 is declared but empty.
        let empty_group = grouping(vec![0, 0], 2);
        assert!(matches!(
            block_means(x.view(), &empty_group, &cols),
            Err(SmoothError::InvalidGrouping { axis: "row", group: 1 })
        ));
    }
}
