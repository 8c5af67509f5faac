use crate::config::{BiclusterConfig, ConfigError, PenaltySequence};
use crate::graph::build_axis_graphs;
use crate::path::{PathError, SolvePath, solve_path};
use ndarray::ArrayView2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(
        "Hold-out selection is degenerate: {n_heldout} of {n_total} entries held out; both the held-out and observed sets must be non-empty."
    )]
    DegenerateHoldout { n_heldout: usize, n_total: usize },
}

/// The held-out entry set plus the neutral value that replaces those entries
/// in the training copy of the matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldoutMask {
    /// Held-out (row, column) pairs, sorted; the complement is the training set.
    pub pairs: Vec<(usize, usize)>,
    /// Grand mean of the observed (non-held-out) entries.
    pub fill: f64,
}

/// Hold-out reconstruction error per path point, aligned with the penalty
/// sequence, and the index of the best strength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<f64>,
    pub best_index: usize,
    pub n_heldout: usize,
}

/// Samples a fraction of matrix entries, without replacement, as the held-out
/// set, and computes the observed grand mean used as the neutral fill.
///
/// Sampling is driven by a seeded RNG, so the same (matrix shape, fraction,
/// seed) triple always yields the same mask. Fractions outside (0, 1) are
/// rejected up front; fractions that round to an empty held-out or empty
/// observed set are a degeneracy error.
pub fn sample_holdout(
    x: ArrayView2<f64>,
    fraction: f64,
    seed: u64,
) -> Result<HoldoutMask, ValidationError> {
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(ConfigError::InvalidHoldoutFraction(fraction).into());
    }
    let n_total = x.len();
    let n_heldout = (fraction * n_total as f64).round() as usize;
    if n_heldout == 0 || n_heldout >= n_total {
        return Err(ValidationError::DegenerateHoldout { n_heldout, n_total });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut flat = sample(&mut rng, n_total, n_heldout).into_vec();
    flat.sort_unstable();

    let n_cols = x.ncols();
    let pairs: Vec<(usize, usize)> = flat.iter().map(|&f| (f / n_cols, f % n_cols)).collect();

    let held_sum: f64 = pairs.iter().map(|&(i, j)| x[[i, j]]).sum();
    let fill = (x.sum() - held_sum) / (n_total - n_heldout) as f64;

    Ok(HoldoutMask { pairs, fill })
}

/// Scores the penalty sequence by hold-out reconstruction error.
///
/// A working copy of the matrix gets its held-out entries replaced by the
/// observed grand mean, so graph construction and solving see a complete
/// matrix; both axis graphs are rebuilt from that masked copy. The full path
/// then runs on the masked matrix, and each path point is scored by the mean
/// squared difference between its estimate and the *original* values at the
/// held-out indices only. Ties for the minimum go to the lowest index.
///
/// The path itself is returned alongside the scores so callers can reuse the
/// selected point's groupings without re-solving.
pub fn cross_validate(
    x: ArrayView2<f64>,
    penalties: &PenaltySequence,
    config: &BiclusterConfig,
    fraction: f64,
    seed: u64,
) -> Result<(ValidationResult, SolvePath), ValidationError> {
    config.validate()?;
    let mask = sample_holdout(x, fraction, seed)?;
    log::info!(
        "Cross-validating over {} strengths with {} held-out entries (fill = {:.6}).",
        penalties.len(),
        mask.pairs.len(),
        mask.fill
    );

    let mut masked = x.to_owned();
    for &(i, j) in &mask.pairs {
        masked[[i, j]] = mask.fill;
    }

    let (row_graph, col_graph) =
        build_axis_graphs(masked.view(), config.phi, config.k_row, config.k_col)
            .map_err(PathError::from)?;
    let path = solve_path(masked.view(), &row_graph, &col_graph, penalties, config)?;

    let n_heldout = mask.pairs.len();
    let errors: Vec<f64> = path
        .points
        .iter()
        .map(|point| {
            let sse: f64 = mask
                .pairs
                .iter()
                .map(|&(i, j)| {
                    let diff = point.estimate[[i, j]] - x[[i, j]];
                    diff * diff
                })
                .sum();
            sse / n_heldout as f64
        })
        .collect();

    // Strict improvement only, so ties resolve to the lowest index.
    let mut best_index = 0;
    for (index, &error) in errors.iter().enumerate() {
        if error < errors[best_index] {
            best_index = index;
        }
    }

    log::info!(
        "Hold-out errors: best index {} (gamma = {:.6e}, error = {:.6e}).",
        best_index,
        penalties.strengths()[best_index],
        errors[best_index]
    );

    Ok((
        ValidationResult {
            errors,
            best_index,
            n_heldout,
        },
        path,
    ))
}
