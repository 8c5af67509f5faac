use crate::config::{BiclusterConfig, ConfigError, PenaltySequence};
use crate::graph::{GraphError, KnnGraph, build_axis_graphs};
use crate::solver::{AdmmState, Grouping, SolverError, SolverFactorization, solve};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for a whole-path run. Configuration and graph degeneracy abort
/// before any solving; solver instability aborts the path at the offending
/// strength, carrying its position.
#[derive(Error, Debug)]
pub enum PathError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Solver failed at path index {index} (gamma = {gamma:.6e}): {source}")]
    Solver {
        index: usize,
        gamma: f64,
        #[source]
        source: SolverError,
    },
}

/// The full solver output at one penalty strength.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathPoint {
    pub gamma: f64,
    pub estimate: Array2<f64>,
    pub row_groups: Grouping,
    pub col_groups: Grouping,
    pub iterations: usize,
    /// False when the strength hit the iteration cap; the estimate is still
    /// usable but lower confidence.
    pub converged: bool,
}

/// An ordered solution path, one point per strength.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolvePath {
    pub points: Vec<PathPoint>,
}

impl SolvePath {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Per-strength (row group count, column group count), in path order.
    pub fn group_count_profile(&self) -> Vec<(usize, usize)> {
        self.points
            .iter()
            .map(|p| (p.row_groups.n_groups, p.col_groups.n_groups))
            .collect()
    }
}

/// Runs the fusion solver across the penalty sequence in ascending order,
/// warm-starting every strength from the previous one's final ADMM state.
/// Adjacent strengths have similar solutions, so warm starts cut the
/// iteration count substantially compared to cold-starting each point.
///
/// The Laplacian factorization is built once from the supplied graphs and
/// reused for the whole path. Non-convergence at one strength is recorded on
/// its point and the path continues; numeric instability aborts the
/// remainder, since a corrupted state would poison every later warm start.
///
/// Group partitions are expected to coarsen as strength grows; that property
/// is checked rather than assumed, and a violation is logged, not fixed up.
pub fn solve_path(
    x: ArrayView2<f64>,
    row_graph: &KnnGraph,
    col_graph: &KnnGraph,
    penalties: &PenaltySequence,
    config: &BiclusterConfig,
) -> Result<SolvePath, PathError> {
    config.validate()?;

    let factorization = SolverFactorization::new(row_graph, col_graph).map_err(|source| {
        PathError::Solver {
            index: 0,
            gamma: penalties.strengths()[0],
            source,
        }
    })?;

    log::info!(
        "Solving fusion path: {} strengths, {} row edges, {} column edges.",
        penalties.len(),
        row_graph.n_edges(),
        col_graph.n_edges()
    );

    let mut state = AdmmState::cold(x, row_graph, col_graph);
    let mut points = Vec::with_capacity(penalties.len());

    for (index, &gamma) in penalties.strengths().iter().enumerate() {
        let outcome = solve(
            x,
            row_graph,
            col_graph,
            &factorization,
            gamma,
            config,
            &mut state,
        )
        .map_err(|source| PathError::Solver {
            index,
            gamma,
            source,
        })?;

        if let Some(prev) = points.last() {
            check_coarsening(prev, &outcome.row_groups, &outcome.col_groups, gamma);
        }

        points.push(PathPoint {
            gamma,
            estimate: outcome.estimate,
            row_groups: outcome.row_groups,
            col_groups: outcome.col_groups,
            iterations: outcome.iterations,
            converged: outcome.converged,
        });
    }

    let n_unconverged = points.iter().filter(|p| !p.converged).count();
    if n_unconverged > 0 {
        log::warn!(
            "{} of {} path points did not converge within the iteration budget.",
            n_unconverged,
            points.len()
        );
    }

    Ok(SolvePath { points })
}

/// Convenience entry point: builds both axis graphs from the matrix, then
/// runs the path. Returns the graphs alongside the path so callers can
/// inspect connectivity.
pub fn bicluster_path(
    x: ArrayView2<f64>,
    penalties: &PenaltySequence,
    config: &BiclusterConfig,
) -> Result<(KnnGraph, KnnGraph, SolvePath), PathError> {
    config.validate()?;
    let (row_graph, col_graph) = build_axis_graphs(x, config.phi, config.k_row, config.k_col)?;
    let path = solve_path(x, &row_graph, &col_graph, penalties, config)?;
    Ok((row_graph, col_graph, path))
}

fn check_coarsening(prev: &PathPoint, row_groups: &Grouping, col_groups: &Grouping, gamma: f64) {
    if row_groups.n_groups > prev.row_groups.n_groups {
        log::warn!(
            "Row group count rose from {} to {} between gamma = {:.6e} and {:.6e}; coarsening monotonicity violated.",
            prev.row_groups.n_groups,
            row_groups.n_groups,
            prev.gamma,
            gamma
        );
    }
    if col_groups.n_groups > prev.col_groups.n_groups {
        log::warn!(
            "Column group count rose from {} to {} between gamma = {:.6e} and {:.6e}; coarsening monotonicity violated.",
            prev.col_groups.n_groups,
            col_groups.n_groups,
            prev.gamma,
            gamma
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn two_block_matrix(noise: f64, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((6, 6), |(i, j)| {
            let base = if i < 3 && j < 3 {
                0.0
            } else if i >= 3 && j >= 3 {
                10.0
            } else {
                5.0
            };
            base + rng.gen_range(-noise..noise)
        })
    }

    fn test_config() -> BiclusterConfig {
        BiclusterConfig {
            phi: 0.5,
            k_row: 2,
            k_col: 2,
            max_iterations: 3000,
            ..Default::default()
        }
    }

    #[test]
    fn path_starts_at_identity_and_coarsens() {
        let x = two_block_matrix(0.05, 11);
        let config = test_config();
        let penalties =
            PenaltySequence::new(vec![0.0, 1.0, 10.0, 100.0, 1000.0, 10000.0]).unwrap();
        let (_, _, path) = bicluster_path(x.view(), &penalties, &config).unwrap();

        assert_eq!(path.len(), penalties.len());

        // Strength 0 reduces to the input with singleton groups.
        let first = &path.points[0];
        for (&got, &want) in first.estimate.iter().zip(x.iter()) {
            assert_abs_diff_eq!(got, want, epsilon = 1e-4);
        }
        assert_eq!(first.row_groups.n_groups, 6);
        assert_eq!(first.col_groups.n_groups, 6);

        // Group counts never increase along the path.
        let profile = path.group_count_profile();
        for pair in profile.windows(2) {
            assert!(pair[1].0 <= pair[0].0, "row groups grew: {profile:?}");
            assert!(pair[1].1 <= pair[0].1, "column groups grew: {profile:?}");
        }
    }

    #[test]
    fn warm_start_threads_state_between_strengths() {
        let x = two_block_matrix(0.05, 13);
        let config = test_config();
        let (row_graph, col_graph) =
            build_axis_graphs(x.view(), config.phi, config.k_row, config.k_col).unwrap();

        // A fine path warm-started end to end must reach the same final
        // grouping as solving the last strength alone.
        let fine = PenaltySequence::log_spaced(0.1, 50.0, 8).unwrap();
        let warm = solve_path(x.view(), &row_graph, &col_graph, &fine, &config).unwrap();

        let single = PenaltySequence::new(vec![50.0]).unwrap();
        let cold = solve_path(x.view(), &row_graph, &col_graph, &single, &config).unwrap();

        let warm_last = warm.points.last().unwrap();
        let cold_last = cold.points.last().unwrap();
        assert_eq!(
            warm_last.row_groups.n_groups,
            cold_last.row_groups.n_groups
        );
        assert_eq!(
            warm_last.col_groups.n_groups,
            cold_last.col_groups.n_groups
        );
        for (&a, &b) in warm_last.estimate.iter().zip(cold_last.estimate.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-3);
        }
    }

    #[test]
    fn invalid_config_aborts_before_solving() {
        let x = two_block_matrix(0.05, 17);
        let config = BiclusterConfig {
            rho: 0.0,
            ..test_config()
        };
        let penalties = PenaltySequence::new(vec![1.0]).unwrap();
        let (row_graph, col_graph) = build_axis_graphs(x.view(), 0.5, 2, 2).unwrap();
        assert!(matches!(
            solve_path(x.view(), &row_graph, &col_graph, &penalties, &config),
            Err(PathError::Config(ConfigError::NonPositiveRho(_)))
        ));
    }

    #[test]
    fn non_finite_input_aborts_the_path_with_its_position() {
        let mut x = two_block_matrix(0.05, 23);
        x[[2, 2]] = f64::INFINITY;
        let config = test_config();
        let penalties = PenaltySequence::new(vec![0.0, 1.0, 10.0]).unwrap();

        // Instability is fatal for the whole remaining path, not a per-point
        // tag: the error carries the position where solving stopped.
        match bicluster_path(x.view(), &penalties, &config) {
            Err(PathError::Solver {
                index,
                gamma,
                source: SolverError::NumericInstability { .. },
            }) => {
                assert_eq!(index, 0);
                assert_eq!(gamma, 0.0);
            }
            other => panic!("Expected a NumericInstability abort, got {other:?}"),
        }
    }

    #[test]
    fn path_points_survive_a_serde_round_trip() {
        let x = two_block_matrix(0.05, 29);
        let config = test_config();
        let penalties = PenaltySequence::new(vec![0.0, 100.0]).unwrap();
        let (_, _, path) = bicluster_path(x.view(), &penalties, &config).unwrap();

        let json = serde_json::to_string(&path).unwrap();
        let back: SolvePath = serde_json::from_str(&json).unwrap();

        assert_eq!(back.len(), path.len());
        for (a, b) in path.points.iter().zip(back.points.iter()) {
            assert_eq!(a.gamma, b.gamma);
            assert_eq!(a.row_groups, b.row_groups);
            assert_eq!(a.col_groups, b.col_groups);
            assert_eq!(a.iterations, b.iterations);
            assert_eq!(a.converged, b.converged);
            assert_eq!(a.estimate, b.estimate);
        }
    }

    #[test]
    fn oversized_k_is_a_graph_error() {
        let x = two_block_matrix(0.05, 19);
        let config = BiclusterConfig {
            k_row: 6,
            ..test_config()
        };
        let penalties = PenaltySequence::new(vec![1.0]).unwrap();
        assert!(matches!(
            bicluster_path(x.view(), &penalties, &config),
            Err(PathError::Graph(GraphError::NeighborCountTooLarge { .. }))
        ));
    }
}
