use crate::config::BiclusterConfig;
use crate::graph::KnnGraph;
use crate::union_find::UnionFind;
use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use ndarray_linalg::{Eigh, UPLO};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised inside the fusion-penalized solve. Numeric instability is
/// fatal for the run: corrupted state must never leak into later
/// warm-started strengths.
#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Eigendecomposition of a graph Laplacian failed: {0}")]
    Eigendecomposition(#[from] ndarray_linalg::error::LinalgError),

    #[error(
        "Non-finite values appeared in the solver state at iteration {iteration} (gamma = {gamma:.6e}). The input may be mis-scaled."
    )]
    NumericInstability { gamma: f64, iteration: usize },
}

/// A partition of one axis's indices into fused groups.
///
/// `assignment[i]` is the group id of node `i`; ids are dense in
/// `0..n_groups` and numbered by first occurrence along the axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grouping {
    pub assignment: Vec<usize>,
    pub n_groups: usize,
}

impl Grouping {
    /// The trivial partition: every node its own group.
    pub fn singletons(n: usize) -> Self {
        Grouping {
            assignment: (0..n).collect(),
            n_groups: n,
        }
    }

    pub fn len(&self) -> usize {
        self.assignment.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignment.is_empty()
    }
}

/// Cached diagonalization of the two graph Laplacians.
///
/// The U-update solves the Sylvester system
/// `(I + rho*L_r) U + rho * U * L_c = R`; with `L_r = P D P^T` and
/// `L_c = Q E Q^T` the solution is elementwise in the eigenbasis,
/// `U = P (R_tilde / (1 + rho (d_i + e_j))) Q^T`. The decomposition depends
/// only on graph topology, so it is computed once per (row graph, column
/// graph) pair and reused across every strength and warm-started iteration
/// of a path. It must never be shared across different graph outputs.
pub struct SolverFactorization {
    row_eigvals: Array1<f64>,
    row_eigvecs: Array2<f64>,
    col_eigvals: Array1<f64>,
    col_eigvecs: Array2<f64>,
}

impl SolverFactorization {
    pub fn new(row_graph: &KnnGraph, col_graph: &KnnGraph) -> Result<Self, SolverError> {
        let (row_eigvals, row_eigvecs) = row_graph.laplacian().eigh(UPLO::Lower)?;
        let (col_eigvals, col_eigvecs) = col_graph.laplacian().eigh(UPLO::Lower)?;
        Ok(SolverFactorization {
            row_eigvals,
            row_eigvecs,
            col_eigvals,
            col_eigvecs,
        })
    }

    /// Solves `(I + rho*L_r) U + rho * U * L_c = rhs` through the cached
    /// eigenbases. Laplacian eigenvalues are non-negative, so with rho > 0
    /// every denominator is at least 1.
    fn solve(&self, rhs: &Array2<f64>, rho: f64) -> Array2<f64> {
        let tilde = self.row_eigvecs.t().dot(rhs).dot(&self.col_eigvecs);
        let mut scaled = tilde;
        for ((i, j), value) in scaled.indexed_iter_mut() {
            *value /= 1.0 + rho * (self.row_eigvals[i] + self.col_eigvals[j]);
        }
        self.row_eigvecs.dot(&scaled).dot(&self.col_eigvecs.t())
    }
}

/// The full ADMM state for one biclustering problem: the primal estimate,
/// per-edge auxiliary difference vectors for each axis, and the scaled dual
/// variables linking them. Passed state-in/state-out so a path can thread it
/// through successive strengths as a warm start.
#[derive(Debug, Clone)]
pub struct AdmmState {
    /// Primal estimate, same shape as the input matrix.
    pub u: Array2<f64>,
    /// Row-edge auxiliaries, shape (row edges, n_cols).
    pub v_row: Array2<f64>,
    /// Column-edge auxiliaries, shape (column edges, n_rows).
    pub v_col: Array2<f64>,
    pub dual_row: Array2<f64>,
    pub dual_col: Array2<f64>,
}

impl AdmmState {
    /// Cold start: U = X, auxiliaries at the current edge differences,
    /// duals at zero.
    pub fn cold(x: ArrayView2<f64>, row_graph: &KnnGraph, col_graph: &KnnGraph) -> Self {
        let (n_rows, n_cols) = x.dim();
        AdmmState {
            u: x.to_owned(),
            v_row: row_graph.differences(x),
            v_col: col_graph.differences(x.t()),
            dual_row: Array2::zeros((row_graph.n_edges(), n_cols)),
            dual_col: Array2::zeros((col_graph.n_edges(), n_rows)),
        }
    }

    fn is_finite(&self) -> bool {
        self.u.iter().all(|v| v.is_finite())
            && self.v_row.iter().all(|v| v.is_finite())
            && self.v_col.iter().all(|v| v.is_finite())
            && self.dual_row.iter().all(|v| v.is_finite())
            && self.dual_col.iter().all(|v| v.is_finite())
    }
}

/// Result of one fixed-strength solve.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub estimate: Array2<f64>,
    pub row_groups: Grouping,
    pub col_groups: Grouping,
    pub iterations: usize,
    pub converged: bool,
}

/// Minimizes
/// `1/2 ||U - X||_F^2 + gamma * sum_e w_e ||U_i. - U_j.||_2 (row edges)
///  + gamma * sum_e w_e ||U_.i - U_.j||_2 (column edges)`
/// by ADMM with scaled duals, starting from (and overwriting) `state`.
///
/// Each iteration is: a Sylvester solve for U through `factorization`,
/// group-wise soft-thresholding of every edge difference by
/// `gamma * w_e / rho` (the step that produces exact fusion), and a
/// fixed-step dual ascent on the primal residual. Iteration stops when the
/// pooled primal residual `||A U - V||_F` and dual residual
/// `rho * ||V - V_prev||_F` both drop below the configured tolerance scaled
/// by the square root of the total auxiliary entry count, or at the
/// iteration cap, in which case the best-effort estimate is returned with
/// `converged == false`.
///
/// Groups are read off the auxiliaries, not U: two nodes fuse exactly when
/// the shrinkage step collapsed a connecting path of edge differences to
/// zero, which union-find turns into a partition. At `gamma = 0` the
/// threshold vanishes, nothing shrinks to zero, and the solve degenerates to
/// `U = X` with singleton groups, with no special-case branch.
pub fn solve(
    x: ArrayView2<f64>,
    row_graph: &KnnGraph,
    col_graph: &KnnGraph,
    factorization: &SolverFactorization,
    gamma: f64,
    config: &BiclusterConfig,
    state: &mut AdmmState,
) -> Result<SolveOutcome, SolverError> {
    debug_assert!(gamma >= 0.0);
    let rho = config.rho;

    let thresholds_row: Array1<f64> = row_graph
        .edges
        .iter()
        .map(|e| gamma * e.weight / rho)
        .collect();
    let thresholds_col: Array1<f64> = col_graph
        .edges
        .iter()
        .map(|e| gamma * e.weight / rho)
        .collect();

    // Residuals are compared against an absolute tolerance scaled by the
    // number of auxiliary entries, so the test is insensitive to problem size.
    let n_aux_entries = state.v_row.len() + state.v_col.len();
    let residual_tol = config.tolerance * (n_aux_entries.max(1) as f64).sqrt();

    let mut iterations = 0;
    let mut converged = false;

    for iter in 1..=config.max_iterations {
        iterations = iter;

        // U-update: fidelity to X balanced against consensus with the
        // auxiliaries, via the cached Sylvester factorization.
        let mut rhs = x.to_owned();
        let row_feedback = row_graph.scatter_transpose((&state.v_row - &state.dual_row).view());
        rhs.scaled_add(rho, &row_feedback);
        let col_feedback = col_graph.scatter_transpose((&state.v_col - &state.dual_col).view());
        rhs.scaled_add(rho, &col_feedback.t());
        state.u = factorization.solve(&rhs, rho);

        let d_row = row_graph.differences(state.u.view());
        let d_col = col_graph.differences(state.u.t());

        // V-update: group soft-thresholding per edge.
        let new_v_row = shrink_edges(&(&d_row + &state.dual_row), &thresholds_row);
        let new_v_col = shrink_edges(&(&d_col + &state.dual_col), &thresholds_col);

        let dual_residual =
            rho * (frob_sq_diff(&new_v_row, &state.v_row) + frob_sq_diff(&new_v_col, &state.v_col))
                .sqrt();
        state.v_row = new_v_row;
        state.v_col = new_v_col;

        // Dual ascent on the scaled residual.
        state.dual_row += &(&d_row - &state.v_row);
        state.dual_col += &(&d_col - &state.v_col);

        let primal_residual =
            (frob_sq_diff(&d_row, &state.v_row) + frob_sq_diff(&d_col, &state.v_col)).sqrt();

        if !state.is_finite() || !primal_residual.is_finite() || !dual_residual.is_finite() {
            return Err(SolverError::NumericInstability {
                gamma,
                iteration: iter,
            });
        }

        if primal_residual <= residual_tol && dual_residual <= residual_tol {
            converged = true;
            break;
        }
    }

    if !converged {
        log::warn!(
            "ADMM did not converge within {} iterations at gamma = {:.6e}; returning best-effort estimate.",
            config.max_iterations,
            gamma
        );
    }

    let row_groups = groups_from_auxiliaries(&state.v_row, row_graph, config.fusion_tolerance);
    let col_groups = groups_from_auxiliaries(&state.v_col, col_graph, config.fusion_tolerance);
    log::debug!(
        "Solved gamma = {:.6e} in {} iteration(s): {} row group(s), {} column group(s).",
        gamma,
        iterations,
        row_groups.n_groups,
        col_groups.n_groups
    );

    Ok(SolveOutcome {
        estimate: state.u.clone(),
        row_groups,
        col_groups,
        iterations,
        converged,
    })
}

/// Vector soft-thresholding of each edge row of `b` by its own threshold:
/// rows with norm at or below the threshold collapse to exactly zero,
/// otherwise they shrink toward zero by the threshold amount. Edges are
/// independent, so the loop runs in parallel.
fn shrink_edges(b: &Array2<f64>, thresholds: &Array1<f64>) -> Array2<f64> {
    let mut out = b.clone();
    Zip::from(out.axis_iter_mut(Axis(0)))
        .and(thresholds)
        .par_for_each(|mut row, &t| {
            let norm = row.iter().map(|&v| v * v).sum::<f64>().sqrt();
            if norm <= t {
                row.fill(0.0);
            } else if t > 0.0 {
                row *= 1.0 - t / norm;
            }
        });
    out
}

fn frob_sq_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    Zip::from(a)
        .and(b)
        .fold(0.0, |acc, &x, &y| acc + (x - y) * (x - y))
}

/// Union-find over the edges whose auxiliary difference vector shrank to
/// (numerically) zero. Comparing rows of U directly would confuse
/// approximate equality with exact fusion; the auxiliaries carry the exact
/// zeros the shrinkage step produced.
fn groups_from_auxiliaries(v: &Array2<f64>, graph: &KnnGraph, fusion_tol: f64) -> Grouping {
    let mut uf = UnionFind::new(graph.n_nodes);
    for (e, edge) in graph.edges.iter().enumerate() {
        let norm = v.row(e).iter().map(|&x| x * x).sum::<f64>().sqrt();
        if norm <= fusion_tol {
            uf.union(edge.i, edge.j);
        }
    }
    let n_groups = uf.n_sets();
    Grouping {
        assignment: uf.labels(),
        n_groups,
    }
}
