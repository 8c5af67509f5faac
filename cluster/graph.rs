use crate::config::ConfigError;
use crate::union_find::UnionFind;
use itertools::Itertools;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which axis of the data matrix a graph spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphAxis {
    Rows,
    Columns,
}

impl GraphAxis {
    fn label(self) -> &'static str {
        match self {
            GraphAxis::Rows => "row",
            GraphAxis::Columns => "column",
        }
    }
}

/// Errors surfaced during sparse affinity graph construction. These are all
/// detected before any solving begins.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error(
        "Neighbor count k={k} is too large for the {axis} axis with {n_nodes} nodes; k must be at most n-1."
    )]
    NeighborCountTooLarge {
        k: usize,
        n_nodes: usize,
        axis: &'static str,
    },

    #[error("k-NN selection on the {0} axis produced no edges with positive total weight.")]
    NoEdges(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// One undirected, weighted edge of a k-NN graph. Endpoints satisfy `i < j`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub i: usize,
    pub j: usize,
    pub weight: f64,
}

/// A sparse affinity graph over one axis of a data matrix, together with its
/// edge-incidence operator and connectivity diagnostic.
///
/// Edges are stored in lexicographic `(i, j)` order, so the graph (and the row
/// ordering of the incidence operator) is fully determined by the input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnnGraph {
    pub axis: GraphAxis,
    pub n_nodes: usize,
    pub edges: Vec<Edge>,
    /// Number of connected components of the retained edge set. A value above
    /// 1 means the fusion penalty can never merge everything into one group;
    /// it is reported, never silently repaired.
    pub n_components: usize,
}

impl KnnGraph {
    pub fn n_edges(&self) -> usize {
        self.edges.len()
    }

    /// Applies the edge-incidence operator: maps node-major values (one row
    /// per node) to the stack of per-edge pairwise differences.
    pub fn differences(&self, node_values: ArrayView2<f64>) -> Array2<f64> {
        debug_assert_eq!(node_values.nrows(), self.n_nodes);
        let dim = node_values.ncols();
        let mut out = Array2::zeros((self.edges.len(), dim));
        for (e, edge) in self.edges.iter().enumerate() {
            let diff = &node_values.row(edge.i) - &node_values.row(edge.j);
            out.row_mut(e).assign(&diff);
        }
        out
    }

    /// Applies the transpose of the incidence operator: scatters per-edge
    /// values back onto nodes with the edge's +/- signs.
    pub fn scatter_transpose(&self, edge_values: ArrayView2<f64>) -> Array2<f64> {
        debug_assert_eq!(edge_values.nrows(), self.edges.len());
        let dim = edge_values.ncols();
        let mut out = Array2::zeros((self.n_nodes, dim));
        for (e, edge) in self.edges.iter().enumerate() {
            let row = edge_values.row(e);
            let mut target = out.row_mut(edge.i);
            target += &row;
            let mut target = out.row_mut(edge.j);
            target -= &row;
        }
        out
    }

    /// The unweighted graph Laplacian `A^T A` of the incidence operator,
    /// needed by the solver's linear step.
    pub fn laplacian(&self) -> Array2<f64> {
        let mut lap = Array2::zeros((self.n_nodes, self.n_nodes));
        for edge in &self.edges {
            lap[[edge.i, edge.i]] += 1.0;
            lap[[edge.j, edge.j]] += 1.0;
            lap[[edge.i, edge.j]] -= 1.0;
            lap[[edge.j, edge.i]] -= 1.0;
        }
        lap
    }
}

/// Builds the k-nearest-neighbor affinity graph over one axis of `matrix`.
///
/// An edge (i, j) is retained when i is among j's k nearest neighbors *or*
/// j is among i's (symmetric OR), which keeps the graph connected with fewer
/// edges than a mutual k-NN rule. Neighbor ties are broken by lowest index.
/// Retained edges are weighted with a Gaussian kernel on squared Euclidean
/// distance, `exp(-phi/p * d2)` with `p` the compared-vector dimensionality,
/// then rescaled by `1 / (sqrt(p) * sum_of_preweights)` so weight magnitudes
/// are comparable across axes and data scales.
pub fn knn_graph(
    matrix: ArrayView2<f64>,
    axis: GraphAxis,
    phi: f64,
    k: usize,
) -> Result<KnnGraph, GraphError> {
    if !(phi > 0.0) || !phi.is_finite() {
        return Err(ConfigError::NonPositivePhi(phi).into());
    }
    if k == 0 {
        return Err(ConfigError::ZeroNeighbors(axis.label()).into());
    }

    // Orient the matrix so graph nodes are rows of the working view.
    let node_major = match axis {
        GraphAxis::Rows => matrix.view(),
        GraphAxis::Columns => matrix.t(),
    };
    let n_nodes = node_major.nrows();
    let p = node_major.ncols();

    if k >= n_nodes {
        return Err(GraphError::NeighborCountTooLarge {
            k,
            n_nodes,
            axis: axis.label(),
        });
    }

    // Per-node k-NN search; nodes are independent, so run them in parallel.
    // Each worker materializes only its own distance row.
    let neighbor_lists: Vec<Vec<(usize, f64)>> = (0..n_nodes)
        .into_par_iter()
        .map(|i| {
            let row_i = node_major.row(i);
            let mut candidates: Vec<(f64, usize)> = (0..n_nodes)
                .filter(|&j| j != i)
                .map(|j| {
                    let d2 = row_i
                        .iter()
                        .zip(node_major.row(j).iter())
                        .map(|(&a, &b)| (a - b) * (a - b))
                        .sum::<f64>();
                    (d2, j)
                })
                .collect();
            // Ties on distance resolve to the lowest index, so the retained
            // edge set is reproducible.
            candidates.sort_unstable_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.1.cmp(&b.1))
            });
            candidates
                .into_iter()
                .take(k)
                .map(|(d2, j)| (j, d2))
                .collect()
        })
        .collect();

    // Symmetrize with the OR rule, normalizing endpoints to i < j; sorting and
    // deduplicating keeps edge order canonical.
    let pairs: Vec<(usize, usize, f64)> = neighbor_lists
        .iter()
        .enumerate()
        .flat_map(|(i, neighbors)| {
            neighbors.iter().map(move |&(j, d2)| {
                let (a, b) = if i < j { (i, j) } else { (j, i) };
                (a, b, d2)
            })
        })
        .sorted_by(|x, y| (x.0, x.1).cmp(&(y.0, y.1)))
        .dedup_by(|x, y| (x.0, x.1) == (y.0, y.1))
        .collect();

    let preweights: Vec<f64> = pairs
        .iter()
        .map(|&(_, _, d2)| (-phi / p as f64 * d2).exp())
        .collect();
    let total: f64 = preweights.iter().sum();
    if pairs.is_empty() || !(total > 0.0) {
        return Err(GraphError::NoEdges(axis.label()));
    }
    let scale = (p as f64).sqrt() * total;

    let edges: Vec<Edge> = pairs
        .iter()
        .zip(&preweights)
        .map(|(&(i, j, _), &pre)| Edge {
            i,
            j,
            weight: pre / scale,
        })
        .collect();

    // Connectivity diagnostic over the retained edge set.
    let mut components = UnionFind::new(n_nodes);
    for edge in &edges {
        components.union(edge.i, edge.j);
    }
    let n_components = components.n_sets();
    if n_components > 1 {
        log::warn!(
            "{} graph is disconnected: {} components over {} nodes (k={}); full fusion is unreachable.",
            axis.label(),
            n_components,
            n_nodes,
            k
        );
    }
    log::debug!(
        "Built {} graph: {} nodes, {} edges, {} component(s).",
        axis.label(),
        n_nodes,
        edges.len(),
        n_components
    );

    Ok(KnnGraph {
        axis,
        n_nodes,
        edges,
        n_components,
    })
}

/// Builds the row graph and column graph every caller needs as a pair.
pub fn build_axis_graphs(
    matrix: ArrayView2<f64>,
    phi: f64,
    k_row: usize,
    k_col: usize,
) -> Result<(KnnGraph, KnnGraph), GraphError> {
    let rows = knn_graph(matrix, GraphAxis::Rows, phi, k_row)?;
    let cols = knn_graph(matrix, GraphAxis::Columns, phi, k_col)?;
    Ok((rows, cols))
}
