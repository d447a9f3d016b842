//! Neighbor-graph smoothing of the accessibility matrix.
//!
//! Every cell's feature vector is replaced by an average over its
//! neighbors from the externally computed graph, weighted by inverse
//! distance. The graph's cell ordering must have been validated against
//! the matrix before this runs.

use crate::io::neighbors::NeighborGraph;
use anyhow::{Result, bail};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;

const DISTANCE_EPSILON: f64 = 1e-6;

/// Smooth a matrix over a neighbor graph of matching row count.
///
/// The output has the same shape as the input; each row is the
/// inverse-distance-weighted average of the rows named by the cell's
/// neighbor list. A neighbor at distance zero (typically the cell itself)
/// receives the largest weight.
pub fn smooth_with_neighbors(
    m: &CsrMatrix<f64>,
    graph: &NeighborGraph,
) -> Result<CsrMatrix<f64>> {
    let n = m.nrows();
    if graph.n_cells() != n {
        bail!(
            "Neighbor graph covers {} cells but the matrix has {}",
            graph.n_cells(),
            n
        );
    }
    if graph.n_neighbors() == 0 {
        bail!("Neighbor graph has no neighbors per cell");
    }
    for row in &graph.indices {
        for &j in row {
            if j >= n {
                bail!("Neighbor index {} out of bounds for {} cells", j, n);
            }
        }
    }

    let n_features = m.ncols();
    let rows: Vec<Vec<(usize, f64)>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let idx = &graph.indices[i];
            let dist = &graph.distances[i];
            let weights: Vec<f64> = dist.iter().map(|&d| 1.0 / (d + DISTANCE_EPSILON)).collect();
            let total: f64 = weights.iter().sum();

            let mut acc = vec![0.0; n_features];
            for (&j, &w) in idx.iter().zip(&weights) {
                let row = m.row(j);
                for (&col, &val) in row.col_indices().iter().zip(row.values()) {
                    acc[col] += w * val;
                }
            }
            acc.iter()
                .enumerate()
                .filter(|&(_, &v)| v != 0.0)
                .map(|(col, &v)| (col, v / total))
                .collect()
        })
        .collect();

    let mut coo = CooMatrix::new(n, n_features);
    for (i, row) in rows.into_iter().enumerate() {
        for (col, val) in row {
            coo.push(i, col, val);
        }
    }
    Ok(CsrMatrix::from(&coo))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn graph(cells: usize, indices: Vec<Vec<usize>>, distances: Vec<Vec<f64>>) -> NeighborGraph {
        NeighborGraph {
            cells: (0..cells).map(|i| format!("c{}", i)).collect(),
            indices,
            distances,
        }
    }

    fn single_feature_matrix(values: &[f64]) -> CsrMatrix<f64> {
        let mut coo = CooMatrix::new(values.len(), 1);
        for (i, &v) in values.iter().enumerate() {
            if v != 0.0 {
                coo.push(i, 0, v);
            }
        }
        CsrMatrix::from(&coo)
    }

    #[test]
    fn test_smoothing_weights_by_inverse_distance() {
        let m = single_feature_matrix(&[10.0, 20.0, 40.0]);
        // Cell 0 averages itself (distance 0) with cell 2 at distance 1.
        let g = graph(
            3,
            vec![vec![0, 2], vec![1, 0], vec![2, 1]],
            vec![vec![0.0, 1.0], vec![0.0, 1.0], vec![0.0, 1.0]],
        );
        let smoothed = smooth_with_neighbors(&m, &g).unwrap();
        // Weights ~ 1/eps and 1: essentially the cell's own value with a
        // tiny pull toward the neighbor.
        let v = smoothed.row(0).values()[0];
        assert!(v > 10.0 && v < 10.1);
        // Equal distances average equally.
        let g_eq = graph(
            3,
            vec![vec![1, 2], vec![0, 2], vec![0, 1]],
            vec![vec![1.0, 1.0], vec![1.0, 1.0], vec![1.0, 1.0]],
        );
        let smoothed_eq = smooth_with_neighbors(&m, &g_eq).unwrap();
        assert_abs_diff_eq!(smoothed_eq.row(0).values()[0], 30.0, epsilon = 1e-9);
    }

    #[test]
    fn test_smoothing_preserves_shape() {
        let m = single_feature_matrix(&[1.0, 2.0]);
        let g = graph(2, vec![vec![1], vec![0]], vec![vec![1.0], vec![1.0]]);
        let smoothed = smooth_with_neighbors(&m, &g).unwrap();
        assert_eq!((smoothed.nrows(), smoothed.ncols()), (2, 1));
    }

    #[test]
    fn test_smoothing_rejects_row_count_mismatch() {
        let m = single_feature_matrix(&[1.0, 2.0, 3.0]);
        let g = graph(2, vec![vec![1], vec![0]], vec![vec![1.0], vec![1.0]]);
        assert!(smooth_with_neighbors(&m, &g).is_err());
    }
}
