//! PCA embedding, neighbor search and layer moments for the aligned RNA
//! matrix.
//!
//! The eigendecomposition is delegated to nalgebra; everything here is
//! the glue that centers the data, picks the leading components and
//! averages layers over the resulting neighborhoods.

use anyhow::{Result, bail};
use nalgebra::{DMatrix, SymmetricEigen};
use nalgebra_sparse::CsrMatrix;
use ndarray::Array2;
use rayon::prelude::*;

/// Principal-component scores of a sparse cells-by-features matrix.
///
/// Columns are ordered by decreasing explained variance. `n_comps` is
/// clamped to what the data can support.
pub fn pca(m: &CsrMatrix<f64>, n_comps: usize) -> Result<Array2<f64>> {
    let n_cells = m.nrows();
    let n_features = m.ncols();
    if n_cells < 2 {
        bail!("PCA requires at least 2 cells, got {}", n_cells);
    }
    if n_comps == 0 {
        bail!("Number of principal components must be positive");
    }
    let k = n_comps.min(n_features).min(n_cells - 1);

    // Dense centered copy.
    let mut centered = Array2::zeros((n_cells, n_features));
    for (row, col, &val) in m.triplet_iter() {
        centered[(row, col)] = val;
    }
    for j in 0..n_features {
        let mean = centered.column(j).mean().unwrap_or(0.0);
        centered.column_mut(j).mapv_inplace(|v| v - mean);
    }

    if n_features <= n_cells {
        // Feature-space covariance.
        let cov = centered.t().dot(&centered) / (n_cells as f64 - 1.0);
        let eigen = symmetric_eigen(&cov);
        let components = leading_vectors(&eigen, k);
        Ok(centered.dot(&components))
    } else {
        // Gram trick: eigenvectors of X Xt give the scores directly.
        let gram = centered.dot(&centered.t());
        let eigen = symmetric_eigen(&gram);
        let vectors = leading_vectors(&eigen, k);
        let mut scores = vectors;
        for (j, &(_, value)) in leading_indices(&eigen, k).iter().enumerate() {
            let scale = value.max(0.0).sqrt();
            scores.column_mut(j).mapv_inplace(|v| v * scale);
        }
        Ok(scores)
    }
}

fn symmetric_eigen(m: &Array2<f64>) -> SymmetricEigen<f64, nalgebra::Dyn> {
    let dm = DMatrix::from_row_iterator(m.nrows(), m.ncols(), m.iter().copied());
    SymmetricEigen::new(dm)
}

fn leading_indices(eigen: &SymmetricEigen<f64, nalgebra::Dyn>, k: usize) -> Vec<(usize, f64)> {
    let mut pairs: Vec<(usize, f64)> = eigen
        .eigenvalues
        .iter()
        .copied()
        .enumerate()
        .collect();
    pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    pairs.truncate(k);
    pairs
}

fn leading_vectors(eigen: &SymmetricEigen<f64, nalgebra::Dyn>, k: usize) -> Array2<f64> {
    let n = eigen.eigenvectors.nrows();
    let mut out = Array2::zeros((n, k));
    for (j, &(idx, _)) in leading_indices(eigen, k).iter().enumerate() {
        let column = eigen.eigenvectors.column(idx);
        for i in 0..n {
            out[(i, j)] = column[i];
        }
    }
    out
}

/// Brute-force k-nearest-neighbor search in embedding space.
///
/// Returns per-cell neighbor indices (self excluded) and Euclidean
/// distances, both sorted by increasing distance. `k` is clamped to
/// `n_cells - 1`.
pub fn knn(scores: &Array2<f64>, k: usize) -> Result<(Vec<Vec<usize>>, Vec<Vec<f64>>)> {
    let n = scores.nrows();
    if n < 2 {
        bail!("Neighbor search requires at least 2 cells, got {}", n);
    }
    if k == 0 {
        bail!("Neighborhood size must be positive");
    }
    let k = k.min(n - 1);

    let results: Vec<(Vec<usize>, Vec<f64>)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut candidates: Vec<(usize, f64)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| {
                    let d = scores
                        .row(i)
                        .iter()
                        .zip(scores.row(j).iter())
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum::<f64>()
                        .sqrt();
                    (j, d)
                })
                .collect();
            candidates
                .sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            candidates.truncate(k);
            let (idx, dist): (Vec<usize>, Vec<f64>) = candidates.into_iter().unzip();
            (idx, dist)
        })
        .collect();

    Ok(results.into_iter().unzip())
}

/// First-order moments of a sparse layer over a neighborhood: every cell's
/// row is replaced by the mean over itself and its neighbors.
pub fn neighbor_moments(
    layer: &CsrMatrix<f64>,
    neighbors: &[Vec<usize>],
) -> Result<Array2<f64>> {
    let n = layer.nrows();
    if neighbors.len() != n {
        bail!(
            "Neighbor table has {} rows but the layer has {}",
            neighbors.len(),
            n
        );
    }
    let n_features = layer.ncols();
    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut acc = vec![0.0; n_features];
            let mut members = 1.0;
            let own = layer.row(i);
            for (&col, &val) in own.col_indices().iter().zip(own.values()) {
                acc[col] += val;
            }
            for &j in &neighbors[i] {
                let row = layer.row(j);
                for (&col, &val) in row.col_indices().iter().zip(row.values()) {
                    acc[col] += val;
                }
                members += 1.0;
            }
            for v in &mut acc {
                *v /= members;
            }
            acc
        })
        .collect();

    let mut out = Array2::zeros((n, n_features));
    for (i, row) in rows.into_iter().enumerate() {
        for (j, v) in row.into_iter().enumerate() {
            out[(i, j)] = v;
        }
    }
    Ok(out)
}
