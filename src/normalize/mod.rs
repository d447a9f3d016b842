//! Shared numeric transforms over sparse count matrices.
//!
//! Library-size scaling follows the median-target log normalization used
//! by the standard single-cell toolchains; TF-IDF is the accessibility
//! counterpart down-weighting ubiquitously open regions. All transforms
//! operate on cells-by-features CSR matrices in place.

use anyhow::{Result, bail};
use nalgebra_sparse::CsrMatrix;
use single_utilities::traits::FloatOps;

/// Per-cell totals (row sums).
pub fn row_sums<T>(m: &CsrMatrix<T>) -> Vec<T>
where
    T: FloatOps,
{
    let mut sums = vec![T::zero(); m.nrows()];
    for (row, _, &val) in m.triplet_iter() {
        sums[row] += val;
    }
    sums
}

/// Per-feature totals (column sums).
pub fn col_sums<T>(m: &CsrMatrix<T>) -> Vec<T>
where
    T: FloatOps,
{
    let mut sums = vec![T::zero(); m.ncols()];
    for (_, col, &val) in m.triplet_iter() {
        sums[col] += val;
    }
    sums
}

/// Number of cells with a nonzero entry per feature.
pub fn col_nnz<T>(m: &CsrMatrix<T>) -> Vec<usize>
where
    T: FloatOps,
{
    let mut counts = vec![0usize; m.ncols()];
    for (_, col, &val) in m.triplet_iter() {
        if val != T::zero() {
            counts[col] += 1;
        }
    }
    counts
}

/// Median of a slice; the input order is irrelevant.
pub fn median(values: &[f64]) -> Result<f64> {
    if values.is_empty() {
        bail!("Cannot take the median of an empty slice");
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        Ok(sorted[n / 2])
    } else {
        Ok((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0)
    }
}

/// Scale every cell to the same total count.
///
/// Each row is multiplied by `target / row_sum`; if `target` is `None` the
/// median of the nonzero row sums is used. Rows with zero total are left
/// untouched. Returns the pre-normalization row sums.
pub fn normalize_per_cell(m: &mut CsrMatrix<f64>, target: Option<f64>) -> Result<Vec<f64>> {
    let sums = row_sums(m);
    let positive: Vec<f64> = sums.iter().copied().filter(|&s| s > 0.0).collect();
    if positive.is_empty() {
        bail!("Cannot normalize a matrix whose cells all have zero counts");
    }
    let target = match target {
        Some(t) => {
            if t <= 0.0 {
                bail!("Normalization target must be positive, got {}", t);
            }
            t
        }
        None => median(&positive)?,
    };
    for (row, _, val) in m.triplet_iter_mut() {
        if sums[row] > 0.0 {
            *val *= target / sums[row];
        }
    }
    Ok(sums)
}

/// Apply `x -> ln(1 + x)` to every stored entry.
pub fn log1p(m: &mut CsrMatrix<f64>) {
    for val in m.values_mut() {
        *val = val.ln_1p();
    }
}

/// Term-frequency/inverse-document-frequency transform.
///
/// Term frequency is the entry divided by its cell total; the inverse
/// document frequency of a feature is `ln(1 + n_cells / (1 + n_open))`
/// where `n_open` is the number of cells in which the feature is observed.
pub fn tfidf(m: &mut CsrMatrix<f64>) -> Result<()> {
    let n_cells = m.nrows();
    if n_cells == 0 {
        bail!("Cannot TF-IDF transform an empty matrix");
    }
    let sums = row_sums(m);
    let nnz = col_nnz(m);
    let idf: Vec<f64> = nnz
        .iter()
        .map(|&df| (1.0 + n_cells as f64 / (1.0 + df as f64)).ln())
        .collect();
    for (row, col, val) in m.triplet_iter_mut() {
        if sums[row] > 0.0 {
            *val = *val / sums[row] * idf[col];
        }
    }
    Ok(())
}

/// Per-feature mean and variance over all cells, including implicit zeros.
pub fn feature_mean_var(m: &CsrMatrix<f64>) -> (Vec<f64>, Vec<f64>) {
    let n = m.nrows() as f64;
    let mut sums = vec![0.0; m.ncols()];
    let mut sum_sq = vec![0.0; m.ncols()];
    for (_, col, &val) in m.triplet_iter() {
        sums[col] += val;
        sum_sq[col] += val * val;
    }
    let means: Vec<f64> = sums.iter().map(|&s| s / n).collect();
    let vars: Vec<f64> = sums
        .iter()
        .zip(&sum_sq)
        .map(|(&s, &sq)| {
            if n > 1.0 {
                ((sq - s * s / n) / (n - 1.0)).max(0.0)
            } else {
                0.0
            }
        })
        .collect();
    (means, vars)
}

/// Select the `n_top` most variable features by binned normalized dispersion.
///
/// Dispersion (variance over mean) is z-scored within equal-width mean bins
/// so highly expressed features do not dominate the ranking. Returns the
/// selected column indices in ascending order.
pub fn select_highly_variable(
    m: &CsrMatrix<f64>,
    n_top: usize,
    n_bins: usize,
) -> Result<Vec<usize>> {
    let n_features = m.ncols();
    if n_top == 0 {
        bail!("Number of variable features to select must be positive");
    }
    if n_bins == 0 {
        bail!("Number of dispersion bins must be positive");
    }
    if n_top >= n_features {
        return Ok((0..n_features).collect());
    }

    let (means, vars) = feature_mean_var(m);
    let dispersions: Vec<f64> = means
        .iter()
        .zip(&vars)
        .map(|(&mu, &var)| if mu > 0.0 { var / mu } else { 0.0 })
        .collect();

    let max_mean = means.iter().cloned().fold(0.0, f64::max);
    let bin_width = if max_mean > 0.0 {
        max_mean / n_bins as f64
    } else {
        1.0
    };
    let bin_of = |mu: f64| -> usize { ((mu / bin_width) as usize).min(n_bins - 1) };

    // Mean and standard deviation of dispersions within each mean bin.
    let mut bin_sum = vec![0.0; n_bins];
    let mut bin_sum_sq = vec![0.0; n_bins];
    let mut bin_count = vec![0usize; n_bins];
    for (&mu, &d) in means.iter().zip(&dispersions) {
        let b = bin_of(mu);
        bin_sum[b] += d;
        bin_sum_sq[b] += d * d;
        bin_count[b] += 1;
    }

    let normalized: Vec<f64> = means
        .iter()
        .zip(&dispersions)
        .map(|(&mu, &d)| {
            let b = bin_of(mu);
            let n = bin_count[b] as f64;
            if n < 2.0 {
                return d;
            }
            let bin_mean = bin_sum[b] / n;
            let bin_var = ((bin_sum_sq[b] - bin_sum[b] * bin_sum[b] / n) / (n - 1.0)).max(0.0);
            let bin_std = bin_var.sqrt();
            if bin_std > 0.0 { (d - bin_mean) / bin_std } else { d - bin_mean }
        })
        .collect();

    let mut order: Vec<usize> = (0..n_features).collect();
    order.sort_by(|&a, &b| {
        normalized[b]
            .partial_cmp(&normalized[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut selected: Vec<usize> = order.into_iter().take(n_top).collect();
    selected.sort_unstable();
    Ok(selected)
}

/// Per-feature counts supported by both layers: for every cell the minimum
/// of the spliced and unspliced entry, summed over cells.
pub fn shared_counts(spliced: &CsrMatrix<f64>, unspliced: &CsrMatrix<f64>) -> Result<Vec<f64>> {
    if spliced.nrows() != unspliced.nrows() || spliced.ncols() != unspliced.ncols() {
        bail!(
            "Layer shapes differ: {}x{} vs {}x{}",
            spliced.nrows(),
            spliced.ncols(),
            unspliced.nrows(),
            unspliced.ncols()
        );
    }
    let mut shared = vec![0.0; spliced.ncols()];
    for i in 0..spliced.nrows() {
        let s = spliced.row(i);
        let u = unspliced.row(i);
        let (s_cols, s_vals) = (s.col_indices(), s.values());
        let (u_cols, u_vals) = (u.col_indices(), u.values());
        // Column indices within a CSR row are sorted; merge the two lanes.
        let (mut a, mut b) = (0usize, 0usize);
        while a < s_cols.len() && b < u_cols.len() {
            match s_cols[a].cmp(&u_cols[b]) {
                std::cmp::Ordering::Equal => {
                    shared[s_cols[a]] += s_vals[a].min(u_vals[b]);
                    a += 1;
                    b += 1;
                }
                std::cmp::Ordering::Less => a += 1,
                std::cmp::Ordering::Greater => b += 1,
            }
        }
    }
    Ok(shared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra_sparse::CooMatrix;

    fn matrix_from_dense(rows: usize, cols: usize, values: &[f64]) -> CsrMatrix<f64> {
        let mut coo = CooMatrix::new(rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                let v = values[r * cols + c];
                if v != 0.0 {
                    coo.push(r, c, v);
                }
            }
        }
        CsrMatrix::from(&coo)
    }

    #[test]
    fn test_row_and_col_sums() {
        let m = matrix_from_dense(2, 3, &[1.0, 0.0, 2.0, 0.0, 3.0, 4.0]);
        assert_eq!(row_sums(&m), vec![3.0, 7.0]);
        assert_eq!(col_sums(&m), vec![1.0, 3.0, 6.0]);
        assert_eq!(col_nnz(&m), vec![1, 1, 2]);
    }

    #[test]
    fn test_median_odd_even() {
        assert_abs_diff_eq!(median(&[3.0, 1.0, 2.0]).unwrap(), 2.0);
        assert_abs_diff_eq!(median(&[4.0, 1.0, 2.0, 3.0]).unwrap(), 2.5);
        assert!(median(&[]).is_err());
    }

    #[test]
    fn test_normalize_per_cell_hits_target() {
        let mut m = matrix_from_dense(2, 2, &[2.0, 2.0, 1.0, 3.0]);
        let sums = normalize_per_cell(&mut m, Some(100.0)).unwrap();
        assert_eq!(sums, vec![4.0, 4.0]);
        let after = row_sums(&m);
        assert_abs_diff_eq!(after[0], 100.0, epsilon = 1e-12);
        assert_abs_diff_eq!(after[1], 100.0, epsilon = 1e-12);
    }

    #[test]
    fn test_normalize_per_cell_median_target() {
        let mut m = matrix_from_dense(3, 1, &[2.0, 4.0, 8.0]);
        normalize_per_cell(&mut m, None).unwrap();
        // Median library size is 4; every cell should sum to 4 afterwards.
        for s in row_sums(&m) {
            assert_abs_diff_eq!(s, 4.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_log1p_values() {
        let mut m = matrix_from_dense(1, 2, &[0.0, 1.0]);
        log1p(&mut m);
        assert_abs_diff_eq!(m.row(0).values()[0], 2.0_f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_tfidf_downweights_ubiquitous_features() {
        // Feature 0 is open in every cell, feature 1 in a single cell.
        let m_raw = matrix_from_dense(3, 2, &[1.0, 0.0, 1.0, 0.0, 1.0, 1.0]);
        let mut m = m_raw.clone();
        tfidf(&mut m).unwrap();
        // In the last cell both features have equal raw counts; the rare one
        // must come out larger.
        let row = m.row(2);
        assert_eq!(row.values().len(), 2);
        assert!(row.values()[1] > row.values()[0]);
    }

    #[test]
    fn test_select_highly_variable_prefers_dispersed() {
        // Feature 1 varies wildly, features 0 and 2 are flat.
        let m = matrix_from_dense(
            4,
            3,
            &[
                5.0, 1.0, 2.0, //
                5.0, 20.0, 2.0, //
                5.0, 1.0, 2.0, //
                5.0, 15.0, 2.0,
            ],
        );
        let selected = select_highly_variable(&m, 1, 5).unwrap();
        assert_eq!(selected, vec![1]);
    }

    #[test]
    fn test_select_highly_variable_all_when_fewer() {
        let m = matrix_from_dense(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(select_highly_variable(&m, 5, 5).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_shared_counts_takes_minimum() {
        let spliced = matrix_from_dense(2, 2, &[3.0, 1.0, 0.0, 5.0]);
        let unspliced = matrix_from_dense(2, 2, &[2.0, 0.0, 4.0, 2.0]);
        let shared = shared_counts(&spliced, &unspliced).unwrap();
        // Gene 0: min(3,2) + min(0,4) = 2; gene 1: min(1,0) + min(5,2) = 2.
        assert_eq!(shared, vec![2.0, 2.0]);
    }
}
