//! Annotated cells-by-features matrices.
//!
//! `AnnotatedMatrix` is the unit of data flowing between the pipeline
//! stages: a sparse CSR count matrix plus cell and feature identifiers,
//! optional sparse layers (spliced/unspliced), dense layers (smoothed
//! moments), embeddings, and per-cell type labels. Construction and
//! subsetting enforce the axis invariants: identifier vector lengths
//! match the matrix shape and identifiers are unique within their axis.

use anyhow::{Result, anyhow, bail};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use ndarray::Array2;
use std::collections::{HashMap, HashSet};

/// Per-cell categorical labels with an ordered category set.
///
/// The category order only matters for downstream display; reordering it
/// never changes the per-cell values.
#[derive(Debug, Clone, PartialEq)]
pub struct CellTypes {
    pub values: Vec<String>,
    pub categories: Vec<String>,
}

impl CellTypes {
    /// Build labels from raw values; categories are the sorted unique values.
    pub fn from_values(values: Vec<String>) -> Self {
        let mut categories: Vec<String> = values
            .iter()
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        categories.sort();
        Self { values, categories }
    }

    /// Reorder the category set to match `order`; categories present in the
    /// data but absent from `order` keep their relative position at the end.
    pub fn reorder_categories(&mut self, order: &[String]) {
        let present: HashSet<&String> = self.categories.iter().collect();
        let mut reordered: Vec<String> = order
            .iter()
            .filter(|c| present.contains(c))
            .cloned()
            .collect();
        let listed: HashSet<&String> = reordered.iter().collect();
        let remaining: Vec<String> = self
            .categories
            .iter()
            .filter(|c| !listed.contains(c))
            .cloned()
            .collect();
        reordered.extend(remaining);
        self.categories = reordered;
    }

    fn select(&self, indices: &[usize]) -> Self {
        let values: Vec<String> = indices.iter().map(|&i| self.values[i].clone()).collect();
        let present: HashSet<&String> = values.iter().collect();
        let categories: Vec<String> = self
            .categories
            .iter()
            .filter(|c| present.contains(c))
            .cloned()
            .collect();
        Self { values, categories }
    }
}

/// Sparse cells-by-features matrix with identifiers and annotations.
#[derive(Debug, Clone)]
pub struct AnnotatedMatrix {
    /// Primary matrix, cells in rows, features in columns.
    pub x: CsrMatrix<f64>,
    pub obs_names: Vec<String>,
    pub var_names: Vec<String>,
    /// Sparse layers sharing the shape of `x` (e.g. spliced/unspliced).
    pub layers: HashMap<String, CsrMatrix<f64>>,
    /// Dense layers sharing the shape of `x` (e.g. smoothed moments).
    pub dense_layers: HashMap<String, Array2<f64>>,
    /// Per-cell embeddings, rows aligned with `obs_names`.
    pub embeddings: HashMap<String, Array2<f64>>,
    pub cell_types: Option<CellTypes>,
}

impl AnnotatedMatrix {
    /// Create a new matrix, validating the axis invariants.
    pub fn new(x: CsrMatrix<f64>, obs_names: Vec<String>, var_names: Vec<String>) -> Result<Self> {
        let m = Self {
            x,
            obs_names,
            var_names,
            layers: HashMap::new(),
            dense_layers: HashMap::new(),
            embeddings: HashMap::new(),
            cell_types: None,
        };
        m.validate()?;
        Ok(m)
    }

    pub fn n_obs(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_vars(&self) -> usize {
        self.x.ncols()
    }

    /// Check the axis invariants.
    pub fn validate(&self) -> Result<()> {
        if self.obs_names.len() != self.x.nrows() {
            bail!(
                "Cell identifier count ({}) does not match row count ({})",
                self.obs_names.len(),
                self.x.nrows()
            );
        }
        if self.var_names.len() != self.x.ncols() {
            bail!(
                "Feature identifier count ({}) does not match column count ({})",
                self.var_names.len(),
                self.x.ncols()
            );
        }
        check_unique(&self.obs_names, "cell")?;
        check_unique(&self.var_names, "feature")?;
        for (name, layer) in &self.layers {
            if layer.nrows() != self.x.nrows() || layer.ncols() != self.x.ncols() {
                bail!(
                    "Layer '{}' has shape {}x{}, expected {}x{}",
                    name,
                    layer.nrows(),
                    layer.ncols(),
                    self.x.nrows(),
                    self.x.ncols()
                );
            }
        }
        if let Some(ct) = &self.cell_types
            && ct.values.len() != self.x.nrows()
        {
            bail!(
                "Cell type label count ({}) does not match row count ({})",
                ct.values.len(),
                self.x.nrows()
            );
        }
        Ok(())
    }

    /// Map from cell identifier to row position.
    pub fn obs_positions(&self) -> HashMap<&str, usize> {
        self.obs_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect()
    }

    /// Map from feature identifier to column position.
    pub fn var_positions(&self) -> HashMap<&str, usize> {
        self.var_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect()
    }

    /// Subset to the given cells, in the given order.
    pub fn select_obs(&self, indices: &[usize]) -> Result<Self> {
        for &i in indices {
            if i >= self.n_obs() {
                bail!("Cell index {} out of bounds for {} cells", i, self.n_obs());
            }
        }
        let x = subset_csr(&self.x, Some(indices), None)?;
        let obs_names = indices.iter().map(|&i| self.obs_names[i].clone()).collect();
        let layers = self
            .layers
            .iter()
            .map(|(k, v)| Ok((k.clone(), subset_csr(v, Some(indices), None)?)))
            .collect::<Result<HashMap<_, _>>>()?;
        let dense_layers = self
            .dense_layers
            .iter()
            .map(|(k, v)| (k.clone(), select_rows_dense(v, indices)))
            .collect();
        let embeddings = self
            .embeddings
            .iter()
            .map(|(k, v)| (k.clone(), select_rows_dense(v, indices)))
            .collect();
        let out = Self {
            x,
            obs_names,
            var_names: self.var_names.clone(),
            layers,
            dense_layers,
            embeddings,
            cell_types: self.cell_types.as_ref().map(|ct| ct.select(indices)),
        };
        out.validate()?;
        Ok(out)
    }

    /// Subset to the given features, in the given order.
    pub fn select_vars(&self, indices: &[usize]) -> Result<Self> {
        for &i in indices {
            if i >= self.n_vars() {
                bail!(
                    "Feature index {} out of bounds for {} features",
                    i,
                    self.n_vars()
                );
            }
        }
        let x = subset_csr(&self.x, None, Some(indices))?;
        let var_names = indices.iter().map(|&i| self.var_names[i].clone()).collect();
        let layers = self
            .layers
            .iter()
            .map(|(k, v)| Ok((k.clone(), subset_csr(v, None, Some(indices))?)))
            .collect::<Result<HashMap<_, _>>>()?;
        let dense_layers = self
            .dense_layers
            .iter()
            .map(|(k, v)| (k.clone(), select_cols_dense(v, indices)))
            .collect();
        let out = Self {
            x,
            obs_names: self.obs_names.clone(),
            var_names,
            layers,
            dense_layers,
            embeddings: self.embeddings.clone(),
            cell_types: self.cell_types.clone(),
        };
        out.validate()?;
        Ok(out)
    }
}

fn check_unique(names: &[String], axis: &str) -> Result<()> {
    let mut seen = HashSet::with_capacity(names.len());
    for name in names {
        if !seen.insert(name.as_str()) {
            bail!("Duplicate {} identifier: '{}'", axis, name);
        }
    }
    Ok(())
}

/// Disambiguate duplicate feature names by appending `-1`, `-2`, ... to
/// repeat occurrences, preserving count and order.
///
/// `["Gene1", "Gene1", "Gene2"]` becomes `["Gene1", "Gene1-1", "Gene2"]`.
pub fn make_unique(names: &[String]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let taken: HashSet<&str> = names.iter().map(|n| n.as_str()).collect();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let seen = counts.entry(name.as_str()).or_insert(0);
        if *seen == 0 {
            out.push(name.clone());
        } else {
            // Skip suffixed names that already exist in the input.
            let mut k = *seen;
            let mut candidate = format!("{}-{}", name, k);
            while taken.contains(candidate.as_str()) {
                k += 1;
                candidate = format!("{}-{}", name, k);
            }
            *seen = k;
            out.push(candidate);
        }
        *seen += 1;
    }
    out
}

/// Subset a CSR matrix by row and/or column index lists, producing a matrix
/// whose axes follow the order of the index lists.
pub(crate) fn subset_csr(
    m: &CsrMatrix<f64>,
    rows: Option<&[usize]>,
    cols: Option<&[usize]>,
) -> Result<CsrMatrix<f64>> {
    let row_order: Vec<usize> = match rows {
        Some(r) => r.to_vec(),
        None => (0..m.nrows()).collect(),
    };
    let col_map: Option<HashMap<usize, usize>> = cols.map(|c| {
        c.iter()
            .enumerate()
            .map(|(new, &old)| (old, new))
            .collect()
    });
    let new_ncols = cols.map_or(m.ncols(), |c| c.len());

    let mut coo = CooMatrix::new(row_order.len(), new_ncols);
    for (new_row, &old_row) in row_order.iter().enumerate() {
        if old_row >= m.nrows() {
            return Err(anyhow!(
                "Row index {} out of bounds for {} rows",
                old_row,
                m.nrows()
            ));
        }
        let row = m.row(old_row);
        for (&col, &val) in row.col_indices().iter().zip(row.values()) {
            match &col_map {
                Some(map) => {
                    if let Some(&new_col) = map.get(&col) {
                        coo.push(new_row, new_col, val);
                    }
                }
                None => coo.push(new_row, col, val),
            }
        }
    }
    Ok(CsrMatrix::from(&coo))
}

fn select_rows_dense(m: &Array2<f64>, indices: &[usize]) -> Array2<f64> {
    let mut out = Array2::zeros((indices.len(), m.ncols()));
    for (new, &old) in indices.iter().enumerate() {
        out.row_mut(new).assign(&m.row(old));
    }
    out
}

fn select_cols_dense(m: &Array2<f64>, indices: &[usize]) -> Array2<f64> {
    let mut out = Array2::zeros((m.nrows(), indices.len()));
    for (new, &old) in indices.iter().enumerate() {
        out.column_mut(new).assign(&m.column(old));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_matrix() -> AnnotatedMatrix {
        // 3 cells x 2 genes
        let coo = CooMatrix::try_from_triplets(
            3,
            2,
            vec![0, 0, 1, 2],
            vec![0, 1, 0, 1],
            vec![1.0, 2.0, 3.0, 4.0],
        )
        .unwrap();
        AnnotatedMatrix::new(
            CsrMatrix::from(&coo),
            vec!["c1".into(), "c2".into(), "c3".into()],
            vec!["g1".into(), "g2".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_make_unique_disambiguates() {
        let names: Vec<String> = vec!["Gene1".into(), "Gene1".into(), "Gene2".into()];
        let unique = make_unique(&names);
        assert_eq!(unique, vec!["Gene1", "Gene1-1", "Gene2"]);
    }

    #[test]
    fn test_make_unique_avoids_existing_suffix() {
        let names: Vec<String> = vec!["G".into(), "G-1".into(), "G".into()];
        let unique = make_unique(&names);
        assert_eq!(unique.len(), 3);
        let set: HashSet<&String> = unique.iter().collect();
        assert_eq!(set.len(), 3);
        assert_eq!(unique[0], "G");
        assert_eq!(unique[1], "G-1");
    }

    #[test]
    fn test_new_rejects_mismatched_lengths() {
        let coo = CooMatrix::try_from_triplets(2, 2, vec![0], vec![0], vec![1.0]).unwrap();
        let result = AnnotatedMatrix::new(
            CsrMatrix::from(&coo),
            vec!["c1".into()],
            vec!["g1".into(), "g2".into()],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_new_rejects_duplicate_ids() {
        let coo = CooMatrix::try_from_triplets(2, 2, vec![0], vec![0], vec![1.0]).unwrap();
        let result = AnnotatedMatrix::new(
            CsrMatrix::from(&coo),
            vec!["c1".into(), "c1".into()],
            vec!["g1".into(), "g2".into()],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_select_obs_preserves_order() {
        let m = small_matrix();
        let sub = m.select_obs(&[2, 0]).unwrap();
        assert_eq!(sub.obs_names, vec!["c3", "c1"]);
        assert_eq!(sub.n_obs(), 2);
        assert_eq!(sub.x.row(0).values(), &[4.0]);
        assert_eq!(sub.x.row(1).values(), &[1.0, 2.0]);
    }

    #[test]
    fn test_select_vars_subsets_columns() {
        let m = small_matrix();
        let sub = m.select_vars(&[1]).unwrap();
        assert_eq!(sub.var_names, vec!["g2"]);
        assert_eq!(sub.x.row(0).values(), &[2.0]);
        assert_eq!(sub.x.row(1).nnz(), 0);
        assert_eq!(sub.x.row(2).values(), &[4.0]);
    }

    #[test]
    fn test_reorder_categories_keeps_values() {
        let mut ct = CellTypes::from_values(vec!["b".into(), "a".into(), "b".into()]);
        assert_eq!(ct.categories, vec!["a", "b"]);
        ct.reorder_categories(&["b".into(), "c".into(), "a".into()]);
        assert_eq!(ct.categories, vec!["b", "a"]);
        assert_eq!(ct.values, vec!["b", "a", "b"]);
    }
}
