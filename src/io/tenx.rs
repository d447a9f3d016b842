//! Feature-barcode matrix directory reader.
//!
//! A directory holding the `barcodes.tsv` / `features.tsv` / `matrix.mtx`
//! triple (optionally gzipped). The matrix is stored feature-major and is
//! transposed on read to the cells-by-features orientation.

use anyhow::{Context, Result, bail};
use nalgebra_sparse::CsrMatrix;
use std::io::BufRead;
use std::path::Path;

/// One row of the features table.
#[derive(Debug, Clone)]
pub struct Feature {
    pub id: String,
    pub name: String,
    /// Feature type tag, e.g. "Gene Expression" or "Peaks". Empty when the
    /// table carries no type column.
    pub feature_type: String,
}

/// Read a feature-barcode matrix directory.
///
/// Returns the matrix (cells x features), the barcode list, and the
/// feature table.
pub fn read_feature_barcode_dir(dir: &Path) -> Result<(CsrMatrix<f64>, Vec<String>, Vec<Feature>)> {
    if !dir.is_dir() {
        bail!("'{}' is not a directory", dir.display());
    }
    let barcodes = super::read_id_column(&super::resolve_in_dir(dir, "barcodes.tsv")?)?;
    let features = read_features(&super::resolve_in_dir(dir, "features.tsv")?)?;
    let matrix = super::mtx::read_mtx(&super::resolve_in_dir(dir, "matrix.mtx")?, true)?;

    if matrix.nrows() != barcodes.len() {
        bail!(
            "Matrix has {} cells but barcodes.tsv lists {}",
            matrix.nrows(),
            barcodes.len()
        );
    }
    if matrix.ncols() != features.len() {
        bail!(
            "Matrix has {} features but features.tsv lists {}",
            matrix.ncols(),
            features.len()
        );
    }
    Ok((matrix, barcodes, features))
}

fn read_features(path: &Path) -> Result<Vec<Feature>> {
    let reader = super::open_text(path)?;
    let mut features = Vec::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("Failed to read '{}'", path.display()))?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        let fields: Vec<&str> = trimmed.split('\t').collect();
        let id = fields[0].to_string();
        let name = fields.get(1).map_or_else(|| id.clone(), |s| s.to_string());
        let feature_type = fields.get(2).map_or_else(String::new, |s| s.to_string());
        features.push(Feature {
            id,
            name,
            feature_type,
        });
    }
    Ok(features)
}
