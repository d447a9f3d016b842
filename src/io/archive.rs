//! Binary columnar archive for annotated matrices.
//!
//! The final aligned matrices are persisted as a bincode-encoded columnar
//! layout: CSR arrays (row offsets, column indices, values) per matrix and
//! layer, identifier vectors, dense layers and embeddings in row-major
//! order, and the cell-type labels with their category order. A format
//! version guards read-back.

use crate::matrix::{AnnotatedMatrix, CellTypes};
use anyhow::{Context, Result, bail};
use bincode::config;
use nalgebra_sparse::CsrMatrix;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SparsePayload {
    nrows: usize,
    ncols: usize,
    row_offsets: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct DensePayload {
    nrows: usize,
    ncols: usize,
    values: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct CellTypePayload {
    values: Vec<String>,
    categories: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct MatrixArchive {
    format_version: u32,
    obs_names: Vec<String>,
    var_names: Vec<String>,
    x: SparsePayload,
    layers: Vec<(String, SparsePayload)>,
    dense_layers: Vec<(String, DensePayload)>,
    embeddings: Vec<(String, DensePayload)>,
    cell_types: Option<CellTypePayload>,
}

fn to_sparse_payload(m: &CsrMatrix<f64>) -> SparsePayload {
    SparsePayload {
        nrows: m.nrows(),
        ncols: m.ncols(),
        row_offsets: m.row_offsets().to_vec(),
        col_indices: m.col_indices().to_vec(),
        values: m.values().to_vec(),
    }
}

fn from_sparse_payload(p: SparsePayload) -> Result<CsrMatrix<f64>> {
    CsrMatrix::try_from_csr_data(p.nrows, p.ncols, p.row_offsets, p.col_indices, p.values)
        .map_err(|e| anyhow::anyhow!("Corrupt sparse payload: {}", e))
}

fn to_dense_payload(m: &Array2<f64>) -> DensePayload {
    DensePayload {
        nrows: m.nrows(),
        ncols: m.ncols(),
        values: m.iter().copied().collect(),
    }
}

fn from_dense_payload(p: DensePayload) -> Result<Array2<f64>> {
    Array2::from_shape_vec((p.nrows, p.ncols), p.values)
        .map_err(|e| anyhow::anyhow!("Corrupt dense payload: {}", e))
}

/// Persist an annotated matrix.
pub fn write_archive(path: &Path, m: &AnnotatedMatrix) -> Result<()> {
    let mut layers: Vec<(String, SparsePayload)> = m
        .layers
        .iter()
        .map(|(k, v)| (k.clone(), to_sparse_payload(v)))
        .collect();
    layers.sort_by(|a, b| a.0.cmp(&b.0));
    let mut dense_layers: Vec<(String, DensePayload)> = m
        .dense_layers
        .iter()
        .map(|(k, v)| (k.clone(), to_dense_payload(v)))
        .collect();
    dense_layers.sort_by(|a, b| a.0.cmp(&b.0));
    let mut embeddings: Vec<(String, DensePayload)> = m
        .embeddings
        .iter()
        .map(|(k, v)| (k.clone(), to_dense_payload(v)))
        .collect();
    embeddings.sort_by(|a, b| a.0.cmp(&b.0));

    let archive = MatrixArchive {
        format_version: FORMAT_VERSION,
        obs_names: m.obs_names.clone(),
        var_names: m.var_names.clone(),
        x: to_sparse_payload(&m.x),
        layers,
        dense_layers,
        embeddings,
        cell_types: m.cell_types.as_ref().map(|ct| CellTypePayload {
            values: ct.values.clone(),
            categories: ct.categories.clone(),
        }),
    };

    let encoded = bincode::serde::encode_to_vec(&archive, config::standard())
        .context("Failed to encode matrix archive")?;
    let file =
        File::create(path).with_context(|| format!("Failed to create '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&encoded)?;
    writer.flush()?;
    Ok(())
}

/// Read back a persisted annotated matrix.
pub fn read_archive(path: &Path) -> Result<AnnotatedMatrix> {
    let mut bytes = Vec::new();
    File::open(path)
        .with_context(|| format!("Failed to open '{}'", path.display()))?
        .read_to_end(&mut bytes)?;
    let (archive, _): (MatrixArchive, usize) =
        bincode::serde::decode_from_slice(&bytes, config::standard())
            .with_context(|| format!("Failed to decode '{}'", path.display()))?;
    if archive.format_version != FORMAT_VERSION {
        bail!(
            "'{}' has archive format version {}, expected {}",
            path.display(),
            archive.format_version,
            FORMAT_VERSION
        );
    }

    let x = from_sparse_payload(archive.x)?;
    let layers = archive
        .layers
        .into_iter()
        .map(|(k, v)| Ok((k, from_sparse_payload(v)?)))
        .collect::<Result<HashMap<_, _>>>()?;
    let dense_layers = archive
        .dense_layers
        .into_iter()
        .map(|(k, v)| Ok((k, from_dense_payload(v)?)))
        .collect::<Result<HashMap<_, _>>>()?;
    let embeddings = archive
        .embeddings
        .into_iter()
        .map(|(k, v)| Ok((k, from_dense_payload(v)?)))
        .collect::<Result<HashMap<_, _>>>()?;

    let m = AnnotatedMatrix {
        x,
        obs_names: archive.obs_names,
        var_names: archive.var_names,
        layers,
        dense_layers,
        embeddings,
        cell_types: archive.cell_types.map(|ct| CellTypes {
            values: ct.values,
            categories: ct.categories,
        }),
    };
    m.validate()?;
    Ok(m)
}
