//! Spliced/unspliced layer bundle reader.
//!
//! The upstream quantifier stores both layers in a loom container; parsing
//! that container is an external concern, and the pipeline consumes its
//! exported bundle instead: a directory with `spliced.mtx`,
//! `unspliced.mtx`, `barcodes.tsv` and `features.tsv` (optionally
//! gzipped, matrices feature-major).

use crate::matrix::AnnotatedMatrix;
use anyhow::{Result, bail};
use std::path::Path;

/// Name of the spliced layer on the loaded matrix.
pub const SPLICED: &str = "spliced";
/// Name of the unspliced layer on the loaded matrix.
pub const UNSPLICED: &str = "unspliced";

/// Read a spliced/unspliced bundle into an `AnnotatedMatrix` whose primary
/// matrix is a copy of the spliced layer.
///
/// Identifiers are taken verbatim from the bundle; canonicalization and
/// deduplication belong to the RNA loader.
pub fn read_layer_bundle(dir: &Path) -> Result<AnnotatedMatrix> {
    if !dir.is_dir() {
        bail!("'{}' is not a directory", dir.display());
    }
    let barcodes = super::read_id_column(&super::resolve_in_dir(dir, "barcodes.tsv")?)?;
    let features = read_feature_names(dir)?;
    let spliced = super::mtx::read_mtx(&super::resolve_in_dir(dir, "spliced.mtx")?, true)?;
    let unspliced = super::mtx::read_mtx(&super::resolve_in_dir(dir, "unspliced.mtx")?, true)?;

    if spliced.nrows() != unspliced.nrows() || spliced.ncols() != unspliced.ncols() {
        bail!(
            "Spliced ({}x{}) and unspliced ({}x{}) layers disagree in shape",
            spliced.nrows(),
            spliced.ncols(),
            unspliced.nrows(),
            unspliced.ncols()
        );
    }
    if spliced.nrows() != barcodes.len() {
        bail!(
            "Layers have {} cells but barcodes.tsv lists {}",
            spliced.nrows(),
            barcodes.len()
        );
    }
    if spliced.ncols() != features.len() {
        bail!(
            "Layers have {} features but features.tsv lists {}",
            spliced.ncols(),
            features.len()
        );
    }

    // The bundle may carry duplicate gene names; the loader deduplicates
    // them before the axis invariants are enforced, so construction here
    // bypasses `AnnotatedMatrix::new`.
    let mut m = AnnotatedMatrix {
        x: spliced.clone(),
        obs_names: barcodes,
        var_names: features,
        layers: std::collections::HashMap::new(),
        dense_layers: std::collections::HashMap::new(),
        embeddings: std::collections::HashMap::new(),
        cell_types: None,
    };
    m.layers.insert(SPLICED.to_string(), spliced);
    m.layers.insert(UNSPLICED.to_string(), unspliced);
    Ok(m)
}

/// Gene names come from the second column when present (the first column is
/// the accession), matching the layout of the exported features table.
fn read_feature_names(dir: &Path) -> Result<Vec<String>> {
    use std::io::BufRead;
    let path = super::resolve_in_dir(dir, "features.tsv")?;
    let reader = super::open_text(&path)?;
    let mut names = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        let mut fields = trimmed.split('\t');
        let first = fields.next().unwrap_or(trimmed).to_string();
        let name = fields.next().map_or(first, |s| s.to_string());
        names.push(name);
    }
    Ok(names)
}
