//! RNA loading stage.
//!
//! Turns the raw spliced/unspliced bundle into a filtered, normalized,
//! cell-type-annotated matrix: barcodes are canonicalized, duplicate gene
//! names disambiguated, cells filtered by total counts, genes filtered by
//! shared spliced/unspliced support and variability, and the annotation
//! table joined with inner-join semantics before restricting to the
//! retained lineage categories.

use crate::io::layers::{self, SPLICED, UNSPLICED};
use crate::matrix::{AnnotatedMatrix, CellTypes, make_unique};
use crate::normalize;
use crate::params::RnaParams;
use anyhow::{Result, bail};
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::path::Path;

const DISPERSION_BINS: usize = 20;

/// Rewrite a quantifier barcode into the canonical form.
///
/// The quantifier emits `sample:AAACAGCCx` (sample prefix up to the last
/// colon, trailing `x`); the canonical form is the bare nucleotide barcode
/// with the library suffix appended, e.g. `AAACAGCC-1`.
pub fn canonical_barcode(raw: &str, suffix: &str) -> String {
    let without_prefix = match raw.rfind(':') {
        Some(pos) => &raw[pos + 1..],
        None => raw,
    };
    let core = without_prefix.strip_suffix('x').unwrap_or(without_prefix);
    format!("{}{}", core, suffix)
}

/// Parse the raw RNA bundle and bring its identifiers into canonical form.
///
/// This is a pure transform of the immutable on-disk dataset: both the
/// loading pass and the later alignment pass call it independently so no
/// state leaks between them.
pub fn load_raw(dir: &Path, params: &RnaParams) -> Result<AnnotatedMatrix> {
    let mut m = layers::read_layer_bundle(dir)?;
    m.obs_names = m
        .obs_names
        .iter()
        .map(|b| canonical_barcode(b, &params.barcode_suffix))
        .collect();
    m.var_names = make_unique(&m.var_names);
    m.validate()?;
    Ok(m)
}

/// Run the full RNA loading stage.
pub fn load(
    dir: &Path,
    annotations: &HashMap<String, String>,
    params: &RnaParams,
) -> Result<AnnotatedMatrix> {
    if params.min_counts >= params.max_counts {
        bail!(
            "RNA count bounds are empty: [{}, {})",
            params.min_counts,
            params.max_counts
        );
    }
    let m = load_raw(dir, params)?;
    info!(
        "RNA source: {} cells x {} genes",
        m.n_obs(),
        m.n_vars()
    );

    // Cell filter on total counts of the primary matrix.
    let totals = normalize::row_sums(&m.x);
    let keep_cells: Vec<usize> = totals
        .iter()
        .enumerate()
        .filter(|&(_, &t)| t >= params.min_counts && t < params.max_counts)
        .map(|(i, _)| i)
        .collect();
    debug!(
        "RNA cell filter [{}, {}): dropping {} of {} cells",
        params.min_counts,
        params.max_counts,
        m.n_obs() - keep_cells.len(),
        m.n_obs()
    );
    if keep_cells.is_empty() {
        bail!(
            "No RNA cells with total counts in [{}, {})",
            params.min_counts,
            params.max_counts
        );
    }
    let m = m.select_obs(&keep_cells)?;

    // Gene filter on shared spliced/unspliced support.
    let shared = normalize::shared_counts(&m.layers[SPLICED], &m.layers[UNSPLICED])?;
    let keep_genes: Vec<usize> = shared
        .iter()
        .enumerate()
        .filter(|&(_, &s)| s >= params.min_shared_counts)
        .map(|(i, _)| i)
        .collect();
    if keep_genes.is_empty() {
        bail!(
            "No genes with shared counts >= {}",
            params.min_shared_counts
        );
    }
    let m = m.select_vars(&keep_genes)?;

    // Variable-gene selection on a normalized log copy; the raw counts are
    // only normalized afterwards so the selection never sees itself.
    let mut log_copy = m.x.clone();
    normalize::normalize_per_cell(&mut log_copy, None)?;
    normalize::log1p(&mut log_copy);
    let variable =
        normalize::select_highly_variable(&log_copy, params.n_top_genes, DISPERSION_BINS)?;
    let mut m = m.select_vars(&variable)?;
    info!(
        "RNA after count/shared/variability filters: {} cells x {} genes",
        m.n_obs(),
        m.n_vars()
    );

    // Library-size normalization and variance-stabilizing transform.
    normalize::normalize_per_cell(&mut m.x, None)?;
    normalize::log1p(&mut m.x);
    for layer in m.layers.values_mut() {
        normalize::normalize_per_cell(layer, None)?;
    }

    // Inner join against the cell annotation table.
    let annotated: Vec<usize> = m
        .obs_names
        .iter()
        .enumerate()
        .filter(|(_, name)| annotations.contains_key(*name))
        .map(|(i, _)| i)
        .collect();
    if annotated.is_empty() {
        bail!("No RNA cells match the cell annotation table");
    }
    debug!(
        "RNA annotation join: dropping {} unannotated cells",
        m.n_obs() - annotated.len()
    );
    let mut m = m.select_obs(&annotated)?;
    let labels: Vec<String> = m
        .obs_names
        .iter()
        .map(|name| annotations[name].clone())
        .collect();
    m.cell_types = Some(CellTypes::from_values(labels.clone()));

    // Lineage cohort filter.
    let keep_set: HashSet<&str> = params.keep_cell_types.iter().map(String::as_str).collect();
    let in_cohort: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|(_, label)| keep_set.contains(label.as_str()))
        .map(|(i, _)| i)
        .collect();
    if in_cohort.is_empty() {
        bail!("No RNA cells belong to the retained lineage categories");
    }
    let m = m.select_obs(&in_cohort)?;
    info!(
        "RNA after annotation join and lineage filter: {} cells x {} genes",
        m.n_obs(),
        m.n_vars()
    );
    Ok(m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_canonical_barcode() {
        assert_eq!(canonical_barcode("e18:AAACAGCCx", "-1"), "AAACAGCC-1");
        assert_eq!(canonical_barcode("AAACAGCC", "-1"), "AAACAGCC-1");
        assert_eq!(canonical_barcode("a:b:CCCCx", "-1"), "CCCC-1");
    }

    /// Synthetic bundle: 4 cells with totals 500, 1500, 2500, 25000 over 3
    /// genes; gene 2 has no unspliced support.
    fn write_bundle(dir: &Path) {
        std::fs::write(
            dir.join("barcodes.tsv"),
            "s:AAAAx\ns:CCCCx\ns:GGGGx\ns:TTTTx\n",
        )
        .unwrap();
        std::fs::write(dir.join("features.tsv"), "E1\tGene1\nE2\tGene2\nE3\tGene3\n").unwrap();
        let mut f = std::fs::File::create(dir.join("spliced.mtx")).unwrap();
        // feature-major (3 genes x 4 cells)
        write!(
            f,
            "%%MatrixMarket matrix coordinate integer general\n3 4 12\n\
             1 1 200\n1 2 700\n1 3 1200\n1 4 12000\n\
             2 1 200\n2 2 500\n2 3 800\n2 4 8000\n\
             3 1 100\n3 2 300\n3 3 500\n3 4 5000\n"
        )
        .unwrap();
        drop(f);
        let mut f = std::fs::File::create(dir.join("unspliced.mtx")).unwrap();
        write!(
            f,
            "%%MatrixMarket matrix coordinate integer general\n3 4 8\n\
             1 1 50\n1 2 100\n1 3 150\n1 4 900\n\
             2 1 20\n2 2 60\n2 3 90\n2 4 500\n"
        )
        .unwrap();
        drop(f);
    }

    fn annotations() -> HashMap<String, String> {
        [
            ("CCCC-1", "IPC"),
            ("GGGG-1", "Doublet"),
            // TTTT-1 deliberately unannotated
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn params() -> RnaParams {
        RnaParams {
            min_counts: 1000.0,
            max_counts: 20000.0,
            min_shared_counts: 10.0,
            n_top_genes: 2,
            ..RnaParams::default()
        }
    }

    #[test]
    fn test_load_filters_cells_and_joins_annotations() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path());
        let m = load(dir.path(), &annotations(), &params()).unwrap();
        // AAAA dropped by count filter (500), TTTT by the annotation join
        // (25000 is also outside [1000, 20000)), GGGG by the lineage filter.
        assert_eq!(m.obs_names, vec!["CCCC-1"]);
        assert_eq!(m.cell_types.as_ref().unwrap().values, vec!["IPC"]);
        // Gene3 has no unspliced counts, so it cannot pass the shared filter.
        assert!(!m.var_names.contains(&"Gene3".to_string()));
    }

    #[test]
    fn test_load_respects_count_bounds() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path());
        let mut p = params();
        // Open upper bound: a cell with exactly max_counts total must drop.
        p.max_counts = 2500.0;
        let annotations: HashMap<String, String> = [("CCCC-1", "IPC"), ("GGGG-1", "IPC")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let m = load(dir.path(), &annotations, &p).unwrap();
        assert_eq!(m.obs_names, vec!["CCCC-1"]);
    }

    #[test]
    fn test_load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path());
        let a = load(dir.path(), &annotations(), &params()).unwrap();
        let b = load(dir.path(), &annotations(), &params()).unwrap();
        assert_eq!(a.obs_names, b.obs_names);
        assert_eq!(a.var_names, b.var_names);
        assert_eq!(a.x.values(), b.x.values());
    }

    #[test]
    fn test_load_raw_is_pure() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path());
        let p = params();
        let a = load_raw(dir.path(), &p).unwrap();
        let b = load_raw(dir.path(), &p).unwrap();
        assert_eq!(a.obs_names, b.obs_names);
        assert_eq!(a.x.values(), b.x.values());
        assert_eq!(a.obs_names[0], "AAAA-1");
    }

    #[test]
    fn test_load_rejects_empty_bounds() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path());
        let mut p = params();
        p.min_counts = 5000.0;
        p.max_counts = 4000.0;
        assert!(load(dir.path(), &annotations(), &p).is_err());
    }
}
