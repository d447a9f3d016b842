//! Alignment stage.
//!
//! Reconciles the two loaded modalities into a common-cell, common-gene
//! pair: sorted identifier intersections, a fresh re-parse of the raw RNA
//! source subset to the shared axes, re-normalization, a PCA/neighbor/
//! moment embedding for QC, cell-type re-attachment with a fixed category
//! display order, the cell-list handoff to the external neighbor tool,
//! and finally validation plus smoothing with the re-imported graph.

pub mod embedding;
pub mod smoothing;

use crate::io::layers::{SPLICED, UNSPLICED};
use crate::io::neighbors::NeighborGraph;
use crate::matrix::{AnnotatedMatrix, CellTypes};
use crate::normalize;
use crate::params::AlignParams;
use anyhow::{Result, bail};
use log::info;
use std::collections::{HashMap, HashSet};

/// Embedding key for the principal-component scores.
pub const X_PCA: &str = "X_pca";
/// Embedding key for the 2D visualization coordinates.
pub const X_VIS: &str = "X_vis";
/// Dense layer keys for the moment-smoothed spliced/unspliced signal.
pub const MS: &str = "Ms";
pub const MU: &str = "Mu";

/// Sorted intersection of two identifier lists.
///
/// Set semantics: the result is independent of either input order, which
/// makes the operation symmetric in its arguments.
pub fn intersect_sorted(a: &[String], b: &[String]) -> Vec<String> {
    let b_set: HashSet<&str> = b.iter().map(String::as_str).collect();
    let mut shared: Vec<String> = a
        .iter()
        .filter(|id| b_set.contains(id.as_str()))
        .cloned()
        .collect();
    shared.sort();
    shared.dedup();
    shared
}

/// The aligned output pair.
#[derive(Debug)]
pub struct AlignedPair {
    pub rna: AnnotatedMatrix,
    pub atac: AnnotatedMatrix,
}

/// Align the two modalities over their shared cells and genes.
///
/// `raw_rna` must be a fresh parse of the RNA source (see
/// [`crate::rna::load_raw`]); `rna` is the loaded stage-1 matrix whose
/// variable-gene set defines the gene intersection together with the ATAC
/// gene set, but whose values are not carried forward.
pub fn align_modalities(
    raw_rna: &AnnotatedMatrix,
    rna: &AnnotatedMatrix,
    atac: &AnnotatedMatrix,
    annotations: &HashMap<String, String>,
    params: &AlignParams,
) -> Result<AlignedPair> {
    let shared_cells = intersect_sorted(&rna.obs_names, &atac.obs_names);
    if shared_cells.is_empty() {
        bail!("The RNA and ATAC matrices share no cells");
    }
    let shared_genes = intersect_sorted(&rna.var_names, &atac.var_names);
    if shared_genes.is_empty() {
        bail!("The RNA and ATAC matrices share no genes");
    }
    info!(
        "Alignment: {} shared cells, {} shared genes",
        shared_cells.len(),
        shared_genes.len()
    );

    // Subset the fresh raw parse, not the stage-1 matrix.
    let rna_obs = positions_of(&shared_cells, &raw_rna.obs_positions(), "cell", "raw RNA")?;
    let rna_vars = positions_of(&shared_genes, &raw_rna.var_positions(), "gene", "raw RNA")?;
    let mut aligned_rna = raw_rna.select_obs(&rna_obs)?.select_vars(&rna_vars)?;

    let atac_obs = positions_of(&shared_cells, &atac.obs_positions(), "cell", "ATAC")?;
    let atac_vars = positions_of(&shared_genes, &atac.var_positions(), "gene", "ATAC")?;
    let aligned_atac = atac.select_obs(&atac_obs)?.select_vars(&atac_vars)?;

    // Library-size normalization and log transform of the fresh subset.
    normalize::normalize_per_cell(&mut aligned_rna.x, None)?;
    normalize::log1p(&mut aligned_rna.x);
    for layer in aligned_rna.layers.values_mut() {
        normalize::normalize_per_cell(layer, None)?;
    }

    // QC embedding and moments.
    let scores = embedding::pca(&aligned_rna.x, params.n_pcs)?;
    let (neighbor_idx, _) = embedding::knn(&scores, params.n_neighbors)?;
    let (ms, mu) = {
        let spliced = required_layer(&aligned_rna, SPLICED)?;
        let unspliced = required_layer(&aligned_rna, UNSPLICED)?;
        (
            embedding::neighbor_moments(spliced, &neighbor_idx)?,
            embedding::neighbor_moments(unspliced, &neighbor_idx)?,
        )
    };
    aligned_rna.dense_layers.insert(MS.to_string(), ms);
    aligned_rna.dense_layers.insert(MU.to_string(), mu);

    // 2D visualization coordinates from the leading components; a full
    // manifold embedding is an external concern.
    let vis = scores.slice(ndarray::s![.., ..2.min(scores.ncols())]).to_owned();
    aligned_rna.embeddings.insert(X_VIS.to_string(), vis);
    aligned_rna.embeddings.insert(X_PCA.to_string(), scores);

    // Re-attach labels and impose the display order on the categories.
    let labels = aligned_rna
        .obs_names
        .iter()
        .map(|name| {
            annotations.get(name).cloned().ok_or_else(|| {
                anyhow::anyhow!("Shared cell '{}' is missing from the annotation table", name)
            })
        })
        .collect::<Result<Vec<String>>>()?;
    let mut cell_types = CellTypes::from_values(labels);
    cell_types.reorder_categories(&params.display_order);
    aligned_rna.cell_types = Some(cell_types);

    debug_assert_eq!(aligned_rna.obs_names, aligned_atac.obs_names);
    debug_assert_eq!(aligned_rna.var_names, aligned_atac.var_names);
    Ok(AlignedPair {
        rna: aligned_rna,
        atac: aligned_atac,
    })
}

/// Validate the externally computed neighbor graph against the ATAC matrix
/// and smooth the accessibility values over it.
///
/// The cell-ordering check is the pipeline's one hard precondition: it
/// runs before any smoothing so a mismatched graph can never partially
/// contaminate the matrix.
pub fn apply_external_neighbors(atac: &mut AnnotatedMatrix, graph: &NeighborGraph) -> Result<()> {
    graph.validate_cell_order(&atac.obs_names)?;
    atac.x = smoothing::smooth_with_neighbors(&atac.x, graph)?;
    info!(
        "Smoothed ATAC matrix over {} neighbors per cell",
        graph.n_neighbors()
    );
    Ok(())
}

fn required_layer<'a>(
    m: &'a AnnotatedMatrix,
    name: &str,
) -> Result<&'a nalgebra_sparse::CsrMatrix<f64>> {
    m.layers
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("Raw RNA matrix is missing the '{}' layer", name))
}

fn positions_of(
    ids: &[String],
    positions: &HashMap<&str, usize>,
    axis: &str,
    which: &str,
) -> Result<Vec<usize>> {
    ids.iter()
        .map(|id| {
            positions.get(id.as_str()).copied().ok_or_else(|| {
                anyhow::anyhow!("Shared {} '{}' is missing from the {} matrix", axis, id, which)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra_sparse::{CooMatrix, CsrMatrix};

    fn dense_csr(rows: usize, cols: usize, values: &[f64]) -> CsrMatrix<f64> {
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

    fn matrix(obs: &[&str], vars: &[&str], values: &[f64]) -> AnnotatedMatrix {
        AnnotatedMatrix::new(
            dense_csr(obs.len(), vars.len(), values),
            obs.iter().map(|s| s.to_string()).collect(),
            vars.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_intersect_sorted_is_symmetric_and_sorted() {
        let a: Vec<String> = vec!["c3".into(), "c1".into(), "c2".into()];
        let b: Vec<String> = vec!["c2".into(), "c4".into(), "c3".into()];
        let ab = intersect_sorted(&a, &b);
        let ba = intersect_sorted(&b, &a);
        assert_eq!(ab, ba);
        assert_eq!(ab, vec!["c2", "c3"]);
    }

    fn fixture() -> (AnnotatedMatrix, AnnotatedMatrix, AnnotatedMatrix, HashMap<String, String>) {
        let values = [
            5.0, 1.0, 2.0, //
            1.0, 6.0, 1.0, //
            2.0, 1.0, 7.0, //
            3.0, 3.0, 3.0,
        ];
        let mut raw = matrix(&["c1", "c2", "c3", "c4"], &["g1", "g2", "g3"], &values);
        raw.layers
            .insert(SPLICED.to_string(), raw.x.clone());
        raw.layers
            .insert(UNSPLICED.to_string(), raw.x.clone());
        // Stage-1 RNA: cells reordered and one gene filtered away.
        let rna = matrix(
            &["c3", "c1", "c2"],
            &["g2", "g1"],
            &[1.0, 2.0, 1.0, 5.0, 6.0, 1.0],
        );
        let atac = matrix(
            &["c2", "c3", "c5"],
            &["g1", "g2", "g4"],
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
        );
        let annotations: HashMap<String, String> = ["c1", "c2", "c3", "c4"]
            .iter()
            .map(|c| (c.to_string(), "IPC".to_string()))
            .collect();
        (raw, rna, atac, annotations)
    }

    #[test]
    fn test_align_modalities_orders_match() {
        let (raw, rna, atac, annotations) = fixture();
        let params = AlignParams {
            n_pcs: 2,
            n_neighbors: 1,
            ..AlignParams::default()
        };
        let pair = align_modalities(&raw, &rna, &atac, &annotations, &params).unwrap();
        assert_eq!(pair.rna.obs_names, vec!["c2", "c3"]);
        assert_eq!(pair.rna.obs_names, pair.atac.obs_names);
        assert_eq!(pair.rna.var_names, vec!["g1", "g2"]);
        assert_eq!(pair.rna.var_names, pair.atac.var_names);
        assert!(pair.rna.embeddings.contains_key(X_PCA));
        assert!(pair.rna.embeddings.contains_key(X_VIS));
        // With two shared cells only one component is supported.
        assert_eq!(pair.rna.embeddings[X_VIS].ncols(), 1);
        assert!(pair.rna.dense_layers.contains_key(MS));
        assert!(pair.rna.dense_layers.contains_key(MU));
        assert_eq!(pair.rna.cell_types.as_ref().unwrap().values, vec!["IPC", "IPC"]);
    }

    #[test]
    fn test_align_modalities_requires_layers() {
        let (raw, rna, atac, annotations) = fixture();
        let mut bare = raw.clone();
        bare.layers.clear();
        let params = AlignParams {
            n_pcs: 2,
            n_neighbors: 1,
            ..AlignParams::default()
        };
        let err = align_modalities(&bare, &rna, &atac, &annotations, &params).unwrap_err();
        assert!(err.to_string().contains(SPLICED));
    }

    #[test]
    fn test_align_modalities_requires_overlap() {
        let (raw, rna, _, annotations) = fixture();
        let disjoint = matrix(&["x1"], &["g1"], &[1.0]);
        let params = AlignParams::default();
        assert!(align_modalities(&raw, &rna, &disjoint, &annotations, &params).is_err());
    }

    #[test]
    fn test_apply_external_neighbors_checks_order_first() {
        let mut atac = matrix(&["c1", "c2"], &["g1"], &[1.0, 3.0]);
        let original = atac.x.clone();
        let graph = NeighborGraph {
            cells: vec!["c2".into(), "c1".into()],
            indices: vec![vec![1], vec![0]],
            distances: vec![vec![1.0], vec![1.0]],
        };
        let err = apply_external_neighbors(&mut atac, &graph).unwrap_err();
        assert!(err.to_string().contains("position 0"));
        // The matrix must be untouched after the failed precondition.
        assert_eq!(atac.x.values(), original.values());

        let graph_ok = NeighborGraph {
            cells: vec!["c1".into(), "c2".into()],
            indices: vec![vec![1], vec![0]],
            distances: vec![vec![1.0], vec![1.0]],
        };
        apply_external_neighbors(&mut atac, &graph_ok).unwrap();
        assert_eq!(atac.x.row(0).values(), &[3.0]);
    }
}
