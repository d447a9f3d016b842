//! ATAC loading stage.
//!
//! Reads a feature-barcode matrix, keeps only peak features, aggregates
//! peak-level accessibility into gene-level signal, filters cells on the
//! aggregated totals and applies the TF-IDF transform. Aggregation pools
//! a gene's promoter and gene-body peaks with the distal peaks whose
//! linkage to the gene (directly, or through one of its promoter peaks)
//! scores above the configured threshold.

use crate::io::tables::{FeatureLinkage, PeakAnnotation};
use crate::io::tenx;
use crate::matrix::AnnotatedMatrix;
use crate::normalize;
use crate::params::AtacParams;
use anyhow::{Result, bail};
use log::{debug, info};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// Aggregate peak-level counts into gene-level accessibility.
///
/// Membership of a peak in a gene's signal follows two routes:
/// promoter/gene-body peaks straight from the annotation table, and distal
/// peaks linked (peak-to-gene, or peak-to-promoter-peak) with a score of at
/// least `min_linkage_score`. Returns the aggregated cells-by-genes matrix
/// and the gene list in sorted order.
pub fn aggregate_peaks(
    counts: &CsrMatrix<f64>,
    peak_ids: &[String],
    annotations: &[PeakAnnotation],
    linkages: &[FeatureLinkage],
    min_linkage_score: f64,
) -> Result<(CsrMatrix<f64>, Vec<String>)> {
    if counts.ncols() != peak_ids.len() {
        bail!(
            "Count matrix has {} peaks but {} peak identifiers were given",
            counts.ncols(),
            peak_ids.len()
        );
    }
    let peak_positions: HashMap<&str, usize> = peak_ids
        .iter()
        .enumerate()
        .map(|(i, p)| (p.as_str(), i))
        .collect();

    // Genes to their member peak columns; BTreeMap fixes the sorted gene
    // order of the output.
    let mut gene_peaks: BTreeMap<&str, BTreeSet<usize>> = BTreeMap::new();
    // Promoter peak to the genes it promotes, for peak-peak linkages.
    let mut promoter_genes: HashMap<&str, Vec<&str>> = HashMap::new();

    for annotation in annotations {
        let Some(&col) = peak_positions.get(annotation.peak.as_str()) else {
            continue;
        };
        let body_or_promoter = annotation.role == "promoter" || annotation.distance == 0;
        for gene in &annotation.genes {
            if body_or_promoter {
                gene_peaks.entry(gene.as_str()).or_default().insert(col);
            }
            if annotation.role == "promoter" {
                promoter_genes
                    .entry(annotation.peak.as_str())
                    .or_default()
                    .push(gene.as_str());
            }
        }
    }

    for linkage in linkages {
        if linkage.score < min_linkage_score {
            continue;
        }
        match linkage.kind.as_str() {
            "peak-gene" => {
                link_peak_to_gene(&linkage.feature1, &linkage.feature2, &peak_positions, &mut gene_peaks);
            }
            "gene-peak" => {
                link_peak_to_gene(&linkage.feature2, &linkage.feature1, &peak_positions, &mut gene_peaks);
            }
            _ => {
                // peak-peak: a distal peak joins every gene whose promoter
                // peak it is linked to.
                link_via_promoter(
                    &linkage.feature1,
                    &linkage.feature2,
                    &peak_positions,
                    &promoter_genes,
                    &mut gene_peaks,
                );
                link_via_promoter(
                    &linkage.feature2,
                    &linkage.feature1,
                    &peak_positions,
                    &promoter_genes,
                    &mut gene_peaks,
                );
            }
        }
    }

    if gene_peaks.is_empty() {
        bail!("Peak aggregation produced no genes; check the annotation and linkage tables");
    }

    let genes: Vec<String> = gene_peaks.keys().map(|g| g.to_string()).collect();
    // Per peak column, the gene columns it contributes to.
    let mut peak_targets: Vec<Vec<usize>> = vec![Vec::new(); counts.ncols()];
    for (gene_idx, peaks) in gene_peaks.values().enumerate() {
        for &col in peaks {
            peak_targets[col].push(gene_idx);
        }
    }

    // Duplicate COO entries sum on conversion, which is exactly the
    // aggregation semantics.
    let mut coo = CooMatrix::new(counts.nrows(), genes.len());
    for (row, col, &val) in counts.triplet_iter() {
        for &gene_idx in &peak_targets[col] {
            coo.push(row, gene_idx, val);
        }
    }
    Ok((CsrMatrix::from(&coo), genes))
}

fn link_peak_to_gene<'a>(
    peak: &str,
    gene: &'a str,
    peak_positions: &HashMap<&str, usize>,
    gene_peaks: &mut BTreeMap<&'a str, BTreeSet<usize>>,
) {
    if let Some(&col) = peak_positions.get(peak) {
        gene_peaks.entry(gene).or_default().insert(col);
    }
}

fn link_via_promoter<'a>(
    promoter_peak: &str,
    distal_peak: &str,
    peak_positions: &HashMap<&str, usize>,
    promoter_genes: &HashMap<&str, Vec<&'a str>>,
    gene_peaks: &mut BTreeMap<&'a str, BTreeSet<usize>>,
) {
    let Some(genes) = promoter_genes.get(promoter_peak) else {
        return;
    };
    let Some(&col) = peak_positions.get(distal_peak) else {
        return;
    };
    for gene in genes {
        gene_peaks.entry(gene).or_default().insert(col);
    }
}

/// Run the full ATAC loading stage.
pub fn load(
    dir: &Path,
    annotations: &[PeakAnnotation],
    linkages: &[FeatureLinkage],
    params: &AtacParams,
) -> Result<AnnotatedMatrix> {
    if params.min_counts >= params.max_counts {
        bail!(
            "ATAC count bounds are empty: [{}, {})",
            params.min_counts,
            params.max_counts
        );
    }
    let (matrix, barcodes, features) = tenx::read_feature_barcode_dir(dir)?;
    info!(
        "ATAC source: {} cells x {} features",
        matrix.nrows(),
        matrix.ncols()
    );

    // The multiome matrix co-measures gene expression; keep peaks only.
    let peak_cols: Vec<usize> = features
        .iter()
        .enumerate()
        .filter(|(_, f)| f.feature_type == params.peak_feature_type || f.feature_type.is_empty())
        .map(|(i, _)| i)
        .collect();
    if peak_cols.is_empty() {
        bail!(
            "No features of type '{}' in '{}'",
            params.peak_feature_type,
            dir.display()
        );
    }
    let peak_ids: Vec<String> = peak_cols.iter().map(|&i| features[i].id.clone()).collect();
    let peaks = crate::matrix::subset_csr(&matrix, None, Some(&peak_cols))?;
    debug!(
        "ATAC peak features: {} of {}",
        peak_cols.len(),
        features.len()
    );

    let (aggregated, genes) = aggregate_peaks(
        &peaks,
        &peak_ids,
        annotations,
        linkages,
        params.min_linkage_score,
    )?;
    info!(
        "ATAC aggregated to {} genes from {} peaks",
        genes.len(),
        peak_ids.len()
    );

    let mut m = AnnotatedMatrix::new(aggregated, barcodes, genes)?;

    // Cell filter on the aggregated totals.
    let totals = normalize::row_sums(&m.x);
    let keep_cells: Vec<usize> = totals
        .iter()
        .enumerate()
        .filter(|&(_, &t)| t >= params.min_counts && t < params.max_counts)
        .map(|(i, _)| i)
        .collect();
    if keep_cells.is_empty() {
        bail!(
            "No ATAC cells with aggregated totals in [{}, {})",
            params.min_counts,
            params.max_counts
        );
    }
    debug!(
        "ATAC cell filter [{}, {}): dropping {} of {} cells",
        params.min_counts,
        params.max_counts,
        m.n_obs() - keep_cells.len(),
        m.n_obs()
    );
    let mut m = m.select_obs(&keep_cells)?;

    normalize::tfidf(&mut m.x)?;
    info!(
        "ATAC after cell filter and TF-IDF: {} cells x {} genes",
        m.n_obs(),
        m.n_vars()
    );
    Ok(m)
}
