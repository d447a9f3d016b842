//! Stage parameters with the pipeline's literal defaults.
//!
//! Every filter bound that was a hard-coded threshold in the original
//! workflow is a named field here so it can be overridden from the CLI.

/// Parameters for the RNA loading stage.
#[derive(Debug, Clone)]
pub struct RnaParams {
    /// Keep cells with total counts in `[min_counts, max_counts)`.
    pub min_counts: f64,
    pub max_counts: f64,
    /// Minimum summed spliced/unspliced shared counts for a gene to survive.
    pub min_shared_counts: f64,
    /// Number of top variable genes retained for annotation purposes.
    pub n_top_genes: usize,
    /// Suffix appended to canonicalized barcodes.
    pub barcode_suffix: String,
    /// Lineage categories retained after the annotation join.
    pub keep_cell_types: Vec<String>,
}

impl Default for RnaParams {
    fn default() -> Self {
        Self {
            min_counts: 1000.0,
            max_counts: 20000.0,
            min_shared_counts: 10.0,
            n_top_genes: 1000,
            barcode_suffix: "-1".to_string(),
            keep_cell_types: default_lineages(),
        }
    }
}

/// The seven lineage categories kept for trajectory modeling.
pub fn default_lineages() -> Vec<String> {
    [
        "RG, Astro, OPC",
        "IPC",
        "V-SVZ",
        "Upper Layer",
        "Deeper Layer",
        "Ependymal cells",
        "Subplate",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Parameters for the ATAC loading stage.
#[derive(Debug, Clone)]
pub struct AtacParams {
    /// Keep cells with aggregated totals in `[min_counts, max_counts)`.
    pub min_counts: f64,
    pub max_counts: f64,
    /// Minimum linkage score for a distal peak to aggregate into a gene.
    pub min_linkage_score: f64,
    /// Feature type tag marking peak features in the feature-barcode matrix.
    pub peak_feature_type: String,
}

impl Default for AtacParams {
    fn default() -> Self {
        Self {
            min_counts: 2000.0,
            max_counts: 60000.0,
            min_linkage_score: 0.5,
            peak_feature_type: "Peaks".to_string(),
        }
    }
}

/// Parameters for the alignment stage.
#[derive(Debug, Clone)]
pub struct AlignParams {
    /// Number of principal components for the QC embedding.
    pub n_pcs: usize,
    /// Neighborhood size for the moment computation.
    pub n_neighbors: usize,
    /// Display order imposed on the cell-type category set.
    pub display_order: Vec<String>,
}

impl Default for AlignParams {
    fn default() -> Self {
        Self {
            n_pcs: 30,
            n_neighbors: 50,
            display_order: [
                "Upper Layer",
                "Deeper Layer",
                "IPC",
                "RG, Astro, OPC",
                "V-SVZ",
                "Ependymal cells",
                "Subplate",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}
