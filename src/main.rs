use anyhow::Result;
use clap::Parser;
use log::info;
use single_multiome::io::neighbors::NeighborGraph;
use single_multiome::io::{archive, tables, write_cell_list};
use single_multiome::params::{AlignParams, AtacParams, RnaParams};
use single_multiome::{align, atac, rna};
use std::path::PathBuf;

/// Joint preprocessing of single-cell RNA and ATAC data.
///
/// Runs the RNA and ATAC loading stages, aligns the two modalities over
/// their shared cells and genes, and writes the filtered cell list for the
/// external joint-embedding neighbor tool. When the three neighbor-graph
/// files are supplied, the run additionally validates the graph, smooths
/// the accessibility matrix, and persists both aligned matrices.
#[derive(Parser, Debug)]
#[command(name = "multiome-prep", version, about)]
struct Args {
    /// RNA spliced/unspliced bundle directory
    #[arg(long)]
    rna: PathBuf,

    /// ATAC feature-barcode matrix directory
    #[arg(long)]
    atac: PathBuf,

    /// Peak annotation table (TSV)
    #[arg(long)]
    peak_annotation: PathBuf,

    /// Feature linkage file (BEDPE)
    #[arg(long)]
    linkage: PathBuf,

    /// Cell annotation table (TSV: barcode, cell type)
    #[arg(long)]
    cell_annotations: PathBuf,

    /// Output directory
    #[arg(long, short)]
    out_dir: PathBuf,

    /// Externally computed neighbor indices (1-based, one row per cell)
    #[arg(long, requires = "nn_dist", requires = "nn_cells")]
    nn_idx: Option<PathBuf>,

    /// Neighbor distances matching --nn-idx
    #[arg(long, requires = "nn_idx")]
    nn_dist: Option<PathBuf>,

    /// Cell ordering the neighbor graph was computed against
    #[arg(long, requires = "nn_idx")]
    nn_cells: Option<PathBuf>,

    /// RNA cell filter lower bound (inclusive)
    #[arg(long, default_value_t = 1000.0)]
    rna_min_counts: f64,

    /// RNA cell filter upper bound (exclusive)
    #[arg(long, default_value_t = 20000.0)]
    rna_max_counts: f64,

    /// Minimum shared spliced/unspliced counts per gene
    #[arg(long, default_value_t = 10.0)]
    min_shared_counts: f64,

    /// Number of top variable genes
    #[arg(long, default_value_t = 1000)]
    n_top_genes: usize,

    /// ATAC cell filter lower bound (inclusive)
    #[arg(long, default_value_t = 2000.0)]
    atac_min_counts: f64,

    /// ATAC cell filter upper bound (exclusive)
    #[arg(long, default_value_t = 60000.0)]
    atac_max_counts: f64,

    /// Minimum linkage score for distal peak aggregation
    #[arg(long, default_value_t = 0.5)]
    min_linkage_score: f64,

    /// Number of principal components for the QC embedding
    #[arg(long, default_value_t = 30)]
    n_pcs: usize,

    /// Neighborhood size for the moment computation
    #[arg(long, default_value_t = 50)]
    n_neighbors: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    let args = Args::parse();

    let rna_params = RnaParams {
        min_counts: args.rna_min_counts,
        max_counts: args.rna_max_counts,
        min_shared_counts: args.min_shared_counts,
        n_top_genes: args.n_top_genes,
        ..RnaParams::default()
    };
    let atac_params = AtacParams {
        min_counts: args.atac_min_counts,
        max_counts: args.atac_max_counts,
        min_linkage_score: args.min_linkage_score,
        ..AtacParams::default()
    };
    let align_params = AlignParams {
        n_pcs: args.n_pcs,
        n_neighbors: args.n_neighbors,
        ..AlignParams::default()
    };

    if !args.out_dir.is_dir() {
        std::fs::create_dir_all(&args.out_dir)?;
    }

    let cell_annotations = tables::read_cell_annotations(&args.cell_annotations)?;
    let peak_annotations = tables::read_peak_annotations(&args.peak_annotation)?;
    let linkages = tables::read_feature_linkages(&args.linkage)?;

    let rna_loaded = rna::load(&args.rna, &cell_annotations, &rna_params)?;
    let atac_loaded = atac::load(&args.atac, &peak_annotations, &linkages, &atac_params)?;

    let raw_rna = rna::load_raw(&args.rna, &rna_params)?;
    let mut pair = align::align_modalities(
        &raw_rna,
        &rna_loaded,
        &atac_loaded,
        &cell_annotations,
        &align_params,
    )?;

    let cell_list = args.out_dir.join("filtered_cells.txt");
    write_cell_list(&cell_list, &pair.atac.obs_names)?;
    info!("Wrote {} cells to '{}'", pair.atac.obs_names.len(), cell_list.display());

    let (Some(nn_idx), Some(nn_dist), Some(nn_cells)) =
        (&args.nn_idx, &args.nn_dist, &args.nn_cells)
    else {
        info!(
            "No neighbor-graph files supplied; run the external neighbor tool on \
             '{}' and rerun with --nn-idx/--nn-dist/--nn-cells",
            cell_list.display()
        );
        return Ok(());
    };

    let graph = NeighborGraph::from_files(nn_idx, nn_dist, nn_cells)?;
    align::apply_external_neighbors(&mut pair.atac, &graph)?;

    let rna_out = args.out_dir.join("rna_result.bin");
    let atac_out = args.out_dir.join("atac_result.bin");
    archive::write_archive(&rna_out, &pair.rna)?;
    archive::write_archive(&atac_out, &pair.atac)?;
    info!(
        "Wrote aligned matrices to '{}' and '{}'",
        rna_out.display(),
        atac_out.display()
    );
    Ok(())
}
