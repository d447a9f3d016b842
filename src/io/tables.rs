//! Tab-separated annotation tables.
//!
//! Three vendor tables feed the pipeline: the peak annotation (peak to
//! gene with a promoter/distal role), the feature linkage BEDPE (pairs of
//! genomic features with an association score), and the cell annotation
//! (barcode to cell-type label).

use anyhow::{Context, Result, bail};
use csv::ReaderBuilder;
use log::debug;
use std::collections::HashMap;
use std::path::Path;

/// One peak-to-gene association from the peak annotation table.
#[derive(Debug, Clone)]
pub struct PeakAnnotation {
    /// Peak identifier in `chrom:start-end` form.
    pub peak: String,
    /// Associated genes; a peak may annotate several (`;`-separated).
    pub genes: Vec<String>,
    /// Distance from the peak to the gene, 0 inside the gene body.
    pub distance: i64,
    /// Role of the peak relative to the gene: "promoter" or "distal".
    pub role: String,
}

/// One row of the feature linkage BEDPE.
#[derive(Debug, Clone)]
pub struct FeatureLinkage {
    pub feature1: String,
    pub feature2: String,
    pub score: f64,
    /// "peak-peak", "peak-gene" or "gene-peak".
    pub kind: String,
}

fn tsv_reader(path: &Path) -> Result<csv::Reader<Box<dyn std::io::BufRead>>> {
    let reader = super::open_text(path)?;
    Ok(ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(reader))
}

/// Read the peak annotation table.
///
/// Expected columns: chrom, start, end, gene(s), distance, peak type. A
/// header row is skipped when present. Rows without a gene are dropped.
pub fn read_peak_annotations(path: &Path) -> Result<Vec<PeakAnnotation>> {
    let mut reader = tsv_reader(path)?;
    let mut annotations = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("Failed to read '{}'", path.display()))?;
        if record.len() < 6 {
            bail!(
                "Peak annotation row {} in '{}' has {} fields, expected 6",
                idx + 1,
                path.display(),
                record.len()
            );
        }
        // Header row: the start field is not numeric.
        if idx == 0 && record[1].parse::<u64>().is_err() {
            continue;
        }
        let start: u64 = record[1]
            .parse()
            .with_context(|| format!("Bad start coordinate in row {}", idx + 1))?;
        let end: u64 = record[2]
            .parse()
            .with_context(|| format!("Bad end coordinate in row {}", idx + 1))?;
        let genes: Vec<String> = record[3]
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if genes.is_empty() {
            continue;
        }
        let distance: i64 = record[4].parse().unwrap_or(0);
        annotations.push(PeakAnnotation {
            peak: format!("{}:{}-{}", &record[0], start, end),
            genes,
            distance,
            role: record[5].trim().to_string(),
        });
    }
    Ok(annotations)
}

const LINKAGE_KINDS: [&str; 3] = ["peak-peak", "peak-gene", "gene-peak"];

/// Read the feature linkage BEDPE.
///
/// Expected columns: chrom1, start1, end1, chrom2, start2, end2, name,
/// score, then optional extras whose last recognized field is the linkage
/// kind. The name field is `feature1<>feature2`; when it is absent the
/// features fall back to their coordinate form.
pub fn read_feature_linkages(path: &Path) -> Result<Vec<FeatureLinkage>> {
    let mut reader = tsv_reader(path)?;
    let mut linkages = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("Failed to read '{}'", path.display()))?;
        if record.len() < 8 {
            bail!(
                "Linkage row {} in '{}' has {} fields, expected at least 8",
                idx + 1,
                path.display(),
                record.len()
            );
        }
        let (feature1, feature2) = match record[6].split_once("<>") {
            Some((a, b)) => (a.to_string(), b.to_string()),
            None => (
                format!("{}:{}-{}", &record[0], &record[1], &record[2]),
                format!("{}:{}-{}", &record[3], &record[4], &record[5]),
            ),
        };
        let score: f64 = record[7]
            .parse()
            .with_context(|| format!("Bad linkage score in row {}", idx + 1))?;
        let kind = match record
            .iter()
            .skip(8)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .find(|f| LINKAGE_KINDS.contains(f))
        {
            Some(k) => k.to_string(),
            None => {
                debug!(
                    "Linkage row {} in '{}' carries no recognized kind field; assuming peak-peak",
                    idx + 1,
                    path.display()
                );
                "peak-peak".to_string()
            }
        };
        linkages.push(FeatureLinkage {
            feature1,
            feature2,
            score,
            kind,
        });
    }
    Ok(linkages)
}

/// Read the cell annotation table (barcode, cell type).
///
/// Returns a map from cell identifier to label; a header row is skipped.
pub fn read_cell_annotations(path: &Path) -> Result<HashMap<String, String>> {
    let mut reader = tsv_reader(path)?;
    let mut annotations = HashMap::new();
    for (idx, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("Failed to read '{}'", path.display()))?;
        if record.len() < 2 {
            bail!(
                "Cell annotation row {} in '{}' has {} fields, expected 2",
                idx + 1,
                path.display(),
                record.len()
            );
        }
        if idx == 0 && (record[0].eq_ignore_ascii_case("barcode") || &record[1] == "cell_type") {
            continue;
        }
        annotations.insert(record[0].to_string(), record[1].to_string());
    }
    Ok(annotations)
}
