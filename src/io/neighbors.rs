//! Import of the externally computed nearest-neighbor graph.
//!
//! The joint-embedding neighbor computation runs out of process (an
//! R-based tool) and hands back three text files: per-cell neighbor
//! indices, the matching distances, and the cell ordering the graph was
//! computed against. Indices on disk are 1-based per the producing tool's
//! convention and are converted here; whether the ordering matches the
//! ATAC matrix is checked by the aligner before the graph is applied.

use anyhow::{Context, Result, bail};
use std::path::Path;

/// Per-cell neighbor indices and distances plus the assumed cell ordering.
#[derive(Debug, Clone)]
pub struct NeighborGraph {
    pub cells: Vec<String>,
    /// 0-based neighbor row indices, one ordered list per cell.
    pub indices: Vec<Vec<usize>>,
    pub distances: Vec<Vec<f64>>,
}

impl NeighborGraph {
    /// Read the three neighbor-graph files.
    pub fn from_files(idx_path: &Path, dist_path: &Path, cells_path: &Path) -> Result<Self> {
        let cells = super::read_id_column(cells_path)?;
        let raw_indices = read_number_rows::<usize>(idx_path)?;
        let distances = read_number_rows::<f64>(dist_path)?;

        if raw_indices.len() != cells.len() {
            bail!(
                "Neighbor index file has {} rows but the cell list has {}",
                raw_indices.len(),
                cells.len()
            );
        }
        if distances.len() != raw_indices.len() {
            bail!(
                "Neighbor distance file has {} rows but the index file has {}",
                distances.len(),
                raw_indices.len()
            );
        }
        let n_cells = cells.len();
        let width = raw_indices.first().map_or(0, Vec::len);
        let mut indices = Vec::with_capacity(raw_indices.len());
        for (row, (idx_row, dist_row)) in raw_indices.iter().zip(&distances).enumerate() {
            if idx_row.len() != width || dist_row.len() != width {
                bail!(
                    "Neighbor files are not rectangular: row {} has {} indices and {} distances, expected {}",
                    row + 1,
                    idx_row.len(),
                    dist_row.len(),
                    width
                );
            }
            let mut converted = Vec::with_capacity(idx_row.len());
            for &i in idx_row {
                // 1-based on disk.
                if i == 0 || i > n_cells {
                    bail!(
                        "Neighbor index {} in row {} is outside 1..={}",
                        i,
                        row + 1,
                        n_cells
                    );
                }
                converted.push(i - 1);
            }
            indices.push(converted);
        }
        Ok(Self {
            cells,
            indices,
            distances,
        })
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn n_neighbors(&self) -> usize {
        self.indices.first().map_or(0, Vec::len)
    }

    /// Verify that the graph's assumed cell ordering equals `obs_names`
    /// exactly. This is the precondition for applying the graph; a mismatch
    /// means the graph was computed against a different filtering of the
    /// data and applying it would silently misalign cells.
    pub fn validate_cell_order(&self, obs_names: &[String]) -> Result<()> {
        if self.cells.len() != obs_names.len() {
            bail!(
                "Neighbor graph covers {} cells but the matrix has {}",
                self.cells.len(),
                obs_names.len()
            );
        }
        for (pos, (graph_cell, matrix_cell)) in self.cells.iter().zip(obs_names).enumerate() {
            if graph_cell != matrix_cell {
                bail!(
                    "Neighbor graph cell ordering diverges from the matrix at position {}: '{}' vs '{}'",
                    pos,
                    graph_cell,
                    matrix_cell
                );
            }
        }
        Ok(())
    }
}

fn read_number_rows<T>(path: &Path) -> Result<Vec<Vec<T>>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    use std::io::BufRead;
    let reader = super::open_text(path)?;
    let mut rows = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read '{}'", path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let row = trimmed
            .split(|c: char| c == ',' || c == '\t' || c == ' ')
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<T>().with_context(|| {
                    format!("Bad value '{}' at line {} of '{}'", s, line_no + 1, path.display())
                })
            })
            .collect::<Result<Vec<T>>>()?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_graph(dir: &Path, idx: &str, dist: &str, cells: &str) -> NeighborGraph {
        std::fs::write(dir.join("nn_idx.txt"), idx).unwrap();
        std::fs::write(dir.join("nn_dist.txt"), dist).unwrap();
        std::fs::write(dir.join("nn_cells.txt"), cells).unwrap();
        NeighborGraph::from_files(
            &dir.join("nn_idx.txt"),
            &dir.join("nn_dist.txt"),
            &dir.join("nn_cells.txt"),
        )
        .unwrap()
    }

    #[test]
    fn test_from_files_converts_to_zero_based() {
        let dir = tempfile::tempdir().unwrap();
        let graph = write_graph(
            dir.path(),
            "1,2\n2,1\n3,1\n",
            "0.0,1.0\n0.0,1.0\n0.0,2.0\n",
            "c1\nc2\nc3\n",
        );
        assert_eq!(graph.n_cells(), 3);
        assert_eq!(graph.n_neighbors(), 2);
        assert_eq!(graph.indices[0], vec![0, 1]);
        assert_eq!(graph.indices[2], vec![2, 0]);
    }

    #[test]
    fn test_from_files_rejects_out_of_range_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nn_idx.txt"), "1,4\n2,1\n").unwrap();
        std::fs::write(dir.path().join("nn_dist.txt"), "0,1\n0,1\n").unwrap();
        std::fs::write(dir.path().join("nn_cells.txt"), "c1\nc2\n").unwrap();
        let result = NeighborGraph::from_files(
            &dir.path().join("nn_idx.txt"),
            &dir.path().join("nn_dist.txt"),
            &dir.path().join("nn_cells.txt"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_from_files_rejects_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nn_idx.txt"), "1,2\n2\n").unwrap();
        std::fs::write(dir.path().join("nn_dist.txt"), "0,1\n0,1\n").unwrap();
        std::fs::write(dir.path().join("nn_cells.txt"), "c1\nc2\n").unwrap();
        assert!(
            NeighborGraph::from_files(
                &dir.path().join("nn_idx.txt"),
                &dir.path().join("nn_dist.txt"),
                &dir.path().join("nn_cells.txt"),
            )
            .is_err()
        );
    }

    #[test]
    fn test_validate_cell_order_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let graph = write_graph(dir.path(), "1\n2\n", "0\n0\n", "c1\nc2\n");
        assert!(graph.validate_cell_order(&["c1".into(), "c2".into()]).is_ok());
        let err = graph
            .validate_cell_order(&["c1".into(), "cX".into()])
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("position 1"));
        assert!(msg.contains("c2"));
        assert!(msg.contains("cX"));
    }
}
