//! MatrixMarket coordinate parser.
//!
//! Handles the `real`, `integer`, and `pattern` coordinate variants with
//! `general` symmetry, which covers every matrix the vendor bundles ship.

use anyhow::{Context, Result, bail};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::io::BufRead;
use std::path::Path;

/// Read a MatrixMarket coordinate file into a CSR matrix.
///
/// When `transpose` is set the stored rows become columns, which turns the
/// feature-major vendor orientation into the cells-by-features orientation
/// used throughout the pipeline.
pub fn read_mtx(path: &Path, transpose: bool) -> Result<CsrMatrix<f64>> {
    let reader = super::open_text(path)?;
    let mut lines = reader.lines();

    let header = loop {
        match lines.next() {
            Some(line) => {
                let line = line?;
                if !line.trim().is_empty() {
                    break line;
                }
            }
            None => bail!("'{}' is empty", path.display()),
        }
    };
    if !header.starts_with("%%MatrixMarket") {
        bail!("'{}' is not a MatrixMarket file", path.display());
    }
    let tokens: Vec<&str> = header.split_whitespace().collect();
    if tokens.len() < 5 || tokens[1] != "matrix" || tokens[2] != "coordinate" {
        bail!(
            "Unsupported MatrixMarket header in '{}': '{}'",
            path.display(),
            header
        );
    }
    let field = tokens[3];
    if !matches!(field, "real" | "integer" | "pattern") {
        bail!("Unsupported MatrixMarket field type '{}'", field);
    }
    if tokens[4] != "general" {
        bail!("Unsupported MatrixMarket symmetry '{}'", tokens[4]);
    }
    let pattern = field == "pattern";

    // Skip comments, then the dimensions line.
    let dims = loop {
        match lines.next() {
            Some(line) => {
                let line = line?;
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('%') {
                    continue;
                }
                break trimmed.to_string();
            }
            None => bail!("'{}' has no dimensions line", path.display()),
        }
    };
    let mut parts = dims.split_whitespace();
    let nrows: usize = parse_token(parts.next(), "row count", path)?;
    let ncols: usize = parse_token(parts.next(), "column count", path)?;
    let nnz: usize = parse_token(parts.next(), "entry count", path)?;

    let (out_rows, out_cols) = if transpose { (ncols, nrows) } else { (nrows, ncols) };
    let mut coo = CooMatrix::new(out_rows, out_cols);
    let mut seen = 0usize;
    for line in lines {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        let row: usize = parse_token(parts.next(), "entry row", path)?;
        let col: usize = parse_token(parts.next(), "entry column", path)?;
        let val: f64 = if pattern {
            1.0
        } else {
            parts
                .next()
                .context("Missing entry value")?
                .parse()
                .with_context(|| format!("Bad entry value in '{}'", path.display()))?
        };
        if row == 0 || row > nrows || col == 0 || col > ncols {
            bail!(
                "Entry ({}, {}) outside the declared {}x{} shape in '{}'",
                row,
                col,
                nrows,
                ncols,
                path.display()
            );
        }
        // MatrixMarket indices are 1-based.
        if transpose {
            coo.push(col - 1, row - 1, val);
        } else {
            coo.push(row - 1, col - 1, val);
        }
        seen += 1;
    }
    if seen != nnz {
        bail!(
            "'{}' declares {} entries but contains {}",
            path.display(),
            nnz,
            seen
        );
    }
    Ok(CsrMatrix::from(&coo))
}

fn parse_token<T: std::str::FromStr>(token: Option<&str>, what: &str, path: &Path) -> Result<T> {
    token
        .with_context(|| format!("Missing {} in '{}'", what, path.display()))?
        .parse::<T>()
        .map_err(|_| anyhow::anyhow!("Bad {} in '{}'", what, path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_mtx(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.mtx");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_read_mtx_basic() {
        let (_dir, path) = write_mtx(
            "%%MatrixMarket matrix coordinate integer general\n\
             % a comment\n\
             2 3 3\n\
             1 1 5\n\
             2 3 7\n\
             1 2 1\n",
        );
        let m = read_mtx(&path, false).unwrap();
        assert_eq!((m.nrows(), m.ncols(), m.nnz()), (2, 3, 3));
        assert_eq!(m.row(0).values(), &[5.0, 1.0]);
        assert_eq!(m.row(1).values(), &[7.0]);
    }

    #[test]
    fn test_read_mtx_transpose() {
        let (_dir, path) = write_mtx(
            "%%MatrixMarket matrix coordinate real general\n\
             2 3 2\n\
             1 1 1.5\n\
             2 3 2.5\n",
        );
        let m = read_mtx(&path, true).unwrap();
        assert_eq!((m.nrows(), m.ncols()), (3, 2));
        assert_eq!(m.row(0).values(), &[1.5]);
        assert_eq!(m.row(2).values(), &[2.5]);
    }

    #[test]
    fn test_read_mtx_rejects_bad_header() {
        let (_dir, path) = write_mtx("not a matrix\n1 1 0\n");
        assert!(read_mtx(&path, false).is_err());
    }

    #[test]
    fn test_read_mtx_rejects_entry_count_mismatch() {
        let (_dir, path) = write_mtx(
            "%%MatrixMarket matrix coordinate real general\n\
             2 2 3\n\
             1 1 1.0\n",
        );
        assert!(read_mtx(&path, false).is_err());
    }

    #[test]
    fn test_read_mtx_rejects_out_of_bounds_entry() {
        let (_dir, path) = write_mtx(
            "%%MatrixMarket matrix coordinate real general\n\
             2 2 1\n\
             3 1 1.0\n",
        );
        assert!(read_mtx(&path, false).is_err());
    }
}
