//! Format boundary of the pipeline.
//!
//! Readers for the vendor matrix bundles and annotation tables, the
//! externally produced neighbor-graph files, and the binary columnar
//! archive the final matrices are persisted in. All text readers are
//! transparent to gzip compression.

pub mod archive;
pub mod layers;
pub mod mtx;
pub mod neighbors;
pub mod tables;
pub mod tenx;

use anyhow::{Context, Result, bail};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Open a text file for buffered reading, decompressing on the fly when the
/// path ends in `.gz`.
pub fn open_text(path: &Path) -> Result<Box<dyn BufRead>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open '{}'", path.display()))?;
    if path.extension().is_some_and(|e| e == "gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Resolve `name` inside `dir`, accepting either the plain file or a `.gz`
/// sibling (the vendor tools emit both).
pub fn resolve_in_dir(dir: &Path, name: &str) -> Result<PathBuf> {
    let plain = dir.join(name);
    if plain.is_file() {
        return Ok(plain);
    }
    let gz = dir.join(format!("{}.gz", name));
    if gz.is_file() {
        return Ok(gz);
    }
    bail!(
        "Neither '{}' nor '{}.gz' found in '{}'",
        name,
        name,
        dir.display()
    );
}

/// Read one identifier per line, taking the first tab-separated field.
pub fn read_id_column(path: &Path) -> Result<Vec<String>> {
    let reader = open_text(path)?;
    let mut ids = Vec::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("Failed to read '{}'", path.display()))?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        let id = trimmed.split('\t').next().unwrap_or(trimmed);
        ids.push(id.to_string());
    }
    Ok(ids)
}

/// Write one cell identifier per line; the file is the handoff point to the
/// external joint-embedding neighbor tool.
pub fn write_cell_list(path: &Path, cells: &[String]) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);
    for cell in cells {
        writeln!(writer, "{}", cell)?;
    }
    writer.flush()?;
    Ok(())
}
