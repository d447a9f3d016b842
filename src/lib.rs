//! # single-multiome
//!
//! A specialized Rust library for joint preprocessing of single-cell RNA and ATAC data,
//! part of the single-rust ecosystem.
//!
//! This crate reconciles two single-cell modalities measured on the same cells but
//! processed independently: spliced/unspliced RNA counts and peak-level chromatin
//! accessibility. It loads the vendor matrix bundles, filters cells and features by
//! count thresholds, aggregates peaks into gene-level accessibility, normalizes both
//! modalities, aligns them over their shared cells and genes, and applies an externally
//! computed nearest-neighbor graph to smooth the accessibility signal. The result is a
//! pair of annotated matrices ready for joint trajectory/velocity modeling.
//!
//! ## Pipeline Stages
//!
//! - **RNA loading** ([`rna`]): barcode canonicalization, count filtering, variable-gene
//!   selection, normalization, and cell-type annotation
//! - **ATAC loading** ([`atac`]): peak filtering, peak-to-gene aggregation, count
//!   filtering, and TF-IDF normalization
//! - **Alignment** ([`align`]): shared-axis intersection, fresh RNA re-parse, embedding
//!   and moments, neighbor-graph import validation, and smoothing
//!
//! ## Module Organization
//!
//! - **[`matrix`]**: the `AnnotatedMatrix` container and its axis invariants
//! - **[`normalize`]**: shared numeric transforms over sparse matrices
//! - **[`io`]**: vendor bundle readers, annotation tables, neighbor-graph files, and
//!   the binary columnar archive
//! - **[`params`]**: stage parameters with the pipeline's literal defaults

pub mod align;
pub mod atac;
pub mod io;
pub mod matrix;
pub mod normalize;
pub mod params;
pub mod rna;
