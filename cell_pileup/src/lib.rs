//! Crate for per-cell pileup.
//!
//! Counts bases per cell barcode at every covered position of a chromosome,
//! or at a list of candidate variants, and writes the passing sites as VCF.
#![deny(missing_docs)]
use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::path::Path;

mod barcodes;
pub mod counts;
mod engine;
mod variants;
pub mod vcf;

pub use barcodes::{normalize_barcode, BarcodeSet};
pub use engine::HtslibPileup;
pub use variants::{CandidateVariant, CandidateVariantSet, VariantSlice};

/// Sample name used when reads are not split by cell.
pub const POOLED_SAMPLE: &str = "pooled";

/// Read and site filters shared by every partition of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PileupSettings {
    /// Tag carrying the cell barcode, `None` to pool all reads.
    pub cell_tag: Option<String>,
    /// Tag carrying the UMI, `None` to count reads instead of molecules.
    pub umi_tag: Option<String>,
    /// Minimum aggregated depth of a reported site.
    pub min_count: u32,
    /// Minimum aggregated ALT fraction of a reported site.
    pub min_maf: f64,
    /// Minimum mapping quality of a counted read.
    pub min_mapq: u8,
    /// Reads with flags above this are not counted.
    pub max_flag: u16,
    /// Minimum aligned length of a counted read.
    pub min_len: u32,
}

impl Default for PileupSettings {
    fn default() -> Self {
        PileupSettings {
            cell_tag: Some("CR".to_string()),
            umi_tag: Some("UR".to_string()),
            min_count: 20,
            min_maf: 0.0,
            min_mapq: 20,
            max_flag: 255,
            min_len: 30,
        }
    }
}

/// The part of the genome one pileup covers.
#[derive(Debug, Clone, Copy)]
pub enum Partition<'a> {
    /// Every position of one chromosome.
    Chrom(&'a str),
    /// A run of candidate variants.
    Variants(VariantSlice<'a>),
}

impl fmt::Display for Partition<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Chrom(chrom) => write!(f, "chromosome {chrom}"),
            Partition::Variants(variants) => write!(f, "{} candidate variants", variants.len()),
        }
    }
}

/// Everything one pileup task needs.
#[derive(Debug, Clone, Copy)]
pub struct PileupRequest<'a> {
    /// Indexed BAM or CRAM.
    pub alignments: &'a Path,
    /// Cell whitelist, `None` to pool all reads.
    pub barcodes: Option<&'a BarcodeSet>,
    /// File the partial VCF is written to.
    pub out_path: &'a Path,
    /// What to pile up.
    pub partition: Partition<'a>,
    /// Filters.
    pub settings: &'a PileupSettings,
}

/// Computes allele counts for one partition.
///
/// Implementations must write a complete VCF, header included, to
/// `request.out_path` on success, even when no site passes the filters.
pub trait PileupEngine: Sync {
    /// Run the pileup described by `request`.
    fn run(&self, request: &PileupRequest<'_>) -> Result<()>;
}
