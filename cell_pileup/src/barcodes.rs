//! Cell barcode whitelist.
use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Strip the trailing `-<suffix>` segment from a raw barcode, `AAAC-1` -> `AAAC`.
pub fn normalize_barcode(raw: &str) -> &str {
    raw.split('-').next().unwrap_or(raw)
}

/// The set of cell barcodes a job counts reads for.
///
/// Barcodes are normalized, deduplicated and sorted at construction and never
/// change afterwards. A barcode's position in the sorted list is its sample index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BarcodeSet {
    sorted: Vec<String>,
}

impl BarcodeSet {
    /// Build from raw barcode lines. Blank lines are ignored.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let unique: BTreeSet<String> = lines
            .into_iter()
            .filter_map(|line| {
                let barcode = normalize_barcode(line.as_ref().trim_end());
                (!barcode.is_empty()).then(|| barcode.to_string())
            })
            .collect();
        BarcodeSet {
            sorted: unique.into_iter().collect(),
        }
    }

    /// Load a plain-text or gzipped barcode file, one barcode per line.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("opening barcode file {}", path.display()))?;
        let reader: Box<dyn BufRead> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        let lines = reader
            .lines()
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| format!("reading barcode file {}", path.display()))?;
        Ok(Self::from_lines(lines))
    }

    /// Sample index of an already-normalized barcode.
    pub fn index_of(&self, barcode: &str) -> Option<usize> {
        self.sorted
            .binary_search_by(|probe| probe.as_str().cmp(barcode))
            .ok()
    }

    /// Sorted barcodes.
    pub fn as_slice(&self) -> &[String] {
        &self.sorted
    }

    /// Number of barcodes.
    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    /// True if the set holds no barcodes.
    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }
}
