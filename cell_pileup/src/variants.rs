//! Candidate variants for targeted pileup.
use anyhow::{bail, Context, Result};
use log::warn;
use rust_htslib::bcf::{Read as BcfRead, Reader as BcfReader, Record as BcfRecord};
use serde::Serialize;
use std::ops::Range;
use std::path::Path;
use std::str;

#[derive(thiserror::Error, Debug, PartialEq)]
enum VariantError {
    #[error("record {:?} does not have a rid", rec)]
    RidNotFound { rec: String },
    #[error("record {:?} does not have a name for its rid {}", rec, rid)]
    RidNameNotFound { rec: String, rid: u32 },
    #[error("candidate arrays differ in length: {chrom} chrom, {pos} pos, {ref_} ref, {alt} alt")]
    Misaligned {
        chrom: usize,
        pos: usize,
        ref_: usize,
        alt: usize,
    },
}

/// One candidate variant, borrowed from a [`CandidateVariantSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateVariant<'a> {
    /// Contig name.
    pub chrom: &'a str,
    /// 1-based position.
    pub pos: u64,
    /// Reference allele.
    pub ref_allele: &'a str,
    /// Alternate allele.
    pub alt_allele: &'a str,
}

/// Index-aligned candidate variant columns, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CandidateVariantSet {
    chrom: Vec<String>,
    pos: Vec<u64>,
    ref_allele: Vec<String>,
    alt_allele: Vec<String>,
}

impl CandidateVariantSet {
    /// Build from four parallel columns, which must have equal length.
    pub fn new(
        chrom: Vec<String>,
        pos: Vec<u64>,
        ref_allele: Vec<String>,
        alt_allele: Vec<String>,
    ) -> Result<Self> {
        let n = chrom.len();
        if pos.len() != n || ref_allele.len() != n || alt_allele.len() != n {
            bail!(VariantError::Misaligned {
                chrom: n,
                pos: pos.len(),
                ref_: ref_allele.len(),
                alt: alt_allele.len(),
            });
        }
        Ok(CandidateVariantSet {
            chrom,
            pos,
            ref_allele,
            alt_allele,
        })
    }

    /// Read biallelic single-base variants from a VCF, VCF.gz or BCF file.
    ///
    /// Multi-allelic records, indels and records without an ALT are skipped.
    pub fn from_vcf(path: &Path) -> Result<Self> {
        let mut reader = BcfReader::from_path(path)
            .with_context(|| format!("error opening vcf file {}", path.display()))?;
        let mut set = CandidateVariantSet::default();
        let mut skipped = 0usize;
        for rec in reader.records() {
            let rec = rec.with_context(|| format!("error reading {}", path.display()))?;
            let alleles = rec.alleles();
            let [ref_allele, alt_allele] = alleles.as_slice() else {
                skipped += 1;
                continue;
            };
            if ref_allele.len() != 1 || alt_allele.len() != 1 {
                skipped += 1;
                continue;
            }
            let ref_allele = str::from_utf8(ref_allele)?.to_ascii_uppercase();
            let alt_allele = str::from_utf8(alt_allele)?.to_ascii_uppercase();
            set.chrom.push(get_contig(&rec)?.to_string());
            set.pos.push(rec.pos() as u64 + 1);
            set.ref_allele.push(ref_allele);
            set.alt_allele.push(alt_allele);
        }
        if skipped > 0 {
            warn!(
                "{skipped} records in {} are not biallelic SNVs and will be ignored",
                path.display()
            );
        }
        Ok(set)
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.chrom.len()
    }

    /// True if there are no candidates.
    pub fn is_empty(&self) -> bool {
        self.chrom.is_empty()
    }

    /// All candidates.
    pub fn all(&self) -> VariantSlice<'_> {
        self.slice(0..self.len())
    }

    /// Contiguous view over `range`.
    ///
    /// Panics if `range` is out of bounds.
    pub fn slice(&self, range: Range<usize>) -> VariantSlice<'_> {
        VariantSlice {
            chrom: &self.chrom[range.clone()],
            pos: &self.pos[range.clone()],
            ref_allele: &self.ref_allele[range.clone()],
            alt_allele: &self.alt_allele[range],
        }
    }
}

/// A borrowed run of consecutive candidates.
#[derive(Debug, Clone, Copy)]
pub struct VariantSlice<'a> {
    chrom: &'a [String],
    pos: &'a [u64],
    ref_allele: &'a [String],
    alt_allele: &'a [String],
}

impl<'a> VariantSlice<'a> {
    /// Number of candidates in the slice.
    pub fn len(&self) -> usize {
        self.chrom.len()
    }

    /// True if the slice is empty.
    pub fn is_empty(&self) -> bool {
        self.chrom.is_empty()
    }

    /// Candidates in order.
    pub fn iter(&self) -> impl Iterator<Item = CandidateVariant<'a>> + 'a {
        let VariantSlice {
            chrom,
            pos,
            ref_allele,
            alt_allele,
        } = *self;
        (0..chrom.len()).map(move |i| CandidateVariant {
            chrom: &chrom[i],
            pos: pos[i],
            ref_allele: &ref_allele[i],
            alt_allele: &alt_allele[i],
        })
    }
}

fn get_contig(rec: &BcfRecord) -> Result<&str> {
    let Some(rid) = rec.rid() else {
        bail!(VariantError::RidNotFound {
            rec: format!("{rec:?}")
        })
    };
    let Ok(name) = rec.header().rid2name(rid) else {
        bail!(VariantError::RidNameNotFound {
            rec: format!("{rec:?}"),
            rid
        })
    };
    Ok(str::from_utf8(name)?)
}
