//! Pileup engine backed by rust-htslib.
use crate::barcodes::{normalize_barcode, BarcodeSet};
use crate::counts::{
    aggregate, base_index, major_minor, passes_filters, BaseCounts, ColumnCounter, BASE_NAMES,
};
use crate::variants::VariantSlice;
use crate::vcf::{write_header, write_site, Site};
use crate::{Partition, PileupEngine, PileupRequest, PileupSettings, POOLED_SAMPLE};
use anyhow::{Context, Result};
use log::{debug, warn};
use rust_htslib::bam::pileup::Pileup;
use rust_htslib::bam::record::{Aux, Cigar};
use rust_htslib::bam::{
    HeaderView, IndexedReader as BamReader, Read as BamRead, Record as BamRecord,
};
use std::fs::File;
use std::io::{BufWriter, Write};

/// Reads deeper than this at one column are not counted.
const MAX_DEPTH: u32 = 1_000_000;

/// Counts alleles by piling up an indexed BAM/CRAM file.
#[derive(Debug, Clone)]
pub struct HtslibPileup {
    max_depth: u32,
}

impl Default for HtslibPileup {
    fn default() -> Self {
        HtslibPileup {
            max_depth: MAX_DEPTH,
        }
    }
}

/// How reads are assigned to output columns.
enum Samples<'a> {
    Cells { barcodes: &'a BarcodeSet, tag: &'a str },
    Pooled,
}

impl<'a> Samples<'a> {
    fn new(barcodes: Option<&'a BarcodeSet>, cell_tag: Option<&'a str>) -> Self {
        match (barcodes, cell_tag) {
            (Some(barcodes), Some(tag)) => Samples::Cells { barcodes, tag },
            _ => Samples::Pooled,
        }
    }

    fn names(&self) -> Vec<String> {
        match self {
            Samples::Cells { barcodes, .. } => barcodes.as_slice().to_vec(),
            Samples::Pooled => vec![POOLED_SAMPLE.to_string()],
        }
    }

    fn len(&self) -> usize {
        match self {
            Samples::Cells { barcodes, .. } => barcodes.len(),
            Samples::Pooled => 1,
        }
    }

    /// Sample index of a read, `None` if its barcode is missing or not listed.
    fn sample_of(&self, rec: &BamRecord) -> Option<usize> {
        match self {
            Samples::Cells { barcodes, tag } => match rec.aux(tag.as_bytes()) {
                Ok(Aux::String(cb)) => barcodes.index_of(normalize_barcode(cb)),
                _ => None,
            },
            Samples::Pooled => Some(0),
        }
    }
}

/// Return an `Option` containing the UMI if found, or `None` if not found.
fn get_umi<'a>(rec: &'a BamRecord, bam_tag: &str) -> Option<&'a [u8]> {
    match rec.aux(bam_tag.as_bytes()) {
        Ok(Aux::String(umi)) => Some(umi.as_bytes()),
        _ => None,
    }
}

/// Number of reference bases the read aligns to.
fn aligned_len(rec: &BamRecord) -> u32 {
    rec.cigar()
        .iter()
        .map(|op| match op {
            Cigar::Match(l) | Cigar::Equal(l) | Cigar::Diff(l) => *l,
            _ => 0,
        })
        .sum()
}

fn passes_read_filter(rec: &BamRecord, settings: &PileupSettings) -> bool {
    rec.mapq() >= settings.min_mapq
        && rec.flags() <= settings.max_flag
        && aligned_len(rec) >= settings.min_len
}

fn count_column(
    pileup: &Pileup,
    samples: &Samples<'_>,
    settings: &PileupSettings,
) -> Vec<BaseCounts> {
    let mut counter = ColumnCounter::new(samples.len());
    for aln in pileup.alignments() {
        if aln.is_del() || aln.is_refskip() {
            continue;
        }
        let Some(qpos) = aln.qpos() else {
            continue;
        };
        let rec = aln.record();
        if !passes_read_filter(&rec, settings) {
            continue;
        }
        let Some(sample) = samples.sample_of(&rec) else {
            continue;
        };
        let umi = match settings.umi_tag.as_deref() {
            Some(tag) => match get_umi(&rec, tag) {
                Some(umi) => Some(umi),
                None => continue,
            },
            None => None,
        };
        // SEQ may be absent
        if qpos >= rec.seq_len() {
            continue;
        }
        counter.add(sample, umi, rec.seq()[qpos]);
    }
    counter.finish()
}

fn contig_table(header: &HeaderView) -> Vec<(String, u64)> {
    (0..header.target_count())
        .map(|tid| {
            (
                String::from_utf8_lossy(header.tid2name(tid)).into_owned(),
                header.target_len(tid).unwrap_or(0),
            )
        })
        .collect()
}

impl HtslibPileup {
    fn pileup_chrom<W: Write>(
        &self,
        reader: &mut BamReader,
        header: &HeaderView,
        chrom: &str,
        samples: &Samples<'_>,
        settings: &PileupSettings,
        out: &mut W,
    ) -> Result<usize> {
        let Some(tid) = header.tid(chrom.as_bytes()) else {
            warn!(
                "contig {chrom} is not in the alignment header, no sites will be reported for it"
            );
            return Ok(0);
        };
        let len = header.target_len(tid).unwrap_or(0);
        reader.fetch((tid, 0i64, len as i64))?;

        let mut pileups = reader.pileup();
        pileups.set_max_depth(self.max_depth);
        let mut n_sites = 0;
        for pileup in pileups {
            let pileup = pileup?;
            let counts = count_column(&pileup, samples, settings);
            let total = aggregate(&counts);
            let (ref_idx, alt_idx) = major_minor(&total);
            if !passes_filters(&total, alt_idx, settings.min_count, settings.min_maf) {
                continue;
            }
            write_site(
                out,
                &Site {
                    chrom,
                    pos: u64::from(pileup.pos()) + 1,
                    ref_allele: BASE_NAMES[ref_idx],
                    alt_allele: BASE_NAMES[alt_idx],
                    ref_idx,
                    alt_idx,
                    samples: &counts,
                },
            )?;
            n_sites += 1;
        }
        Ok(n_sites)
    }

    fn pileup_variants<W: Write>(
        &self,
        reader: &mut BamReader,
        header: &HeaderView,
        variants: VariantSlice<'_>,
        samples: &Samples<'_>,
        settings: &PileupSettings,
        out: &mut W,
    ) -> Result<usize> {
        let mut n_sites = 0;
        let mut n_missing_contig = 0;
        for variant in variants.iter() {
            let Some(tid) = header.tid(variant.chrom.as_bytes()) else {
                n_missing_contig += 1;
                continue;
            };
            let start = variant.pos as i64 - 1;
            reader.fetch((tid, start, start + 1))?;

            let mut counts = None;
            let mut pileups = reader.pileup();
            pileups.set_max_depth(self.max_depth);
            for pileup in pileups {
                let pileup = pileup?;
                if i64::from(pileup.pos()) == start {
                    counts = Some(count_column(&pileup, samples, settings));
                    break;
                }
            }
            let counts = counts.unwrap_or_else(|| vec![[0; 5]; samples.len()]);

            let ref_idx = base_index(variant.ref_allele.bytes().next().unwrap_or(b'N'));
            let alt_idx = base_index(variant.alt_allele.bytes().next().unwrap_or(b'N'));
            let total = aggregate(&counts);
            if !passes_filters(&total, alt_idx, settings.min_count, settings.min_maf) {
                continue;
            }
            write_site(
                out,
                &Site {
                    chrom: variant.chrom,
                    pos: variant.pos,
                    ref_allele: variant.ref_allele,
                    alt_allele: variant.alt_allele,
                    ref_idx,
                    alt_idx,
                    samples: &counts,
                },
            )?;
            n_sites += 1;
        }
        if n_missing_contig > 0 {
            warn!(
                "{n_missing_contig} candidate variants are on contigs missing from the \
                 alignment header"
            );
        }
        Ok(n_sites)
    }
}

impl PileupEngine for HtslibPileup {
    fn run(&self, request: &PileupRequest<'_>) -> Result<()> {
        let settings = request.settings;
        let mut reader = BamReader::from_path(request.alignments)
            .with_context(|| format!("error opening alignments {}", request.alignments.display()))?;
        let header = reader.header().to_owned();
        let samples = Samples::new(request.barcodes, settings.cell_tag.as_deref());

        let mut out = BufWriter::new(
            File::create(request.out_path)
                .with_context(|| format!("error creating {}", request.out_path.display()))?,
        );
        write_header(&mut out, &contig_table(&header), &samples.names())?;

        let n_sites = match request.partition {
            Partition::Chrom(chrom) => {
                self.pileup_chrom(&mut reader, &header, chrom, &samples, settings, &mut out)?
            }
            Partition::Variants(variants) => {
                self.pileup_variants(&mut reader, &header, variants, &samples, settings, &mut out)?
            }
        };
        out.flush()
            .with_context(|| format!("error writing {}", request.out_path.display()))?;
        debug!(
            "{}: {n_sites} sites written to {}",
            request.partition,
            request.out_path.display()
        );
        Ok(())
    }
}
