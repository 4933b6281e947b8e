//! VCF text output for per-cell allele counts.
use crate::counts::{aggregate, depth, BaseCounts};
use itertools::Itertools;
use std::io::{self, Write};

const META_LINES: &[&str] = &[
    "##fileformat=VCFv4.2",
    "##source=cellsnp",
    "##FILTER=<ID=PASS,Description=\"All filters passed\">",
    "##INFO=<ID=AD,Number=1,Type=Integer,Description=\"Total counts for ALT allele\">",
    "##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total counts for ALT and REF allele\">",
    "##INFO=<ID=OTH,Number=1,Type=Integer,Description=\"Total counts for other alleles\">",
    "##FORMAT=<ID=AD,Number=1,Type=Integer,Description=\"Counts for ALT allele\">",
    "##FORMAT=<ID=DP,Number=1,Type=Integer,Description=\"Counts for ALT and REF allele\">",
    "##FORMAT=<ID=OTH,Number=1,Type=Integer,Description=\"Counts for other alleles\">",
    "##FORMAT=<ID=ALL,Number=5,Type=Integer,Description=\"Counts for all bases: A,C,G,T,N\">",
];

const FORMAT: &str = "AD:DP:OTH:ALL";

/// Header of every output file. It depends only on the contigs and the sample
/// names, so all partial outputs of one job share it byte for byte.
pub fn write_header<W: Write>(
    out: &mut W,
    contigs: &[(String, u64)],
    samples: &[String],
) -> io::Result<()> {
    for line in META_LINES {
        writeln!(out, "{line}")?;
    }
    for (name, length) in contigs {
        writeln!(out, "##contig=<ID={name},length={length}>")?;
    }
    writeln!(
        out,
        "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\t{}",
        samples.iter().join("\t")
    )
}

/// One reportable site.
pub struct Site<'a> {
    /// Contig name.
    pub chrom: &'a str,
    /// 1-based position.
    pub pos: u64,
    /// REF column text.
    pub ref_allele: &'a str,
    /// ALT column text.
    pub alt_allele: &'a str,
    /// Count column backing REF.
    pub ref_idx: usize,
    /// Count column backing ALT.
    pub alt_idx: usize,
    /// Counts per sample, in header order.
    pub samples: &'a [BaseCounts],
}

fn ad_dp_oth(counts: &BaseCounts, ref_idx: usize, alt_idx: usize) -> (u32, u32, u32) {
    let ad = counts[alt_idx];
    let dp = if ref_idx == alt_idx { ad } else { ad + counts[ref_idx] };
    (ad, dp, depth(counts) - dp)
}

fn format_sample(counts: &BaseCounts, ref_idx: usize, alt_idx: usize) -> String {
    if depth(counts) == 0 {
        return ".".to_string();
    }
    let (ad, dp, oth) = ad_dp_oth(counts, ref_idx, alt_idx);
    format!("{ad}:{dp}:{oth}:{}", counts.iter().join(","))
}

/// Write one data line.
pub fn write_site<W: Write>(out: &mut W, site: &Site<'_>) -> io::Result<()> {
    let total = aggregate(site.samples);
    let (ad, dp, oth) = ad_dp_oth(&total, site.ref_idx, site.alt_idx);
    write!(
        out,
        "{}\t{}\t.\t{}\t{}\t.\tPASS\tAD={ad};DP={dp};OTH={oth}\t{FORMAT}",
        site.chrom, site.pos, site.ref_allele, site.alt_allele
    )?;
    for counts in site.samples {
        write!(out, "\t{}", format_sample(counts, site.ref_idx, site.alt_idx))?;
    }
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_header() -> io::Result<()> {
        let mut buf = Vec::new();
        write_header(
            &mut buf,
            &[("1".to_string(), 1000), ("X".to_string(), 500)],
            &["AAA".to_string(), "CCC".to_string()],
        )?;
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "##fileformat=VCFv4.2");
        assert!(lines.contains(&"##contig=<ID=1,length=1000>"));
        assert!(lines.contains(&"##contig=<ID=X,length=500>"));
        assert_eq!(
            *lines.last().unwrap(),
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tAAA\tCCC"
        );
        assert!(lines.iter().all(|l| l.starts_with('#')));
        Ok(())
    }

    #[test]
    fn test_site() -> io::Result<()> {
        let samples = [[3, 0, 1, 0, 1], [0; 5], [0, 0, 2, 1, 0]];
        let site = Site {
            chrom: "1",
            pos: 42,
            ref_allele: "A",
            alt_allele: "G",
            ref_idx: 0,
            alt_idx: 2,
            samples: &samples,
        };
        let mut buf = Vec::new();
        write_site(&mut buf, &site)?;
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "1\t42\t.\tA\tG\t.\tPASS\tAD=3;DP=6;OTH=2\tAD:DP:OTH:ALL\t\
             1:4:1:3,0,1,0,1\t.\t2:2:1:0,0,2,1,0\n"
        );
        Ok(())
    }
}
