//! Command-line arguments and the validated job descriptor built from them.
use cell_pileup::{BarcodeSet, CandidateVariantSet, PileupSettings};
use clap::Parser;
use log::info;
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Chromosomes scanned when `--chrom` is not given.
fn default_chroms() -> Vec<String> {
    (1..=22).map(|i| i.to_string()).collect()
}

/// Errors found while validating the command line, before any work starts.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required argument --{0}")]
    MissingRequired(&'static str),
    #[error("{} not found: {}", what, path.display())]
    NotFound { what: &'static str, path: PathBuf },
    #[error("output directory does not exist: {}", .0.display())]
    BadOutputDir(PathBuf),
    #[error("invalid value for --{flag}: {reason}")]
    InvalidValue { flag: &'static str, reason: String },
    #[error("chromosome {0} is listed more than once in --chrom")]
    DuplicateChrom(String),
    #[error("unable to read {} {}: {reason}", what, path.display())]
    Unreadable {
        what: &'static str,
        path: PathBuf,
        reason: String,
    },
}

/// Pile up reads per cell at every position of a set of chromosomes, or at a list of
/// candidate variants.
#[derive(Parser, Debug, Clone)]
#[clap(name = "cellsnp", version)]
pub struct JobArgs {
    /// Output VCF. Written gzip-compressed when the name ends in .gz.
    #[clap(short = 'o', long = "outFile", value_name = "PATH")]
    pub out_file: Option<PathBuf>,

    /// Indexed BAM or CRAM with the aligned reads.
    #[clap(short = 's', long = "samFile", value_name = "PATH")]
    pub sam_file: Option<PathBuf>,

    /// Cell barcodes, one per line, plain or gzipped.
    #[clap(short = 'b', long = "barcodeFile", value_name = "PATH")]
    pub barcode_file: Option<PathBuf>,

    /// Candidate variants to pile up instead of whole chromosomes. `None` scans
    /// whole chromosomes.
    #[clap(short = 'R', long = "regionsVCF", value_name = "PATH")]
    pub regions_vcf: Option<PathBuf>,

    /// Number of pileups to run at once.
    #[clap(short = 'p', long = "nproc", default_value_t = 1, value_name = "NUM")]
    pub nproc: usize,

    /// Comma-separated chromosomes for the whole-genome scan [default: 1..22]
    #[clap(long = "chrom", value_name = "LIST")]
    pub chrom: Option<String>,

    /// Tag holding the cell barcode, None to pool all reads.
    #[clap(long = "cellTAG", default_value = "CR", value_name = "TAG")]
    pub cell_tag: String,

    /// Tag holding the UMI, None to count reads instead of molecules.
    #[clap(long = "UMItag", default_value = "UR", value_name = "TAG")]
    pub umi_tag: String,

    /// Minimum aggregated count of a reported site.
    #[clap(long = "minCOUNT", default_value_t = 20, value_name = "NUM")]
    pub min_count: u32,

    /// Minimum minor allele frequency of a reported site.
    #[clap(long = "minMAF", default_value_t = 0.0, value_name = "FLOAT")]
    pub min_maf: f64,

    /// Minimum aligned length of a counted read.
    #[clap(long = "minLEN", default_value_t = 30, value_name = "NUM")]
    pub min_len: u32,

    /// Minimum mapping quality of a counted read.
    #[clap(long = "minMAPQ", default_value_t = 20, value_name = "NUM")]
    pub min_mapq: u8,

    /// Maximum flag value of a counted read.
    #[clap(long = "maxFLAG", default_value_t = 255, value_name = "NUM")]
    pub max_flag: u16,
}

/// What the job scans.
#[derive(Debug, Clone, Serialize)]
pub enum Mode {
    /// Every position of each chromosome, in list order.
    WholeGenome(Vec<String>),
    /// The candidate variants, in input order.
    Targeted(#[serde(serialize_with = "serialize_n_variants")] CandidateVariantSet),
}

fn serialize_n_variants<S: Serializer>(
    variants: &CandidateVariantSet,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.serialize_u64(variants.len() as u64)
}

fn serialize_n_barcodes<S: Serializer>(
    barcodes: &Option<BarcodeSet>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match barcodes {
        Some(barcodes) => s.serialize_some(&barcodes.len()),
        None => s.serialize_none(),
    }
}

/// A validated, immutable job.
#[derive(Debug, Clone, Serialize)]
pub struct JobDescriptor {
    mode: Mode,
    nproc: usize,
    settings: PileupSettings,
    out_file: PathBuf,
    sam_file: PathBuf,
    #[serde(serialize_with = "serialize_n_barcodes")]
    barcodes: Option<BarcodeSet>,
}

fn parse_tag(raw: &str) -> Option<String> {
    (!raw.eq_ignore_ascii_case("none")).then(|| raw.to_string())
}

fn parse_chroms(raw: Option<&str>) -> Result<Vec<String>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default_chroms());
    };
    let mut seen = HashSet::new();
    let mut chroms = Vec::new();
    for chrom in raw.split(',').map(str::trim) {
        if chrom.is_empty() {
            return Err(ConfigError::InvalidValue {
                flag: "chrom",
                reason: format!("empty chromosome name in {raw:?}"),
            });
        }
        if !seen.insert(chrom) {
            return Err(ConfigError::DuplicateChrom(chrom.to_string()));
        }
        chroms.push(chrom.to_string());
    }
    Ok(chroms)
}

fn existing(what: &'static str, path: PathBuf) -> Result<PathBuf, ConfigError> {
    if path.exists() {
        Ok(path)
    } else {
        Err(ConfigError::NotFound { what, path })
    }
}

/// Parent directory of the output. A bare file name lives in the current directory.
fn output_dir(out_file: &Path) -> &Path {
    match out_file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

impl JobDescriptor {
    /// Validate `args` and load the barcode and candidate variant files they name.
    pub fn build(args: JobArgs) -> Result<Self, ConfigError> {
        let sam_file = args.sam_file.ok_or(ConfigError::MissingRequired("samFile"))?;
        let out_file = args.out_file.ok_or(ConfigError::MissingRequired("outFile"))?;
        if args.nproc == 0 {
            return Err(ConfigError::InvalidValue {
                flag: "nproc",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&args.min_maf) {
            return Err(ConfigError::InvalidValue {
                flag: "minMAF",
                reason: format!("{} is not between 0 and 1", args.min_maf),
            });
        }

        let sam_file = existing("alignment file", sam_file)?;
        let barcode_file = args
            .barcode_file
            .map(|p| existing("barcode file", p))
            .transpose()?;
        let regions_vcf = args
            .regions_vcf
            .filter(|p| !p.as_os_str().eq_ignore_ascii_case("none"))
            .map(|p| existing("candidate variant file", p))
            .transpose()?;
        let out_dir = output_dir(&out_file);
        if !out_dir.is_dir() {
            return Err(ConfigError::BadOutputDir(out_dir.to_path_buf()));
        }

        let mode = match regions_vcf {
            Some(path) => {
                let variants = CandidateVariantSet::from_vcf(&path).map_err(|e| {
                    ConfigError::Unreadable {
                        what: "candidate variant file",
                        path: path.clone(),
                        reason: format!("{e:#}"),
                    }
                })?;
                info!("{} candidate variants loaded", variants.len());
                Mode::Targeted(variants)
            }
            None => Mode::WholeGenome(parse_chroms(args.chrom.as_deref())?),
        };

        let barcodes = match barcode_file {
            Some(path) => {
                let barcodes =
                    BarcodeSet::from_path(&path).map_err(|e| ConfigError::Unreadable {
                        what: "barcode file",
                        path: path.clone(),
                        reason: format!("{e:#}"),
                    })?;
                info!("{} cell barcodes loaded", barcodes.len());
                Some(barcodes)
            }
            None => None,
        };

        Ok(JobDescriptor {
            mode,
            nproc: args.nproc,
            settings: PileupSettings {
                cell_tag: parse_tag(&args.cell_tag),
                umi_tag: parse_tag(&args.umi_tag),
                min_count: args.min_count,
                min_maf: args.min_maf,
                min_mapq: args.min_mapq,
                max_flag: args.max_flag,
                min_len: args.min_len,
            },
            out_file,
            sam_file,
            barcodes,
        })
    }

    /// Whole-genome or targeted.
    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    /// Worker pool size, at least 1.
    pub fn nproc(&self) -> usize {
        self.nproc
    }

    /// Read and site filters.
    pub fn settings(&self) -> &PileupSettings {
        &self.settings
    }

    /// Final output path.
    pub fn out_file(&self) -> &Path {
        &self.out_file
    }

    /// Alignment path.
    pub fn sam_file(&self) -> &Path {
        &self.sam_file
    }

    /// Cell whitelist, if any.
    pub fn barcodes(&self) -> Option<&BarcodeSet> {
        self.barcodes.as_ref()
    }
}
