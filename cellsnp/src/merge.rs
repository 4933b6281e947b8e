//! Concatenating partial VCFs into the final output.
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, warn};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("partial output {} is missing", .0.display())]
    MissingPartial(PathBuf),
    #[error("I/O failure on {}: {source}", path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_failure(path: &Path) -> impl FnOnce(io::Error) -> MergeError + '_ {
    move |source| MergeError::IoFailure {
        path: path.to_path_buf(),
        source,
    }
}

/// Header lines of the first partial, then every body line of every partial in the
/// given order. Returns the number of body lines written.
fn copy_partials<W: Write>(
    out: &mut W,
    final_path: &Path,
    partials: &[PathBuf],
) -> Result<usize, MergeError> {
    let mut n_records = 0;
    for (i, partial) in partials.iter().enumerate() {
        let reader = BufReader::new(File::open(partial).map_err(io_failure(partial))?);
        for line in reader.lines() {
            let line = line.map_err(io_failure(partial))?;
            if line.starts_with('#') {
                if i > 0 {
                    continue;
                }
            } else {
                n_records += 1;
            }
            writeln!(out, "{line}").map_err(io_failure(final_path))?;
        }
    }
    Ok(n_records)
}

fn write_final(final_path: &Path, partials: &[PathBuf]) -> Result<usize, MergeError> {
    let file = BufWriter::new(File::create(final_path).map_err(io_failure(final_path))?);
    if final_path.extension().is_some_and(|ext| ext == "gz") {
        let mut out = GzEncoder::new(file, Compression::default());
        let n = copy_partials(&mut out, final_path, partials)?;
        out.finish()
            .and_then(|mut w| w.flush())
            .map_err(io_failure(final_path))?;
        Ok(n)
    } else {
        let mut out = file;
        let n = copy_partials(&mut out, final_path, partials)?;
        out.flush().map_err(io_failure(final_path))?;
        Ok(n)
    }
}

/// Merge `partials`, in order, into `final_path` and delete them. Returns the
/// number of records in the final output. A partial that cannot be deleted after a
/// complete merge is only logged.
///
/// Nothing is written unless every partial exists. On any failure the partials
/// are left in place and the incomplete final output is removed.
pub fn merge_partials(final_path: &Path, partials: &[PathBuf]) -> Result<usize, MergeError> {
    if let Some(missing) = partials.iter().find(|p| !p.is_file()) {
        return Err(MergeError::MissingPartial(missing.clone()));
    }

    let n_records = match write_final(final_path, partials) {
        Ok(n) => n,
        Err(e) => {
            if final_path.exists() {
                if let Err(rm) = fs::remove_file(final_path) {
                    warn!("unable to remove incomplete {}: {rm}", final_path.display());
                }
            }
            return Err(e);
        }
    };

    for partial in partials {
        if let Err(e) = fs::remove_file(partial) {
            warn!("unable to remove merged partial {}: {e}", partial.display());
        }
    }
    debug!(
        "merged {} partials into {}",
        partials.len(),
        final_path.display()
    );
    Ok(n_records)
}
