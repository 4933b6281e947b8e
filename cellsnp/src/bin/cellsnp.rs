//! cellsnp
use anyhow::Result;
use cell_pileup::HtslibPileup;
use cellsnp::{run_job, JobArgs, JobDescriptor};
use chrono::Local;
use clap::Parser;
use env_logger::Builder;
use itertools::Itertools;
use log::{debug, info, LevelFilter};
use std::io::Write;
use std::process::ExitCode;

fn setup_logging() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Info)
        .parse_default_env()
        .init();
}

fn print_error_chain(err: &anyhow::Error) {
    println!("ERROR: {}", err.chain().join("\n\tCaused by: "));
}

fn inner_main() -> Result<ExitCode> {
    if std::env::args_os().len() <= 1 {
        println!("Welcome to cellSNP!\n\nuse -h or --help for help on arguments.");
        return Ok(ExitCode::FAILURE);
    }
    let args = match JobArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            e.print()?;
            // help and version requests are not errors
            return Ok(if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            });
        }
    };
    setup_logging();

    let job = JobDescriptor::build(args)?;
    debug!("job: {}", serde_json::to_string(&job)?);
    let summary = run_job(&job, &HtslibPileup::default())?;

    let secs = summary.elapsed.as_secs_f64();
    info!(
        "{} records from {} tasks written to {}",
        summary.records,
        summary.tasks,
        job.out_file().display()
    );
    info!(
        "All done: {} min {:.1} sec",
        (secs / 60.0).floor(),
        secs % 60.0
    );
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    match inner_main() {
        Ok(exit_code) => exit_code,
        Err(err) => {
            print_error_chain(&err);
            ExitCode::FAILURE
        }
    }
}
