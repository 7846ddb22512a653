use std::cell::RefCell;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use codetest::core::format::format_duration;
use codetest::core::space::parse_override;
use codetest::core::types::{CaseReport, RunOutcome, Verdict};
use codetest::engine::run_and_record;
use codetest::exit_codes::{self, exit_code_for};
use codetest::io::config::{DEFAULT_SPEC_FILE, RunSpec, load_spec};
use codetest::io::process::CancelToken;
use codetest::io::watcher::WatchedFiles;
use codetest::logging;
use codetest::watch::{RunReport, WatchController};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(
    name = "codetest",
    version,
    about = "Compare a candidate solution against a golden one on generated inputs"
)]
struct Cli {
    /// Spec file describing sources, axes and input template.
    #[arg(short, long, default_value = DEFAULT_SPEC_FILE)]
    spec: PathBuf,
    /// Rerun whenever the spec or a source file changes.
    #[arg(long)]
    watch: bool,
    /// Print per-case timings and enable info logging.
    #[arg(short, long)]
    verbose: bool,
    /// Archive every input, not only failing ones.
    #[arg(long)]
    keep_input: bool,
    /// Seed for random input tokens.
    #[arg(long)]
    seed: Option<u64>,
    /// Per-run time limit in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Axis overrides: `NAME=5` or `NAME=1..10`.
    #[arg(value_name = "NAME=VALUE")]
    overrides: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32> {
    let spec = load(cli)?;
    if spec.watch {
        return watch(cli, &spec);
    }
    let outcome = run_and_record(&spec, &CancelToken::new(), |report| {
        print_case(report, spec.verbose);
    })?;
    print_outcome(&outcome);
    Ok(exit_codes::OK)
}

/// Load the spec file and apply command-line overrides on top of it.
fn load(cli: &Cli) -> Result<RunSpec> {
    let mut spec = load_spec(&cli.spec)?;
    let overrides = cli
        .overrides
        .iter()
        .map(|arg| parse_override(arg))
        .collect::<Result<Vec<_>, _>>()?;
    if cli.seed.is_some() {
        spec.seed = cli.seed;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        spec.timeout = Some(std::time::Duration::from_millis(timeout_ms));
    }
    spec.keep_passing |= cli.keep_input;
    spec.verbose |= cli.verbose;
    spec.watch |= cli.watch;
    spec.apply_overrides(overrides)?;
    Ok(spec)
}

fn watch(cli: &Cli, initial: &RunSpec) -> Result<i32> {
    let controller = WatchController::new();
    let handle = controller.handle();
    let files = RefCell::new(WatchedFiles::new(
        initial.watched_files(),
        move |_: &Path| handle.notify_change(),
    )?);

    let pipeline = |cancel: &CancelToken| -> Result<RunOutcome> {
        let spec = load(cli)?;
        // The reloaded spec may name different sources.
        if let Err(err) = files.borrow_mut().update(spec.watched_files()) {
            warn!("keeping previous watched files: {err:#}");
        }
        run_and_record(&spec, cancel, |report| print_case(report, spec.verbose))
    };
    controller.run(&pipeline, |report: &RunReport<'_>| {
        match report.result {
            Ok(outcome) if outcome.verdict == Verdict::Cancelled => {
                println!("Change detected, restarting...");
                return;
            }
            Ok(outcome) => print_outcome(outcome),
            Err(err) => println!("{err:#}"),
        }
        println!(">>> Watching for file changes...");
    });
    Ok(exit_codes::OK)
}

fn print_case(report: &CaseReport, verbose: bool) {
    if verbose {
        println!(
            "[{}] {}: Golden: {}, Test: {}",
            report.index + 1,
            report.label,
            format_duration(report.golden_elapsed),
            format_duration(report.candidate_elapsed)
        );
    }
}

fn print_outcome(outcome: &RunOutcome) {
    println!(
        "All {} cases passed in {}",
        outcome.cases_run,
        format_duration(outcome.elapsed)
    );
}
