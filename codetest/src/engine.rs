//! One full engine run: compile, then generate/run/diff every case.
//!
//! The run stops at the first failing case. Failures surface as typed errors
//! (see [`crate::error`]); a cancelled run returns [`Verdict::Cancelled`].

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::format::format_duration;
use crate::core::random::RandomSource;
use crate::core::space::{ParameterSpace, ParameterSpec};
use crate::core::types::{CaseReport, ExecutionResult, Role, RunOutcome, TestCase, Verdict};
use crate::error::{Cancelled, DiffError, ExecutionError, ExecutionFailure};
use crate::io::artifacts::{ArtifactPaths, RunStatus, archive_input, diff_files, write_status};
use crate::io::compile::{Compiler, CompilerSettings};
use crate::io::config::{InputSource, RunSpec};
use crate::io::input::{CaseGenerator, InputWriter};
use crate::io::process::{CancelToken, ProgramRequest, describe_signal, run_program};
use crate::io::template::TemplateGenerator;

/// Context lines shown around each hunk of a mismatch listing.
pub const DIFF_CONTEXT_LINES: usize = 3;

/// Where the cases of a run come from.
#[derive(Debug, Clone, Copy)]
pub enum CaseSource<'a, G> {
    /// One case per point of the parameter space, rendered by `generator`.
    Generated { axes: &'a [ParameterSpec], generator: &'a G },
    /// One case per file of `dir`, in name order.
    Stored { dir: &'a Path },
}

/// Run every case described by `spec`.
pub fn run_engine<F: FnMut(&CaseReport)>(
    spec: &RunSpec,
    cancel: &CancelToken,
    on_case: F,
) -> Result<RunOutcome> {
    match &spec.inputs {
        InputSource::Generated(template) => run_cases(
            spec,
            CaseSource::Generated {
                axes: &spec.axes,
                generator: template,
            },
            cancel,
            on_case,
        ),
        InputSource::Stored(dir) => run_cases::<TemplateGenerator, F>(
            spec,
            CaseSource::Stored { dir: dir.as_path() },
            cancel,
            on_case,
        ),
    }
}

/// Run with an explicit case source, e.g. a hand-written [`CaseGenerator`].
#[instrument(skip_all, fields(golden = %spec.golden.display(), candidate = %spec.candidate.display()))]
pub fn run_cases<G: CaseGenerator, F: FnMut(&CaseReport)>(
    spec: &RunSpec,
    source: CaseSource<'_, G>,
    cancel: &CancelToken,
    mut on_case: F,
) -> Result<RunOutcome> {
    let started = Instant::now();
    let mut cases_run = 0u64;
    let result = execute(spec, source, cancel, &mut |report: &CaseReport| {
        cases_run += 1;
        on_case(report);
    });
    match result {
        Ok(()) => {
            let outcome = RunOutcome {
                cases_run,
                verdict: Verdict::Passed,
                elapsed: started.elapsed(),
            };
            info!(cases_run, elapsed = %format_duration(outcome.elapsed), "all cases passed");
            Ok(outcome)
        }
        Err(err) if err.downcast_ref::<Cancelled>().is_some() || cancel.is_cancelled() => {
            debug!(cases_run, error = %err, "run cancelled");
            Ok(RunOutcome {
                cases_run,
                verdict: Verdict::Cancelled,
                elapsed: started.elapsed(),
            })
        }
        Err(err) => Err(err),
    }
}

/// Run the engine and record the result in `<work_dir>/status.json`.
///
/// Cancelled runs leave the previous status untouched.
pub fn run_and_record<F: FnMut(&CaseReport)>(
    spec: &RunSpec,
    cancel: &CancelToken,
    mut on_case: F,
) -> Result<RunOutcome> {
    let mut passed_cases = 0u64;
    let result = run_engine(spec, cancel, |report| {
        passed_cases += 1;
        on_case(report);
    });
    let paths = ArtifactPaths::new(&spec.work_dir);
    let status = match &result {
        Ok(outcome) if outcome.verdict == Verdict::Cancelled => None,
        Ok(outcome) => Some(RunStatus::passed(outcome.cases_run)),
        Err(err) => Some(failed_status(passed_cases, err)),
    };
    if let Some(status) = status
        && let Err(err) = write_status(&paths.status, &status)
    {
        warn!(error = %err, "failed to write status file");
    }
    result
}

fn failed_status(passed_cases: u64, err: &anyhow::Error) -> RunStatus {
    let failed_case = if let Some(exec) = err.downcast_ref::<ExecutionError>() {
        Some(exec.case.clone())
    } else {
        err.downcast_ref::<DiffError>().map(|diff| diff.case.clone())
    };
    let cases_run = passed_cases + u64::from(failed_case.is_some());
    RunStatus::failed(cases_run, failed_case, format!("{err:#}"))
}

fn execute<G: CaseGenerator>(
    spec: &RunSpec,
    source: CaseSource<'_, G>,
    cancel: &CancelToken,
    on_case: &mut dyn FnMut(&CaseReport),
) -> Result<()> {
    let paths = ArtifactPaths::new(&spec.work_dir);
    paths.prepare()?;

    let mut compiler = Compiler::new(CompilerSettings {
        command: spec.compiler.clone(),
        flags: spec.flags.clone(),
        timeout: spec.compile_timeout,
        bin_dir: paths.bin_dir.clone(),
        diagnostics_limit_bytes: spec.diagnostics_limit_bytes,
    });
    cancel.check()?;
    let golden = compiler.compile(&spec.golden, Role::Golden, cancel)?;
    cancel.check()?;
    let candidate = compiler.compile(&spec.candidate, Role::Candidate, cancel)?;

    let runner = CaseRunner {
        spec,
        paths: &paths,
        golden: &golden,
        candidate: &candidate,
        cancel,
    };

    match source {
        CaseSource::Generated { axes, generator } => {
            let mut space = ParameterSpace::new(axes.to_vec())?;
            let seed = spec.seed.unwrap_or_else(rand::random);
            info!(seed, total_cases = %space.total_cases(), "generating cases");
            let mut random = RandomSource::new(seed);
            let mut index = 0u64;
            while space.advance() {
                cancel.check()?;
                let case = TestCase::from_bindings(index, space.bindings().clone());
                write_generated_input(&paths.input, spec, generator, &case, &mut random)?;
                let report = runner.run(&case)?;
                on_case(&report);
                index += 1;
            }
        }
        CaseSource::Stored { dir } => {
            let files = list_input_files(dir)?;
            info!(dir = %dir.display(), total_cases = files.len(), "running stored inputs");
            for (index, file) in files.iter().enumerate() {
                cancel.check()?;
                let name = file
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let case = TestCase::from_file(index as u64, &name);
                fs::copy(file, &paths.input)
                    .with_context(|| format!("copy {} to input", file.display()))?;
                let report = runner.run(&case)?;
                on_case(&report);
            }
        }
    }
    Ok(())
}

fn write_generated_input<G: CaseGenerator>(
    path: &Path,
    spec: &RunSpec,
    generator: &G,
    case: &TestCase,
    random: &mut RandomSource,
) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create input {}", path.display()))?;
    let mut writer = InputWriter::new(BufWriter::new(file), random);
    writer.set_separator(&spec.separator);
    generator
        .generate(case, &mut writer)
        .with_context(|| format!("generate input for case {}", case.label))?;
    writer.finish()?;
    Ok(())
}

/// Non-hidden regular files of `dir`, sorted by name.
pub fn list_input_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("read inputs dir {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

struct CaseRunner<'a> {
    spec: &'a RunSpec,
    paths: &'a ArtifactPaths,
    golden: &'a Path,
    candidate: &'a Path,
    cancel: &'a CancelToken,
}

impl CaseRunner<'_> {
    #[instrument(skip_all, fields(case = %case.label))]
    fn run(&self, case: &TestCase) -> Result<CaseReport> {
        let result = self.run_checked(case);
        let archive_dir = match &result {
            Err(err) if err.downcast_ref::<Cancelled>().is_none() => self.spec.archive_dir.clone(),
            Ok(_) if self.spec.keep_passing => Some(
                self.spec
                    .archive_dir
                    .clone()
                    .unwrap_or_else(|| self.paths.work_dir.join("inputs")),
            ),
            _ => None,
        };
        if let Some(dir) = archive_dir
            && let Err(err) = archive_input(&self.paths.input, &dir, &case.archive_key)
        {
            warn!(error = %err, "failed to archive input");
        }
        result
    }

    fn run_checked(&self, case: &TestCase) -> Result<CaseReport> {
        let golden = self.execute(Role::Golden, self.golden, case)?;
        let candidate = self.execute(Role::Candidate, self.candidate, case)?;

        let diff = diff_files(&self.paths.golden_output, &self.paths.candidate_output)?;
        if !diff.passed() {
            warn!(changes = diff.changes().count(), "output mismatch");
            return Err(DiffError {
                case: case.label.clone(),
                listing: diff.render(DIFF_CONTEXT_LINES),
            }
            .into());
        }

        debug!(
            golden = %format_duration(golden.elapsed),
            candidate = %format_duration(candidate.elapsed),
            "case passed"
        );
        Ok(CaseReport {
            index: case.index,
            label: case.label.clone(),
            golden_elapsed: golden.elapsed,
            candidate_elapsed: candidate.elapsed,
        })
    }

    fn execute(&self, role: Role, executable: &Path, case: &TestCase) -> Result<ExecutionResult> {
        let request = ProgramRequest {
            executable,
            input: &self.paths.input,
            output: self.paths.output_for(role),
            timeout: self.spec.timeout,
            stderr_limit_bytes: self.spec.stderr_limit_bytes,
        };
        let result = run_program(&request, self.cancel)
            .with_context(|| format!("run {role} program on case {}", case.label))?;
        match execution_failure(&result, self.spec) {
            None => Ok(result),
            Some(failure) => Err(ExecutionError {
                role,
                case: case.label.clone(),
                failure,
                stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
            }
            .into()),
        }
    }
}

fn execution_failure(result: &ExecutionResult, spec: &RunSpec) -> Option<ExecutionFailure> {
    if result.timed_out {
        return Some(ExecutionFailure::TimedOut(spec.timeout.unwrap_or_default()));
    }
    if let Some(signal) = result.signal {
        return Some(ExecutionFailure::Signaled {
            signal,
            description: describe_signal(signal),
        });
    }
    match result.exit_code {
        Some(0) => None,
        Some(code) => Some(ExecutionFailure::ExitCode(code)),
        None => Some(ExecutionFailure::ExitCode(-1)),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn result(exit_code: Option<i32>, signal: Option<i32>, timed_out: bool) -> ExecutionResult {
        ExecutionResult {
            exit_code,
            signal,
            elapsed: Duration::from_millis(1),
            timed_out,
            stderr: Vec::new(),
        }
    }

    #[test]
    fn execution_failure_prefers_timeout_then_signal_then_code() {
        let mut spec = RunSpec::new("a", "b");
        spec.timeout = Some(Duration::from_millis(50));

        assert_eq!(execution_failure(&result(Some(0), None, false), &spec), None);
        assert_eq!(
            execution_failure(&result(None, None, true), &spec),
            Some(ExecutionFailure::TimedOut(Duration::from_millis(50)))
        );
        assert!(matches!(
            execution_failure(&result(None, Some(11), false), &spec),
            Some(ExecutionFailure::Signaled { signal: 11, .. })
        ));
        assert_eq!(
            execution_failure(&result(Some(3), None, false), &spec),
            Some(ExecutionFailure::ExitCode(3))
        );
    }

    #[test]
    fn stored_inputs_skip_hidden_files_and_sort() {
        let temp = tempfile::tempdir().expect("tempdir");
        for name in ["b.txt", ".hidden", "a.txt"] {
            fs::write(temp.path().join(name), "1\n").expect("write");
        }
        fs::create_dir(temp.path().join("nested")).expect("mkdir");
        let files = list_input_files(temp.path()).expect("list");
        assert_eq!(
            files,
            vec![temp.path().join("a.txt"), temp.path().join("b.txt")]
        );
    }

    #[test]
    fn failed_status_names_the_failing_case() {
        let err: anyhow::Error = DiffError {
            case: "N = 2".to_string(),
            listing: String::new(),
        }
        .into();
        let status = failed_status(1, &err);
        assert_eq!(status.cases_run, 2);
        assert_eq!(status.failed_case.as_deref(), Some("N = 2"));
        assert!(!status.passed);
    }
}
