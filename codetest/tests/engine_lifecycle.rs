//! End-to-end engine runs against shell-script "sources".
//!
//! The fake compiler copies each script to `<work_dir>/bin`, so these tests
//! exercise compile caching, process execution, diffing, archiving and the
//! status file without a C++ toolchain.
#![cfg(unix)]

use std::fs;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use codetest::core::space::ParameterSpec;
use codetest::core::types::Verdict;
use codetest::engine::run_and_record;
use codetest::error::{CompileError, DiffError, ExecutionError, ExecutionFailure};
use codetest::io::artifacts::{ArtifactPaths, load_status};
use codetest::io::config::{InputSource, RunSpec};
use codetest::io::process::CancelToken;
use codetest::io::template::TemplateGenerator;
use codetest::test_support::{COMPILE_ERROR_MARKER, TestWorkspace};

const SUM: &str = "read a b\necho $((a + b))\n";

fn with_axes(spec: &mut RunSpec, axes: Vec<ParameterSpec>) {
    spec.inputs = InputSource::Generated(TemplateGenerator::axis_line(&axes));
    spec.axes = axes;
}

fn two_axes() -> Vec<ParameterSpec> {
    vec![ParameterSpec::new("A", 1, 2), ParameterSpec::new("B", 1, 3)]
}

/// Six matching cases: every case runs, each source compiles once and the
/// status file records the pass.
#[test]
fn matching_outputs_pass_every_case() {
    let ws = TestWorkspace::new().expect("workspace");
    let golden = ws.source("slow.sh", SUM).expect("golden");
    let candidate = ws.source("fast.sh", "read a b\necho $((b + a))\n").expect("candidate");
    let mut spec = ws.spec(&golden, &candidate);
    with_axes(&mut spec, two_axes());

    let mut labels = Vec::new();
    let outcome = run_and_record(&spec, &CancelToken::new(), |report| {
        labels.push(report.label.clone());
    })
    .expect("run");

    assert_eq!(outcome.verdict, Verdict::Passed);
    assert_eq!(outcome.cases_run, 6);
    assert_eq!(labels.first().map(String::as_str), Some("A = 1, B = 1"));
    assert_eq!(labels.last().map(String::as_str), Some("A = 2, B = 3"));
    assert_eq!(ws.compile_count(), 2);

    let status = load_status(&ArtifactPaths::new(&spec.work_dir).status).expect("status");
    assert!(status.passed);
    assert_eq!(status.cases_run, 6);
    assert_eq!(status.failed_case, None);
}

/// The first mismatching case aborts the run, is archived under its axis
/// key and is named in the status file.
#[test]
fn first_mismatch_aborts_and_archives_input() {
    let ws = TestWorkspace::new().expect("workspace");
    let golden = ws.source("slow.sh", SUM).expect("golden");
    let candidate = ws
        .source(
            "fast.sh",
            "read a b\nif [ \"$a\" -eq 2 ] && [ \"$b\" -eq 2 ]; then echo 0; else echo $((a + b)); fi\n",
        )
        .expect("candidate");
    let mut spec = ws.spec(&golden, &candidate);
    with_axes(&mut spec, two_axes());
    spec.archive_dir = Some(ws.path().join("failing"));

    let mut passed = 0;
    let err = run_and_record(&spec, &CancelToken::new(), |_| passed += 1).unwrap_err();
    let diff = err.downcast_ref::<DiffError>().expect("diff error");
    assert_eq!(diff.case, "A = 2, B = 2");
    assert!(diff.listing.contains("- 1   | 4"));
    assert!(diff.listing.contains("+   1 | 0"));
    assert_eq!(passed, 4);

    let archived = ws.path().join("failing").join("input-A-2-B-2.txt");
    assert_eq!(fs::read_to_string(archived).expect("archived input"), "2 2\n");

    let status = load_status(&ArtifactPaths::new(&spec.work_dir).status).expect("status");
    assert!(!status.passed);
    assert_eq!(status.cases_run, 5);
    assert_eq!(status.failed_case.as_deref(), Some("A = 2, B = 2"));
}

/// A candidate sleeping past the limit is killed and reaped before the
/// error is reported.
#[test]
fn timed_out_candidate_is_killed() {
    let ws = TestWorkspace::new().expect("workspace");
    let pid_file = ws.path().join("candidate.pid");
    let golden = ws.source("slow.sh", "cat > /dev/null\necho ok\n").expect("golden");
    let candidate = ws
        .source(
            "fast.sh",
            &format!("echo $$ > '{}'\nexec sleep 30\n", pid_file.display()),
        )
        .expect("candidate");
    let mut spec = ws.spec(&golden, &candidate);
    spec.timeout = Some(Duration::from_millis(300));

    let started = Instant::now();
    let err = run_and_record(&spec, &CancelToken::new(), |_| {}).unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(10));

    let exec = err.downcast_ref::<ExecutionError>().expect("execution error");
    assert_eq!(exec.failure, ExecutionFailure::TimedOut(Duration::from_millis(300)));
    assert_eq!(exec.case, "(no parameters)");

    let pid = fs::read_to_string(&pid_file).expect("pid file");
    let alive = Command::new("kill")
        .arg("-0")
        .arg(pid.trim())
        .status()
        .expect("kill -0");
    assert!(!alive.success(), "candidate {} still running", pid.trim());
}

#[test]
fn crashing_candidate_reports_signal() {
    let ws = TestWorkspace::new().expect("workspace");
    let golden = ws.source("slow.sh", "echo ok\n").expect("golden");
    let candidate = ws.source("fast.sh", "echo partial\nkill -SEGV $$\n").expect("candidate");
    let spec = ws.spec(&golden, &candidate);

    let err = run_and_record(&spec, &CancelToken::new(), |_| {}).unwrap_err();
    let exec = err.downcast_ref::<ExecutionError>().expect("execution error");
    assert!(matches!(
        exec.failure,
        ExecutionFailure::Signaled { signal: 11, .. }
    ));
    assert!(err.to_string().contains("SIGSEGV"));
}

/// Compile failures are fatal before any case runs.
#[test]
fn compile_error_aborts_before_first_case() {
    let ws = TestWorkspace::new().expect("workspace");
    let golden = ws.source("slow.sh", SUM).expect("golden");
    let candidate = ws
        .source("fast.sh", &format!("# {COMPILE_ERROR_MARKER}\n{SUM}"))
        .expect("candidate");
    let mut spec = ws.spec(&golden, &candidate);
    with_axes(&mut spec, two_axes());

    let mut cases = 0;
    let err = run_and_record(&spec, &CancelToken::new(), |_| cases += 1).unwrap_err();
    let compile = err.downcast_ref::<CompileError>().expect("compile error");
    assert_eq!(compile.exit_code, Some(1));
    assert!(compile.diagnostics.contains(COMPILE_ERROR_MARKER));
    assert_eq!(cases, 0);

    let status = load_status(&ArtifactPaths::new(&spec.work_dir).status).expect("status");
    assert!(!status.passed);
    assert_eq!(status.cases_run, 0);
    assert_eq!(status.failed_case, None);
}

/// Stored inputs run in name order, hidden files are skipped and
/// `keep_passing` archives each of them.
#[test]
fn stored_inputs_run_in_name_order() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.write("cases/b.txt", "3 4\n").expect("b");
    ws.write("cases/a.txt", "1 2\n").expect("a");
    ws.write("cases/.notes", "ignored\n").expect("hidden");
    let golden = ws.source("slow.sh", SUM).expect("golden");
    let candidate = ws.source("fast.sh", SUM).expect("candidate");
    let mut spec = ws.spec(&golden, &candidate);
    spec.inputs = InputSource::Stored(ws.path().join("cases"));
    spec.keep_passing = true;
    spec.archive_dir = Some(ws.path().join("kept"));

    let mut labels = Vec::new();
    let outcome = run_and_record(&spec, &CancelToken::new(), |report| {
        labels.push(report.label.clone());
    })
    .expect("run");
    assert_eq!(outcome.cases_run, 2);
    assert_eq!(labels, vec!["a.txt", "b.txt"]);
    assert!(ws.path().join("kept").join("input-b.txt.txt").exists());
    assert_eq!(
        fs::read_to_string(ArtifactPaths::new(&spec.work_dir).golden_output).expect("output"),
        "7\n"
    );
}

/// Two runs with the same seed generate identical inputs.
#[test]
fn fixed_seed_reproduces_generated_inputs() {
    let ws = TestWorkspace::new().expect("workspace");
    let echo = ws.source("echo.sh", "cat\n").expect("echo");
    let template: TemplateGenerator = toml::from_str(
        r#"
        [[line]]
        items = [{ axis = "N" }]
        [[line]]
        seq = { len = "N", item = { random = { min = -1000, max = 1000 } } }
        "#,
    )
    .expect("template");

    let mut archived = Vec::new();
    for round in ["first", "second"] {
        let mut spec = ws.spec(&echo, &echo);
        spec.axes = vec![ParameterSpec::new("N", 50, 50)];
        spec.inputs = InputSource::Generated(template.clone());
        spec.seed = Some(2024);
        spec.keep_passing = true;
        spec.archive_dir = Some(ws.path().join(round));
        run_and_record(&spec, &CancelToken::new(), |_| {}).expect("run");
        archived.push(
            fs::read_to_string(ws.path().join(round).join("input-N-50.txt")).expect("archived"),
        );
    }
    assert_eq!(archived[0], archived[1]);
    assert!(archived[0].starts_with("50\n"));
    assert_eq!(ws.compile_count(), 2);
}

#[test]
fn cancelled_run_reports_cancelled_and_keeps_status() {
    let ws = TestWorkspace::new().expect("workspace");
    let golden = ws.source("slow.sh", SUM).expect("golden");
    let spec = ws.spec(&golden, &golden);
    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = run_and_record(&spec, &cancel, |_| {}).expect("run");
    assert_eq!(outcome.verdict, Verdict::Cancelled);
    assert_eq!(outcome.cases_run, 0);
    assert!(!ArtifactPaths::new(&spec.work_dir).status.exists());
}

/// Cancelling while the compiler runs kills it instead of waiting it out.
#[test]
fn cancel_during_compile_stops_promptly() {
    let ws = TestWorkspace::new().expect("workspace");
    let golden = ws.source("slow.sh", SUM).expect("golden");
    let slow_compiler = ws.write("slow-cc.sh", "sleep 30\n").expect("compiler");
    let mut spec = ws.spec(&golden, &golden);
    spec.compiler = vec!["sh".to_string(), slow_compiler.display().to_string()];
    spec.compile_timeout = Duration::from_secs(60);

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        trigger.cancel();
    });
    let started = Instant::now();
    let outcome = run_and_record(&spec, &cancel, |_| {}).expect("run");
    assert_eq!(outcome.verdict, Verdict::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
    canceller.join().expect("join");
}
