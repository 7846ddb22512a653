//! Compile golden and candidate sources, at most once per source per run.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::format::format_duration;
use crate::core::types::Role;
use crate::error::CompileError;
use crate::io::process::{CancelToken, run_command_with_timeout};

pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_DIAGNOSTICS_LIMIT_BYTES: usize = 64 * 1024;

/// How sources are turned into executables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerSettings {
    /// Compiler program and its fixed arguments, e.g. `["g++", "-O2"]`.
    pub command: Vec<String>,
    /// Extra flags applied identically to every source.
    pub flags: Vec<String>,
    pub timeout: Duration,
    /// Directory receiving the executables.
    pub bin_dir: PathBuf,
    pub diagnostics_limit_bytes: usize,
}

/// Compiler with a per-run cache keyed by canonical source path.
#[derive(Debug)]
pub struct Compiler {
    settings: CompilerSettings,
    cache: HashMap<PathBuf, PathBuf>,
    invocations: usize,
}

impl Compiler {
    pub fn new(settings: CompilerSettings) -> Self {
        Self {
            settings,
            cache: HashMap::new(),
            invocations: 0,
        }
    }

    /// Number of compiler processes spawned so far.
    pub fn invocations(&self) -> usize {
        self.invocations
    }

    /// Return the executable for `source`, compiling it on first use.
    ///
    /// A non-zero compiler exit (or a compiler timeout) yields a [`CompileError`]
    /// carrying the compiler's diagnostics. Cancellation kills the compiler
    /// and returns `Err(Cancelled)`.
    #[instrument(skip_all, fields(source = %source.display(), %role))]
    pub fn compile(&mut self, source: &Path, role: Role, cancel: &CancelToken) -> Result<PathBuf> {
        let key = cache_key(source);
        if let Some(executable) = self.cache.get(&key) {
            debug!(executable = %executable.display(), "reusing compiled executable");
            return Ok(executable.clone());
        }
        if !source.exists() {
            return Err(CompileError {
                source_path: source.to_path_buf(),
                exit_code: None,
                diagnostics: "source file not found".to_string(),
            }
            .into());
        }

        fs::create_dir_all(&self.settings.bin_dir)
            .with_context(|| format!("create bin dir {}", self.settings.bin_dir.display()))?;
        let executable = self.executable_path(source, role);

        let (program, fixed_args) = self
            .settings
            .command
            .split_first()
            .context("compiler command is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(fixed_args)
            .args(&self.settings.flags)
            .arg(source)
            .arg("-o")
            .arg(&executable);

        info!(executable = %executable.display(), "compiling");
        self.invocations += 1;
        let output = run_command_with_timeout(
            cmd,
            None,
            self.settings.timeout,
            self.settings.diagnostics_limit_bytes,
            cancel,
        )
        .with_context(|| format!("run compiler for {}", source.display()))?;

        if output.timed_out {
            warn!("compiler timed out");
            return Err(CompileError {
                source_path: source.to_path_buf(),
                exit_code: None,
                diagnostics: format!(
                    "compiler timed out after {}\n{}",
                    format_duration(self.settings.timeout),
                    output.combined_text()
                ),
            }
            .into());
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "compilation failed");
            return Err(CompileError {
                source_path: source.to_path_buf(),
                exit_code: output.status.code(),
                diagnostics: output.combined_text(),
            }
            .into());
        }

        self.cache.insert(key, executable.clone());
        Ok(executable)
    }

    /// Forget the executable for `source` so the next `compile` rebuilds it.
    pub fn invalidate(&mut self, source: &Path) {
        self.cache.remove(&cache_key(source));
    }

    fn executable_path(&self, source: &Path, role: Role) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "program".to_string());
        self.settings
            .bin_dir
            .join(format!("{role}-{stem}{}", std::env::consts::EXE_SUFFIX))
    }
}

fn cache_key(source: &Path) -> PathBuf {
    fs::canonicalize(source).unwrap_or_else(|_| source.to_path_buf())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::Cancelled;

    fn settings(dir: &Path, compiler_body: &str) -> CompilerSettings {
        let script = dir.join("cc.sh");
        fs::write(&script, compiler_body).expect("write compiler");
        CompilerSettings {
            command: vec!["sh".to_string(), script.display().to_string()],
            flags: vec!["-DLOCAL".to_string()],
            timeout: Duration::from_secs(10),
            bin_dir: dir.join("bin"),
            diagnostics_limit_bytes: 4096,
        }
    }

    const COPY_COMPILER: &str = r#"echo "$@" >> "$(dirname "$0")/args.log"
while [ $# -gt 3 ]; do shift; done
cp "$1" "$3" && chmod +x "$3"
"#;

    #[test]
    fn compiles_each_source_once_with_flags() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = temp.path().join("sol.sh");
        fs::write(&source, "#!/bin/sh\necho hi\n").expect("write source");
        let mut compiler = Compiler::new(settings(temp.path(), COPY_COMPILER));

        let first = compiler
            .compile(&source, Role::Golden, &CancelToken::new())
            .expect("compile");
        let second = compiler
            .compile(&source, Role::Candidate, &CancelToken::new())
            .expect("compile again");
        assert_eq!(first, second);
        assert_eq!(compiler.invocations(), 1);
        assert!(first.ends_with(format!("golden-sol{}", std::env::consts::EXE_SUFFIX)));

        let log = fs::read_to_string(temp.path().join("args.log")).expect("read log");
        assert!(log.starts_with("-DLOCAL "));

        compiler.invalidate(&source);
        compiler
            .compile(&source, Role::Golden, &CancelToken::new())
            .expect("recompile");
        assert_eq!(compiler.invocations(), 2);
    }

    #[test]
    fn failing_compiler_yields_compile_error_with_diagnostics() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = temp.path().join("bad.cpp");
        fs::write(&source, "int main( {").expect("write source");
        let mut compiler = Compiler::new(settings(
            temp.path(),
            "echo \"bad.cpp:1: error: expected ')'\" >&2\nexit 1\n",
        ));

        let err = compiler
            .compile(&source, Role::Candidate, &CancelToken::new())
            .unwrap_err();
        let compile = err.downcast_ref::<CompileError>().expect("compile error");
        assert_eq!(compile.exit_code, Some(1));
        assert!(compile.diagnostics.contains("expected ')'"));
    }

    #[test]
    fn missing_source_is_a_compile_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut compiler = Compiler::new(settings(temp.path(), COPY_COMPILER));
        let err = compiler
            .compile(&temp.path().join("nope.cpp"), Role::Golden, &CancelToken::new())
            .unwrap_err();
        assert!(err.downcast_ref::<CompileError>().is_some());
        assert_eq!(compiler.invocations(), 0);
    }

    #[test]
    fn cancellation_kills_running_compiler() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = temp.path().join("sol.cpp");
        fs::write(&source, "int main() {}").expect("write source");
        let mut settings = settings(temp.path(), "sleep 30\n");
        settings.timeout = Duration::from_secs(60);
        let mut compiler = Compiler::new(settings);

        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let err = compiler.compile(&source, Role::Golden, &cancel).unwrap_err();
        assert!(err.downcast_ref::<Cancelled>().is_some());
        assert!(started.elapsed() < Duration::from_secs(5));
        canceller.join().expect("join");

        // A cancelled compile is not cached.
        assert!(compiler.cache.is_empty());
    }
}
