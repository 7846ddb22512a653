//! Test-only helpers: temporary workspaces with shell-script "sources".
//!
//! Sources are `/bin/sh` scripts and the compiler is a script that copies the
//! source to the executable path, so engine tests need no C++ toolchain.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::io::config::RunSpec;

/// Marker that makes the fake compiler fail.
pub const COMPILE_ERROR_MARKER: &str = "COMPILE_ERROR";

const FAKE_COMPILER: &str = r#"echo "$@" >> "$(dirname "$0")/compile.log"
while [ $# -gt 3 ]; do shift; done
if grep -q COMPILE_ERROR "$1"; then
  echo "$1:1:1: error: COMPILE_ERROR marker found" >&2
  exit 1
fi
cp "$1" "$3" && chmod +x "$3"
"#;

/// Temporary directory holding sources, the fake compiler and the work dir.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp workspace")?;
        fs::write(dir.path().join("cc.sh"), FAKE_COMPILER).context("write fake compiler")?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `name` inside the workspace.
    pub fn write(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Write a shell-script source; `body` follows the `#!/bin/sh` line.
    pub fn source(&self, name: &str, body: &str) -> Result<PathBuf> {
        self.write(name, &format!("#!/bin/sh\n{body}"))
    }

    /// Run spec over two sources using the fake compiler and a 5 s timeout.
    pub fn spec(&self, golden: &Path, candidate: &Path) -> RunSpec {
        let mut spec = RunSpec::new(golden, candidate);
        spec.compiler = vec![
            "sh".to_string(),
            self.path().join("cc.sh").display().to_string(),
        ];
        spec.work_dir = self.path().join(".codetest");
        spec.timeout = Some(Duration::from_secs(5));
        spec.seed = Some(7);
        spec
    }

    /// Number of compiler invocations so far.
    pub fn compile_count(&self) -> usize {
        fs::read_to_string(self.path().join("compile.log"))
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }
}

/// Parse a pid written by a test script, e.g. `echo $$ > pid`.
pub fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Poll until `path` holds a pid or `within` elapses.
pub fn wait_for_pid(path: &Path, within: Duration) -> Option<u32> {
    let deadline = Instant::now() + within;
    loop {
        if let Some(pid) = read_pid(path) {
            return Some(pid);
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Whether `pid` names a running process. Zombies count as gone.
pub fn process_alive(pid: u32) -> bool {
    if Path::new("/proc/self/stat").exists() {
        return match fs::read_to_string(format!("/proc/{pid}/stat")) {
            // The state letter follows the parenthesised command name.
            Ok(stat) => stat
                .rsplit_once(") ")
                .is_some_and(|(_, rest)| !rest.starts_with('Z')),
            Err(_) => false,
        };
    }
    Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .status()
        .is_ok_and(|status| status.success())
}

/// Poll until `pid` has exited; `false` if it is still running after `within`.
pub fn process_gone(pid: u32, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    while process_alive(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    true
}
