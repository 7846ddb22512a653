//! Fixed on-disk locations for one run, input archiving and the status file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::diff::{DiffResult, diff_outputs};
use crate::core::types::Role;

/// Files reused by every case of a run (`<work_dir>/...`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub work_dir: PathBuf,
    pub input: PathBuf,
    pub golden_output: PathBuf,
    pub candidate_output: PathBuf,
    pub bin_dir: PathBuf,
    pub status: PathBuf,
}

impl ArtifactPaths {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            input: work_dir.join("input.txt"),
            golden_output: work_dir.join("golden.out"),
            candidate_output: work_dir.join("candidate.out"),
            bin_dir: work_dir.join("bin"),
            status: work_dir.join("status.json"),
        }
    }

    /// Create the work and bin directories.
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.bin_dir)
            .with_context(|| format!("create work dir {}", self.work_dir.display()))?;
        Ok(())
    }

    pub fn output_for(&self, role: Role) -> &Path {
        match role {
            Role::Golden => &self.golden_output,
            Role::Candidate => &self.candidate_output,
        }
    }
}

/// Copy the current input to `<archive_dir>/input-<key>.txt`.
pub fn archive_input(input: &Path, archive_dir: &Path, key: &str) -> Result<PathBuf> {
    fs::create_dir_all(archive_dir)
        .with_context(|| format!("create archive dir {}", archive_dir.display()))?;
    let target = archive_dir.join(format!("input-{key}.txt"));
    fs::copy(input, &target)
        .with_context(|| format!("archive {} to {}", input.display(), target.display()))?;
    debug!(path = %target.display(), "input archived");
    Ok(target)
}

/// Read a program's output file; invalid UTF-8 is replaced, not rejected.
pub fn read_output(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("read output {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Compare two output files line by line.
pub fn diff_files(reference: &Path, candidate: &Path) -> Result<DiffResult> {
    let reference = read_output(reference)?;
    let candidate = read_output(candidate)?;
    Ok(diff_outputs(&reference, &candidate))
}

/// Outcome of the last finished run (`<work_dir>/status.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStatus {
    pub passed: bool,
    pub cases_run: u64,
    /// Label of the case that failed, if a case failed.
    pub failed_case: Option<String>,
    /// Rendered error for failed runs.
    pub error: Option<String>,
    /// RFC 3339 UTC timestamp.
    pub finished_at: String,
}

impl RunStatus {
    pub fn passed(cases_run: u64) -> Self {
        Self {
            passed: true,
            cases_run,
            failed_case: None,
            error: None,
            finished_at: now_rfc3339(),
        }
    }

    pub fn failed(cases_run: u64, failed_case: Option<String>, error: String) -> Self {
        Self {
            passed: false,
            cases_run,
            failed_case,
            error: Some(error),
            finished_at: now_rfc3339(),
        }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn load_status(path: &Path) -> Result<RunStatus> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read status {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse status {}", path.display()))
}

/// Atomically write the status file (temp file + rename).
pub fn write_status(path: &Path, status: &RunStatus) -> Result<()> {
    debug!(path = %path.display(), passed = status.passed, cases_run = status.cases_run, "writing status");
    let mut buf = serde_json::to_string_pretty(status)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("status path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp status {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace status {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_uses_key_in_file_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("input.txt");
        fs::write(&input, "2 1\n").expect("write input");

        let archived =
            archive_input(&input, &temp.path().join("keep"), "A-2-B-1").expect("archive");
        assert_eq!(archived, temp.path().join("keep").join("input-A-2-B-1.txt"));
        assert_eq!(fs::read_to_string(archived).expect("read"), "2 1\n");
    }

    #[test]
    fn status_round_trips_without_leaving_temp_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ArtifactPaths::new(&temp.path().join(".codetest"));
        let status = RunStatus::failed(4, Some("N = 4".to_string()), "mismatch".to_string());

        write_status(&paths.status, &status).expect("write");
        assert_eq!(load_status(&paths.status).expect("load"), status);
        assert!(!paths.status.with_extension("json.tmp").exists());
        assert!(chrono::DateTime::parse_from_rfc3339(&status.finished_at).is_ok());
    }

    #[test]
    fn read_output_tolerates_invalid_utf8() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("out");
        fs::write(&path, [b'o', b'k', 0xff, b'\n']).expect("write");
        assert_eq!(read_output(&path).expect("read"), "ok\u{fffd}\n");
    }

    #[test]
    fn diff_files_ignores_missing_final_newline() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ArtifactPaths::new(temp.path());
        fs::write(&paths.golden_output, "1\n2\n3\n").expect("write golden");
        fs::write(&paths.candidate_output, "1\n2\n3").expect("write candidate");
        assert!(diff_files(&paths.golden_output, &paths.candidate_output).expect("diff").passed());

        fs::write(&paths.candidate_output, "1\n9\n3\n").expect("rewrite candidate");
        let result = diff_files(&paths.golden_output, &paths.candidate_output).expect("diff");
        assert_eq!(result.changes().count(), 1);
    }
}
