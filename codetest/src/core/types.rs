//! Shared deterministic types for the engine.
//!
//! These types define stable contracts between the iterator, the runner and the
//! reporting layer. They hold no handles to processes or files.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::space::Bindings;

/// Which of the two compared programs an invocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Golden,
    Candidate,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Golden => f.write_str("golden"),
            Role::Candidate => f.write_str("candidate"),
        }
    }
}

/// One point of the parameter space, alive for a single generate/run/diff cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    /// Zero-based position in the enumeration.
    pub index: u64,
    /// Axis values for this case.
    pub bindings: Bindings,
    /// Display label (the bindings, or the stored input's file name).
    pub label: String,
    /// File-name friendly key used when archiving the input.
    pub archive_key: String,
}

impl TestCase {
    /// Case produced by the parameter space iterator.
    pub fn from_bindings(index: u64, bindings: Bindings) -> Self {
        Self {
            index,
            label: bindings.to_string(),
            archive_key: bindings.archive_key(),
            bindings,
        }
    }

    /// Case backed by a stored input file.
    pub fn from_file(index: u64, file_name: &str) -> Self {
        Self {
            index,
            bindings: Bindings::default(),
            label: file_name.to_string(),
            archive_key: file_name.to_string(),
        }
    }

    /// Look up an axis value; `None` when the axis is not declared.
    pub fn get(&self, name: &str) -> Option<i64> {
        self.bindings.get(name)
    }
}

/// Outcome of a single program invocation that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: Option<i32>,
    /// Terminating signal, when the process did not exit normally.
    pub signal: Option<i32>,
    pub elapsed: Duration,
    pub timed_out: bool,
    /// Bounded stderr capture.
    pub stderr: Vec<u8>,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.signal.is_none() && self.exit_code == Some(0)
    }
}

/// Timing for one passing case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseReport {
    pub index: u64,
    pub label: String,
    pub golden_elapsed: Duration,
    pub candidate_elapsed: Duration,
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Every case passed.
    Passed,
    /// A restart request stopped the run early.
    Cancelled,
}

/// Summary of one engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub cases_run: u64,
    pub verdict: Verdict,
    pub elapsed: Duration,
}

impl RunOutcome {
    /// Candidate compiled and passed every case that was generated.
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }
}
