//! Stable exit codes for the `codetest` binary.

use crate::error::{CompileError, DiffError, ExecutionError};

/// Every case passed (or watch mode stopped cleanly).
pub const OK: i32 = 0;
/// Invalid configuration, unreadable files or other errors.
pub const INVALID: i32 = 1;
/// Golden or candidate failed to compile.
pub const COMPILE_ERROR: i32 = 2;
/// A case failed: a program crashed, timed out or the outputs differed.
pub const CASE_FAILED: i32 = 3;

/// Map a fatal run error to its exit code.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<CompileError>().is_some() {
        COMPILE_ERROR
    } else if err.downcast_ref::<ExecutionError>().is_some()
        || err.downcast_ref::<DiffError>().is_some()
    {
        CASE_FAILED
    } else {
        INVALID
    }
}
