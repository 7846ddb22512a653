//! Differential test engine for competitive-programming solutions.
//!
//! A golden (reference) program and a candidate program are compiled once,
//! then run against every input produced by enumerating a space of named
//! integer axes; their outputs are compared line by line. The layout follows
//! a strict split:
//!
//! - **[`core`]**: pure, deterministic logic (axis enumeration, diffing,
//!   case types). No I/O.
//! - **[`io`]**: side effects (configuration, input files, compiling and
//!   running processes, artifacts, file watching).
//!
//! [`engine`] runs one full pass; [`watch`] reruns it whenever a watched file
//! changes.

pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod watch;
