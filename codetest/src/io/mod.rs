//! Side-effecting parts of the engine: files, processes and watching.

pub mod artifacts;
pub mod compile;
pub mod config;
pub mod input;
pub mod process;
pub mod template;
pub mod watcher;
