//! Dependency-aware task running with timestamp-based up-to-date checks.
//!
//! Tasks are registered in a [`TaskRegistry`], either loaded from a TOML task
//! file or built in code with [`Task::builder`]. An [`Orchestrator`] runs a set
//! of targets and everything they depend on, reporting through a [`Reporter`].

pub mod config;
pub mod error;
pub mod execution;
pub mod report;
pub mod task;
pub mod util;

pub use error::{Result, TaskcondError};
pub use execution::{Orchestrator, RunOptions, TaskState};
pub use report::{ConsoleReporter, OutputMode, Reporter, RunReport};
pub use task::{ExecutionBody, Task, TaskBuilder, TaskFn, TaskRegistry};
