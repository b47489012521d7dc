//! Resolution of run settings: call-site overrides win over the task file's
//! `[config]` section, which wins over built-in defaults.

use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::execution::{DEFAULT_CHECK_FREQ, RunOptions};
use crate::report::OutputMode;
use crate::util::{parse_duration, resolve_workers};

/// The `[config]` section of a task file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectSettings {
    pub n_jobs: Option<i64>,
    pub force: Option<bool>,
    pub use_processes: Option<bool>,
    pub visible_progressbar: Option<bool>,
    pub check_freq: Option<String>,
    pub stall_timeout: Option<String>,
    pub output: Option<OutputMode>,
    /// Target used when `run` is given none.
    pub default: Option<String>,
}

/// Values given explicitly by the caller; `None` defers to the task file.
#[derive(Debug, Default, Clone)]
pub struct RunOverrides {
    pub n_jobs: Option<i64>,
    pub force: Option<bool>,
    pub use_processes: Option<bool>,
    pub visible_progressbar: Option<bool>,
    pub check_freq: Option<String>,
    pub stall_timeout: Option<String>,
    pub output: Option<OutputMode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub force: bool,
    pub workers: Option<usize>,
    pub use_processes: bool,
    pub show_progress: bool,
    pub check_freq: Duration,
    pub stall_timeout: Option<Duration>,
    pub output: OutputMode,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            force: false,
            workers: None,
            use_processes: false,
            show_progress: false,
            check_freq: DEFAULT_CHECK_FREQ,
            stall_timeout: None,
            output: OutputMode::Group,
        }
    }
}

impl RunConfig {
    pub fn resolve(overrides: &RunOverrides, settings: &ProjectSettings) -> Result<Self> {
        let defaults = Self::default();

        let check_freq = match overrides.check_freq.as_ref().or(settings.check_freq.as_ref()) {
            Some(value) => parse_duration(value, "check_freq")?,
            None => defaults.check_freq,
        };

        let stall_timeout = overrides
            .stall_timeout
            .as_ref()
            .or(settings.stall_timeout.as_ref())
            .map(|value| parse_duration(value, "stall_timeout"))
            .transpose()?;

        Ok(Self {
            force: overrides.force.or(settings.force).unwrap_or(defaults.force),
            workers: resolve_workers(overrides.n_jobs.or(settings.n_jobs)),
            use_processes: overrides
                .use_processes
                .or(settings.use_processes)
                .unwrap_or(defaults.use_processes),
            show_progress: overrides
                .visible_progressbar
                .or(settings.visible_progressbar)
                .unwrap_or(defaults.show_progress),
            check_freq,
            stall_timeout,
            output: overrides.output.or(settings.output).unwrap_or(defaults.output),
        })
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            force: self.force,
            workers: self.workers,
            use_processes: self.use_processes,
            check_freq: self.check_freq,
            stall_timeout: self.stall_timeout,
            output: self.output,
        }
    }
}
