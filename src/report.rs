//! Run outcomes and the reporting seam between the orchestrator and the console.
//!
//! The orchestrator never prints. It hands coarse events to a [`Reporter`], and
//! [`ConsoleReporter`] turns them into the lines users see.

use std::io::{self, Write};

use clap::ValueEnum;
use serde::Deserialize;

use crate::execution::TaskState;

pub const SUCCESS_LINE: &str = "All tasks completed successfully";
pub const FAILURE_LINE: &str = "Finished with Failures";
pub const STALL_WARNING: &str = "Warning: No runnable tasks are currently submitted";

#[derive(ValueEnum, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Stream command output live.
    Stream,
    /// Print each command's output as a single block after it completes.
    #[default]
    Group,
}

/// Final state of one `run_tasks` invocation.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Every closure task with its final state, in dependency order.
    pub states: Vec<(String, TaskState)>,
    /// Tasks that failed while executing, with the reason.
    pub failures: Vec<(String, String)>,
    /// Tasks abandoned while still pending after a stall timed out.
    pub stalled: Vec<String>,
}

impl RunReport {
    pub fn state(&self, name: &str) -> Option<TaskState> {
        self.states
            .iter()
            .find(|(task, _)| task == name)
            .map(|(_, state)| *state)
    }

    pub fn is_success(&self) -> bool {
        self.stalled.is_empty() && self.states.iter().all(|(_, state)| state.is_satisfied())
    }

    pub fn summary_line(&self) -> &'static str {
        if self.is_success() {
            SUCCESS_LINE
        } else {
            FAILURE_LINE
        }
    }
}

/// Receives scheduling events from the orchestrator's coordinator loop.
///
/// All hooks are called from the coordinator only, never from workers.
pub trait Reporter {
    fn run_started(&mut self, _total: usize) {}
    fn task_started(&mut self, _name: &str) {}
    fn task_skipped(&mut self, _name: &str) {}
    fn task_done(&mut self, _name: &str) {}
    fn task_failed(&mut self, _name: &str, _reason: &str) {}
    fn task_propagated(&mut self, _name: &str, _failed_dependency: &str) {}
    fn stalled(&mut self, _pending: &[String]) {}
    fn finished(&mut self, _report: &RunReport) {}
}

pub struct ConsoleReporter<W: Write> {
    out: W,
    show_progress: bool,
    total: usize,
    settled: usize,
}

impl ConsoleReporter<io::Stdout> {
    pub fn stdout(show_progress: bool) -> Self {
        Self::new(io::stdout(), show_progress)
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W, show_progress: bool) -> Self {
        Self {
            out,
            show_progress,
            total: 0,
            settled: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        let _ = writeln!(self.out, "{}", text);
    }

    fn progress(&mut self, settled: bool, text: &str) {
        if settled {
            self.settled += 1;
        }
        if self.show_progress {
            let line = format!("[{}/{}] {}", self.settled, self.total, text);
            self.line(&line);
        }
    }
}

impl<W: Write> Reporter for ConsoleReporter<W> {
    fn run_started(&mut self, total: usize) {
        self.total = total;
        self.settled = 0;
    }

    fn task_started(&mut self, name: &str) {
        self.progress(false, &format!("Running '{}'", name));
    }

    fn task_skipped(&mut self, name: &str) {
        self.progress(true, &format!("'{}' is up to date", name));
    }

    fn task_done(&mut self, name: &str) {
        self.progress(true, &format!("'{}' done", name));
    }

    fn task_failed(&mut self, name: &str, reason: &str) {
        self.settled += 1;
        self.line(&format!("Task '{}' failed: {}", name, reason));
    }

    fn task_propagated(&mut self, name: &str, failed_dependency: &str) {
        self.settled += 1;
        self.line(&format!(
            "Task '{}' was not run because its dependency '{}' failed",
            name, failed_dependency
        ));
    }

    fn stalled(&mut self, pending: &[String]) {
        self.line(&format!(
            "{} (waiting on: {})",
            STALL_WARNING,
            pending.join(", ")
        ));
    }

    fn finished(&mut self, report: &RunReport) {
        for name in &report.stalled {
            self.line(&format!("Task '{}' never became runnable", name));
        }
        if !report.failures.is_empty() {
            let failed: Vec<&str> = report.failures.iter().map(|(name, _)| name.as_str()).collect();
            self.line(&format!("Failed tasks: {}", failed.join(", ")));
        }
        self.line(report.summary_line());
        let _ = self.out.flush();
    }
}
