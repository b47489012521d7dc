use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use taskcond::OutputMode;
use taskcond::config::RunOverrides;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Task file to load
    #[arg(short = 'f', long = "file", default_value = "taskcond.toml", global = true)]
    pub file: PathBuf,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the available tasks
    List,
    /// Run tasks and everything they depend on
    Run(RunArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Tasks to run; falls back to the task file's default task
    pub targets: Vec<String>,

    /// Run tasks even when their outputs are up to date
    #[arg(long = "force", overrides_with = "no_force")]
    pub force: bool,

    /// Respect up-to-date checks even if the task file enables force
    #[arg(long = "no-force", overrides_with = "force")]
    pub no_force: bool,

    /// Number of parallel workers (-1 uses every available core)
    #[arg(short = 'j', long = "jobs", allow_negative_numbers = true)]
    pub jobs: Option<i64>,

    /// Only allow tasks that can run in isolated worker processes
    #[arg(long = "processes", overrides_with = "threads")]
    pub processes: bool,

    /// Run tasks on worker threads
    #[arg(long = "threads", overrides_with = "processes")]
    pub threads: bool,

    /// Show per-task progress
    #[arg(short = 'p', long = "progress", overrides_with = "silent")]
    pub progress: bool,

    /// Hide per-task progress
    #[arg(short = 's', long = "silent", overrides_with = "progress")]
    pub silent: bool,

    /// Interval between scheduling passes (e.g. "50ms")
    #[arg(long = "check-freq")]
    pub check_freq: Option<String>,

    /// Give up when no task has been runnable for this long (e.g. "30s")
    #[arg(long = "stall-timeout")]
    pub stall_timeout: Option<String>,

    /// How to display shell command output
    #[arg(long = "output", value_enum)]
    pub output: Option<OutputMode>,

    /// Show what would be executed without running tasks
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

fn flag_pair(yes: bool, no: bool) -> Option<bool> {
    match (yes, no) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

impl RunArgs {
    pub fn overrides(&self) -> RunOverrides {
        RunOverrides {
            n_jobs: self.jobs,
            force: flag_pair(self.force, self.no_force),
            use_processes: flag_pair(self.processes, self.threads),
            visible_progressbar: flag_pair(self.progress, self.silent),
            check_freq: self.check_freq.clone(),
            stall_timeout: self.stall_timeout.clone(),
            output: self.output,
        }
    }
}
