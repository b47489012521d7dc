use clap::Parser;
use std::process;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, RunArgs};
use taskcond::config::RunConfig;
use taskcond::task::{TaskFile, load_task_file, render_task_list, show_task_relationships};
use taskcond::{ConsoleReporter, Orchestrator, Result, TaskcondError};

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    init_tracing(args.verbose);

    match run_taskcond(args).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "taskcond=debug" } else { "taskcond=warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Returns whether the command succeeded.
async fn run_taskcond(args: Cli) -> Result<bool> {
    let task_file = load_task_file(&args.file)?;

    match args.command {
        Command::List => {
            print!("{}", render_task_list(&task_file.registry));
            Ok(true)
        }
        Command::Run(run_args) => run(&task_file, &run_args, args.verbose).await,
    }
}

async fn run(task_file: &TaskFile, run_args: &RunArgs, verbose: bool) -> Result<bool> {
    let config = RunConfig::resolve(&run_args.overrides(), &task_file.settings)?;
    let registry = &task_file.registry;

    let targets = if run_args.targets.is_empty() {
        task_file.settings.default.iter().cloned().collect()
    } else {
        run_args.targets.clone()
    };
    if targets.is_empty() {
        return Err(TaskcondError::NoTargets);
    }

    if verbose || run_args.dry_run {
        let order = registry.execution_order(&targets)?;
        if verbose {
            println!("Task execution order: {}", order.join(" -> "));
            for note in show_task_relationships(registry, &order) {
                println!("{}", note);
            }
        }
        if run_args.dry_run {
            println!("Dry run mode - showing what would be executed:");
            for name in &order {
                let task = registry.get(name)?;
                let verdict = if config.force || task.should_run() {
                    "would run"
                } else {
                    "up to date"
                };
                println!("  {}: {}", name, verdict);
            }
            return Ok(true);
        }
    }

    let mut reporter = ConsoleReporter::stdout(config.show_progress);
    let report = Orchestrator::new(registry, config.run_options())
        .run_tasks(&targets, &mut reporter)
        .await
        .map_err(|e| {
            if matches!(e, TaskcondError::TargetNotFound(_)) {
                let known: Vec<&str> = registry.task_names().collect();
                eprintln!("Known tasks: {}", known.join(", "));
            }
            e
        })?;

    Ok(report.is_success())
}
