use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskcondError {
    #[error("Task with name '{0}' already registered")]
    DuplicateTask(String),

    #[error("Task '{0}' is not defined")]
    UnknownTask(String),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Cyclic dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("No target tasks specified")]
    NoTargets,

    #[error("Task '{0}' not found")]
    TargetNotFound(String),

    #[error("Shell command failed ({}): {command}", describe_exit(.code))]
    ShellCommandFailed { command: String, code: Option<i32> },

    #[error("Function '{name}' failed: {message}")]
    FunctionFailed { name: String, message: String },

    #[error("Task name must not be empty")]
    EmptyTaskName,

    #[error("Task '{0}' declares both a shell command and a function")]
    ConflictingBody(String),

    #[error("Task '{0}' runs an in-process function and cannot be executed in a worker process")]
    NotTransferable(String),

    #[error("Failed to start command '{command}': {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Task file '{}' not found", .0.display())]
    TaskFileNotFound(PathBuf),

    #[error("No tasks found in '{}'", .0.display())]
    NoTasks(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

impl From<toml::de::Error> for TaskcondError {
    fn from(err: toml::de::Error) -> Self {
        TaskcondError::Parse(err.to_string())
    }
}

impl From<regex::Error> for TaskcondError {
    fn from(err: regex::Error) -> Self {
        TaskcondError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TaskcondError>;
