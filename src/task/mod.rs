pub mod analysis;
pub mod config;
pub mod dependency;
pub mod registry;

pub use analysis::{render_task_list, show_task_relationships};
pub use config::{TaskFile, load_task_file};
pub use registry::TaskRegistry;

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use tracing::debug;

use crate::error::{Result, TaskcondError};
use crate::report::OutputMode;
use crate::util::run_shell_command;

type TaskCallable = dyn Fn() -> anyhow::Result<()> + Send + Sync;

/// An in-process callable with its arguments already bound by capture.
#[derive(Clone)]
pub struct TaskFn {
    name: String,
    func: Arc<TaskCallable>,
}

impl TaskFn {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for TaskFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskFn").field(&self.name).finish()
    }
}

#[derive(Debug, Clone, Default)]
pub enum ExecutionBody {
    #[default]
    Noop,
    Shell(String),
    Function(TaskFn),
}

/// A declared unit of work. Immutable once built; all run state lives in the
/// orchestrator.
#[derive(Debug, Clone)]
pub struct Task {
    name: String,
    depends: Vec<String>,
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
    body: ExecutionBody,
    description: String,
    displayed: bool,
}

impl Task {
    pub fn builder(name: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depends(&self) -> &[String] {
        &self.depends
    }

    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    pub fn body(&self) -> &ExecutionBody {
        &self.body
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn displayed(&self) -> bool {
        self.displayed
    }

    /// Whether every declared input currently exists.
    pub fn inputs_present(&self) -> bool {
        self.inputs.iter().all(|input| input.exists())
    }

    /// Decides whether the outputs are stale relative to the inputs.
    pub fn should_run(&self) -> bool {
        if self.outputs.is_empty() {
            debug!(task = %self.name, "no outputs declared, always run");
            return true;
        }

        let Some(oldest_output) = oldest_timestamp(&self.outputs) else {
            debug!(task = %self.name, "outputs missing, must run");
            return true;
        };

        if self.inputs.is_empty() {
            debug!(task = %self.name, "outputs exist and no inputs declared, up to date");
            return false;
        }

        let Some(newest_input) = newest_timestamp(&self.inputs) else {
            debug!(task = %self.name, "inputs missing, cannot prove freshness");
            return true;
        };

        let stale = newest_input > oldest_output;
        debug!(task = %self.name, stale, "compared input and output timestamps");
        stale
    }

    /// Runs the configured body. Never touches registry or run state.
    pub async fn execute(&self, output: OutputMode) -> Result<()> {
        match &self.body {
            ExecutionBody::Noop => Ok(()),
            ExecutionBody::Shell(command) => {
                let status = run_shell_command(command, output).await?;
                if status.success() {
                    Ok(())
                } else {
                    Err(TaskcondError::ShellCommandFailed {
                        command: command.clone(),
                        code: status.code(),
                    })
                }
            }
            ExecutionBody::Function(task_fn) => {
                let func = Arc::clone(&task_fn.func);
                let failed = |message: String| TaskcondError::FunctionFailed {
                    name: task_fn.name.clone(),
                    message,
                };
                match tokio::task::spawn_blocking(move || func()).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(failed(format!("{:#}", e))),
                    Err(e) => Err(failed(format!("panicked: {}", e))),
                }
            }
        }
    }
}

fn modified_times(paths: &[PathBuf]) -> Option<Vec<SystemTime>> {
    paths.iter().map(|path| modified_time(path)).collect()
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
}

/// `None` when any path is missing.
fn newest_timestamp(paths: &[PathBuf]) -> Option<SystemTime> {
    modified_times(paths)?.into_iter().max()
}

/// `None` when any path is missing.
fn oldest_timestamp(paths: &[PathBuf]) -> Option<SystemTime> {
    modified_times(paths)?.into_iter().min()
}

pub struct TaskBuilder {
    name: String,
    depends: Vec<String>,
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
    shell: Option<String>,
    function: Option<TaskFn>,
    description: String,
    displayed: bool,
}

impl TaskBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            shell: None,
            function: None,
            description: String::new(),
            displayed: true,
        }
    }

    pub fn depends<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn inputs<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.inputs.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn outputs<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.outputs.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn shell(mut self, command: impl Into<String>) -> Self {
        self.shell = Some(command.into());
        self
    }

    pub fn function<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.function = Some(TaskFn::new(name, func));
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn displayed(mut self, displayed: bool) -> Self {
        self.displayed = displayed;
        self
    }

    pub fn build(self) -> Result<Task> {
        if self.name.trim().is_empty() {
            return Err(TaskcondError::EmptyTaskName);
        }

        let body = match (self.shell, self.function) {
            (Some(_), Some(_)) => return Err(TaskcondError::ConflictingBody(self.name)),
            (Some(command), None) => ExecutionBody::Shell(command),
            (None, Some(task_fn)) => ExecutionBody::Function(task_fn),
            (None, None) => ExecutionBody::Noop,
        };

        Ok(Task {
            name: self.name,
            depends: self.depends,
            inputs: self.inputs,
            outputs: self.outputs,
            body,
            description: self.description,
            displayed: self.displayed,
        })
    }
}
