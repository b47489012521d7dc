use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use regex::{Captures, Regex};
use serde::Deserialize;
use tracing::debug;

use super::{Task, TaskRegistry};
use crate::config::ProjectSettings;
use crate::error::{Result, TaskcondError};

#[derive(Debug, Deserialize)]
struct RawTaskFile {
    #[serde(default, rename = "task")]
    tasks: toml::Table,
    config: Option<ProjectSettings>,
    #[serde(default)]
    variables: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskSpec {
    command: Option<String>,
    #[serde(default)]
    depends: Vec<String>,
    #[serde(default)]
    inputs: Vec<PathBuf>,
    #[serde(default)]
    outputs: Vec<PathBuf>,
    #[serde(default)]
    description: String,
    #[serde(default = "displayed_by_default")]
    displayed: bool,
}

fn displayed_by_default() -> bool {
    true
}

#[derive(Debug)]
pub struct TaskFile {
    pub registry: TaskRegistry,
    pub settings: ProjectSettings,
}

/// Reads a TOML task file, registers its tasks in file order and validates
/// the resulting graph.
pub fn load_task_file(path: &Path) -> Result<TaskFile> {
    if !path.is_file() {
        return Err(TaskcondError::TaskFileNotFound(path.to_path_buf()));
    }

    let contents = fs::read_to_string(path)?;
    let raw: RawTaskFile = toml::from_str(&contents)?;

    if raw.tasks.is_empty() {
        return Err(TaskcondError::NoTasks(path.to_path_buf()));
    }

    let mut variables = raw.variables;
    add_builtin_variables(&mut variables, path);
    let substituter = Substituter::new(variables)?;

    let mut registry = TaskRegistry::new();
    for (name, value) in raw.tasks {
        let spec = value
            .try_into::<TaskSpec>()
            .map_err(|e| TaskcondError::Parse(format!("task '{}': {}", name, e)))?;
        registry.register(build_task(name, spec, &substituter)?)?;
    }

    registry.validate()?;
    debug!(path = %path.display(), tasks = registry.len(), "loaded task file");

    Ok(TaskFile {
        registry,
        settings: raw.config.unwrap_or_default(),
    })
}

fn build_task(name: String, spec: TaskSpec, substituter: &Substituter) -> Result<Task> {
    let mut builder = Task::builder(name)
        .depends(spec.depends)
        .inputs(spec.inputs.iter().map(|p| substituter.apply_path(p)))
        .outputs(spec.outputs.iter().map(|p| substituter.apply_path(p)))
        .description(spec.description)
        .displayed(spec.displayed);

    if let Some(command) = spec.command {
        builder = builder.shell(substituter.apply(&command));
    }

    builder.build()
}

fn add_builtin_variables(variables: &mut HashMap<String, String>, task_file: &Path) {
    for (key, value) in env::vars() {
        variables.insert(format!("ENV_{}", key), value);
    }

    if let Ok(pwd) = env::current_dir() {
        variables.insert("PWD".to_string(), pwd.to_string_lossy().to_string());
    }

    let root = match task_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let root = root.canonicalize().unwrap_or(root);
    variables.insert("ROOT".to_string(), root.to_string_lossy().to_string());
}

/// Expands `${NAME}` and `$NAME`; unknown names are left as written.
struct Substituter {
    braced: Regex,
    simple: Regex,
    variables: HashMap<String, String>,
}

impl Substituter {
    fn new(variables: HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            braced: Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")?,
            simple: Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b")?,
            variables,
        })
    }

    fn apply(&self, text: &str) -> String {
        let braced = self
            .braced
            .replace_all(text, |caps: &Captures| self.lookup(caps));
        self.simple
            .replace_all(&braced, |caps: &Captures| self.lookup(caps))
            .into_owned()
    }

    fn lookup(&self, caps: &Captures) -> String {
        self.variables
            .get(&caps[1])
            .cloned()
            .unwrap_or_else(|| caps[0].to_string())
    }

    fn apply_path(&self, path: &Path) -> PathBuf {
        PathBuf::from(self.apply(&path.to_string_lossy()))
    }
}
