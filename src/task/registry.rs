use std::collections::HashMap;

use tracing::debug;

use super::{
    Task,
    dependency::{required_closure, sort_topologically, validate_tasks},
};
use crate::error::{Result, TaskcondError};

/// Registered tasks keyed by unique name, kept in registration order.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task: Task) -> Result<()> {
        if self.index.contains_key(task.name()) {
            return Err(TaskcondError::DuplicateTask(task.name().to_string()));
        }

        debug!(task = %task.name(), "registered task");
        self.index.insert(task.name().to_string(), self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Task> {
        self.index
            .get(name)
            .map(|&i| &self.tasks[i])
            .ok_or_else(|| TaskcondError::UnknownTask(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(Task::name)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task_map(&self) -> HashMap<&str, &Task> {
        self.tasks.iter().map(|t| (t.name(), t)).collect()
    }

    pub fn validate(&self) -> Result<()> {
        validate_tasks(&self.tasks)
    }

    /// The targets and all of their transitive dependencies, dependencies first.
    pub fn execution_order(&self, targets: &[String]) -> Result<Vec<String>> {
        let closure = required_closure(&self.tasks, targets)?;
        let members: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|t| closure.contains(t.name()))
            .collect();
        Ok(sort_topologically(&members))
    }
}
