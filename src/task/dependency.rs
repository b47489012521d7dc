use std::collections::{HashMap, HashSet, VecDeque};

use super::Task;
use crate::error::{Result, TaskcondError};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Checks every dependency reference and rejects cycles.
///
/// Top-level traversal follows the slice order, so the reported cycle is
/// stable for a given registration order.
pub fn validate_tasks(tasks: &[Task]) -> Result<()> {
    let task_map: HashMap<&str, &Task> = tasks.iter().map(|t| (t.name(), t)).collect();
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut path: Vec<&str> = Vec::new();

    for task in tasks {
        visit(task.name(), &task_map, &mut marks, &mut path)?;
    }

    Ok(())
}

fn visit<'a>(
    task_name: &'a str,
    task_map: &HashMap<&'a str, &'a Task>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> Result<()> {
    match marks.get(task_name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::InProgress) => return Err(cycle_error(path, task_name)),
        None => {}
    }

    let Some(&task) = task_map.get(task_name) else {
        return Err(TaskcondError::UnknownTask(task_name.to_string()));
    };

    marks.insert(task_name, Mark::InProgress);
    path.push(task_name);

    for dep in task.depends() {
        let Some((&dep_name, _)) = task_map.get_key_value(dep.as_str()) else {
            return Err(TaskcondError::UnknownDependency {
                task: task_name.to_string(),
                dependency: dep.clone(),
            });
        };
        visit(dep_name, task_map, marks, path)?;
    }

    path.pop();
    marks.insert(task_name, Mark::Done);
    Ok(())
}

/// Builds the cycle from where `reentered` first appears on the active path.
fn cycle_error(path: &[&str], reentered: &str) -> TaskcondError {
    let start = path
        .iter()
        .position(|name| *name == reentered)
        .unwrap_or(0);
    let mut cycle: Vec<String> = path[start..].iter().map(|name| name.to_string()).collect();
    cycle.push(reentered.to_string());
    TaskcondError::CyclicDependency(cycle)
}

/// Returns the targets plus everything they transitively depend on.
pub fn required_closure(tasks: &[Task], targets: &[String]) -> Result<HashSet<String>> {
    let task_map: HashMap<&str, &Task> = tasks.iter().map(|t| (t.name(), t)).collect();

    for target in targets {
        if !task_map.contains_key(target.as_str()) {
            return Err(TaskcondError::TargetNotFound(target.clone()));
        }
    }

    let mut needed: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<&str> = targets.iter().map(String::as_str).collect();

    while let Some(current) = queue.pop_front() {
        if !needed.insert(current.to_string()) {
            continue;
        }

        let Some(task) = task_map.get(current) else {
            return Err(TaskcondError::UnknownTask(current.to_string()));
        };

        for dep in task.depends() {
            if !needed.contains(dep) {
                queue.push_back(dep);
            }
        }
    }

    Ok(needed)
}

/// Kahn's algorithm over `tasks`, seeded and drained in slice order.
///
/// Dependencies outside `tasks` are treated as already satisfied. Tasks caught
/// in a cycle are left out.
pub fn sort_topologically(tasks: &[&Task]) -> Vec<String> {
    let members: HashSet<&str> = tasks.iter().map(|t| t.name()).collect();
    let mut in_degrees: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for task in tasks {
        let mut unique: HashSet<&str> = HashSet::new();
        for dep in task.depends() {
            if members.contains(dep.as_str()) && unique.insert(dep.as_str()) {
                dependents.entry(dep.as_str()).or_default().push(task.name());
            }
        }
        in_degrees.insert(task.name(), unique.len());
    }

    let mut queue: VecDeque<&str> = tasks
        .iter()
        .map(|t| t.name())
        .filter(|name| in_degrees.get(name) == Some(&0))
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(tasks.len());

    while let Some(task_name) = queue.pop_front() {
        sorted.push(task_name.to_string());

        for dependent in dependents.get(task_name).into_iter().flatten() {
            if let Some(count) = in_degrees.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    sorted
}
