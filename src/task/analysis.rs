use std::{fmt::Write, path::Path};

use super::{Task, TaskRegistry};
use crate::util::is_glob_pattern;

/// Renders the `list` output for every displayed task, in registration order.
pub fn render_task_list(registry: &TaskRegistry) -> String {
    let mut out = String::from("Available Tasks:\n");

    for task in registry.tasks().iter().filter(|t| t.displayed()) {
        if task.description().is_empty() {
            let _ = writeln!(out, "  {}", task.name());
        } else {
            let _ = writeln!(out, "  {}: {}", task.name(), task.description());
        }

        if !task.depends().is_empty() {
            let _ = writeln!(out, "    Depends on: {}", task.depends().join(", "));
        }
        if !task.outputs().is_empty() {
            let _ = writeln!(out, "    Outputs: {}", join_paths(task.outputs()));
        }
        if !task.inputs().is_empty() {
            let _ = writeln!(out, "    Inputs: {}", join_paths(task.inputs()));
        }
    }

    out
}

fn join_paths<P: AsRef<Path>>(paths: &[P]) -> String {
    paths
        .iter()
        .map(|p| p.as_ref().display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Notes dependencies among `names` that share no file with their dependent.
pub fn show_task_relationships(registry: &TaskRegistry, names: &[String]) -> Vec<String> {
    let task_map = registry.task_map();
    let mut notes = Vec::new();

    for name in names {
        let Some(task) = task_map.get(name.as_str()) else {
            continue;
        };
        for dep_id in task.depends() {
            if let Some(dep_task) = task_map.get(dep_id.as_str()) {
                if !has_file_relationship(task, dep_task) {
                    notes.push(format!(
                        "Info: Task '{}' depends on '{}' for ordering only",
                        task.name(),
                        dep_id
                    ));
                }
            }
        }
    }

    notes
}

fn has_file_relationship(task: &Task, dependency: &Task) -> bool {
    if dependency.outputs().is_empty() || task.inputs().is_empty() {
        return false;
    }

    dependency.outputs().iter().any(|dep_output| {
        task.inputs()
            .iter()
            .any(|task_input| paths_match(dep_output, task_input))
    })
}

fn paths_match(output: &Path, input: &Path) -> bool {
    if output == input {
        return true;
    }

    let input_str = input.to_string_lossy();
    if !is_glob_pattern(&input_str) {
        return false;
    }

    glob::Pattern::new(&input_str)
        .map(|pattern| pattern.matches_path(output))
        .unwrap_or(false)
}
