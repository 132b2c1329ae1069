use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::step::{StdinSource, StepDescriptor, StepInput};
use crate::utils::command;

#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
    #[serde(flatten)]
    pub step: StepDescriptor,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    pub command_line: String,
}

/// Steps in execution order. Every step appears after all steps it needs.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedPlan {
    pub base_dir: PathBuf,
    pub terminal: String,
    pub steps: Vec<PlannedStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ResolvedPlan {
    pub fn order(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.step.name()).collect()
    }

    pub fn terminal_step(&self) -> Option<&StepDescriptor> {
        self.steps
            .iter()
            .map(|s| &s.step)
            .find(|s| s.name() == self.terminal)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Order `steps` so that every step runs after the steps whose outputs it uses.
///
/// Ready steps are taken in declaration order, so the same input always yields
/// the same plan. Nothing is executed; a cycle or a dangling reference fails
/// here.
pub fn resolve(steps: &[StepDescriptor], terminal: &str, base_dir: &Path) -> Result<ResolvedPlan> {
    let mut name_index: HashMap<&str, usize> = HashMap::new();
    for (idx, step) in steps.iter().enumerate() {
        if name_index.insert(step.name(), idx).is_some() {
            return Err(Error::invalid_step(
                step.name(),
                format!("Duplicate step name '{}'", step.name()),
            ));
        }
    }

    let terminal_idx = *name_index.get(terminal).ok_or_else(|| {
        Error::unknown_reference(
            terminal,
            terminal,
            format!("Terminal step '{}' is not defined", terminal),
        )
    })?;
    if steps[terminal_idx].outputs().is_empty() {
        return Err(Error::invalid_step(
            terminal,
            "Terminal step declares no output",
        ));
    }

    let mut producers: HashMap<PathBuf, usize> = HashMap::new();
    for (idx, step) in steps.iter().enumerate() {
        for output in step.outputs() {
            let resolved = step.resolve_path(base_dir, output);
            if let Some(&other) = producers.get(&resolved) {
                return Err(Error::invalid_step(
                    step.name(),
                    format!(
                        "Output '{}' is already produced by step '{}'",
                        output.display(),
                        steps[other].name()
                    ),
                ));
            }
            producers.insert(resolved, idx);
        }
    }

    let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); steps.len()];
    for (idx, step) in steps.iter().enumerate() {
        for reference in step.output_refs() {
            let dep = *name_index.get(reference.step.as_str()).ok_or_else(|| {
                Error::unknown_reference(
                    step.name(),
                    reference.token(),
                    format!(
                        "Step '{}' references unknown step '{}'",
                        step.name(),
                        reference.step
                    ),
                )
            })?;
            if reference.index >= steps[dep].outputs().len() {
                return Err(Error::unknown_reference(
                    step.name(),
                    reference.token(),
                    format!(
                        "Step '{}' declares no output at index {}",
                        reference.step, reference.index
                    ),
                ));
            }
            deps[idx].insert(dep);
        }

        for path in input_paths(step) {
            let resolved = step.resolve_path(base_dir, path);
            if let Some(&producer) = producers.get(&resolved) {
                // A step may rewrite its own output in place.
                if producer != idx {
                    deps[idx].insert(producer);
                }
            }
        }
    }

    let mut indegree: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (idx, step_deps) in deps.iter().enumerate() {
        for &dep in step_deps {
            dependents[dep].push(idx);
        }
    }

    let mut ready: BTreeSet<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(idx, _)| idx)
        .collect();

    let mut ordered = Vec::with_capacity(steps.len());
    while let Some(idx) = ready.pop_first() {
        ordered.push(idx);
        for &child in &dependents[idx] {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                ready.insert(child);
            }
        }
    }

    if ordered.len() != steps.len() {
        let cyclic = cycle_members(&indegree, &dependents)
            .into_iter()
            .map(|idx| steps[idx].name().to_string())
            .collect();
        return Err(Error::cycle_detected(cyclic));
    }

    let mut warnings = Vec::new();
    if ordered.iter().enumerate().any(|(pos, &idx)| pos != idx) {
        warnings.push("Steps reordered based on dependencies".to_string());
    }

    let planned = ordered
        .into_iter()
        .map(|idx| {
            let step = steps[idx].clone();
            PlannedStep {
                needs: deps[idx]
                    .iter()
                    .map(|&dep| steps[dep].name().to_string())
                    .collect(),
                command_line: command::display_command_line(step.program(), step.args()),
                step,
            }
        })
        .collect();

    Ok(ResolvedPlan {
        base_dir: base_dir.to_path_buf(),
        terminal: terminal.to_string(),
        steps: planned,
        warnings,
    })
}

fn input_paths(step: &StepDescriptor) -> impl Iterator<Item = &Path> {
    let inputs = step.inputs().iter().filter_map(|input| match input {
        StepInput::Path(path) => Some(path.as_path()),
        StepInput::Output(_) => None,
    });
    let stdin = match step.stdin() {
        Some(StdinSource::File(path)) => Some(path.as_path()),
        _ => None,
    };
    inputs.chain(stdin)
}

/// Steps left over by Kahn's algorithm that can reach themselves, in declaration order.
///
/// Steps that are only downstream of a cycle are left out.
fn cycle_members(indegree: &[usize], dependents: &[Vec<usize>]) -> Vec<usize> {
    let remaining: Vec<bool> = indegree.iter().map(|&count| count > 0).collect();

    (0..indegree.len())
        .filter(|&start| remaining[start] && reaches(start, start, &remaining, dependents))
        .collect()
}

fn reaches(from: usize, target: usize, remaining: &[bool], dependents: &[Vec<usize>]) -> bool {
    let mut seen = vec![false; remaining.len()];
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        for &next in &dependents[node] {
            if !remaining[next] {
                continue;
            }
            if next == target {
                return true;
            }
            if !seen[next] {
                seen[next] = true;
                stack.push(next);
            }
        }
    }
    false
}
