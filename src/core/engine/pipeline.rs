use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::step::{StdinSource, StepDescriptor, StepInput};
use crate::utils::io as fs_io;
use crate::utils::template::{self, OutputRef};

use super::executor::{ExecutionResult, Invocation, StepExecutor, StepFailure};
use super::resolver::ResolvedPlan;

/// Fields that change between otherwise identical runs.
const VOLATILE_FIELDS: &[&str] = &["started_at", "duration_ms"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "step", rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running(String),
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Succeeded {
        artifact: PathBuf,
        steps: Vec<ExecutionResult>,
    },
    Failed {
        step: String,
        error: Error,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<ExecutionResult>,
        completed: Vec<ExecutionResult>,
    },
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineOutcome::Succeeded { .. })
    }

    pub fn artifact(&self) -> Option<&Path> {
        match self {
            PipelineOutcome::Succeeded { artifact, .. } => Some(artifact),
            PipelineOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            PipelineOutcome::Succeeded { .. } => None,
            PipelineOutcome::Failed { error, .. } => Some(error),
        }
    }

    /// Steps that finished successfully, in execution order.
    pub fn completed(&self) -> &[ExecutionResult] {
        match self {
            PipelineOutcome::Succeeded { steps, .. } => steps,
            PipelineOutcome::Failed { completed, .. } => completed,
        }
    }

    /// SHA-256 over the outcome with timestamps and durations removed.
    ///
    /// Two runs of pure steps over the same filesystem state fingerprint the same.
    pub fn fingerprint(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        strip_volatile(&mut value);
        let bytes = serde_json::to_vec(&value).unwrap_or_default();
        fs_io::digest_bytes(&bytes)
    }
}

fn strip_volatile(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for field in VOLATILE_FIELDS {
                map.remove(*field);
            }
            map.values_mut().for_each(strip_volatile);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_volatile),
        _ => {}
    }
}

/// Drives one resolved plan through an executor. Consumed by [`PipelineRunner::run`].
pub struct PipelineRunner {
    plan: ResolvedPlan,
    executor: Arc<dyn StepExecutor>,
    state: RunState,
    completed: Vec<ExecutionResult>,
    executed: HashSet<String>,
}

impl PipelineRunner {
    pub fn new(plan: ResolvedPlan, executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            plan,
            executor,
            state: RunState::Pending,
            completed: Vec::new(),
            executed: HashSet::new(),
        }
    }

    pub fn plan(&self) -> &ResolvedPlan {
        &self.plan
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Execute every step in plan order, stopping at the first failure.
    ///
    /// Outputs of steps that already succeeded stay on disk when a later step fails.
    pub fn run(mut self) -> PipelineOutcome {
        let steps: Vec<StepDescriptor> = self.plan.steps.iter().map(|s| s.step.clone()).collect();
        let total = steps.len();

        for (position, step) in steps.iter().enumerate() {
            let name = step.name().to_string();
            if !self.executed.insert(name.clone()) {
                let error = Error::internal_unexpected(format!("Step '{}' scheduled twice", name));
                return self.fail(name, error.into());
            }
            self.state = RunState::Running(name.clone());
            log_status!("run", "[{}/{}] {}", position + 1, total, name);

            let invocation = match self.invocation_for(step) {
                Ok(invocation) => invocation,
                Err(error) => return self.fail(name, error.into()),
            };

            match self.executor.execute(&invocation) {
                Ok(result) => {
                    log_status!("run", "{} finished in {} ms", name, result.duration_ms);
                    self.completed.push(result);
                }
                Err(failure) => return self.fail(name, failure),
            }
        }

        match self.terminal_artifact() {
            Some(artifact) => {
                self.state = RunState::Succeeded;
                log_status!("run", "Pipeline succeeded: {}", artifact.display());
                PipelineOutcome::Succeeded {
                    artifact,
                    steps: std::mem::take(&mut self.completed),
                }
            }
            None => {
                let terminal = self.plan.terminal.clone();
                let error = Error::unknown_reference(
                    &terminal,
                    OutputRef::primary(&terminal).token(),
                    format!("Terminal step '{}' did not run", terminal),
                );
                self.fail(terminal, error.into())
            }
        }
    }

    fn fail(&mut self, step: String, failure: StepFailure) -> PipelineOutcome {
        self.state = RunState::Failed;
        log_status!("run", "{} failed: {}", step, failure.error.message);
        PipelineOutcome::Failed {
            step,
            error: failure.error,
            result: failure.result,
            completed: std::mem::take(&mut self.completed),
        }
    }

    fn terminal_artifact(&self) -> Option<PathBuf> {
        self.completed
            .iter()
            .find(|r| r.step == self.plan.terminal)
            .and_then(|r| r.output_path(0))
            .cloned()
    }

    fn lookup(&self, reference: &OutputRef) -> Option<String> {
        self.completed
            .iter()
            .find(|r| r.step == reference.step)
            .and_then(|r| r.output_path(reference.index))
            .map(|p| p.display().to_string())
    }

    fn render(&self, step: &StepDescriptor, text: &str) -> Result<String> {
        template::render_output_refs(text, |r| self.lookup(r)).map_err(|missing| {
            Error::unknown_reference(
                step.name(),
                missing.token(),
                format!("Step '{}' has not produced its outputs yet", missing.step),
            )
        })
    }

    /// Substitute output references and resolve every path for `step`.
    fn invocation_for(&self, step: &StepDescriptor) -> Result<Invocation> {
        let base = self.plan.base_dir.as_path();

        let args = step
            .args()
            .iter()
            .map(|arg| self.render(step, arg))
            .collect::<Result<Vec<_>>>()?;

        let mut inputs = Vec::with_capacity(step.inputs().len());
        for input in step.inputs() {
            let path = match input {
                StepInput::Path(path) => {
                    let rendered = self.render(step, &path.to_string_lossy())?;
                    step.resolve_path(base, Path::new(&rendered))
                }
                StepInput::Output(reference) => {
                    let rendered = self.render(step, &reference.token())?;
                    PathBuf::from(rendered)
                }
            };
            inputs.push(path);
        }

        let stdin = match step.stdin() {
            Some(StdinSource::File(path)) => {
                let rendered = self.render(step, &path.to_string_lossy())?;
                Some(StdinSource::File(step.resolve_path(base, Path::new(&rendered))))
            }
            Some(StdinSource::Text(text)) => Some(StdinSource::Text(self.render(step, text)?)),
            None => None,
        };

        let env = step
            .env()
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.render(step, value)?)))
            .collect::<Result<_>>()?;

        Ok(Invocation {
            step: step.name().to_string(),
            program: step.program().to_string(),
            args,
            inputs,
            outputs: step
                .outputs()
                .iter()
                .map(|o| step.resolve_path(base, o))
                .collect(),
            working_dir: step.resolve_working_dir(base),
            stdin,
            stdout: step.stdout().map(|p| step.resolve_path(base, p)),
            env,
        })
    }
}
