//! Pipeline engine: resolve steps into an order, then run them one at a time.
//!
//! - `resolver` - dependency edges, topological order, cycle reporting
//! - `executor` - spawning one external process per step
//! - `pipeline` - the fail-fast runner and its outcome
//!
//! [`plan`] and [`run`] are the entry points. Resolution problems come back as
//! `Err` before anything is spawned; once execution starts, step failures are
//! reported inside the returned [`PipelineOutcome`].

pub mod executor;
pub mod pipeline;
pub mod resolver;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::step::StepDescriptor;

pub use executor::{ExecutionResult, Invocation, ObservedOutput, ProcessExecutor, StepExecutor, StepFailure};
pub use pipeline::{PipelineOutcome, PipelineRunner, RunState};
pub use resolver::{PlannedStep, ResolvedPlan};

/// Resolve `steps` into an ordered plan ending at `terminal`. Spawns nothing.
pub fn plan(steps: &[StepDescriptor], terminal: &str, base_dir: &Path) -> Result<ResolvedPlan> {
    let base_dir = absolute_base(base_dir)?;
    let plan = resolver::resolve(steps, terminal, &base_dir)?;
    for warning in &plan.warnings {
        log_status!("plan", "{}", warning);
    }
    Ok(plan)
}

/// Resolve and run `steps` with real processes.
pub fn run(steps: &[StepDescriptor], terminal: &str, base_dir: &Path) -> Result<PipelineOutcome> {
    run_with(steps, terminal, base_dir, Arc::new(ProcessExecutor::new()))
}

/// Resolve and run `steps` through a caller-supplied executor.
pub fn run_with(
    steps: &[StepDescriptor],
    terminal: &str,
    base_dir: &Path,
    executor: Arc<dyn StepExecutor>,
) -> Result<PipelineOutcome> {
    let plan = plan(steps, terminal, base_dir)?;
    Ok(PipelineRunner::new(plan, executor).run())
}

/// Substituted output paths are handed to children that may run in other
/// directories, so the base must not be relative.
fn absolute_base(base_dir: &Path) -> Result<PathBuf> {
    std::path::absolute(base_dir)
        .map(|p| crate::step::normalize(&p))
        .map_err(|e| {
            Error::internal_io(
                e.to_string(),
                Some(format!("resolve base directory {}", base_dir.display())),
            )
        })
}
