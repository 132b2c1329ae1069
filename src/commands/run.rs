use clap::Args;
use serde::Serialize;

use pipewright::engine::{self, PipelineOutcome};
use pipewright::preflight;

use super::{CmdResult, PipelineArgs};

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Skip the PATH check for step programs
    #[arg(long)]
    no_preflight: bool,
}

#[derive(Serialize)]
#[serde(tag = "command")]
pub enum RunOutput {
    #[serde(rename = "pipeline.run")]
    Run {
        fingerprint: String,
        outcome: PipelineOutcome,
    },
}

pub fn run(args: RunArgs) -> CmdResult<RunOutput> {
    let loaded = args.pipeline.load()?;
    if !args.no_preflight {
        preflight::require_programs(&loaded.steps)?;
    }

    let outcome = engine::run(&loaded.steps, &loaded.terminal, &loaded.base_dir)?;
    Ok(outcome_output(outcome))
}

/// Failed runs still print the outcome; the exit code carries the failure.
pub(crate) fn outcome_output(outcome: PipelineOutcome) -> (RunOutput, i32) {
    let exit_code = outcome
        .error()
        .map(|e| crate::output::exit_code_for_error(e.code))
        .unwrap_or(0);
    let output = RunOutput::Run {
        fingerprint: outcome.fingerprint(),
        outcome,
    };
    (output, exit_code)
}
