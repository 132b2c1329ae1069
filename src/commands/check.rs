use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use pipewright::preflight;
use pipewright::ErrorCode;

use super::{CmdResult, PipelineArgs};

#[derive(Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Serialize)]
pub struct ProgramStatus {
    pub step: String,
    pub program: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<PathBuf>,
}

#[derive(Serialize)]
#[serde(tag = "command")]
pub enum CheckOutput {
    #[serde(rename = "pipeline.check")]
    Check {
        programs: Vec<ProgramStatus>,
        missing: Vec<String>,
    },
}

pub fn run(args: CheckArgs) -> CmdResult<CheckOutput> {
    let loaded = args.pipeline.load()?;

    let programs = loaded
        .steps
        .iter()
        .map(|step| ProgramStatus {
            step: step.name().to_string(),
            program: step.program().to_string(),
            resolved: preflight::find_program(step.program()),
        })
        .collect();
    let missing = preflight::missing_programs(&loaded.steps);
    let exit_code = if missing.is_empty() {
        0
    } else {
        crate::output::exit_code_for_error(ErrorCode::ToolNotFound)
    };

    Ok((CheckOutput::Check { programs, missing }, exit_code))
}
