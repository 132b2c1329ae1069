use clap::Args;
use serde::Serialize;

use pipewright::engine::{self, ResolvedPlan};

use super::{CmdResult, PipelineArgs};

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Serialize)]
#[serde(tag = "command")]
pub enum PlanOutput {
    #[serde(rename = "pipeline.plan")]
    Plan { plan: ResolvedPlan },
}

pub fn run(args: PlanArgs) -> CmdResult<PlanOutput> {
    let loaded = args.pipeline.load()?;
    let plan = engine::plan(&loaded.steps, &loaded.terminal, &loaded.base_dir)?;
    Ok((PlanOutput::Plan { plan }, 0))
}
