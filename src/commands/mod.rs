use std::path::PathBuf;

use clap::Args;

use pipewright::config::{self, LoadedPipeline};
use pipewright::step::StepDescriptor;

pub type CmdResult<T> = pipewright::Result<(T, i32)>;

pub mod check;
pub mod msi;
pub mod plan;
pub mod run;

/// Arguments shared by commands that read a pipeline file.
#[derive(Args, Debug)]
pub struct PipelineArgs {
    /// Pipeline file (.json, .toml, .yaml or .yml)
    pub file: PathBuf,

    /// Override the terminal step declared in the file
    #[arg(long)]
    pub terminal: Option<String>,
}

pub(crate) struct LoadedSteps {
    pub steps: Vec<StepDescriptor>,
    pub terminal: String,
    pub base_dir: PathBuf,
}

impl PipelineArgs {
    pub(crate) fn load(&self) -> pipewright::Result<LoadedSteps> {
        let loaded: LoadedPipeline = config::load(&self.file)?;
        let steps = loaded.steps()?;
        let terminal = self
            .terminal
            .clone()
            .unwrap_or_else(|| loaded.terminal().to_string());
        Ok(LoadedSteps {
            steps,
            terminal,
            base_dir: loaded.base_dir,
        })
    }
}

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args))
    };
}

pub(crate) fn run_json(command: crate::Commands) -> (pipewright::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Plan(args) => dispatch!(args, plan),
        crate::Commands::Run(args) => dispatch!(args, run),
        crate::Commands::Check(args) => dispatch!(args, check),
        crate::Commands::Msi(args) => dispatch!(args, msi),
    }
}
