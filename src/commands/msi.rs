use std::path::{Path, PathBuf};

use clap::Args;
use serde::Serialize;

use pipewright::engine::{PipelineOutcome, ResolvedPlan};
use pipewright::msi::MsiConfig;
use pipewright::utils::validation;

use super::run::{outcome_output, RunOutput};
use super::CmdResult;

const ENV_WXS_PATH: &str = "MSI_WXS_PATH";
const ENV_OUT_PATH: &str = "MSI_OUT_PATH";
const ENV_ARCHITECTURE: &str = "MSI_ARCHITECTURE";

#[derive(Args)]
pub struct MsiArgs {
    /// MSI config file with fragments and defines (.json, .toml, .yaml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Main .wxs source [env: MSI_WXS_PATH]
    #[arg(long, value_name = "PATH")]
    wxs: Option<String>,

    /// Where to write the .msi [env: MSI_OUT_PATH]
    #[arg(long, value_name = "PATH")]
    output: Option<String>,

    /// Target architecture passed to wixl --arch [env: MSI_ARCHITECTURE]
    #[arg(long, value_name = "ARCH")]
    arch: Option<String>,

    /// Preprocessor define, repeatable
    #[arg(short = 'D', long = "define", value_name = "KEY=VALUE")]
    defines: Vec<String>,

    /// Directory paths are resolved against (defaults to the config file's directory)
    #[arg(long, value_name = "DIR")]
    base_dir: Option<PathBuf>,

    /// Print the steps instead of running them
    #[arg(long)]
    plan: bool,
}

#[derive(Serialize)]
#[serde(tag = "command")]
pub enum MsiOutput {
    #[serde(rename = "msi.plan")]
    Plan { plan: ResolvedPlan },
    #[serde(rename = "msi.run")]
    Run {
        fingerprint: String,
        outcome: PipelineOutcome,
    },
}

pub fn run(args: MsiArgs) -> CmdResult<MsiOutput> {
    let config = merged_config(&args, |key| std::env::var(key).ok())?;
    let base_dir = args.base_dir.clone().unwrap_or_else(|| {
        args.config
            .as_deref()
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    });

    if args.plan {
        let plan = config.plan(&base_dir)?;
        return Ok((MsiOutput::Plan { plan }, 0));
    }

    let (RunOutput::Run { fingerprint, outcome }, exit_code) = outcome_output(config.run(&base_dir)?);
    Ok((MsiOutput::Run { fingerprint, outcome }, exit_code))
}

/// Flags win over the config file, which wins over `MSI_*` variables.
fn merged_config<F>(args: &MsiArgs, env: F) -> pipewright::Result<MsiConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match &args.config {
        Some(path) => MsiConfig::load(path)?,
        None => MsiConfig::default(),
    };

    if let Some(wxs) = &args.wxs {
        config.wxs_path = wxs.clone();
    } else if config.wxs_path.trim().is_empty() {
        config.wxs_path = env(ENV_WXS_PATH).unwrap_or_default();
    }
    config.output = args.output.clone().or(config.output).or_else(|| env(ENV_OUT_PATH));
    config.architecture = args
        .arch
        .clone()
        .or(config.architecture)
        .or_else(|| env(ENV_ARCHITECTURE));

    for pair in &args.defines {
        let (key, value) = validation::parse_key_value(pair, "define")?;
        config.defines.insert(key, value);
    }

    Ok(config)
}
