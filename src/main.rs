use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{check, msi, plan, run};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "pipewright")]
#[command(version = VERSION)]
#[command(about = "Run pipelines of external tools in dependency order")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a pipeline file and print the execution order
    Plan(plan::PlanArgs),
    /// Run a pipeline file, stopping at the first failing step
    Run(run::RunArgs),
    /// Report which step programs resolve on PATH
    Check(check::CheckArgs),
    /// Build a Windows Installer with msitools
    Msi(msi::MsiArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let (json_result, exit_code) = commands::run_json(cli.command);
    if let Err(err) = output::print_json_result(json_result) {
        pipewright::log_status!("pipewright", "{}", err);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
