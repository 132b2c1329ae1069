//! Captured process output primitives.

use serde::Serialize;

use crate::utils::shell;

/// Captured output from one child process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapturedOutput {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

impl CapturedOutput {
    pub fn from_bytes(stdout: &[u8], stderr: &[u8]) -> Self {
        Self {
            stdout: String::from_utf8_lossy(stdout).to_string(),
            stderr: String::from_utf8_lossy(stderr).to_string(),
        }
    }
}

/// Human-readable command line for logs and plans. Never executed.
pub fn display_command_line(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        return shell::quote_arg(program);
    }
    format!("{} {}", shell::quote_arg(program), shell::quote_args(args))
}
