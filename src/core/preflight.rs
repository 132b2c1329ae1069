//! Locate step programs on `PATH` before anything is spawned.

use std::collections::BTreeSet;
use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::step::StepDescriptor;

/// Resolve `program` the way a direct exec would.
///
/// Names containing a path separator are checked as given; bare names are
/// looked up in each `PATH` entry.
pub fn find_program(program: &str) -> Option<PathBuf> {
    find_program_in(program, env::var_os("PATH").as_deref())
}

pub fn find_program_in(program: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return with_extensions(candidate).into_iter().find(|p| is_executable(p));
    }
    let path_var = path_var?;
    env::split_paths(path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .flat_map(|dir| with_extensions(&dir.join(program)))
        .find(|p| is_executable(p))
}

/// Programs in `steps` that do not resolve, in declaration order, deduplicated.
pub fn missing_programs(steps: &[StepDescriptor]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    steps
        .iter()
        .map(StepDescriptor::program)
        .filter(|program| seen.insert(program.to_string()))
        .filter(|program| find_program(program).is_none())
        .map(str::to_string)
        .collect()
}

/// Fail with `tool.not_found` when any step program is missing.
pub fn require_programs(steps: &[StepDescriptor]) -> Result<()> {
    let missing = missing_programs(steps);
    if missing.is_empty() {
        return Ok(());
    }
    log_status!("preflight", "Missing programs: {}", missing.join(", "));
    let mut error = Error::tool_not_found(missing.clone());
    if missing.iter().any(|p| p == "wixl" || p == "wixl-heat") {
        error = error.with_hint("Install msitools (provides wixl and wixl-heat)");
    }
    Err(error)
}

#[cfg(windows)]
fn with_extensions(path: &Path) -> Vec<PathBuf> {
    if path.extension().is_some() {
        return vec![path.to_path_buf()];
    }
    let exts = env::var("PATHEXT").unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".to_string());
    let mut candidates = vec![path.to_path_buf()];
    candidates.extend(
        exts.split(';')
            .filter(|e| !e.is_empty())
            .map(|ext| path.with_extension(ext.trim_start_matches('.'))),
    );
    candidates
}

#[cfg(not(windows))]
fn with_extensions(path: &Path) -> Vec<PathBuf> {
    vec![path.to_path_buf()]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn finds_executable_on_path() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_script(dir.path(), "wixl", 0o755);
        let path_var = env::join_paths([PathBuf::from("/nonexistent"), dir.path().to_path_buf()]).unwrap();

        assert_eq!(find_program_in("wixl", Some(&path_var)), Some(tool));
    }

    #[test]
    fn skips_files_without_exec_bit() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "wixl", 0o644);
        let path_var = dir.path().as_os_str().to_os_string();

        assert_eq!(find_program_in("wixl", Some(&path_var)), None);
    }

    #[test]
    fn explicit_paths_bypass_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_script(dir.path(), "tool", 0o755);
        let program = tool.to_string_lossy().to_string();

        assert_eq!(find_program_in(&program, None), Some(tool));
    }

    #[test]
    fn missing_programs_keeps_declaration_order() {
        let steps = vec![
            StepDescriptor::builder("a", "pipewright-missing-b").build().unwrap(),
            StepDescriptor::builder("b", "sh").build().unwrap(),
            StepDescriptor::builder("c", "pipewright-missing-a").build().unwrap(),
            StepDescriptor::builder("d", "pipewright-missing-b").build().unwrap(),
        ];
        assert_eq!(
            missing_programs(&steps),
            ["pipewright-missing-b", "pipewright-missing-a"]
        );
    }

    #[test]
    fn require_programs_hints_msitools() {
        let steps = vec![StepDescriptor::builder("package", "/nonexistent/wixl")
            .build()
            .unwrap()];
        let err = require_programs(&steps).unwrap_err();
        assert_eq!(err.code, ErrorCode::ToolNotFound);
        assert!(err.hints.is_empty());

        let steps = vec![StepDescriptor::builder("package", "wixl").build().unwrap()];
        if find_program("wixl").is_none() {
            let err = require_programs(&steps).unwrap_err();
            assert_eq!(err.details["programs"][0], "wixl");
            assert_eq!(err.hints.len(), 1);
        }
    }
}
