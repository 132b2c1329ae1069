//! Process execution for pipeline steps.
//!
//! Every step is a direct exec of `program` with an explicit argv. There is no
//! shell in between, so pipes and redirects are expressed on the step instead:
//! `stdin` feeds a file or literal text, `stdout` writes to a file.
//!
//! Redirected stdout goes to a sibling `.partial` file that only replaces the
//! declared path after a zero exit. A failed step leaves the previous file
//! untouched, and a step may read the same path it writes.
//!
//! A child is owned by a `ChildGuard` from spawn until it has been reaped. If
//! anything between those points fails or unwinds, the guard sends SIGTERM,
//! waits briefly, then kills and reaps. On Linux the child also gets
//! PR_SET_PDEATHSIG so it is torn down if the host dies without unwinding.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, ProcessFailedDetails};
use crate::step::StdinSource;
use crate::utils::command::{self, CapturedOutput};
use crate::utils::io as fs_io;

const TERMINATE_GRACE: Duration = Duration::from_millis(200);

/// A step with every path made concrete and every output reference substituted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invocation {
    pub step: String,
    pub program: String,
    pub args: Vec<String>,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub working_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin: Option<StdinSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<PathBuf>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedOutput {
    pub path: PathBuf,
    pub size: u64,
    /// Absent for directories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub step: String,
    pub program: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub success: bool,
    #[serde(flatten)]
    pub output: CapturedOutput,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<ObservedOutput>,
}

impl ExecutionResult {
    /// Path of the `index`-th declared output as observed after the run.
    pub fn output_path(&self, index: usize) -> Option<&PathBuf> {
        self.outputs.get(index).map(|o| &o.path)
    }
}

/// Why a step did not complete. `result` is present when a process actually ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepFailure {
    pub error: Error,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
}

impl StepFailure {
    pub fn before_spawn(error: Error) -> Self {
        Self {
            error,
            result: None,
        }
    }

    pub fn after_run(error: Error, result: ExecutionResult) -> Self {
        Self {
            error,
            result: Some(result),
        }
    }
}

impl From<Error> for StepFailure {
    fn from(error: Error) -> Self {
        Self::before_spawn(error)
    }
}

pub trait StepExecutor: Send + Sync {
    /// Run one step. Spawns at most one process and never retries.
    fn execute(&self, invocation: &Invocation) -> Result<ExecutionResult, StepFailure>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl StepExecutor for ProcessExecutor {
    fn execute(&self, inv: &Invocation) -> Result<ExecutionResult, StepFailure> {
        check_inputs(inv)?;
        for path in inv.outputs.iter().chain(inv.stdout.iter()) {
            fs_io::ensure_parent_dir(path, &format!("prepare output for step '{}'", inv.step))?;
        }

        let staged = inv.stdout.as_deref().map(StagedStdout::new);
        let (mut cmd, stdin_text) = build_command(inv, staged.as_ref())?;

        log_status!(
            "exec",
            "{}: {}",
            inv.step,
            command::display_command_line(&inv.program, &inv.args)
        );

        let started_at = Utc::now();
        let clock = Instant::now();

        let child = cmd
            .spawn()
            .map_err(|e| Error::spawn_failed(&inv.step, &inv.program, &e))?;
        let guard = ChildGuard::new(child);
        let (status, output) = guard.collect(stdin_text, &inv.step)?;

        let mut result = ExecutionResult {
            step: inv.step.clone(),
            program: inv.program.clone(),
            args: inv.args.clone(),
            exit_code: status.code(),
            success: status.success(),
            output,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            outputs: Vec::new(),
        };

        if !status.success() {
            let error = Error::non_zero_exit(failure_details(&result, Vec::new()));
            return Err(StepFailure::after_run(error, result));
        }
        if let Some(staged) = staged {
            staged.commit(&inv.step)?;
        }

        let missing: Vec<String> = inv
            .outputs
            .iter()
            .filter(|path| !path.exists())
            .map(|path| path.display().to_string())
            .collect();
        if !missing.is_empty() {
            result.success = false;
            let error = Error::output_not_produced(failure_details(&result, missing));
            return Err(StepFailure::after_run(error, result));
        }

        result.outputs = observe_outputs(inv)?;
        Ok(result)
    }
}

fn check_inputs(inv: &Invocation) -> Result<(), StepFailure> {
    let stdin_file = match &inv.stdin {
        Some(StdinSource::File(path)) => Some(path),
        _ => None,
    };
    if let Some(missing) = inv.inputs.iter().chain(stdin_file).find(|p| !p.exists()) {
        return Err(Error::missing_input(&inv.step, missing.display().to_string()).into());
    }
    if !inv.working_dir.is_dir() {
        return Err(Error::missing_input(&inv.step, inv.working_dir.display().to_string())
            .with_hint("The step's working directory must exist before it runs")
            .into());
    }
    Ok(())
}

fn build_command(
    inv: &Invocation,
    staged: Option<&StagedStdout>,
) -> Result<(Command, Option<Vec<u8>>), StepFailure> {
    let mut cmd = Command::new(&inv.program);
    cmd.args(&inv.args)
        .current_dir(&inv.working_dir)
        .envs(&inv.env)
        .stderr(Stdio::piped());

    let mut stdin_text = None;
    match &inv.stdin {
        Some(StdinSource::File(path)) => {
            let file = File::open(path)
                .map_err(|_| Error::missing_input(&inv.step, path.display().to_string()))?;
            cmd.stdin(Stdio::from(file));
        }
        Some(StdinSource::Text(text)) => {
            cmd.stdin(Stdio::piped());
            stdin_text = Some(text.clone().into_bytes());
        }
        None => {
            cmd.stdin(Stdio::null());
        }
    }

    match staged {
        Some(staged) => {
            let file = File::create(&staged.partial).map_err(|e| {
                Error::internal_io(
                    e.to_string(),
                    Some(format!("open stdout file {}", staged.partial.display())),
                )
            })?;
            cmd.stdout(Stdio::from(file));
        }
        None => {
            cmd.stdout(Stdio::piped());
        }
    }

    #[cfg(target_os = "linux")]
    set_parent_death_signal(&mut cmd);

    Ok((cmd, stdin_text))
}

#[cfg(target_os = "linux")]
fn set_parent_death_signal(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;

    // SAFETY: prctl is async-signal-safe and the closure touches no shared state.
    unsafe {
        cmd.pre_exec(|| {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

fn failure_details(result: &ExecutionResult, missing: Vec<String>) -> ProcessFailedDetails {
    ProcessFailedDetails {
        step: result.step.clone(),
        program: result.program.clone(),
        exit_code: result.exit_code,
        stdout: result.output.stdout.clone(),
        stderr: result.output.stderr.clone(),
        missing,
    }
}

fn observe_outputs(inv: &Invocation) -> Result<Vec<ObservedOutput>, StepFailure> {
    let context = format!("observe outputs of step '{}'", inv.step);
    let mut observed = Vec::with_capacity(inv.outputs.len());
    for path in &inv.outputs {
        if path.is_dir() {
            observed.push(ObservedOutput {
                path: path.clone(),
                size: 0,
                sha256: None,
            });
            continue;
        }
        let (size, sha256) = fs_io::file_digest(path, &context)?;
        observed.push(ObservedOutput {
            path: path.clone(),
            size,
            sha256: Some(sha256),
        });
    }
    Ok(observed)
}

/// Stdout destination that is only moved onto `target` by [`StagedStdout::commit`].
///
/// Dropping it uncommitted removes the partial file.
struct StagedStdout {
    target: PathBuf,
    partial: PathBuf,
    committed: bool,
}

impl StagedStdout {
    fn new(target: &Path) -> Self {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "stdout".to_string());
        Self {
            target: target.to_path_buf(),
            partial: target.with_file_name(format!(".{}.{}.partial", name, std::process::id())),
            committed: false,
        }
    }

    fn commit(mut self, step: &str) -> Result<(), StepFailure> {
        fs::rename(&self.partial, &self.target).map_err(|e| {
            Error::internal_io(
                e.to_string(),
                Some(format!(
                    "move stdout of step '{}' to {}",
                    step,
                    self.target.display()
                )),
            )
        })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedStdout {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.partial);
        }
    }
}

/// Owns a child until it has been reaped.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    /// Feed stdin, drain stdout/stderr on helper threads, wait for exit.
    fn collect(
        mut self,
        stdin_text: Option<Vec<u8>>,
        step: &str,
    ) -> Result<(ExitStatus, CapturedOutput), StepFailure> {
        let writer = match (self.child.stdin.take(), stdin_text) {
            (Some(mut stdin), Some(bytes)) => Some(thread::spawn(move || {
                match stdin.write_all(&bytes) {
                    // The child may exit without reading all of its input.
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                    other => other,
                }
            })),
            _ => None,
        };
        let stdout_reader = self.child.stdout.take().map(spawn_reader);
        let stderr_reader = self.child.stderr.take().map(spawn_reader);

        let status = self.child.wait().map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("wait for step '{}'", step)))
        })?;
        self.reaped = true;

        if let Some(writer) = writer {
            join_io(writer, step, "write stdin")?;
        }
        let stdout = match stdout_reader {
            Some(reader) => join_io(reader, step, "read stdout")?,
            None => Vec::new(),
        };
        let stderr = match stderr_reader {
            Some(reader) => join_io(reader, step, "read stderr")?,
            None => Vec::new(),
        };

        Ok((status, CapturedOutput::from_bytes(&stdout, &stderr)))
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        terminate(&mut self.child);
        let _ = self.child.wait();
    }
}

fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        // SAFETY: the pid belongs to a child we have not reaped yet.
        unsafe {
            libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
        }
        thread::sleep(TERMINATE_GRACE);
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
    }
    let _ = child.kill();
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn join_io<T>(handle: JoinHandle<io::Result<T>>, step: &str, what: &str) -> Result<T, StepFailure> {
    let context = Some(format!("{} for step '{}'", what, step));
    match handle.join() {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Error::internal_io(e.to_string(), context).into()),
        Err(_) => Err(Error::internal_unexpected(format!("{} thread panicked", what)).into()),
    }
}
