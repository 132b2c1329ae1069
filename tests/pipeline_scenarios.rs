#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pipewright::engine::{self, ExecutionResult, Invocation, ProcessExecutor, StepExecutor, StepFailure};
use pipewright::{ErrorCode, PipelineOutcome, StdinSource, StepDescriptor};

/// Delegates to real processes and counts spawn attempts.
#[derive(Default)]
struct CountingExecutor {
    spawned: AtomicUsize,
    inner: ProcessExecutor,
}

impl StepExecutor for CountingExecutor {
    fn execute(&self, inv: &Invocation) -> Result<ExecutionResult, StepFailure> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(inv)
    }
}

fn echo_then_cat() -> Vec<StepDescriptor> {
    vec![
        StepDescriptor::builder("b", "cat")
            .arg("{{outputs.a}}")
            .input_from("a")
            .stdout_to("final.txt")
            .output("final.txt")
            .build()
            .unwrap(),
        StepDescriptor::builder("a", "echo")
            .arg("hello")
            .stdout_to("a.txt")
            .output("a.txt")
            .build()
            .unwrap(),
    ]
}

#[test]
fn echo_then_cat_produces_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = engine::run(&echo_then_cat(), "b", dir.path()).unwrap();

    let artifact = outcome.artifact().expect("pipeline should succeed").to_path_buf();
    assert!(artifact.ends_with("final.txt"));
    assert_eq!(fs::read_to_string(&artifact).unwrap(), "hello\n");

    let order: Vec<&str> = outcome.completed().iter().map(|r| r.step.as_str()).collect();
    assert_eq!(order, ["a", "b"]);
    assert!(outcome.completed().iter().all(|r| r.exit_code == Some(0)));
    assert!(outcome.completed()[1].args[0].ends_with("a.txt"));
}

#[test]
fn missing_program_fails_with_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let steps = vec![StepDescriptor::builder("a", "pipewright-no-such-program")
        .output("a.txt")
        .build()
        .unwrap()];

    let outcome = engine::run(&steps, "a", dir.path()).unwrap();
    match outcome {
        PipelineOutcome::Failed {
            step,
            error,
            completed,
            ..
        } => {
            assert_eq!(step, "a");
            assert_eq!(error.code, ErrorCode::StepSpawnFailed);
            assert_eq!(error.step(), Some("a"));
            assert!(completed.is_empty());
        }
        other => panic!("expected spawn failure, got {:?}", other),
    }
}

#[test]
fn cycle_fails_before_execution() {
    let dir = tempfile::tempdir().unwrap();
    let steps = vec![
        StepDescriptor::builder("a", "cat")
            .input_from("b")
            .output("a.txt")
            .build()
            .unwrap(),
        StepDescriptor::builder("b", "cat")
            .input_from("a")
            .output("b.txt")
            .build()
            .unwrap(),
    ];
    let executor = Arc::new(CountingExecutor::default());

    let err = engine::run_with(&steps, "b", dir.path(), executor.clone()).unwrap_err();
    assert_eq!(err.code, ErrorCode::PlanCycleDetected);
    assert_eq!(err.details["steps"], serde_json::json!(["a", "b"]));
    assert_eq!(executor.spawned.load(Ordering::SeqCst), 0);
}

#[test]
fn failed_dependency_is_not_followed() {
    let dir = tempfile::tempdir().unwrap();
    let steps = vec![
        StepDescriptor::builder("a", "sh")
            .args(["-c", "echo broken >&2; exit 2"])
            .output("a.txt")
            .build()
            .unwrap(),
        StepDescriptor::builder("b", "cat")
            .arg("{{outputs.a}}")
            .stdout_to("b.txt")
            .output("b.txt")
            .build()
            .unwrap(),
    ];
    let executor = Arc::new(CountingExecutor::default());

    let outcome = engine::run_with(&steps, "b", dir.path(), executor.clone()).unwrap();
    assert_eq!(executor.spawned.load(Ordering::SeqCst), 1);

    let error = outcome.error().unwrap();
    assert_eq!(error.code, ErrorCode::StepNonZeroExit);
    assert_eq!(error.details["stderr"], "broken\n");
    assert!(!dir.path().join("b.txt").exists());
}

#[test]
fn unproduced_output_halts_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let steps = vec![
        StepDescriptor::builder("a", "true")
            .output("never.txt")
            .build()
            .unwrap(),
        StepDescriptor::builder("b", "cat")
            .input_from("a")
            .stdout_to("b.txt")
            .output("b.txt")
            .build()
            .unwrap(),
    ];
    let executor = Arc::new(CountingExecutor::default());

    let outcome = engine::run_with(&steps, "b", dir.path(), executor.clone()).unwrap();
    assert_eq!(executor.spawned.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.error().unwrap().code, ErrorCode::StepOutputNotProduced);
    assert_eq!(outcome.error().unwrap().step(), Some("a"));
}

#[test]
fn stdin_text_feeds_tool() {
    let dir = tempfile::tempdir().unwrap();
    let steps = vec![
        StepDescriptor::builder("list", "echo")
            .arg("first")
            .stdout_to("list.txt")
            .output("list.txt")
            .build()
            .unwrap(),
        StepDescriptor::builder("sorted", "sort")
            .env("LC_ALL", "C")
            .stdin(StdinSource::Text("{{outputs.list}}\nb\na\n".to_string()))
            .stdout_to("sorted.txt")
            .output("sorted.txt")
            .build()
            .unwrap(),
    ];

    let outcome = engine::run(&steps, "sorted", dir.path()).unwrap();
    let sorted = fs::read_to_string(outcome.artifact().unwrap()).unwrap();
    let lines: Vec<&str> = sorted.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("list.txt"));
    assert_eq!(&lines[1..], ["a", "b"]);
}

#[test]
fn repeated_runs_fingerprint_identically() {
    let dir = tempfile::tempdir().unwrap();
    let first = engine::run(&echo_then_cat(), "b", dir.path()).unwrap();
    let second = engine::run(&echo_then_cat(), "b", dir.path()).unwrap();

    assert!(first.is_success());
    assert_eq!(first.fingerprint(), second.fingerprint());
    assert_eq!(
        first.completed()[1].outputs[0].sha256,
        second.completed()[1].outputs[0].sha256
    );
}

#[test]
fn plan_is_relative_to_base_dir() {
    let dir = tempfile::tempdir().unwrap();
    let plan = engine::plan(&echo_then_cat(), "b", dir.path()).unwrap();

    assert_eq!(plan.order(), ["a", "b"]);
    assert_eq!(plan.warnings, ["Steps reordered based on dependencies"]);
    assert_eq!(plan.terminal_step().map(|s| s.name()), Some("b"));
    assert!(!Path::new(&plan.base_dir).join("a.txt").exists());
}

#[test]
fn env_reference_orders_and_feeds_consumer() {
    let dir = tempfile::tempdir().unwrap();
    let steps = vec![
        StepDescriptor::builder("b", "sh")
            .args(["-c", "cat \"$SRC\""])
            .env("SRC", "{{outputs.a}}")
            .stdout_to("b.txt")
            .output("b.txt")
            .build()
            .unwrap(),
        StepDescriptor::builder("a", "echo")
            .arg("from env")
            .stdout_to("a.txt")
            .output("a.txt")
            .build()
            .unwrap(),
    ];

    let outcome = engine::run(&steps, "b", dir.path()).unwrap();
    let order: Vec<&str> = outcome.completed().iter().map(|r| r.step.as_str()).collect();
    assert_eq!(order, ["a", "b"]);
    assert_eq!(fs::read_to_string(outcome.artifact().unwrap()).unwrap(), "from env\n");
}

#[test]
fn unknown_env_reference_spawns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let steps = vec![
        StepDescriptor::builder("a", "echo")
            .stdout_to("a.txt")
            .output("a.txt")
            .build()
            .unwrap(),
        StepDescriptor::builder("b", "cat")
            .env("SRC", "{{outputs.ghost}}")
            .output("b.txt")
            .build()
            .unwrap(),
    ];
    let executor = Arc::new(CountingExecutor::default());

    let err = engine::run_with(&steps, "b", dir.path(), executor.clone()).unwrap_err();
    assert_eq!(err.code, ErrorCode::PlanUnknownReference);
    assert_eq!(executor.spawned.load(Ordering::SeqCst), 0);
}

#[test]
fn spawn_failure_leaves_no_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let steps = vec![StepDescriptor::builder("heat", "pipewright-no-such-program")
        .stdout_to("a.wxs")
        .output("a.wxs")
        .build()
        .unwrap()];

    let outcome = engine::run(&steps, "heat", dir.path()).unwrap();
    assert_eq!(outcome.error().unwrap().code, ErrorCode::StepSpawnFailed);
    assert!(!dir.path().join("a.wxs").exists());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}
