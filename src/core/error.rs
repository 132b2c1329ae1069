use serde::{Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseFailed,
    ConfigInvalidValue,

    ValidationInvalidArgument,

    StepInvalid,
    StepMissingInput,
    StepSpawnFailed,
    StepNonZeroExit,
    StepOutputNotProduced,

    PlanUnknownReference,
    PlanCycleDetected,

    ToolNotFound,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigParseFailed => "config.parse_failed",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::StepInvalid => "step.invalid",
            ErrorCode::StepMissingInput => "step.missing_input",
            ErrorCode::StepSpawnFailed => "step.spawn_failed",
            ErrorCode::StepNonZeroExit => "step.non_zero_exit",
            ErrorCode::StepOutputNotProduced => "step.output_not_produced",

            ErrorCode::PlanUnknownReference => "plan.unknown_reference",
            ErrorCode::PlanCycleDetected => "plan.cycle_detected",

            ErrorCode::ToolNotFound => "tool.not_found",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }

    /// Resolution-time codes: raised before any process is spawned.
    pub fn is_plan_error(&self) -> bool {
        matches!(
            self,
            ErrorCode::StepInvalid
                | ErrorCode::PlanUnknownReference
                | ErrorCode::PlanCycleDetected
        )
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigParseFailedDetails {
    pub path: String,
    pub format: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<Hint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.step() {
            Some(step) => write!(f, "{} (step '{}')", self.message, step),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidStepDetails {
    pub step: String,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnknownReferenceDetails {
    pub step: String,
    pub reference: String,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleDetectedDetails {
    pub steps: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingInputDetails {
    pub step: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnFailedDetails {
    pub step: String,
    pub program: String,
    pub kind: String,
    pub error: String,
}

/// Captured diagnostics of a process that ran but did not do its job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessFailedDetails {
    pub step: String,
    pub program: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolNotFoundDetails {
    pub programs: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    /// Name of the step this error is about, when it concerns one.
    pub fn step(&self) -> Option<&str> {
        self.details.get("step").and_then(Value::as_str)
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.into(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            details,
        )
    }

    pub fn invalid_step(step: impl Into<String>, problem: impl Into<String>) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidStepDetails {
            step: step.into(),
            problem: problem.clone(),
        });

        Self::new(
            ErrorCode::StepInvalid,
            format!("Invalid step: {}", problem),
            details,
        )
    }

    pub fn unknown_reference(
        step: impl Into<String>,
        reference: impl Into<String>,
        problem: impl Into<String>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(UnknownReferenceDetails {
            step: step.into(),
            reference: reference.into(),
            problem: problem.clone(),
        });

        Self::new(ErrorCode::PlanUnknownReference, problem, details)
    }

    pub fn cycle_detected(steps: Vec<String>) -> Self {
        let message = format!("Steps contain a cycle: {}", steps.join(" -> "));
        Self::new(
            ErrorCode::PlanCycleDetected,
            message,
            to_details(CycleDetectedDetails { steps }),
        )
        .with_hint("Remove one of the inputs or output references that close the loop")
    }

    pub fn missing_input(step: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        let details = to_details(MissingInputDetails {
            step: step.into(),
            path: path.clone(),
        });

        Self::new(
            ErrorCode::StepMissingInput,
            format!("Input not found: {}", path),
            details,
        )
    }

    pub fn spawn_failed(
        step: impl Into<String>,
        program: impl Into<String>,
        err: &std::io::Error,
    ) -> Self {
        let program = program.into();
        let details = to_details(SpawnFailedDetails {
            step: step.into(),
            program: program.clone(),
            kind: format!("{:?}", err.kind()),
            error: err.to_string(),
        });

        let error = Self::new(
            ErrorCode::StepSpawnFailed,
            format!("Failed to start '{}': {}", program, err),
            details,
        );

        match err.kind() {
            std::io::ErrorKind::NotFound => {
                error.with_hint(format!("Make sure '{}' is installed and on PATH", program))
            }
            std::io::ErrorKind::PermissionDenied => {
                error.with_hint(format!("Check that '{}' is executable", program))
            }
            _ => error,
        }
    }

    pub fn non_zero_exit(details: ProcessFailedDetails) -> Self {
        let message = match details.exit_code {
            Some(code) => format!("'{}' exited with status {}", details.program, code),
            None => format!("'{}' was terminated by a signal", details.program),
        };

        Self::new(ErrorCode::StepNonZeroExit, message, to_details(details))
    }

    pub fn output_not_produced(details: ProcessFailedDetails) -> Self {
        let message = format!(
            "'{}' exited successfully but did not produce: {}",
            details.program,
            details.missing.join(", ")
        );

        Self::new(
            ErrorCode::StepOutputNotProduced,
            message,
            to_details(details),
        )
    }

    pub fn tool_not_found(programs: Vec<String>) -> Self {
        let message = format!("Could not find {} on PATH", programs.join(", "));
        Self::new(
            ErrorCode::ToolNotFound,
            message,
            to_details(ToolNotFoundDetails { programs }),
        )
    }

    pub fn config_parse_failed(
        path: impl Into<String>,
        format: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let details = to_details(ConfigParseFailedDetails {
            path: path.into(),
            format: format.into(),
            error: error.into(),
        });

        Self::new(
            ErrorCode::ConfigParseFailed,
            "Could not parse pipeline configuration",
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = to_details(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.into(),
        });

        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            details,
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalIoErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalJsonErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_errors_expose_step_name() {
        let err = Error::missing_input("heat-docs", "/tmp/docs");
        assert_eq!(err.step(), Some("heat-docs"));
        assert_eq!(err.code.as_str(), "step.missing_input");
        assert_eq!(err.to_string(), "Input not found: /tmp/docs (step 'heat-docs')");
    }

    #[test]
    fn cycle_error_lists_steps_in_details() {
        let err = Error::cycle_detected(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(err.details["steps"], serde_json::json!(["a", "b"]));
        assert!(err.step().is_none());
        assert!(err.code.is_plan_error());
    }

    #[test]
    fn spawn_failure_for_missing_program_carries_hint() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory");
        let err = Error::spawn_failed("package", "wixl", &io);
        assert_eq!(err.details["kind"], "NotFound");
        assert_eq!(err.hints.len(), 1);
        assert!(err.hints[0].message.contains("wixl"));
    }

    #[test]
    fn process_failure_serializes_captured_streams() {
        let err = Error::non_zero_exit(ProcessFailedDetails {
            step: "package".to_string(),
            program: "wixl".to_string(),
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "error: unknown element".to_string(),
            missing: Vec::new(),
        });

        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["code"], "step.non_zero_exit");
        assert_eq!(value["details"]["exitCode"], 1);
        assert_eq!(value["details"]["stderr"], "error: unknown element");
        assert!(value.get("hints").is_none());
    }

    #[test]
    fn signal_termination_has_distinct_message() {
        let err = Error::non_zero_exit(ProcessFailedDetails {
            step: "a".to_string(),
            program: "sleep".to_string(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            missing: Vec::new(),
        });
        assert!(err.message.contains("terminated by a signal"));
        assert!(err.details.get("exitCode").is_none());
    }
}
