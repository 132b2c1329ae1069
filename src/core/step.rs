//! Step descriptors: one declared external-tool invocation each.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::template::{self, OutputRef};

/// Where a child's stdin comes from. Without one, stdin is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum StdinSource {
    File(PathBuf),
    Text(String),
}

/// A required input: a plain path or another step's declared output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StepInput {
    Path(PathBuf),
    Output(OutputRef),
}

impl StepInput {
    /// `{{outputs.NAME}}` becomes a step reference, anything else a path.
    pub fn parse(raw: &str) -> Self {
        match template::parse_output_ref(raw) {
            Some(reference) => StepInput::Output(reference),
            None => StepInput::Path(PathBuf::from(raw)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepDescriptor {
    name: String,
    program: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    inputs: Vec<StepInput>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    outputs: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    working_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdin: Option<StdinSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout: Option<PathBuf>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
}

impl StepDescriptor {
    pub fn builder(name: impl Into<String>, program: impl Into<String>) -> StepBuilder {
        StepBuilder {
            step: StepDescriptor {
                name: name.into(),
                program: program.into(),
                args: Vec::new(),
                inputs: Vec::new(),
                outputs: Vec::new(),
                working_dir: None,
                stdin: None,
                stdout: None,
                env: BTreeMap::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn inputs(&self) -> &[StepInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn stdin(&self) -> Option<&StdinSource> {
        self.stdin.as_ref()
    }

    pub fn stdout(&self) -> Option<&Path> {
        self.stdout.as_deref()
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Every output reference this step makes, from any field the runner renders.
    pub fn output_refs(&self) -> Vec<OutputRef> {
        let mut refs: Vec<OutputRef> = self
            .inputs
            .iter()
            .filter_map(|input| match input {
                StepInput::Output(reference) => Some(reference.clone()),
                StepInput::Path(_) => None,
            })
            .collect();
        for (_, text) in self.templated_fields() {
            refs.extend(template::output_refs(&text));
        }
        refs
    }

    /// Free-text fields that may embed `{{outputs.NAME}}`, labelled for errors.
    fn templated_fields(&self) -> Vec<(String, Cow<'_, str>)> {
        let mut fields = Vec::new();
        for input in &self.inputs {
            if let StepInput::Path(path) = input {
                fields.push((format!("input '{}'", path.display()), path.to_string_lossy()));
            }
        }
        for arg in &self.args {
            fields.push((format!("argument '{}'", arg), Cow::Borrowed(arg.as_str())));
        }
        match &self.stdin {
            Some(StdinSource::File(path)) => fields.push((
                format!("stdin file '{}'", path.display()),
                path.to_string_lossy(),
            )),
            Some(StdinSource::Text(text)) => {
                fields.push(("stdin text".to_string(), Cow::Borrowed(text.as_str())))
            }
            None => {}
        }
        for (key, value) in &self.env {
            fields.push((format!("env '{}'", key), Cow::Borrowed(value.as_str())));
        }
        fields
    }

    /// Directory the process runs in.
    pub fn resolve_working_dir(&self, base_dir: &Path) -> PathBuf {
        match &self.working_dir {
            Some(dir) => normalize(&base_dir.join(dir)),
            None => normalize(base_dir),
        }
    }

    /// Resolve a path declared by this step against its working directory.
    pub fn resolve_path(&self, base_dir: &Path, path: &Path) -> PathBuf {
        normalize(&self.resolve_working_dir(base_dir).join(path))
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_step(&self.name, "Step name is empty"));
        }
        if let Some(bad) = self
            .name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(Error::invalid_step(
                &self.name,
                format!("Step name contains '{}'; use letters, digits, '_', '-' or '.'", bad),
            ));
        }
        if self.program.trim().is_empty() {
            return Err(Error::invalid_step(&self.name, "Program is empty"));
        }
        if self.outputs.iter().any(|o| o.as_os_str().is_empty()) {
            return Err(Error::invalid_step(&self.name, "Output path is empty"));
        }
        if self.stdout.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
            return Err(Error::invalid_step(&self.name, "Stdout path is empty"));
        }
        let empty_input = self
            .inputs
            .iter()
            .any(|input| matches!(input, StepInput::Path(path) if path.as_os_str().is_empty()));
        if empty_input {
            return Err(Error::invalid_step(&self.name, "Input path is empty"));
        }
        if let Some((label, _)) = self
            .templated_fields()
            .into_iter()
            .find(|(_, text)| template::has_malformed_ref(text))
        {
            return Err(Error::invalid_step(
                &self.name,
                format!("Malformed output reference in {}", label),
            ));
        }
        Ok(())
    }
}

pub struct StepBuilder {
    step: StepDescriptor,
}

impl StepBuilder {
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.step.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.step.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn input(mut self, input: StepInput) -> Self {
        self.step.inputs.push(input);
        self
    }

    pub fn input_path(self, path: impl Into<PathBuf>) -> Self {
        self.input(StepInput::Path(path.into()))
    }

    /// Depend on the primary output of `step`.
    pub fn input_from(self, step: impl Into<String>) -> Self {
        self.input(StepInput::Output(OutputRef::primary(step)))
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.step.outputs.push(path.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.step.working_dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, source: StdinSource) -> Self {
        self.step.stdin = Some(source);
        self
    }

    /// Write the child's stdout to `path` instead of capturing it.
    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.step.stdout = Some(path.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.step.env.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<StepDescriptor> {
        self.step.validate()?;
        Ok(self.step)
    }
}

/// Lexically drop `.` and fold `..` components. Does not touch the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last_is_normal = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if last_is_normal {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
