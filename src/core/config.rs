//! Pipeline files: JSON, TOML or YAML descriptions of a step list.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::step::{StdinSource, StepDescriptor, StepInput};
use crate::utils::io as fs_io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("json") => Ok(ConfigFormat::Json),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            _ => Err(Error::config_invalid_value(
                "path",
                Some(path.display().to_string()),
                "Pipeline file must end in .json, .toml, .yaml or .yml",
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Yaml => "yaml",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    pub terminal: String,
    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<StdinSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl StepConfig {
    pub fn into_step(self) -> Result<StepDescriptor> {
        let mut builder = StepDescriptor::builder(self.name, self.program).args(self.args);
        for raw in &self.inputs {
            builder = match StepInput::parse(raw) {
                StepInput::Path(_) => builder.input_path(expand(raw)),
                reference => builder.input(reference),
            };
        }
        for output in &self.outputs {
            builder = builder.output(expand(output));
        }
        if let Some(dir) = &self.working_dir {
            builder = builder.working_dir(expand(dir));
        }
        if let Some(stdin) = self.stdin {
            builder = builder.stdin(match stdin {
                StdinSource::File(path) => StdinSource::File(expand(&path.to_string_lossy())),
                text => text,
            });
        }
        if let Some(stdout) = &self.stdout {
            builder = builder.stdout_to(expand(stdout));
        }
        for (key, value) in self.env {
            builder = builder.env(key, value);
        }
        builder.build()
    }
}

/// A parsed pipeline file plus the directory its relative paths hang off.
#[derive(Debug, Clone)]
pub struct LoadedPipeline {
    pub file: PipelineFile,
    pub base_dir: PathBuf,
}

impl LoadedPipeline {
    pub fn terminal(&self) -> &str {
        &self.file.terminal
    }

    /// Build validated step descriptors in declaration order.
    pub fn steps(&self) -> Result<Vec<StepDescriptor>> {
        self.file
            .steps
            .iter()
            .cloned()
            .map(StepConfig::into_step)
            .collect()
    }
}

/// Load a pipeline file. `working_dir` in the file is taken relative to the file.
pub fn load(path: &Path) -> Result<LoadedPipeline> {
    let format = ConfigFormat::from_path(path)?;
    let content = fs_io::read_file(path, "read pipeline file")?;
    let file = from_str(&content, format).map_err(|e| match e.code {
        crate::error::ErrorCode::ConfigParseFailed => Error::config_parse_failed(
            path.display().to_string(),
            format.as_str(),
            e.details["error"].as_str().unwrap_or_default(),
        ),
        _ => e,
    })?;

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let base_dir = match &file.working_dir {
        Some(dir) => parent.join(expand(dir)),
        None => parent.to_path_buf(),
    };

    Ok(LoadedPipeline { file, base_dir })
}

pub fn from_str(content: &str, format: ConfigFormat) -> Result<PipelineFile> {
    let parsed = match format {
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Yaml => serde_yml::from_str(content).map_err(|e| e.to_string()),
    };
    let file: PipelineFile =
        parsed.map_err(|e| Error::config_parse_failed("<inline>", format.as_str(), e))?;

    if file.terminal.trim().is_empty() {
        return Err(Error::config_invalid_value(
            "terminal",
            Some(file.terminal.clone()),
            "Terminal step name is empty",
        ));
    }
    if file.steps.is_empty() {
        return Err(Error::config_invalid_value(
            "steps",
            None,
            "Pipeline declares no steps",
        ));
    }
    Ok(file)
}

/// `~` expansion only; no variables or globbing.
pub fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    const TOML: &str = r#"
working_dir = "build"
terminal = "b"

[[steps]]
name = "a"
program = "echo"
args = ["hello"]
outputs = ["a.txt"]
stdout = "a.txt"

[[steps]]
name = "b"
program = "cat"
args = ["{{outputs.a}}"]
inputs = ["{{outputs.a}}"]
outputs = ["final.txt"]
stdout = "final.txt"
env = { LANG = "C" }
"#;

    #[test]
    fn parses_toml() {
        let file = from_str(TOML, ConfigFormat::Toml).unwrap();
        assert_eq!(file.terminal, "b");
        assert_eq!(file.working_dir.as_deref(), Some("build"));
        assert_eq!(file.steps.len(), 2);
        assert_eq!(file.steps[1].env["LANG"], "C");
    }

    #[test]
    fn parses_json_and_yaml_alike() {
        let json = r#"{"terminal":"a","steps":[{"name":"a","program":"echo","outputs":["a.txt"],"stdin":{"text":"hi"}}]}"#;
        let yaml = "terminal: a\nsteps:\n  - name: a\n    program: echo\n    outputs: [a.txt]\n    stdin:\n      text: hi\n";

        let from_json = from_str(json, ConfigFormat::Json).unwrap();
        let from_yaml = from_str(yaml, ConfigFormat::Yaml).unwrap();
        assert_eq!(from_json, from_yaml);
        assert_eq!(
            from_json.steps[0].stdin,
            Some(StdinSource::Text("hi".to_string()))
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        let json = r#"{"terminal":"a","steps":[{"name":"a","program":"echo","shell":true}]}"#;
        let err = from_str(json, ConfigFormat::Json).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigParseFailed);
        assert_eq!(err.details["format"], "json");
    }

    #[test]
    fn rejects_empty_step_list() {
        let err = from_str(r#"{"terminal":"a","steps":[]}"#, ConfigFormat::Json).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidValue);
        assert_eq!(err.details["key"], "steps");
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("p.YML")).unwrap(),
            ConfigFormat::Yaml
        );
        assert!(ConfigFormat::from_path(Path::new("pipeline")).is_err());
    }

    #[test]
    fn step_config_becomes_descriptor() {
        let file = from_str(TOML, ConfigFormat::Toml).unwrap();
        let step = file.steps[1].clone().into_step().unwrap();
        assert_eq!(step.name(), "b");
        assert_eq!(step.inputs(), [StepInput::parse("{{outputs.a}}")]);
        assert_eq!(step.stdout(), Some(Path::new("final.txt")));
    }

    #[test]
    fn invalid_step_surfaces_from_descriptor() {
        let json = r#"{"terminal":"a","steps":[{"name":"a b","program":"echo"}]}"#;
        let file = from_str(json, ConfigFormat::Json).unwrap();
        let err = file.steps[0].clone().into_step().unwrap_err();
        assert_eq!(err.code, ErrorCode::StepInvalid);
    }

    #[test]
    fn load_resolves_base_dir_against_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, TOML).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.base_dir, dir.path().join("build"));
        assert_eq!(loaded.terminal(), "b");
        assert_eq!(loaded.steps().unwrap().len(), 2);
    }

    #[test]
    fn load_reports_path_on_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "terminal: [unclosed").unwrap();

        let err = load(&path).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigParseFailed);
        assert_eq!(err.details["path"], path.display().to_string());
    }

    #[test]
    fn expand_handles_tilde() {
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(expand("~/x"), PathBuf::from(home).join("x"));
        }
        assert_eq!(expand("plain/path"), PathBuf::from("plain/path"));
    }
}
