//! Windows Installer preset built on `msitools`.
//!
//! Each fragment becomes a `heat-<name>` step that feeds a recursive file
//! listing to `wixl-heat` and writes `<name>.wxs`. A terminal `package` step
//! then compiles the main `.wxs` plus every fragment with `wixl`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{self, ConfigFormat};
use crate::engine::{
    self, ExecutionResult, Invocation, PipelineOutcome, ProcessExecutor, ResolvedPlan, StepExecutor,
    StepFailure,
};
use crate::error::{Error, Result};
use crate::preflight;
use crate::step::{StdinSource, StepDescriptor};
use crate::utils::io as fs_io;
use crate::utils::template::OutputRef;
use crate::utils::validation;

pub const PACKAGE_STEP: &str = "package";
pub const WIXL: &str = "wixl";
pub const WIXL_HEAT: &str = "wixl-heat";
const FRAGMENT_STEP_PREFIX: &str = "heat-";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MsiConfig {
    #[serde(default)]
    pub wxs_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default)]
    pub defines: BTreeMap<String, String>,
    #[serde(default)]
    pub fragments: BTreeMap<String, FragmentOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FragmentOptions {
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_group: Option<String>,
    #[serde(default)]
    pub win64: bool,
}

impl FragmentOptions {
    fn heat_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let flags = [
            ("--prefix", &self.prefix),
            ("--directory-ref", &self.directory_ref),
            ("--exclude", &self.exclude),
            ("--var", &self.var),
            ("--component-group", &self.component_group),
        ];
        for (flag, value) in flags {
            if let Some(value) = value {
                args.push(flag.to_string());
                args.push(value.clone());
            }
        }
        if self.win64 {
            args.push("--win64".to_string());
        }
        args
    }
}

impl MsiConfig {
    /// Read an MSI config from a JSON, TOML or YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_path(path)?;
        let content = fs_io::read_file(path, "read msi config")?;
        let parsed = match format {
            ConfigFormat::Json => serde_json::from_str(&content).map_err(|e| e.to_string()),
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| e.to_string()),
            ConfigFormat::Yaml => serde_yml::from_str(&content).map_err(|e| e.to_string()),
        };
        parsed.map_err(|e| Error::config_parse_failed(path.display().to_string(), format.as_str(), e))
    }

    /// Output path, defaulting to the `.wxs` path with an `.msi` extension.
    pub fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(output) => config::expand(output),
            None => config::expand(&self.wxs_path).with_extension("msi"),
        }
    }

    pub fn programs(&self) -> Vec<&'static str> {
        if self.fragments.is_empty() {
            vec![WIXL]
        } else {
            vec![WIXL_HEAT, WIXL]
        }
    }

    /// Expand fragments and the package step into descriptors, terminal last.
    ///
    /// Fragment listings are taken now, relative to `base_dir`.
    pub fn build_steps(&self, base_dir: &Path) -> Result<Vec<StepDescriptor>> {
        let wxs = validation::require_non_empty(&self.wxs_path, "wxs_path", "Missing .wxs path")?;
        for key in self.defines.keys() {
            validation::require_non_empty(key, "defines", "Define name is empty")?;
        }

        let mut steps = Vec::with_capacity(self.fragments.len() + 1);
        let mut package = StepDescriptor::builder(PACKAGE_STEP, WIXL)
            .arg(wxs)
            .input_path(config::expand(wxs));

        for (name, options) in &self.fragments {
            let step_name = format!("{}{}", FRAGMENT_STEP_PREFIX, name);
            steps.push(fragment_step(&step_name, name, options, base_dir)?);

            let reference = OutputRef::primary(&step_name);
            package = package.arg(reference.token()).input_from(step_name);
        }

        for (key, value) in &self.defines {
            package = package.arg("-D").arg(format!("{}={}", key, value));
        }

        let output = self.output_path();
        package = package
            .arg("--output")
            .arg(output.to_string_lossy())
            .output(output);
        if let Some(arch) = self.architecture.as_deref().filter(|a| !a.trim().is_empty()) {
            package = package.arg("--arch").arg(arch);
        }
        steps.push(package.arg("-v").build()?);
        Ok(steps)
    }

    pub fn plan(&self, base_dir: &Path) -> Result<ResolvedPlan> {
        engine::plan(&self.build_steps(base_dir)?, PACKAGE_STEP, base_dir)
    }

    /// Check for msitools, then build and run the pipeline.
    pub fn run(&self, base_dir: &Path) -> Result<PipelineOutcome> {
        let steps = self.build_steps(base_dir)?;
        preflight::require_programs(&steps)?;
        let executor = Arc::new(MsiExecutor {
            inner: ProcessExecutor::new(),
        });
        engine::run_with(&steps, PACKAGE_STEP, base_dir, executor)
    }
}

/// Fragment name behind a `heat-<name>` step.
pub fn fragment_name(step: &str) -> Option<&str> {
    step.strip_prefix(FRAGMENT_STEP_PREFIX)
}

/// Reports msitools progress as each step starts, then delegates.
struct MsiExecutor<E> {
    inner: E,
}

impl<E: StepExecutor> StepExecutor for MsiExecutor<E> {
    fn execute(&self, inv: &Invocation) -> std::result::Result<ExecutionResult, StepFailure> {
        if let Some(fragment) = fragment_name(&inv.step) {
            log_status!("msi", "Generating fragment for {}", fragment);
        } else if inv.step == PACKAGE_STEP {
            log_status!("msi", "Building MSI package");
        }
        self.inner.execute(inv)
    }
}

fn fragment_step(
    step_name: &str,
    fragment: &str,
    options: &FragmentOptions,
    base_dir: &Path,
) -> Result<StepDescriptor> {
    if options.path.trim().is_empty() {
        return Err(Error::config_invalid_value(
            format!("fragments.{}.path", fragment),
            None,
            format!("No path specified for fragment {}", fragment),
        ));
    }
    let listing = list_files(base_dir, &options.path)?;
    if listing.is_empty() {
        return Err(Error::config_invalid_value(
            format!("fragments.{}.path", fragment),
            Some(options.path.clone()),
            format!("Nothing found at {}", options.path),
        ));
    }

    let mut text = listing.join("\n");
    text.push('\n');
    let output = format!("{}.wxs", fragment);

    StepDescriptor::builder(step_name, WIXL_HEAT)
        .args(options.heat_args())
        .stdin(StdinSource::Text(text))
        .stdout_to(&output)
        .output(output)
        .build()
}

/// Every path matching `pattern` plus everything beneath matched directories,
/// sorted, written relative to `base_dir` when the pattern is relative.
pub fn list_files(base_dir: &Path, pattern: &str) -> Result<Vec<String>> {
    let expanded = config::expand(pattern);
    let relative = expanded.is_relative();
    let root = if relative {
        format!(
            "{}/{}",
            glob::Pattern::escape(&base_dir.to_string_lossy()),
            expanded.to_string_lossy()
        )
    } else {
        expanded.to_string_lossy().to_string()
    };

    let mut found = Vec::new();
    for matched in glob_paths(&root)? {
        if matched.is_dir() {
            let nested = format!("{}/**/*", glob::Pattern::escape(&matched.to_string_lossy()));
            found.extend(glob_paths(&nested)?);
        }
        found.push(matched);
    }
    found.sort();
    found.dedup();

    Ok(found
        .into_iter()
        .map(|path| match path.strip_prefix(base_dir) {
            Ok(rest) if relative => rest.to_string_lossy().to_string(),
            _ => path.to_string_lossy().to_string(),
        })
        .collect())
}

fn glob_paths(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob::glob(pattern).map_err(|e| {
        Error::config_invalid_value("fragments.path", Some(pattern.to_string()), e.to_string())
    })?;
    paths
        .map(|entry| {
            entry.map_err(|e| {
                Error::internal_io(e.error().to_string(), Some(format!("list {}", e.path().display())))
            })
        })
        .collect()
}
