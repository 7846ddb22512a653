//! Declarative run specification stored in `codetest.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::space::{ParameterSpace, ParameterSpec, apply_overrides, parse_axis};
use crate::error::ConfigurationError;
use crate::io::compile::{DEFAULT_COMPILE_TIMEOUT, DEFAULT_DIAGNOSTICS_LIMIT_BYTES};
use crate::io::input::DEFAULT_SEPARATOR;
use crate::io::template::TemplateGenerator;

pub const DEFAULT_SPEC_FILE: &str = "codetest.toml";
pub const DEFAULT_WORK_DIR: &str = ".codetest";
pub const DEFAULT_STDERR_LIMIT_BYTES: usize = 16 * 1024;

/// Spec file as written by humans (TOML). Missing fields default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpecFile {
    /// Reference implementation source.
    pub golden: Option<PathBuf>,
    /// Implementation under test.
    pub candidate: Option<PathBuf>,
    /// Extra compiler flags applied to both sources.
    pub flags: Vec<String>,
    /// Per-run wall-clock limit in milliseconds.
    pub timeout_ms: Option<u64>,
    pub compile_timeout_ms: u64,
    /// Compiler program and fixed arguments.
    pub compiler: Vec<String>,
    pub seed: Option<u64>,
    pub separator: String,
    /// Directory for the fixed input/output files and executables.
    pub work_dir: PathBuf,
    /// Where failing inputs are archived.
    pub archive_dir: Option<PathBuf>,
    /// Archive passing inputs as well.
    pub keep_passing: bool,
    pub verbose: bool,
    pub watch: bool,
    /// Axis declarations: `NAME = 3` or `NAME = "1..10"`, in document order.
    pub axes: toml::Table,
    pub input: Option<TemplateGenerator>,
    pub inputs: Option<StoredInputs>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredInputs {
    /// Directory whose files are used as case inputs.
    pub dir: PathBuf,
}

impl Default for SpecFile {
    fn default() -> Self {
        Self {
            golden: None,
            candidate: None,
            flags: Vec::new(),
            timeout_ms: None,
            compile_timeout_ms: DEFAULT_COMPILE_TIMEOUT.as_millis() as u64,
            compiler: default_compiler(),
            seed: None,
            separator: DEFAULT_SEPARATOR.to_string(),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            archive_dir: None,
            keep_passing: false,
            verbose: false,
            watch: false,
            axes: toml::Table::new(),
            input: None,
            inputs: None,
        }
    }
}

fn default_compiler() -> Vec<String> {
    vec!["g++".to_string(), "-O2".to_string()]
}

/// Where case inputs come from.
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    /// Enumerate the axes and render each case with a template.
    Generated(TemplateGenerator),
    /// Use every file of a directory as one case.
    Stored(PathBuf),
}

/// Validated, path-resolved run specification.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    /// Spec file this was loaded from, if any (watched in watch mode).
    pub spec_path: Option<PathBuf>,
    pub golden: PathBuf,
    pub candidate: PathBuf,
    pub flags: Vec<String>,
    pub timeout: Option<Duration>,
    pub compile_timeout: Duration,
    pub compiler: Vec<String>,
    pub seed: Option<u64>,
    pub separator: String,
    pub work_dir: PathBuf,
    pub archive_dir: Option<PathBuf>,
    pub keep_passing: bool,
    pub verbose: bool,
    pub watch: bool,
    pub axes: Vec<ParameterSpec>,
    pub inputs: InputSource,
    pub stderr_limit_bytes: usize,
    pub diagnostics_limit_bytes: usize,
}

impl RunSpec {
    /// Spec with defaults for everything but the two sources.
    pub fn new(golden: impl Into<PathBuf>, candidate: impl Into<PathBuf>) -> Self {
        let defaults = SpecFile::default();
        Self {
            spec_path: None,
            golden: golden.into(),
            candidate: candidate.into(),
            flags: defaults.flags,
            timeout: None,
            compile_timeout: DEFAULT_COMPILE_TIMEOUT,
            compiler: defaults.compiler,
            seed: None,
            separator: defaults.separator,
            work_dir: defaults.work_dir,
            archive_dir: None,
            keep_passing: false,
            verbose: false,
            watch: false,
            axes: Vec::new(),
            inputs: InputSource::Generated(TemplateGenerator::default()),
            stderr_limit_bytes: DEFAULT_STDERR_LIMIT_BYTES,
            diagnostics_limit_bytes: DEFAULT_DIAGNOSTICS_LIMIT_BYTES,
        }
    }

    /// Replace or append axes from `NAME=VALUE` overrides.
    ///
    /// A default one-line-of-axes template is rebuilt so appended axes show up.
    pub fn apply_overrides(
        &mut self,
        overrides: Vec<ParameterSpec>,
    ) -> Result<(), ConfigurationError> {
        let default_line = TemplateGenerator::axis_line(&self.axes);
        apply_overrides(&mut self.axes, overrides);
        if matches!(&self.inputs, InputSource::Generated(template) if *template == default_line) {
            self.inputs = InputSource::Generated(TemplateGenerator::axis_line(&self.axes));
        }
        self.validate()
    }

    /// Files whose modification restarts a watch-mode run.
    pub fn watched_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        if let Some(spec_path) = &self.spec_path {
            files.push(spec_path.clone());
        }
        files.push(self.golden.clone());
        if self.candidate != self.golden {
            files.push(self.candidate.clone());
        }
        files
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.compiler.is_empty() || self.compiler[0].trim().is_empty() {
            return Err(ConfigurationError::new("compiler must be a non-empty array"));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(ConfigurationError::new("timeout_ms must be > 0"));
        }
        if self.compile_timeout.is_zero() {
            return Err(ConfigurationError::new("compile_timeout_ms must be > 0"));
        }
        ParameterSpace::new(self.axes.clone())?;
        if let InputSource::Generated(template) = &self.inputs {
            template.validate(&self.axes)?;
        }
        Ok(())
    }
}

impl SpecFile {
    /// Check required bindings and resolve relative paths against `base_dir`.
    pub fn resolve(self, base_dir: &Path) -> Result<RunSpec, ConfigurationError> {
        let golden = self
            .golden
            .ok_or_else(|| ConfigurationError::new("missing required `golden` source"))?;
        let candidate = self
            .candidate
            .ok_or_else(|| ConfigurationError::new("missing required `candidate` source"))?;

        let mut axes = Vec::with_capacity(self.axes.len());
        for (name, value) in &self.axes {
            let spec = match value {
                toml::Value::Integer(literal) => ParameterSpec::constant(name.as_str(), *literal),
                toml::Value::String(raw) => parse_axis(name, raw)?,
                other => {
                    return Err(ConfigurationError::new(format!(
                        "axis {name}: expected an integer or \"min..max\", got {}",
                        other.type_str()
                    )));
                }
            };
            axes.push(spec);
        }

        let inputs = match (self.input, self.inputs) {
            (Some(_), Some(_)) => {
                return Err(ConfigurationError::new(
                    "`input` and `inputs` are mutually exclusive",
                ));
            }
            (Some(template), None) => InputSource::Generated(template),
            (None, Some(stored)) => InputSource::Stored(base_dir.join(stored.dir)),
            (None, None) => InputSource::Generated(TemplateGenerator::axis_line(&axes)),
        };

        let spec = RunSpec {
            spec_path: None,
            golden: base_dir.join(golden),
            candidate: base_dir.join(candidate),
            flags: self.flags,
            timeout: self.timeout_ms.map(Duration::from_millis),
            compile_timeout: Duration::from_millis(self.compile_timeout_ms),
            compiler: self.compiler,
            seed: self.seed,
            separator: self.separator,
            work_dir: base_dir.join(self.work_dir),
            archive_dir: self.archive_dir.map(|dir| base_dir.join(dir)),
            keep_passing: self.keep_passing,
            verbose: self.verbose,
            watch: self.watch,
            axes,
            inputs,
            stderr_limit_bytes: DEFAULT_STDERR_LIMIT_BYTES,
            diagnostics_limit_bytes: DEFAULT_DIAGNOSTICS_LIMIT_BYTES,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Load and validate a spec file; relative paths resolve against its directory.
pub fn load_spec(path: &Path) -> Result<RunSpec> {
    debug!(path = %path.display(), "loading spec");
    if !path.exists() {
        let message = format!("spec file {} not found", path.display());
        return Err(ConfigurationError::new(message).into());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let file: SpecFile = toml::from_str(&contents).map_err(|err| {
        ConfigurationError::new(format!("parse {}: {err}", path.display()))
    })?;
    let base_dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut spec = file.resolve(base_dir)?;
    spec.spec_path = Some(path.to_path_buf());
    debug!(axes = spec.axes.len(), "spec loaded");
    Ok(spec)
}
