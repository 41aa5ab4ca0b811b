//! Parameter File
//!
//! Loads a workflow description from YAML.
//!
//! # Example
//!
//! ```yaml
//! workflow:
//!   variant: forward
//!   generate_data: true
//!   stop_after: generate_synthetic_data
//!
//! paths:
//!   workdir: /scratch/run01
//!   model_init: /models/init
//!   model_true: /models/true
//!
//! system:
//!   parallel: 8
//!
//! solver:
//!   sources: [S001, S002]
//!   forward: ./bin/xspecfem --model {model} --out {save_traces}
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Deserialize;

use super::{Configuration, ConfigurationBuilder, StalePolicy};
use crate::error::{Result, WorkflowError};
use crate::modules::solver::CommandSolverConfig;

/// Variant used when the file names none.
pub const DEFAULT_VARIANT: &str = "forward";

/// Top-level layout of a parameter file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterFile {
    #[serde(default)]
    pub workflow: WorkflowSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub system: SystemSection,
    #[serde(default)]
    pub solver: Option<CommandSolverConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowSection {
    #[serde(default = "default_variant")]
    pub variant: String,
    #[serde(default)]
    pub generate_data: bool,
    #[serde(default)]
    pub stop_after: Option<String>,
    #[serde(default)]
    pub export_traces: bool,
    #[serde(default)]
    pub export_residuals: bool,
    #[serde(default)]
    pub on_config_change: StalePolicy,
    #[serde(default = "default_iteration")]
    pub start: usize,
    #[serde(default = "default_iteration")]
    pub end: usize,
    #[serde(default)]
    pub kernels: Option<String>,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            variant: default_variant(),
            generate_data: false,
            stop_after: None,
            export_traces: false,
            export_residuals: false,
            on_config_change: StalePolicy::default(),
            start: default_iteration(),
            end: default_iteration(),
            kernels: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsSection {
    pub workdir: Option<PathBuf>,
    pub scratch: Option<PathBuf>,
    pub eval_grad: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub data: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
    pub model_init: Option<PathBuf>,
    pub model_true: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemSection {
    /// Maximum units run at once; defaults to the CPU count
    pub parallel: Option<usize>,
}

fn default_variant() -> String {
    DEFAULT_VARIANT.to_string()
}

fn default_iteration() -> usize {
    1
}

impl ParameterFile {
    /// Parses YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Builds the immutable configuration.
    ///
    /// A missing `workdir` falls back to `default_workdir`, normally the
    /// process working directory.
    pub fn configuration(&self, default_workdir: &Path) -> Configuration {
        let paths = &self.paths;
        let workdir = paths
            .workdir
            .clone()
            .unwrap_or_else(|| default_workdir.to_path_buf());

        let mut builder = ConfigurationBuilder::new(workdir);
        if let Some(p) = &paths.scratch {
            builder = builder.scratch(p);
            if paths.eval_grad.is_none() {
                builder = builder.eval_grad(p.join("eval_grad"));
            }
        }
        if let Some(p) = &paths.eval_grad {
            builder = builder.eval_grad(p);
        }
        if let Some(p) = &paths.output {
            builder = builder.output(p);
        }
        if let Some(p) = &paths.data {
            builder = builder.data(p);
        }
        if let Some(p) = &paths.state_file {
            builder = builder.state_file(p);
        }
        if let Some(p) = &paths.model_init {
            builder = builder.model_init(p);
        }
        if let Some(p) = &paths.model_true {
            builder = builder.model_true(p);
        }

        let wf = &self.workflow;
        builder = builder
            .generate_data(wf.generate_data)
            .export_traces(wf.export_traces)
            .export_residuals(wf.export_residuals)
            .on_config_change(wf.on_config_change)
            .iterations(wf.start, wf.end);
        if let Some(task) = &wf.stop_after {
            builder = builder.stop_after(task);
        }
        if let Some(kernels) = &wf.kernels {
            builder = builder.kernels(kernels);
        }

        builder.build()
    }
}

/// Loads a parameter file from disk.
///
/// # Example
///
/// ```rust,no_run
/// use simflow::config::load_parameters;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let params = load_parameters("parameters.yaml")?;
///     println!("variant: {}", params.workflow.variant);
///     Ok(())
/// }
/// ```
pub fn load_parameters(path: impl AsRef<Path>) -> Result<ParameterFile> {
    let path = path.as_ref();
    info!("Loading parameters from: {}", path.display());

    let content = fs::read_to_string(path).map_err(|e| WorkflowError::io(path, e))?;
    debug!("Parameter file loaded ({} bytes)", content.len());

    ParameterFile::from_yaml(&content).map_err(|e| {
        WorkflowError::config(format!(
            "could not parse '{}': {}. Check the file format.",
            path.display(),
            e
        ))
    })
}
