//! Workflow Configuration
//!
//! An immutable set of named paths and flags, created once and shared by
//! every task of a run.
//!
//! # Structure
//!
//! - [`Configuration`]: paths, flags and variant options
//! - [`parameters`]: YAML parameter file loading
//! - [`fingerprint`]: change detection between runs

pub mod fingerprint;
pub mod parameters;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use fingerprint::{fingerprint, Fingerprint};
pub use parameters::{load_parameters, ParameterFile};

/// File name of the ledger inside the working directory.
pub const DEFAULT_STATE_FILE: &str = "sfstate.txt";

/// Named paths used by a workflow.
///
/// Unset paths default to locations under `workdir`; the model paths have
/// no default and stay unset unless given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSet {
    pub workdir: PathBuf,
    pub scratch: PathBuf,
    pub eval_grad: PathBuf,
    pub output: PathBuf,
    pub data: PathBuf,
    pub state_file: PathBuf,
    pub model_init: Option<PathBuf>,
    pub model_true: Option<PathBuf>,
}

impl PathSet {
    /// Creates the default layout rooted at `workdir`.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        let workdir = workdir.into();
        let scratch = workdir.join("scratch");
        Self {
            eval_grad: scratch.join("eval_grad"),
            output: workdir.join("output"),
            data: workdir.join("data"),
            state_file: workdir.join(DEFAULT_STATE_FILE),
            scratch,
            workdir,
            model_init: None,
            model_true: None,
        }
    }

    /// Every set path with its name, in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Path)> {
        [
            ("workdir", Some(self.workdir.as_path())),
            ("scratch", Some(self.scratch.as_path())),
            ("eval_grad", Some(self.eval_grad.as_path())),
            ("output", Some(self.output.as_path())),
            ("data", Some(self.data.as_path())),
            ("state_file", Some(self.state_file.as_path())),
            ("model_init", self.model_init.as_deref()),
            ("model_true", self.model_true.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, path)| path.map(|p| (name, p)))
    }

    /// Paths that look like directories, i.e. have no file extension.
    pub fn directories(&self) -> impl Iterator<Item = &Path> {
        self.iter()
            .map(|(_, path)| path)
            .filter(|path| path.extension().is_none())
    }

    /// Scratch directory holding one working directory per unit of work.
    pub fn solver_scratch(&self) -> PathBuf {
        self.scratch.join("solver")
    }
}

/// What to do with complete tasks when the configuration changed since
/// the ledger was last written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StalePolicy {
    /// Reset complete tasks to pending
    #[default]
    Invalidate,
    /// Reuse complete tasks as they are
    Keep,
}

/// Options of the iterative variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InversionOptions {
    /// First iteration of the run
    pub start: usize,
    /// Last iteration to complete
    pub end: usize,
}

impl Default for InversionOptions {
    fn default() -> Self {
        Self { start: 1, end: 1 }
    }
}

/// Options of the noise variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseOptions {
    /// Comma-separated kernel list, e.g. `ZZ,TT`
    pub kernels: String,
}

impl Default for NoiseOptions {
    fn default() -> Self {
        Self {
            kernels: "ZZ".to_string(),
        }
    }
}

/// Immutable workflow configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    paths: PathSet,
    generate_data: bool,
    stop_after: Option<String>,
    export_traces: bool,
    export_residuals: bool,
    on_config_change: StalePolicy,
    inversion: InversionOptions,
    noise: NoiseOptions,
}

impl Configuration {
    /// Starts a builder with the default layout under `workdir`.
    pub fn builder(workdir: impl Into<PathBuf>) -> ConfigurationBuilder {
        ConfigurationBuilder::new(workdir)
    }

    pub fn paths(&self) -> &PathSet {
        &self.paths
    }

    /// Generate observations by simulating through the target model.
    pub fn generate_data(&self) -> bool {
        self.generate_data
    }

    /// Task after which a run stops normally.
    pub fn stop_after(&self) -> Option<&str> {
        self.stop_after.as_deref()
    }

    pub fn export_traces(&self) -> bool {
        self.export_traces
    }

    pub fn export_residuals(&self) -> bool {
        self.export_residuals
    }

    pub fn on_config_change(&self) -> StalePolicy {
        self.on_config_change
    }

    pub fn inversion(&self) -> &InversionOptions {
        &self.inversion
    }

    pub fn noise(&self) -> &NoiseOptions {
        &self.noise
    }
}

/// Builder for [`Configuration`].
#[derive(Debug, Clone)]
pub struct ConfigurationBuilder {
    config: Configuration,
}

impl ConfigurationBuilder {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            config: Configuration {
                paths: PathSet::new(workdir),
                generate_data: false,
                stop_after: None,
                export_traces: false,
                export_residuals: false,
                on_config_change: StalePolicy::default(),
                inversion: InversionOptions::default(),
                noise: NoiseOptions::default(),
            },
        }
    }

    pub fn scratch(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.paths.scratch = path.into();
        self
    }

    pub fn eval_grad(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.paths.eval_grad = path.into();
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.paths.output = path.into();
        self
    }

    pub fn data(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.paths.data = path.into();
        self
    }

    pub fn state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.paths.state_file = path.into();
        self
    }

    pub fn model_init(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.paths.model_init = Some(path.into());
        self
    }

    pub fn model_true(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.paths.model_true = Some(path.into());
        self
    }

    pub fn generate_data(mut self, enabled: bool) -> Self {
        self.config.generate_data = enabled;
        self
    }

    pub fn stop_after(mut self, task: impl Into<String>) -> Self {
        self.config.stop_after = Some(task.into());
        self
    }

    pub fn export_traces(mut self, enabled: bool) -> Self {
        self.config.export_traces = enabled;
        self
    }

    pub fn export_residuals(mut self, enabled: bool) -> Self {
        self.config.export_residuals = enabled;
        self
    }

    pub fn on_config_change(mut self, policy: StalePolicy) -> Self {
        self.config.on_config_change = policy;
        self
    }

    pub fn iterations(mut self, start: usize, end: usize) -> Self {
        self.config.inversion = InversionOptions { start, end };
        self
    }

    pub fn kernels(mut self, kernels: impl Into<String>) -> Self {
        self.config.noise = NoiseOptions {
            kernels: kernels.into(),
        };
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let paths = PathSet::new("/run");
        assert_eq!(paths.scratch, PathBuf::from("/run/scratch"));
        assert_eq!(paths.eval_grad, PathBuf::from("/run/scratch/eval_grad"));
        assert_eq!(paths.output, PathBuf::from("/run/output"));
        assert_eq!(paths.data, PathBuf::from("/run/data"));
        assert_eq!(paths.state_file, PathBuf::from("/run/sfstate.txt"));
        assert!(paths.model_init.is_none());
        assert!(paths.model_true.is_none());
    }

    #[test]
    fn test_directories_skip_files_and_unset_models() {
        let config = Configuration::builder("/run").model_init("/models/init").build();
        let dirs: Vec<_> = config.paths().directories().collect();

        assert!(dirs.contains(&Path::new("/models/init")));
        assert!(!dirs.contains(&Path::new("/run/sfstate.txt")));
        assert_eq!(dirs.len(), 6);
    }

    #[test]
    fn test_builder_overrides() {
        let config = Configuration::builder("/run")
            .output("/archive")
            .state_file("/run/custom.txt")
            .generate_data(true)
            .stop_after("evaluate_initial_misfit")
            .iterations(2, 5)
            .kernels("zz,tt")
            .build();

        assert_eq!(config.paths().output, PathBuf::from("/archive"));
        assert_eq!(config.paths().state_file, PathBuf::from("/run/custom.txt"));
        assert!(config.generate_data());
        assert_eq!(config.stop_after(), Some("evaluate_initial_misfit"));
        assert_eq!(config.inversion().start, 2);
        assert_eq!(config.inversion().end, 5);
        assert_eq!(config.noise().kernels, "zz,tt");
        assert_eq!(config.on_config_change(), StalePolicy::Invalidate);
    }

    #[test]
    fn test_path_iteration_order() {
        let paths = PathSet::new("/run");
        let names: Vec<_> = paths.iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            vec!["workdir", "scratch", "eval_grad", "output", "data", "state_file"]
        );
    }
}
