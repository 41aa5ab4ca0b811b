//! Simulation Driver
//!
//! The contract the workflows use to run forward and adjoint simulations,
//! and [`CommandSolver`], a driver that runs configured shell commands in
//! each unit's working directory.
//!
//! # Command templates
//!
//! Every template is written to a bash script with `set -e` and executed
//! with the unit directory as its working directory. Placeholders:
//!
//! - `{source}` - unit/source name
//! - `{cwd}` - unit working directory
//! - `{model}` - the model imported for the next run
//! - `{force}` - point force direction (`Z`, `N`, `E`), empty if unset
//! - `{save_traces}` - directory that must receive the synthetic traces
//! - `{save_forward}` - `true` when the forward wavefield must be kept
//! - `{adjsrcs}` - directory holding adjoint sources
//! - `{save_kernels}` - directory that must receive the event kernels
//! - `{inputs}` / `{output}` - kernel directories for `combine`/`smooth`

use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::{debug, error, info, warn};
use serde::Deserialize;

use super::dispatch::UnitOfWork;
use super::{unsupported, Module};
use crate::error::{Result, WorkflowError};
use crate::files;

/// Directory, inside each unit's working directory, of generated scripts.
const SCRIPT_DIR: &str = ".simflow";

/// Trace subdirectories created for every unit.
pub const TRACE_DIRS: &[&str] = &["obs", "syn", "adj"];

/// Direction of a point force source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Force {
    /// Vertical
    Z,
    /// North
    N,
    /// East
    E,
}

impl Force {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Z => "Z",
            Self::N => "N",
            Self::E => "E",
        }
    }

    /// Force vector in `[E, N, Z]` order.
    pub fn vector(self) -> [f64; 3] {
        match self {
            Self::Z => [0.0, 0.0, 1.0],
            Self::N => [0.0, 1.0, 0.0],
            Self::E => [1.0, 0.0, 0.0],
        }
    }
}

impl fmt::Display for Force {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a forward simulation writes its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    pub save_traces: PathBuf,
    pub export_traces: Option<PathBuf>,
    /// Keep the forward wavefield for a later adjoint simulation
    pub save_forward: bool,
}

/// Inputs and outputs of an adjoint simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjointRequest {
    pub adjsrcs: PathBuf,
    pub save_kernels: PathBuf,
}

/// Drives the numerical solver for one unit of work at a time.
///
/// Implementations must confine each unit's side effects to
/// [`SimulationDriver::unit_dir`] of that unit.
pub trait SimulationDriver: Module {
    /// Sources, in unit order.
    fn source_names(&self) -> Vec<String>;

    /// Working directory of the unit simulating `source`.
    fn unit_dir(&self, source: &str) -> PathBuf;

    /// Validates the model stored at `path`.
    fn check_model_values(&self, path: &Path) -> Result<()>;

    /// Makes the model at `path` the one used by the next simulation.
    fn import_model(&self, unit: &UnitOfWork, path: &Path) -> Result<()>;

    fn forward_simulation(&self, unit: &UnitOfWork, request: &ForwardRequest) -> Result<()>;

    fn adjoint_simulation(&self, unit: &UnitOfWork, request: &AdjointRequest) -> Result<()>;

    /// Sums the kernels found in `inputs` into `output`.
    fn combine_kernels(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;

    /// Smooths the kernels in `input` into `output`.
    ///
    /// The default copies the kernels unchanged.
    fn smooth_kernels(&self, input: &Path, output: &Path) -> Result<()> {
        let copied = files::copy_files(input, output)?;
        debug!("Copied {} unsmoothed kernel files to {}", copied, output.display());
        Ok(())
    }

    /// Sets the point force used by the next forward simulation.
    fn set_point_force(&self, _unit: &UnitOfWork, _force: Force) -> Result<()> {
        Err(unsupported(self.name(), "set_point_force"))
    }
}

/// Command templates of a [`CommandSolver`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSolverConfig {
    /// One unit of work per source
    pub sources: Vec<String>,
    pub forward: String,
    #[serde(default)]
    pub adjoint: Option<String>,
    #[serde(default)]
    pub combine: Option<String>,
    #[serde(default)]
    pub smooth: Option<String>,
}

/// Runs simulations as shell commands.
#[derive(Debug, Clone)]
pub struct CommandSolver {
    config: CommandSolverConfig,
    scratch: PathBuf,
}

impl CommandSolver {
    /// Creates a solver whose unit directories live under `scratch`.
    pub fn new(config: CommandSolverConfig, scratch: impl Into<PathBuf>) -> Self {
        Self {
            config,
            scratch: scratch.into(),
        }
    }

    pub fn config(&self) -> &CommandSolverConfig {
        &self.config
    }

    fn model_link(unit: &UnitOfWork) -> PathBuf {
        unit.cwd.join("model")
    }

    fn force_file(unit: &UnitOfWork) -> PathBuf {
        unit.cwd.join("FORCE")
    }

    fn current_force(unit: &UnitOfWork) -> String {
        fs::read_to_string(Self::force_file(unit))
            .ok()
            .and_then(|content| content.split_whitespace().next().map(str::to_string))
            .unwrap_or_default()
    }

    fn unit_placeholders(unit: &UnitOfWork) -> Vec<(&'static str, String)> {
        vec![
            ("{source}", unit.name.clone()),
            ("{cwd}", unit.cwd.display().to_string()),
            ("{model}", Self::model_link(unit).display().to_string()),
            ("{force}", Self::current_force(unit)),
        ]
    }
}

impl Module for CommandSolver {
    fn name(&self) -> &str {
        "command"
    }

    fn check(&self) -> Result<()> {
        if self.config.sources.is_empty() {
            return Err(WorkflowError::config("solver `sources` must not be empty"));
        }
        if self.config.forward.trim().is_empty() {
            return Err(WorkflowError::config("solver `forward` command is empty"));
        }
        for (i, source) in self.config.sources.iter().enumerate() {
            if self.config.sources[..i].contains(source) {
                return Err(WorkflowError::config(format!(
                    "solver source '{}' is listed more than once",
                    source
                )));
            }
        }
        Ok(())
    }

    fn setup(&self) -> Result<()> {
        for source in &self.config.sources {
            let cwd = self.unit_dir(source);
            for tag in TRACE_DIRS {
                files::ensure_dir(&cwd.join("traces").join(tag))?;
            }
        }
        info!(
            "Prepared {} solver directories under {}",
            self.config.sources.len(),
            self.scratch.display()
        );
        Ok(())
    }
}

impl SimulationDriver for CommandSolver {
    fn source_names(&self) -> Vec<String> {
        self.config.sources.clone()
    }

    fn unit_dir(&self, source: &str) -> PathBuf {
        self.scratch.join(source)
    }

    fn check_model_values(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(WorkflowError::step(format!(
                "model '{}' does not exist",
                path.display()
            )));
        }
        if path.is_dir() && !files::has_files(path)? {
            return Err(WorkflowError::step(format!(
                "model directory '{}' is empty",
                path.display()
            )));
        }
        Ok(())
    }

    fn import_model(&self, unit: &UnitOfWork, path: &Path) -> Result<()> {
        files::ensure_dir(&unit.cwd)?;
        files::replace_with_link(path, &Self::model_link(unit))?;
        debug!("[{}] imported model {}", unit.name, path.display());
        Ok(())
    }

    fn forward_simulation(&self, unit: &UnitOfWork, request: &ForwardRequest) -> Result<()> {
        files::ensure_dir(&request.save_traces)?;

        let mut values = Self::unit_placeholders(unit);
        values.push(("{save_traces}", request.save_traces.display().to_string()));
        values.push(("{save_forward}", request.save_forward.to_string()));

        let command = substitute(&self.config.forward, &values);
        run_script(&unit.cwd, "forward", &command)?;

        if let Some(export) = &request.export_traces {
            files::copy_files(&request.save_traces, export)?;
        }
        Ok(())
    }

    fn adjoint_simulation(&self, unit: &UnitOfWork, request: &AdjointRequest) -> Result<()> {
        let template = self
            .config
            .adjoint
            .as_deref()
            .ok_or_else(|| unsupported(self.name(), "adjoint_simulation"))?;
        files::ensure_dir(&request.save_kernels)?;

        let mut values = Self::unit_placeholders(unit);
        values.push(("{adjsrcs}", request.adjsrcs.display().to_string()));
        values.push(("{save_kernels}", request.save_kernels.display().to_string()));

        let command = substitute(template, &values);
        run_script(&unit.cwd, "adjoint", &command)
    }

    fn combine_kernels(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let template = self
            .config
            .combine
            .as_deref()
            .ok_or_else(|| unsupported(self.name(), "combine_kernels"))?;
        files::ensure_dir(output)?;

        let inputs = inputs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(" ");
        let values = [
            ("{inputs}", inputs),
            ("{output}", output.display().to_string()),
        ];

        let command = substitute(template, &values);
        run_script(&self.scratch, "combine", &command)
    }

    fn smooth_kernels(&self, input: &Path, output: &Path) -> Result<()> {
        let Some(template) = self.config.smooth.as_deref() else {
            files::copy_files(input, output)?;
            return Ok(());
        };
        files::ensure_dir(output)?;

        let values = [
            ("{inputs}", input.display().to_string()),
            ("{output}", output.display().to_string()),
        ];
        let command = substitute(template, &values);
        run_script(&self.scratch, "smooth", &command)
    }

    fn set_point_force(&self, unit: &UnitOfWork, force: Force) -> Result<()> {
        files::ensure_dir(&unit.cwd)?;
        let [e, n, z] = force.vector();
        let path = Self::force_file(unit);
        fs::write(&path, format!("{}\n{} {} {}\n", force, e, n, z))
            .map_err(|e| WorkflowError::io(&path, e))?;
        debug!("[{}] point force set to {}", unit.name, force);
        Ok(())
    }
}

/// Replaces every placeholder in `template`.
fn substitute(template: &str, values: &[(&str, String)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |text, (key, value)| text.replace(key, value))
}

/// Writes `command` to a script in `cwd` and runs it with bash.
fn run_script(cwd: &Path, label: &str, command: &str) -> Result<()> {
    let script_path = create_script(cwd, label, command)?;
    let output = execute_with_bash(&script_path, cwd)?;

    if let Err(e) = fs::remove_file(&script_path) {
        warn!("Failed to clean up script {}: {}", script_path.display(), e);
    }

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("'{}' output:\n{}", label, stdout);
        }
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    error!(
        "'{}' in {} failed with exit code: {:?}",
        label,
        cwd.display(),
        output.status.code()
    );
    if !stderr.trim().is_empty() {
        error!("stderr:\n{}", stderr);
    }
    if !stdout.trim().is_empty() {
        debug!("stdout:\n{}", stdout);
    }

    Err(WorkflowError::step(format!(
        "'{}' command failed with exit code {:?}",
        label,
        output.status.code()
    )))
}

fn create_script(cwd: &Path, label: &str, command: &str) -> Result<PathBuf> {
    let script_dir = cwd.join(SCRIPT_DIR);
    files::ensure_dir(&script_dir)?;

    let script_path = script_dir.join(format!("{}.sh", label));
    let write = |path: &Path| -> std::io::Result<()> {
        let mut file = File::create(path)?;
        writeln!(file, "#!/bin/bash")?;
        writeln!(file, "set -e")?;
        writeln!(file, "{}", command)?;
        Ok(())
    };
    write(&script_path).map_err(|e| WorkflowError::io(&script_path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))
            .map_err(|e| WorkflowError::io(&script_path, e))?;
    }

    Ok(script_path)
}

fn execute_with_bash(script_path: &Path, cwd: &Path) -> Result<Output> {
    debug!("Executing in directory: {}", cwd.display());
    Command::new("bash")
        .arg(script_path)
        .current_dir(cwd)
        .output()
        .map_err(|e| WorkflowError::io(script_path, e))
}
