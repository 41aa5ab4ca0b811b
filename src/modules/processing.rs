//! Processing Module
//!
//! Compares synthetic against observed traces, writes residuals and
//! adjoint sources. Rotation between N/E and R/T components is only needed
//! by the noise variant and is optional for implementations.

use std::fmt;
use std::path::{Path, PathBuf};

use super::dispatch::UnitOfWork;
use super::{unsupported, Module};
use crate::error::Result;

/// Trace component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Z,
    N,
    E,
    R,
    T,
}

impl Component {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Z => "Z",
            Self::N => "N",
            Self::E => "E",
            Self::R => "R",
            Self::T => "T",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One misfit evaluation for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MisfitRequest {
    pub obs_dir: PathBuf,
    pub syn_dir: PathBuf,
    /// Directory receiving the adjoint sources
    pub save_adjsrcs: PathBuf,
    /// File receiving the residuals of this unit
    pub save_residuals: Option<PathBuf>,
    /// Directory the residual file is copied to
    pub export_residuals: Option<PathBuf>,
    /// Restricts the evaluation to these components
    pub components: Option<Vec<Component>>,
    pub iteration: usize,
    pub step_count: usize,
}

/// Rotation of N/E synthetics into R/T synthetics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationRequest {
    pub syn_n: PathBuf,
    pub syn_e: PathBuf,
    /// Directory receiving the rotated traces
    pub output: PathBuf,
    pub components: Vec<Component>,
}

/// Misfit quantification and trace manipulation.
pub trait Processing: Module {
    fn quantify_misfit(&self, unit: &UnitOfWork, request: &MisfitRequest) -> Result<()>;

    /// True when the `rotate_*` operations are implemented.
    fn supports_rotation(&self) -> bool {
        false
    }

    fn rotate_ne_to_rt(&self, _unit: &UnitOfWork, _request: &RotationRequest) -> Result<()> {
        Err(unsupported(self.name(), "rotate_ne_to_rt"))
    }

    /// Rotates the `component` adjoint sources in `adj_dir` back to N and E.
    ///
    /// Writes `adj_n<c>` and `adj_e<c>` directories next to `adj_dir`,
    /// e.g. `adj_nt` and `adj_et` for the transverse component.
    fn rotate_rt_adjsrcs_to_ne(
        &self,
        _unit: &UnitOfWork,
        _adj_dir: &Path,
        _component: Component,
    ) -> Result<()> {
        Err(unsupported(self.name(), "rotate_rt_adjsrcs_to_ne"))
    }

    /// Writes zero-amplitude adjoint sources for `components`.
    fn write_zero_adjsrcs(
        &self,
        _unit: &UnitOfWork,
        _adj_dir: &Path,
        _components: &[Component],
    ) -> Result<()> {
        Err(unsupported(self.name(), "write_zero_adjsrcs"))
    }
}

/// Directory name of rotated adjoint sources, e.g. `adj_et`.
pub fn rotated_adj_dir(force: super::solver::Force, component: Component) -> String {
    format!(
        "adj_{}{}",
        force.as_str().to_lowercase(),
        component.as_str().to_lowercase()
    )
}
