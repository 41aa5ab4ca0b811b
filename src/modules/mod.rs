//! Capability Modules
//!
//! Pluggable collaborators the engine drives: a dispatcher that fans work
//! out across units, a simulation driver, an optional processing module
//! and, for iterative variants, an optimizer. Modules are injected
//! explicitly through a [`CapabilityBundle`]; nothing is looked up by name
//! at run time.
//!
//! # Structure
//!
//! - [`dispatch`]: the dispatcher contract and two reference dispatchers
//! - [`solver`]: the simulation driver contract and a command-based driver
//! - [`processing`]: the misfit/processing contract
//! - [`optimize`]: the optimizer contract used by iterative variants

pub mod dispatch;
pub mod optimize;
pub mod processing;
pub mod solver;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};

pub use dispatch::{Dispatcher, SerialDispatcher, ThreadDispatcher, UnitOfWork, UnitTask};
pub use optimize::{sum_residuals, MisfitKind, Optimizer, SearchStatus};
pub use processing::{rotated_adj_dir, Component, MisfitRequest, Processing, RotationRequest};
pub use solver::{
    AdjointRequest, CommandSolver, CommandSolverConfig, Force, ForwardRequest, SimulationDriver,
};

/// Behavior shared by every module.
pub trait Module: Send + Sync {
    /// Name used in log messages.
    fn name(&self) -> &str;

    /// Validates module-specific state; must fail on anything invalid.
    fn check(&self) -> Result<()> {
        Ok(())
    }

    /// Prepares the module before the first task runs.
    fn setup(&self) -> Result<()> {
        Ok(())
    }
}

/// Named slot a module fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Dispatcher,
    Solver,
    Preprocess,
    Optimize,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dispatcher => "dispatcher",
            Self::Solver => "solver",
            Self::Preprocess => "preprocess",
            Self::Optimize => "optimize",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Required and optional roles of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet {
    required: Vec<Role>,
    optional: Vec<Role>,
}

impl RoleSet {
    pub fn new(required: &[Role], optional: &[Role]) -> Self {
        let mut set = Self::default();
        for role in optional {
            set = set.allow(*role);
        }
        for role in required {
            set = set.require(*role);
        }
        set
    }

    /// Makes a role required, moving it out of the optional set.
    pub fn require(mut self, role: Role) -> Self {
        self.optional.retain(|r| *r != role);
        if !self.required.contains(&role) {
            self.required.push(role);
        }
        self
    }

    /// Adds an optional role unless it is already required.
    pub fn allow(mut self, role: Role) -> Self {
        if !self.required.contains(&role) && !self.optional.contains(&role) {
            self.optional.push(role);
        }
        self
    }

    pub fn required(&self) -> &[Role] {
        &self.required
    }

    pub fn optional(&self) -> &[Role] {
        &self.optional
    }
}

/// Module instances keyed by role.
#[derive(Clone, Default)]
pub struct CapabilityBundle {
    dispatcher: Option<Arc<dyn Dispatcher>>,
    solver: Option<Arc<dyn SimulationDriver>>,
    preprocess: Option<Arc<dyn Processing>>,
    optimize: Option<Arc<dyn Optimizer>>,
}

impl CapabilityBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dispatcher(mut self, module: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(module);
        self
    }

    pub fn with_solver(mut self, module: Arc<dyn SimulationDriver>) -> Self {
        self.solver = Some(module);
        self
    }

    pub fn with_preprocess(mut self, module: Arc<dyn Processing>) -> Self {
        self.preprocess = Some(module);
        self
    }

    pub fn with_optimize(mut self, module: Arc<dyn Optimizer>) -> Self {
        self.optimize = Some(module);
        self
    }

    pub fn dispatcher(&self) -> Option<&Arc<dyn Dispatcher>> {
        self.dispatcher.as_ref()
    }

    pub fn solver(&self) -> Option<&Arc<dyn SimulationDriver>> {
        self.solver.as_ref()
    }

    pub fn preprocess(&self) -> Option<&Arc<dyn Processing>> {
        self.preprocess.as_ref()
    }

    pub fn optimize(&self) -> Option<&Arc<dyn Optimizer>> {
        self.optimize.as_ref()
    }

    pub fn is_present(&self, role: Role) -> bool {
        match role {
            Role::Dispatcher => self.dispatcher.is_some(),
            Role::Solver => self.solver.is_some(),
            Role::Preprocess => self.preprocess.is_some(),
            Role::Optimize => self.optimize.is_some(),
        }
    }

    /// Name of the module filling `role`, if any.
    pub fn module_name(&self, role: Role) -> Option<&str> {
        match role {
            Role::Dispatcher => self.dispatcher.as_ref().map(|m| m.name()),
            Role::Solver => self.solver.as_ref().map(|m| m.name()),
            Role::Preprocess => self.preprocess.as_ref().map(|m| m.name()),
            Role::Optimize => self.optimize.as_ref().map(|m| m.name()),
        }
    }

    /// Runs the `check()` of the module filling `role`.
    ///
    /// Returns `None` when the role is empty.
    pub fn check_role(&self, role: Role) -> Option<Result<()>> {
        match role {
            Role::Dispatcher => self.dispatcher.as_ref().map(|m| m.check()),
            Role::Solver => self.solver.as_ref().map(|m| m.check()),
            Role::Preprocess => self.preprocess.as_ref().map(|m| m.check()),
            Role::Optimize => self.optimize.as_ref().map(|m| m.check()),
        }
    }

    /// Runs the `setup()` of the module filling `role`.
    pub fn setup_role(&self, role: Role) -> Option<Result<()>> {
        match role {
            Role::Dispatcher => self.dispatcher.as_ref().map(|m| m.setup()),
            Role::Solver => self.solver.as_ref().map(|m| m.setup()),
            Role::Preprocess => self.preprocess.as_ref().map(|m| m.setup()),
            Role::Optimize => self.optimize.as_ref().map(|m| m.setup()),
        }
    }
}

impl fmt::Debug for CapabilityBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityBundle")
            .field("dispatcher", &self.module_name(Role::Dispatcher))
            .field("solver", &self.module_name(Role::Solver))
            .field("preprocess", &self.module_name(Role::Preprocess))
            .field("optimize", &self.module_name(Role::Optimize))
            .finish()
    }
}

/// Error for a module method the implementation does not provide.
pub(crate) fn unsupported(module: &str, operation: &str) -> WorkflowError {
    WorkflowError::config(format!(
        "module '{}' does not support '{}'",
        module, operation
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_names() {
        assert_eq!(Role::Dispatcher.to_string(), "dispatcher");
        assert_eq!(Role::Preprocess.as_str(), "preprocess");
    }

    #[test]
    fn test_roleset_require_moves_optional() {
        let roles = RoleSet::new(&[Role::Dispatcher, Role::Solver], &[Role::Preprocess])
            .require(Role::Preprocess)
            .require(Role::Optimize);

        assert_eq!(
            roles.required(),
            &[Role::Dispatcher, Role::Solver, Role::Preprocess, Role::Optimize]
        );
        assert!(roles.optional().is_empty());
    }

    #[test]
    fn test_roleset_allow_ignores_required() {
        let roles = RoleSet::new(&[Role::Solver], &[]).allow(Role::Solver).allow(Role::Preprocess);
        assert_eq!(roles.required(), &[Role::Solver]);
        assert_eq!(roles.optional(), &[Role::Preprocess]);
    }

    #[test]
    fn test_empty_bundle() {
        let bundle = CapabilityBundle::new();
        for role in [Role::Dispatcher, Role::Solver, Role::Preprocess, Role::Optimize] {
            assert!(!bundle.is_present(role));
            assert!(bundle.check_role(role).is_none());
            assert!(bundle.setup_role(role).is_none());
        }
    }

    #[test]
    fn test_bundle_with_dispatcher() {
        let bundle = CapabilityBundle::new().with_dispatcher(Arc::new(SerialDispatcher));
        assert!(bundle.is_present(Role::Dispatcher));
        assert_eq!(bundle.module_name(Role::Dispatcher), Some("serial"));
        assert!(matches!(bundle.check_role(Role::Dispatcher), Some(Ok(()))));
        assert!(format!("{:?}", bundle).contains("serial"));
    }
}
