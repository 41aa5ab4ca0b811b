//! Shared handle passed to every step.

use std::sync::Arc;

use log::debug;

use crate::config::{Configuration, PathSet};
use crate::error::{Result, WorkflowError};
use crate::modules::{
    CapabilityBundle, Dispatcher, Optimizer, Processing, Role, SimulationDriver, UnitOfWork,
    UnitTask,
};

/// Which units a submission runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchScope {
    /// Every source of the solver
    AllUnits,
    /// Only the first source, for work that needs one representative unit
    FirstUnit,
}

/// Configuration and modules of a workflow, as seen by its steps.
///
/// Cloning is cheap; clones share the same configuration and modules.
#[derive(Clone)]
pub struct Session {
    workflow: Arc<str>,
    config: Arc<Configuration>,
    modules: CapabilityBundle,
}

impl Session {
    pub fn new(
        workflow: &str,
        config: Arc<Configuration>,
        modules: CapabilityBundle,
    ) -> Self {
        Self {
            workflow: Arc::from(workflow),
            config,
            modules,
        }
    }

    /// Name of the workflow variant.
    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn paths(&self) -> &PathSet {
        self.config.paths()
    }

    pub fn modules(&self) -> &CapabilityBundle {
        &self.modules
    }

    fn missing(&self, role: Role) -> WorkflowError {
        WorkflowError::MissingRole {
            role: role.to_string(),
            workflow: self.workflow.to_string(),
        }
    }

    pub fn dispatcher(&self) -> Result<&Arc<dyn Dispatcher>> {
        self.modules
            .dispatcher()
            .ok_or_else(|| self.missing(Role::Dispatcher))
    }

    pub fn solver(&self) -> Result<&Arc<dyn SimulationDriver>> {
        self.modules.solver().ok_or_else(|| self.missing(Role::Solver))
    }

    /// The processing module; absent is legal.
    pub fn preprocess(&self) -> Option<&Arc<dyn Processing>> {
        self.modules.preprocess()
    }

    /// The processing module, for steps that cannot work without one.
    pub fn require_preprocess(&self) -> Result<&Arc<dyn Processing>> {
        self.preprocess()
            .ok_or_else(|| self.missing(Role::Preprocess))
    }

    pub fn optimize(&self) -> Result<&Arc<dyn Optimizer>> {
        self.modules
            .optimize()
            .ok_or_else(|| self.missing(Role::Optimize))
    }

    /// One unit of work per solver source, in source order.
    pub fn units(&self) -> Result<Vec<UnitOfWork>> {
        let solver = self.solver()?;
        Ok(solver
            .source_names()
            .into_iter()
            .enumerate()
            .map(|(index, name)| {
                let cwd = solver.unit_dir(&name);
                UnitOfWork::new(index, name, cwd)
            })
            .collect())
    }

    /// Runs `tasks` through the dispatcher for the units in `scope`.
    pub fn submit(&self, tasks: &[UnitTask], scope: DispatchScope) -> Result<()> {
        let mut units = self.units()?;
        if scope == DispatchScope::FirstUnit {
            units.truncate(1);
        }
        debug!("Dispatching {} tasks over {} units", tasks.len(), units.len());
        self.dispatcher()?.submit(&units, tasks)
    }
}
