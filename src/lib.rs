//! Simflow - Resumable Simulation Workflow Engine
//!
//! Runs multi-stage simulation pipelines (forward modelling, iterative
//! inversion, ambient-noise inversion) as ordered task lists, recording
//! the status of every task in a plain-text ledger so an interrupted run
//! resumes where it stopped.
//!
//! # Architecture
//!
//! - [`config`]: immutable run configuration and parameter files
//! - [`ledger`]: the checkpoint file
//! - [`modules`]: pluggable roles (dispatcher, solver, processing, optimizer)
//! - [`workflow`]: task lists, variants and the execution engine
//! - [`monitoring`]: execution timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use simflow::config::load_parameters;
//! use simflow::modules::{CapabilityBundle, CommandSolver, ThreadDispatcher};
//! use simflow::workflow::{run_iterations, Engine, Variant};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let params = load_parameters("parameters.yaml")?;
//!     let config = params.configuration(&std::env::current_dir()?);
//!     let workflow = Variant::from_name(&params.workflow.variant)?.build(&config)?;
//!
//!     let solver = CommandSolver::new(
//!         params.solver.clone().unwrap_or_default(),
//!         config.paths().solver_scratch(),
//!     );
//!     let modules = CapabilityBundle::new()
//!         .with_dispatcher(Arc::new(ThreadDispatcher::new(4)))
//!         .with_solver(Arc::new(solver));
//!
//!     let mut engine = Engine::new(workflow, config, modules)?;
//!     engine.check()?;
//!     engine.setup()?;
//!     run_iterations(&mut engine)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod files;
pub mod ledger;
pub mod modules;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use config::{load_parameters, Configuration};
pub use error::{Result, WorkflowError};
pub use ledger::{Ledger, TaskStatus};
pub use workflow::{Engine, Variant, Workflow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Simflow";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "Simflow");
    }

    #[test]
    fn test_module_exports_variant() {
        let config = Configuration::builder("/run").build();
        let workflow = Variant::Forward.build(&config).unwrap();
        assert_eq!(workflow.name(), "forward");
        assert_eq!(workflow.tasks().len(), 2);
    }
}
