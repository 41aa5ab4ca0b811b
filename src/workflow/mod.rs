//! Workflow Definition and Execution
//!
//! Variants, the task lists they are made of, and the engine that runs
//! them with checkpointing.
//!
//! # Structure
//!
//! - [`task`]: named steps, task lists and the workflow record
//! - [`session`]: configuration and modules as seen by a step
//! - [`pass`]: per-pass context handed to unit operations
//! - [`ops`]: per-unit operations shared by the variants
//! - [`engine`]: the check/setup/run loop
//! - [`forward`], [`inversion`], [`noise`]: the variants
//! - [`variant`]: variant lookup by name

pub mod engine;
pub mod forward;
pub mod inversion;
pub mod noise;
pub mod ops;
pub mod pass;
pub mod session;
pub mod task;
pub mod variant;

pub use engine::{Engine, RunSummary};
pub use inversion::{run_iterations, InversionOps};
pub use noise::KernelSet;
pub use ops::{UnitFn, UnitOps};
pub use pass::PassContext;
pub use session::{DispatchScope, Session};
pub use task::{CheckFn, StepFn, Task, TaskList, Workflow};
pub use variant::Variant;
