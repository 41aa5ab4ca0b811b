//! Unit operations.
//!
//! The per-unit building blocks of the simulation variants. [`UnitOps`] is
//! a record of named function values; a variant starts from
//! [`UnitOps::base`] and replaces entries, usually with a function that
//! calls the base entry around its own work.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use super::pass::{kernel_dir, trace_dir, PassContext};
use super::session::Session;
use crate::error::{Result, WorkflowError};
use crate::files;
use crate::modules::{AdjointRequest, ForwardRequest, MisfitRequest, UnitOfWork, UnitTask};

/// An operation run once per unit.
pub type UnitFn = Arc<dyn Fn(&Session, &UnitOfWork, &PassContext) -> Result<()> + Send + Sync>;

pub const PREPARE_DATA: &str = "prepare_data_for_solver";
pub const RUN_FORWARD: &str = "run_forward_simulations";
pub const EVALUATE_OBJECTIVE: &str = "evaluate_objective_function";
pub const RUN_ADJOINT: &str = "run_adjoint_simulation";

#[derive(Clone)]
pub struct UnitOps {
    pub prepare_data: UnitFn,
    pub run_forward: UnitFn,
    pub evaluate_objective: UnitFn,
    pub run_adjoint: UnitFn,
}

impl UnitOps {
    /// Single-pass behavior shared by every variant.
    pub fn base() -> Self {
        Self {
            prepare_data: Arc::new(prepare_data),
            run_forward: Arc::new(run_forward),
            evaluate_objective: Arc::new(evaluate_objective),
            run_adjoint: Arc::new(run_adjoint),
        }
    }
}

impl Default for UnitOps {
    fn default() -> Self {
        Self::base()
    }
}

/// Binds an operation to a session and context so a dispatcher can run it.
pub fn bind(name: &str, op: &UnitFn, session: &Session, ctx: &PassContext) -> UnitTask {
    let op = Arc::clone(op);
    let session = session.clone();
    let ctx = ctx.clone();
    UnitTask::new(name, move |unit| op(&session, unit, &ctx))
}

/// Links every file found in `src_dirs` into the unit's observation directory.
///
/// Finding no file is fatal for the whole run.
pub fn link_observations(unit: &UnitOfWork, src_dirs: &[PathBuf]) -> Result<usize> {
    let obs = trace_dir(unit, "obs", None);
    files::ensure_dir(&obs)?;

    let mut sources = Vec::new();
    for dir in src_dirs {
        debug!("[{}] looking for data in '{}'", unit.name, dir.display());
        sources.extend(files::list_files(dir)?);
    }

    if sources.is_empty() {
        let pattern = src_dirs
            .iter()
            .map(|d| d.join("*").display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(WorkflowError::MissingData {
            unit: unit.name.clone(),
            pattern,
        });
    }

    for src in &sources {
        files::link_into(src, &obs)?;
    }
    Ok(sources.len())
}

fn prepare_data(session: &Session, unit: &UnitOfWork, _ctx: &PassContext) -> Result<()> {
    let obs = trace_dir(unit, "obs", None);
    if files::has_files(&obs)? {
        warn!(
            "Data already found in {}/traces/obs, skipping data preparation",
            unit.name
        );
        return Ok(());
    }

    info!("Preparing observation data for source {}", unit.name);
    let src = session.paths().data.join(&unit.name);
    link_observations(unit, &[src])?;
    Ok(())
}

/// Runs a forward simulation through `ctx.model`, saving traces in
/// `save_traces`.
pub fn forward_into(
    session: &Session,
    unit: &UnitOfWork,
    ctx: &PassContext,
    save_traces: &Path,
    export: bool,
) -> Result<()> {
    let solver = session.solver()?;
    if !ctx.model.exists() {
        return Err(WorkflowError::step(format!(
            "model '{}' for the forward simulation does not exist",
            ctx.model.display()
        )));
    }

    solver.import_model(unit, &ctx.model)?;

    let export_traces = (export && session.config().export_traces())
        .then(|| session.paths().output.join("solver").join(&unit.name).join("syn"));

    debug!(
        "[{}] forward simulation with '{}'",
        unit.name,
        solver.name()
    );
    solver.forward_simulation(
        unit,
        &ForwardRequest {
            save_traces: save_traces.to_path_buf(),
            export_traces,
            save_forward: ctx.save_forward,
        },
    )
}

fn run_forward(session: &Session, unit: &UnitOfWork, ctx: &PassContext) -> Result<()> {
    info!("Running forward simulation for source {}", unit.name);
    forward_into(session, unit, ctx, &trace_dir(unit, "syn", None), true)
}

fn evaluate_objective(session: &Session, unit: &UnitOfWork, ctx: &PassContext) -> Result<()> {
    let Some(preprocess) = session.preprocess() else {
        debug!("No processing module, not evaluating the objective function");
        return Ok(());
    };

    let save_residuals = ctx.residuals_file(unit);
    if let Some(parent) = save_residuals.as_deref().and_then(Path::parent) {
        files::ensure_dir(parent)?;
    }
    let export_residuals = session
        .config()
        .export_residuals()
        .then(|| session.paths().output.join("residuals"));

    preprocess.quantify_misfit(
        unit,
        &MisfitRequest {
            obs_dir: trace_dir(unit, "obs", None),
            syn_dir: trace_dir(unit, "syn", None),
            save_adjsrcs: trace_dir(unit, "adj", None),
            save_residuals,
            export_residuals,
            components: ctx.components.clone(),
            iteration: ctx.iteration,
            step_count: ctx.step_count,
        },
    )
}

fn run_adjoint(session: &Session, unit: &UnitOfWork, ctx: &PassContext) -> Result<()> {
    let save_kernels = kernel_dir(
        &session.paths().eval_grad,
        &unit.name,
        ctx.kernel_subdir.as_deref(),
    );
    info!("Running adjoint simulation for source {}", unit.name);

    session.solver()?.adjoint_simulation(
        unit,
        &AdjointRequest {
            adjsrcs: trace_dir(unit, "adj", None),
            save_kernels,
        },
    )
}
