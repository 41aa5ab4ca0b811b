//! Forward workflow: a single pass of forward simulations and, when a
//! processing module is present, misfit evaluation against observations.

use std::path::PathBuf;

use log::info;

use super::ops::{bind, forward_into, UnitOps, EVALUATE_OBJECTIVE, PREPARE_DATA, RUN_FORWARD};
use super::pass::{trace_dir, PassContext};
use super::session::{DispatchScope, Session};
use super::task::{TaskList, Workflow};
use crate::error::{Result, WorkflowError};
use crate::files;
use crate::modules::{Role, RoleSet, UnitTask};

pub const NAME: &str = "forward";

pub const GENERATE_SYNTHETIC_DATA: &str = "generate_synthetic_data";
pub const EVALUATE_INITIAL_MISFIT: &str = "evaluate_initial_misfit";

pub fn roles() -> RoleSet {
    RoleSet::new(&[Role::Dispatcher, Role::Solver], &[Role::Preprocess])
}

/// Builds the forward workflow around the given unit operations.
pub fn build(ops: UnitOps) -> Result<Workflow> {
    let misfit_ops = ops.clone();
    let tasks = TaskList::new()
        .with(GENERATE_SYNTHETIC_DATA, generate_synthetic_data)?
        .with(EVALUATE_INITIAL_MISFIT, move |session| {
            let ctx = initial_context(session)?;
            evaluate_misfit(session, &misfit_ops, &ctx)
        })?;

    Ok(Workflow::new(NAME, roles(), tasks).with_check(check))
}

/// Path checks shared by every simulation variant.
pub fn check(session: &Session) -> Result<()> {
    let paths = session.paths();

    // a run stopping after data generation never reads the initial model
    if session.config().stop_after() != Some(GENERATE_SYNTHETIC_DATA) {
        let model_init = paths
            .model_init
            .as_ref()
            .ok_or_else(|| WorkflowError::config("`model_init` is required"))?;
        if !model_init.exists() {
            return Err(WorkflowError::config(format!(
                "`model_init` '{}' does not exist",
                model_init.display()
            )));
        }
    }

    if session.preprocess().is_some() && session.config().generate_data() {
        let exists = paths.model_true.as_ref().is_some_and(|p| p.exists());
        if !exists {
            return Err(WorkflowError::config(
                "option `generate_data` requires `model_true` to exist, which points to a target model",
            ));
        }
    }
    Ok(())
}

/// Model of the initial misfit evaluation.
pub fn model_init(session: &Session) -> Result<PathBuf> {
    session
        .paths()
        .model_init
        .clone()
        .ok_or_else(|| WorkflowError::config("`model_init` is required"))
}

fn initial_context(session: &Session) -> Result<PassContext> {
    let residuals = session
        .paths()
        .eval_grad
        .join("residuals")
        .join("residuals_{src}.txt");
    PassContext::new(model_init(session)?).save_residuals(residuals.display().to_string())
}

/// Simulates through the target model to create observations.
///
/// Traces are saved under `data/<source>` and linked into every unit's
/// observation directory. Does nothing unless `generate_data` is set.
pub fn generate_synthetic_data(session: &Session) -> Result<()> {
    if !session.config().generate_data() {
        info!("`generate_data` is off, using observations in {}", session.paths().data.display());
        return Ok(());
    }

    info!("Generating synthetic data with the target model");
    let model_true = session
        .paths()
        .model_true
        .clone()
        .ok_or_else(|| WorkflowError::config("`generate_data` requires `model_true`"))?;
    session.solver()?.check_model_values(&model_true)?;

    let ctx = PassContext::new(model_true);
    let data = session.paths().data.clone();
    let inner = session.clone();

    let task = UnitTask::new(GENERATE_SYNTHETIC_DATA, move |unit| {
        let save_traces = data.join(&unit.name);
        forward_into(&inner, unit, &ctx, &save_traces, false)?;

        let obs = trace_dir(unit, "obs", None);
        files::ensure_dir(&obs)?;
        for trace in files::list_files(&save_traces)? {
            files::link_into(&trace, &obs)?;
        }
        Ok(())
    });

    session.submit(&[task], DispatchScope::AllUnits)
}

/// Prepares data, simulates and evaluates the misfit for every unit.
///
/// Without a processing module only the forward simulation runs.
pub fn evaluate_misfit(session: &Session, ops: &UnitOps, ctx: &PassContext) -> Result<()> {
    info!(
        "Evaluating misfit for model {}",
        ctx.model.display()
    );
    session.solver()?.check_model_values(&ctx.model)?;

    let tasks = if session.preprocess().is_some() {
        vec![
            bind(PREPARE_DATA, &ops.prepare_data, session, ctx),
            bind(RUN_FORWARD, &ops.run_forward, session, ctx),
            bind(EVALUATE_OBJECTIVE, &ops.evaluate_objective, session, ctx),
        ]
    } else {
        vec![bind(RUN_FORWARD, &ops.run_forward, session, ctx)]
    };

    session.submit(&tasks, DispatchScope::AllUnits)
}
