//! Inversion workflow: iterative misfit reduction.
//!
//! Extends the forward workflow with adjoint simulations, kernel
//! postprocessing and a line search driven by the optimizer. The whole task
//! list repeats once per iteration; [`run_iterations`] resets the ledger
//! between iterations.

use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};

use super::engine::{Engine, RunSummary};
use super::forward::{self, EVALUATE_INITIAL_MISFIT, GENERATE_SYNTHETIC_DATA};
use super::ops::{bind, UnitOps, EVALUATE_OBJECTIVE, RUN_ADJOINT, RUN_FORWARD};
use super::pass::{kernel_dir, PassContext};
use super::session::{DispatchScope, Session};
use super::task::{StepFn, Task, Workflow};
use crate::config::InversionOptions;
use crate::error::{Result, WorkflowError};
use crate::files;
use crate::modules::{MisfitKind, Role, RoleSet, SearchStatus, UnitTask};

pub const NAME: &str = "inversion";

pub const RUN_ADJOINT_SIMULATIONS: &str = "run_adjoint_simulations";
pub const POSTPROCESS_EVENT_KERNELS: &str = "postprocess_event_kernels";
pub const EVALUATE_GRADIENT_FROM_KERNELS: &str = "evaluate_gradient_from_kernels";
pub const INITIALIZE_LINE_SEARCH: &str = "initialize_line_search";
pub const PERFORM_LINE_SEARCH: &str = "perform_line_search";
pub const FINALIZE_ITERATION: &str = "finalize_iteration";

/// Evaluates the misfit of a line-search trial and returns the residual
/// files it wrote.
pub type MisfitFn =
    Arc<dyn Fn(&Session, &UnitOps, &PassContext) -> Result<Vec<PathBuf>> + Send + Sync>;

/// Replaceable parts of the inversion workflow.
#[derive(Clone)]
pub struct InversionOps {
    pub units: UnitOps,
    pub line_search_misfit: MisfitFn,
}

impl InversionOps {
    pub fn base() -> Self {
        Self {
            units: UnitOps::base(),
            line_search_misfit: Arc::new(evaluate_line_search_misfit),
        }
    }
}

impl Default for InversionOps {
    fn default() -> Self {
        Self::base()
    }
}

pub fn roles() -> RoleSet {
    forward::roles()
        .require(Role::Preprocess)
        .require(Role::Optimize)
}

/// Builds the inversion workflow: the forward tasks with an iterative
/// initial misfit, followed by the gradient and line-search tasks.
pub fn build(ops: InversionOps) -> Result<Workflow> {
    let mut tasks = forward::build(ops.units.clone())?.tasks().clone();

    tasks.wrap(GENERATE_SYNTHETIC_DATA, |base| {
        let step: StepFn = Arc::new(move |session: &Session| {
            let start = session.config().inversion().start;
            if session.optimize()?.iteration() > start {
                info!("Synthetic data was generated in iteration {}, skipping", start);
                return Ok(());
            }
            base(session)
        });
        step
    })?;

    let units = ops.units.clone();
    tasks.replace(
        EVALUATE_INITIAL_MISFIT,
        Arc::new(move |session: &Session| evaluate_initial_misfit(session, &units)),
    )?;

    let units = ops.units.clone();
    tasks.push(Task::new(RUN_ADJOINT_SIMULATIONS, move |session| {
        let ctx = adjoint_context(session)?;
        run_adjoint_simulations(session, &units, &ctx)
    }))?;
    tasks.push(Task::new(POSTPROCESS_EVENT_KERNELS, postprocess_event_kernels))?;
    tasks.push(Task::new(
        EVALUATE_GRADIENT_FROM_KERNELS,
        evaluate_gradient_from_kernels,
    ))?;
    tasks.push(Task::new(INITIALIZE_LINE_SEARCH, initialize_line_search))?;
    tasks.push(Task::new(PERFORM_LINE_SEARCH, move |session| {
        perform_line_search(session, &ops)
    }))?;
    tasks.push(Task::new(FINALIZE_ITERATION, finalize_iteration))?;

    Ok(Workflow::new(NAME, roles(), tasks)
        .with_check(forward::check)
        .with_check(check)
        .iterative())
}

/// Iteration bounds must be ordered.
pub fn check(session: &Session) -> Result<()> {
    let options = session.config().inversion();
    if options.start == 0 || options.start > options.end {
        return Err(WorkflowError::config(format!(
            "iterations must satisfy 1 <= start <= end, got start={} end={}",
            options.start, options.end
        )));
    }
    Ok(())
}

/// Model of the current iteration.
pub fn current_model(session: &Session) -> Result<PathBuf> {
    match session.optimize()?.current_model() {
        Some(model) => Ok(model),
        None => forward::model_init(session),
    }
}

/// Residual file template for one iteration and line-search step.
pub fn residuals_template(session: &Session, iteration: usize, step: usize, tag: &str) -> String {
    let name = if tag.is_empty() {
        format!("residuals_{{src}}_{}_{}.txt", iteration, step)
    } else {
        format!("residuals_{{src}}_{}_{}_{}.txt", iteration, step, tag)
    };
    session
        .paths()
        .eval_grad
        .join("residuals")
        .join(name)
        .display()
        .to_string()
}

/// Residual files of `ctx` that units actually wrote.
pub fn residual_files(session: &Session, ctx: &PassContext) -> Result<Vec<PathBuf>> {
    Ok(session
        .units()?
        .iter()
        .filter_map(|unit| ctx.residuals_file(unit))
        .filter(|path| path.exists())
        .collect())
}

/// Hands residual files to the optimizer.
pub fn record_misfit(session: &Session, residuals: &[PathBuf], kind: MisfitKind) -> Result<f64> {
    if residuals.is_empty() {
        return Err(WorkflowError::step(
            "no residual files were written, cannot compute the misfit",
        ));
    }
    let misfit = session.optimize()?.record_misfit(residuals, kind)?;
    info!(
        "Misfit of {:?} model from {} residual files: {:.6e}",
        kind,
        residuals.len(),
        misfit
    );
    Ok(misfit)
}

fn evaluate_initial_misfit(session: &Session, units: &UnitOps) -> Result<()> {
    let optimizer = session.optimize()?;
    let iteration = optimizer.iteration();

    let ctx = PassContext::new(current_model(session)?)
        .save_forward(true)
        .iteration(iteration, 0)
        .save_residuals(residuals_template(session, iteration, 0, ""))?;

    forward::evaluate_misfit(session, units, &ctx)?;
    record_misfit(session, &residual_files(session, &ctx)?, MisfitKind::Current)?;
    Ok(())
}

fn adjoint_context(session: &Session) -> Result<PassContext> {
    let iteration = session.optimize()?.iteration();
    Ok(PassContext::new(current_model(session)?).iteration(iteration, 0))
}

/// Runs the adjoint operation for every unit.
pub fn run_adjoint_simulations(session: &Session, units: &UnitOps, ctx: &PassContext) -> Result<()> {
    let task = bind(RUN_ADJOINT, &units.run_adjoint, session, ctx);
    session.submit(&[task], DispatchScope::AllUnits)
}

/// Sums the event kernels of every unit and smooths the sum into the
/// gradient directory.
pub fn postprocess_event_kernels(session: &Session) -> Result<()> {
    let eval_grad = session.paths().eval_grad.clone();
    let inputs: Vec<PathBuf> = session
        .units()?
        .iter()
        .map(|unit| kernel_dir(&eval_grad, &unit.name, None))
        .collect();
    let sum = summed_kernels_dir(session);
    let gradient = gradient_dir(session);

    files::clear_files(&sum)?;
    files::clear_files(&gradient)?;

    let solver = Arc::clone(session.solver()?);
    let task = UnitTask::new("combine_and_smooth_kernels", move |_unit| {
        info!("Combining {} event kernels into {}", inputs.len(), sum.display());
        solver.combine_kernels(&inputs, &sum)?;
        info!("Smoothing kernels into {}", gradient.display());
        solver.smooth_kernels(&sum, &gradient)
    });

    session.submit(&[task], DispatchScope::FirstUnit)
}

/// Directory of the summed event kernels.
pub fn summed_kernels_dir(session: &Session) -> PathBuf {
    session.paths().eval_grad.join("sum")
}

/// Directory of the smoothed gradient.
pub fn gradient_dir(session: &Session) -> PathBuf {
    session.paths().eval_grad.join("gradient")
}

fn evaluate_gradient_from_kernels(session: &Session) -> Result<()> {
    session.optimize()?.compute_direction(&gradient_dir(session))
}

fn initialize_line_search(session: &Session) -> Result<()> {
    session.optimize()?.initialize_search()
}

fn evaluate_line_search_misfit(
    session: &Session,
    units: &UnitOps,
    ctx: &PassContext,
) -> Result<Vec<PathBuf>> {
    let tasks = [
        bind(RUN_FORWARD, &units.run_forward, session, ctx),
        bind(EVALUATE_OBJECTIVE, &units.evaluate_objective, session, ctx),
    ];
    session.submit(&tasks, DispatchScope::AllUnits)?;
    residual_files(session, ctx)
}

/// Evaluates trial models until the optimizer accepts one.
///
/// A failed search is restarted once; a second failure fails the task.
fn perform_line_search(session: &Session, ops: &InversionOps) -> Result<()> {
    let optimizer = session.optimize()?;
    let mut restarted = false;

    loop {
        let iteration = optimizer.iteration();
        // trials count from 1; step 0 is the current model
        let step = optimizer.step_count() + 1;
        info!("Line search iteration {}, trial step {}", iteration, step);

        let ctx = PassContext::new(optimizer.trial_model()?)
            .iteration(iteration, step)
            .save_residuals(residuals_template(session, iteration, step, ""))?;

        let residuals = (ops.line_search_misfit)(session, &ops.units, &ctx)?;
        record_misfit(session, &residuals, MisfitKind::Trial)?;

        match optimizer.update_search()? {
            SearchStatus::Pass => {
                info!("Trial step {} accepted", step);
                optimizer.finalize_search()?;
                return Ok(());
            }
            SearchStatus::Try => continue,
            SearchStatus::Fail if restarted => {
                return Err(WorkflowError::step(format!(
                    "line search failed in iteration {} after a restart",
                    iteration
                )));
            }
            SearchStatus::Fail => {
                warn!("Line search failed in iteration {}, restarting", iteration);
                optimizer.restart()?;
                optimizer.initialize_search()?;
                restarted = true;
            }
        }
    }
}

/// Clears synthetic traces and adjoint sources; observations stay.
fn finalize_iteration(session: &Session) -> Result<()> {
    let task = UnitTask::new("clean_traces", |unit| {
        for dir in files::list_dirs(&unit.cwd.join("traces"))? {
            if dir.file_name().is_some_and(|name| name == "obs") {
                continue;
            }
            files::clear_files(&dir)?;
        }
        Ok(())
    });
    session.submit(&[task], DispatchScope::AllUnits)?;
    info!("Finalized iteration {}", session.optimize()?.iteration());
    Ok(())
}

/// Runs the workflow once, or once per iteration for iterative variants.
///
/// An optimizer behind the configured first iteration is moved up to it;
/// one already past it (a resumed inversion) keeps its iteration.
///
/// Between iterations the ledger is reset and saved before the optimizer
/// advances, so a crash in between repeats the finished iteration instead
/// of skipping the next one.
pub fn run_iterations(engine: &mut Engine) -> Result<Vec<RunSummary>> {
    if !engine.workflow().is_iterative() {
        return Ok(vec![engine.run()?]);
    }

    let optimizer = Arc::clone(engine.session().optimize()?);
    let InversionOptions { start, end } = engine.session().config().inversion().clone();
    let mut summaries = Vec::new();

    if optimizer.iteration() < start {
        info!("Starting inversion at iteration {}", start);
        optimizer.start_at(start)?;
    }

    loop {
        let iteration = optimizer.iteration();
        if iteration > end {
            info!("Iteration {} is past the last iteration {}, nothing to do", iteration, end);
            break;
        }

        info!("Starting iteration {} of {}", iteration, end);
        engine.timeline_mut().set_iteration(Some(iteration));
        let summary = engine.run()?;
        let stopped = summary.stopped_after.is_some();
        summaries.push(summary);

        if stopped || iteration >= end {
            break;
        }

        engine.reset_ledger();
        engine.checkpoint()?;
        optimizer.advance_iteration()?;
    }

    Ok(summaries)
}
