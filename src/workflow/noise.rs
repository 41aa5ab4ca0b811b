//! Noise workflow: inversion of ambient-noise cross-correlations.
//!
//! Kernels are built from point-force simulations. A `ZZ` kernel needs one
//! vertical force pass; `TT` and `RR` kernels need an east and a north
//! force pass whose synthetics are rotated to R/T before the misfit is
//! taken, and one adjoint simulation per force and component. Each
//! sub-pass is described by its own [`PassContext`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

use super::forward;
use super::inversion::{
    self, current_model, record_misfit, residual_files, residuals_template,
    run_adjoint_simulations, InversionOps, POSTPROCESS_EVENT_KERNELS,
};
use super::ops::{
    forward_into, link_observations, UnitFn, UnitOps, EVALUATE_OBJECTIVE, PREPARE_DATA,
    RUN_ADJOINT, RUN_FORWARD,
};
use super::pass::{kernel_dir, trace_dir, PassContext};
use super::session::{DispatchScope, Session};
use super::task::{StepFn, Task, TaskList, Workflow};
use crate::error::{Result, WorkflowError};
use crate::files;
use crate::modules::{
    rotated_adj_dir, Component, Force, MisfitKind, RotationRequest, SimulationDriver, UnitOfWork,
    UnitTask,
};

pub const NAME: &str = "noise";

pub const GENERATE_ZZ_KERNELS: &str = "generate_zz_kernels";
pub const GENERATE_TT_RR_KERNELS: &str = "generate_tt_rr_kernels";

const ZZ_TAG: &str = "zz";
const RT_TAG: &str = "rt";

/// Requested kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KernelSet {
    pub zz: bool,
    pub tt: bool,
    pub rr: bool,
}

impl KernelSet {
    /// Parses a comma-separated list such as `ZZ,TT`, ignoring case and
    /// surrounding whitespace.
    pub fn parse(list: &str) -> Result<Self> {
        let mut kernels = Self::default();
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match name.to_uppercase().as_str() {
                "ZZ" => kernels.zz = true,
                "TT" => kernels.tt = true,
                "RR" => kernels.rr = true,
                other => {
                    return Err(WorkflowError::config(format!(
                        "unknown noise kernel '{}', expected a subset of ZZ, TT, RR",
                        other
                    )))
                }
            }
        }
        if kernels == Self::default() {
            return Err(WorkflowError::config("`kernels` must name at least one kernel"));
        }
        Ok(kernels)
    }

    /// True when a TT or RR kernel needs the rotated N/E passes.
    pub fn needs_rotation(&self) -> bool {
        self.tt || self.rr
    }

    /// Rotated components to evaluate, transverse first.
    pub fn rotated_components(&self) -> Vec<Component> {
        let mut components = Vec::new();
        if self.tt {
            components.push(Component::T);
        }
        if self.rr {
            components.push(Component::R);
        }
        components
    }

    /// Names of the requested kernels.
    pub fn names(&self) -> Vec<&'static str> {
        [(self.zz, "ZZ"), (self.tt, "TT"), (self.rr, "RR")]
            .into_iter()
            .filter_map(|(on, name)| on.then_some(name))
            .collect()
    }
}

impl fmt::Display for KernelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(","))
    }
}

/// Builds the noise workflow for `kernels`.
pub fn build(kernels: KernelSet) -> Result<Workflow> {
    let units = unit_ops(kernels);
    let ops = InversionOps {
        units: units.clone(),
        line_search_misfit: Arc::new(move |session: &Session, units: &UnitOps, ctx: &PassContext| {
            evaluate_line_search_misfit(session, units, ctx, kernels)
        }),
    };

    let mut tail = inversion::build(ops)?
        .tasks()
        .tail_from(POSTPROCESS_EVENT_KERNELS)?;
    tail.wrap(POSTPROCESS_EVENT_KERNELS, |base| {
        let step: StepFn = Arc::new(move |session: &Session| {
            merge_pair_kernels(session, kernels)?;
            base(session)
        });
        step
    })?;

    let mut tasks = TaskList::new();
    if kernels.zz {
        let units = units.clone();
        tasks.push(Task::new(GENERATE_ZZ_KERNELS, move |session| {
            generate_zz_kernels(session, &units, kernels)
        }))?;
    }
    if kernels.needs_rotation() {
        tasks.push(Task::new(GENERATE_TT_RR_KERNELS, move |session| {
            generate_tt_rr_kernels(session, &units, kernels)
        }))?;
    }
    for task in &tail {
        tasks.push(task.clone())?;
    }

    Ok(Workflow::new(NAME, inversion::roles(), tasks)
        .with_check(forward::check)
        .with_check(inversion::check)
        .with_check(move |session| check(session, kernels))
        .iterative())
}

/// Observations come from cross-correlations, never from a target model,
/// and TT/RR kernels need a processing module that rotates traces.
pub fn check(session: &Session, kernels: KernelSet) -> Result<()> {
    if session.config().generate_data() {
        return Err(WorkflowError::config(
            "the noise workflow cannot generate data, set `generate_data` to false",
        ));
    }
    let preprocess = session.require_preprocess()?;
    if kernels.needs_rotation() && !preprocess.supports_rotation() {
        return Err(WorkflowError::config(format!(
            "kernels {} need N/E to R/T rotation, which processing module '{}' does not support",
            kernels,
            preprocess.name()
        )));
    }
    Ok(())
}

/// Unit operations with point-force behavior layered on the base ones.
pub fn unit_ops(kernels: KernelSet) -> UnitOps {
    let base = UnitOps::base();
    let base_objective = Arc::clone(&base.evaluate_objective);
    let base_adjoint = Arc::clone(&base.run_adjoint);

    UnitOps {
        prepare_data: Arc::new(move |session: &Session, unit: &UnitOfWork, ctx: &PassContext| {
            prepare_data(session, unit, ctx, kernels)
        }),
        run_forward: Arc::new(run_forward),
        evaluate_objective: Arc::new(move |session: &Session, unit: &UnitOfWork, ctx: &PassContext| {
            evaluate_objective(&base_objective, session, unit, ctx)
        }),
        run_adjoint: Arc::new(move |session: &Session, unit: &UnitOfWork, ctx: &PassContext| {
            run_adjoint(&base_adjoint, session, unit, ctx)
        }),
    }
}

/// Links the cross-correlations matching the pass force into `traces/obs`.
fn prepare_data(
    session: &Session,
    unit: &UnitOfWork,
    ctx: &PassContext,
    kernels: KernelSet,
) -> Result<()> {
    let force = ctx.require_force(PREPARE_DATA)?;
    let obs = trace_dir(unit, "obs", None);
    files::clear_files(&obs)?;

    let data = session.paths().data.join(&unit.name);
    let sources = match force {
        Force::Z => vec![data.join("ZZ")],
        Force::N | Force::E => {
            let mut dirs = Vec::new();
            if kernels.rr {
                dirs.push(data.join("RR"));
            }
            if kernels.tt {
                dirs.push(data.join("TT"));
            }
            dirs
        }
    };

    let linked = link_observations(unit, &sources)?;
    info!("Linked {} {} observations for source {}", linked, force, unit.name);
    Ok(())
}

fn synthetics_dir(unit: &UnitOfWork, force: Force) -> PathBuf {
    match force {
        Force::Z => trace_dir(unit, "syn", None),
        Force::N | Force::E => trace_dir(unit, "syn", Some(force.as_str())),
    }
}

fn run_forward(session: &Session, unit: &UnitOfWork, ctx: &PassContext) -> Result<()> {
    let force = ctx.require_force(RUN_FORWARD)?;
    info!("Running {} force simulation for source {}", force, unit.name);
    session.solver()?.set_point_force(unit, force)?;
    forward_into(session, unit, ctx, &synthetics_dir(unit, force), true)
}

fn evaluate_objective(
    base: &UnitFn,
    session: &Session,
    unit: &UnitOfWork,
    ctx: &PassContext,
) -> Result<()> {
    let force = ctx.require_force(EVALUATE_OBJECTIVE)?;
    if force == Force::Z {
        return base(session, unit, &ctx.clone().components(&[Component::Z]));
    }

    let syn_n = synthetics_dir(unit, Force::N);
    let syn_e = synthetics_dir(unit, Force::E);
    if !files::has_files(&syn_n)? || !files::has_files(&syn_e)? {
        info!(
            "N and E synthetics of source {} are not both present yet, skipping misfit",
            unit.name
        );
        return Ok(());
    }

    let components = ctx
        .components
        .clone()
        .unwrap_or_else(|| vec![Component::T, Component::R]);
    let preprocess = session.require_preprocess()?;

    let syn = trace_dir(unit, "syn", None);
    files::clear_files(&syn)?;
    preprocess.rotate_ne_to_rt(
        unit,
        &RotationRequest {
            syn_n,
            syn_e,
            output: syn,
            components: components.clone(),
        },
    )?;

    base(session, unit, &ctx.clone().components(&components))?;

    let adj = trace_dir(unit, "adj", None);
    for component in components {
        preprocess.rotate_rt_adjsrcs_to_ne(unit, &adj, component)?;
    }
    Ok(())
}

fn run_adjoint(
    base: &UnitFn,
    session: &Session,
    unit: &UnitOfWork,
    ctx: &PassContext,
) -> Result<()> {
    let force = ctx.require_force(RUN_ADJOINT)?;
    let preprocess = session.require_preprocess()?;
    let adj = trace_dir(unit, "adj", None);

    match force {
        Force::Z => {
            preprocess.write_zero_adjsrcs(unit, &adj, &[Component::E, Component::N])?;
            base(session, unit, &ctx.clone().kernel_subdir("ZZ"))
        }
        Force::N | Force::E => {
            let component = ctx.component.ok_or_else(|| {
                WorkflowError::step(format!(
                    "'{}' with a {} force requires a kernel component",
                    RUN_ADJOINT, force
                ))
            })?;

            files::clear_files(&adj)?;
            preprocess.write_zero_adjsrcs(unit, &adj, &[Component::Z])?;

            let rotated = unit.cwd.join("traces").join(rotated_adj_dir(force, component));
            for src in files::list_files(&rotated)? {
                files::link_into(&src, &adj)?;
            }

            let subdir = format!("{}{}", force, component);
            let result = base(session, unit, &ctx.clone().kernel_subdir(subdir));
            files::remove_links(&adj)?;
            result
        }
    }
}

/// Context shared by the kernel-generating passes of one iteration.
fn kernel_context(session: &Session, tag: &str) -> Result<PassContext> {
    let iteration = session.optimize()?.iteration();
    PassContext::new(current_model(session)?)
        .save_forward(true)
        .iteration(iteration, 0)
        .save_residuals(residuals_template(session, iteration, 0, tag))
}

/// Residual files written so far by the kernel passes of this iteration.
fn initial_residuals(session: &Session) -> Result<Vec<PathBuf>> {
    let mut residuals = Vec::new();
    for tag in [ZZ_TAG, RT_TAG] {
        residuals.extend(residual_files(session, &kernel_context(session, tag)?)?);
    }
    Ok(residuals)
}

fn generate_zz_kernels(session: &Session, units: &UnitOps, kernels: KernelSet) -> Result<()> {
    info!("Generating ZZ kernels");
    let ctx = kernel_context(session, ZZ_TAG)?
        .force(Force::Z)
        .component(Component::Z);

    forward::evaluate_misfit(session, units, &ctx)?;
    if !kernels.needs_rotation() {
        record_misfit(session, &initial_residuals(session)?, MisfitKind::Current)?;
    }
    run_adjoint_simulations(session, units, &ctx)
}

fn clear_ne_synthetics(session: &Session) -> Result<()> {
    let task = UnitTask::new("clear_ne_synthetics", |unit| {
        files::clear_files(&synthetics_dir(unit, Force::N))?;
        files::clear_files(&synthetics_dir(unit, Force::E))?;
        Ok(())
    });
    session.submit(&[task], DispatchScope::AllUnits)
}

/// E and N force passes, then one adjoint simulation per force for each
/// requested rotated component.
fn generate_tt_rr_kernels(session: &Session, units: &UnitOps, kernels: KernelSet) -> Result<()> {
    info!("Generating {} kernels", kernels);
    let components = kernels.rotated_components();
    let ctx = kernel_context(session, RT_TAG)?.components(&components);

    clear_ne_synthetics(session)?;
    // E runs first; the N pass finds both synthetics and evaluates the misfit
    for force in [Force::E, Force::N] {
        info!("Running misfit evaluation for the {} force", force);
        forward::evaluate_misfit(session, units, &ctx.clone().force(force))?;
    }
    record_misfit(session, &initial_residuals(session)?, MisfitKind::Current)?;

    for component in components {
        for force in [Force::E, Force::N] {
            info!("Running adjoint simulation for {}{} kernels", force, component);
            let pass = ctx.clone().force(force).component(component);
            run_adjoint_simulations(session, units, &pass)?;
        }
    }
    Ok(())
}

/// Per unit, sums `E<c>` and `N<c>` partial kernels into `<c><c>`, then
/// the requested kernels into the unit kernel directory.
fn merge_pair_kernels(session: &Session, kernels: KernelSet) -> Result<()> {
    let solver = Arc::clone(session.solver()?);
    let eval_grad = session.paths().eval_grad.clone();
    let task = UnitTask::new("merge_noise_kernels", move |unit| {
        merge_unit_kernels(solver.as_ref(), &eval_grad, &unit.name, kernels)
    });
    session.submit(&[task], DispatchScope::AllUnits)
}

fn merge_unit_kernels(
    solver: &dyn SimulationDriver,
    eval_grad: &Path,
    source: &str,
    kernels: KernelSet,
) -> Result<()> {
    let dir = kernel_dir(eval_grad, source, None);

    let pairs = [
        (kernels.rr, "RR", ["ER", "NR"]),
        (kernels.tt, "TT", ["ET", "NT"]),
    ];
    for (requested, name, parts) in pairs {
        if !requested {
            continue;
        }
        let output = dir.join(name);
        files::clear_files(&output)?;
        let inputs = [dir.join(parts[0]), dir.join(parts[1])];
        solver.combine_kernels(&inputs, &output)?;
    }

    let mut present = Vec::new();
    for name in kernels.names() {
        let path = dir.join(name);
        if files::has_files(&path)? {
            present.push(path);
        }
    }
    if present.is_empty() {
        return Err(WorkflowError::step(format!(
            "no kernels found for source {} in '{}'",
            source,
            dir.display()
        )));
    }

    files::clear_files(&dir)?;
    solver.combine_kernels(&present, &dir)
}

/// Evaluates the trial model for every requested force group.
fn evaluate_line_search_misfit(
    session: &Session,
    units: &UnitOps,
    ctx: &PassContext,
    kernels: KernelSet,
) -> Result<Vec<PathBuf>> {
    let template = |tag: &str| residuals_template(session, ctx.iteration, ctx.step_count, tag);
    let mut residuals = Vec::new();

    if kernels.zz {
        let pass = ctx
            .clone()
            .save_residuals(template(ZZ_TAG))?
            .force(Force::Z);
        forward::evaluate_misfit(session, units, &pass)?;
        residuals.extend(residual_files(session, &pass)?);
    }

    if kernels.needs_rotation() {
        clear_ne_synthetics(session)?;
        let pass = ctx
            .clone()
            .save_residuals(template(RT_TAG))?
            .components(&kernels.rotated_components());
        for force in [Force::N, Force::E] {
            forward::evaluate_misfit(session, units, &pass.clone().force(force))?;
        }
        residuals.extend(residual_files(session, &pass)?);
    }

    Ok(residuals)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kernels() {
        let kernels = KernelSet::parse("zz, TT").unwrap();
        assert!(kernels.zz && kernels.tt && !kernels.rr);
        assert!(kernels.needs_rotation());
        assert_eq!(kernels.rotated_components(), vec![Component::T]);
        assert_eq!(kernels.to_string(), "ZZ,TT");
    }

    #[test]
    fn test_parse_rejects_unknown_kernel() {
        let err = KernelSet::parse("ZZ,XY").unwrap_err();
        assert!(err.is_configuration());
        assert!(KernelSet::parse(" , ").unwrap_err().is_configuration());
    }

    #[test]
    fn test_task_list_follows_kernels() {
        let names = |list: &str| {
            build(KernelSet::parse(list).unwrap())
                .unwrap()
                .tasks()
                .names()
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
        };

        let zz = names("ZZ");
        assert_eq!(zz[0], GENERATE_ZZ_KERNELS);
        assert_eq!(zz[1], POSTPROCESS_EVENT_KERNELS);
        assert!(!zz.iter().any(|n| n == GENERATE_TT_RR_KERNELS));

        let rr = names("RR");
        assert_eq!(rr[0], GENERATE_TT_RR_KERNELS);

        let all = names("ZZ,TT,RR");
        assert_eq!(&all[..2], &[GENERATE_ZZ_KERNELS, GENERATE_TT_RR_KERNELS]);
        assert_eq!(all.last().map(String::as_str), Some(inversion::FINALIZE_ITERATION));
    }
}
