//! Workflow Engine
//!
//! Drives one workflow through `check()` → `setup()` → `run()`:
//! - validates that every required module is present before any module
//!   runs its own check
//! - creates the directory layout and the ledger
//! - runs the task list in order, skipping complete tasks and saving the
//!   ledger after every attempt
//! - detects configuration changes since the ledger was written
//!
//! The engine itself is strictly sequential; all parallelism lives in the
//! dispatcher the steps submit to.

use std::sync::Arc;

use log::{debug, error, info, warn};

use super::session::Session;
use super::task::Workflow;
use crate::config::{fingerprint, Configuration, Fingerprint, StalePolicy};
use crate::error::{Result, WorkflowError};
use crate::files;
use crate::ledger::{Ledger, TaskRecord, TaskStatus};
use crate::modules::CapabilityBundle;
use crate::monitoring::{EventType, ExecutionTimeline};

/// Outcome of one `run()` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Tasks attempted and completed in this call
    pub executed: usize,
    /// Tasks skipped because the ledger had them complete
    pub skipped: usize,
    /// Set when the run ended early at the `stop_after` task
    pub stopped_after: Option<String>,
}

/// Workflow execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use simflow::config::Configuration;
/// use simflow::modules::{CapabilityBundle, SerialDispatcher};
/// use simflow::workflow::{Engine, Variant};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Configuration::builder("/scratch/run01")
///         .model_init("/models/init")
///         .build();
///     let workflow = Variant::Forward.build(&config)?;
///     let modules = CapabilityBundle::new().with_dispatcher(Arc::new(SerialDispatcher));
///
///     let mut engine = Engine::new(workflow, config, modules)?;
///     engine.check()?;
///     engine.setup()?;
///     let summary = engine.run()?;
///     println!("executed {} tasks", summary.executed);
///     Ok(())
/// }
/// ```
pub struct Engine {
    workflow: Workflow,
    session: Session,
    ledger: Ledger,
    fingerprint: Fingerprint,
    timeline: ExecutionTimeline,
}

impl Engine {
    /// Creates an engine and loads the ledger, if one exists.
    ///
    /// When the configuration changed since the ledger was last written,
    /// complete tasks are reset to pending unless the configuration asks
    /// to keep them.
    pub fn new(
        workflow: Workflow,
        config: Configuration,
        modules: CapabilityBundle,
    ) -> Result<Self> {
        let state_file = config.paths().state_file.clone();
        let mut ledger = Ledger::open(&state_file, workflow.tasks().names())?;

        let current = fingerprint(&config)?;
        let recorded = Fingerprint::read(&Fingerprint::sidecar_for(&state_file))?;

        if let Some(recorded) = recorded.filter(|r| *r != current) {
            debug!("Recorded fingerprint {} differs from {}", recorded, current);
            match config.on_config_change() {
                StalePolicy::Invalidate => {
                    let reset = ledger.invalidate_completed(workflow.tasks().names());
                    warn!(
                        "Configuration changed since {} was written; {} complete tasks reset to pending",
                        state_file.display(),
                        reset
                    );
                }
                StalePolicy::Keep => {
                    warn!(
                        "Configuration changed since {} was written; keeping complete tasks",
                        state_file.display()
                    );
                }
            }
        }

        let session = Session::new(workflow.name(), Arc::new(config), modules);

        Ok(Self {
            workflow,
            session,
            ledger,
            fingerprint: current,
            timeline: ExecutionTimeline::new(),
        })
    }

    /// Validates modules and configuration without side effects.
    pub fn check(&self) -> Result<()> {
        let modules = self.session.modules();
        let roles = self.workflow.roles();

        for role in roles.required() {
            if !modules.is_present(*role) {
                return Err(WorkflowError::MissingRole {
                    role: role.to_string(),
                    workflow: self.workflow.name().to_string(),
                });
            }
        }

        for role in roles.required() {
            if let Some(result) = modules.check_role(*role) {
                result?;
            }
        }

        for role in roles.optional() {
            match modules.check_role(*role) {
                Some(result) => result?,
                None => warn!(
                    "Optional module '{}' is not set, some functionality of the '{}' workflow will be skipped",
                    role,
                    self.workflow.name()
                ),
            }
        }

        if let Some(name) = self.session.config().stop_after() {
            if !self.workflow.tasks().contains(name) {
                return Err(WorkflowError::StopAfterUnknown {
                    name: name.to_string(),
                    tasks: self
                        .workflow
                        .tasks()
                        .names()
                        .into_iter()
                        .map(String::from)
                        .collect(),
                });
            }
            info!("Workflow will stop after '{}'", name);
        }

        for check in self.workflow.checks() {
            check(&self.session)?;
        }

        Ok(())
    }

    /// Creates directories, prepares modules and writes a fresh ledger.
    pub fn setup(&mut self) -> Result<()> {
        info!("Setting up '{}' workflow", self.workflow.name());

        for dir in self.session.paths().directories() {
            files::ensure_dir(dir)?;
        }

        let modules = self.session.modules();
        for role in self.workflow.roles().required() {
            debug!("Running setup for module '{}'", role);
            if let Some(result) = modules.setup_role(*role) {
                result?;
            }
        }
        for role in self.workflow.roles().optional() {
            if let Some(result) = modules.setup_role(*role) {
                debug!("Running setup for optional module '{}'", role);
                result?;
            }
        }

        // Records reset by a configuration change must be on disk before
        // the new fingerprint is.
        if !self.ledger.initialize()? {
            self.ledger.save()?;
        }
        self.write_fingerprint()
    }

    /// Runs every task that is not complete, in order.
    ///
    /// Stops at the first failing task: it is recorded as failed, the ledger
    /// is saved and the error is returned wrapped in
    /// [`WorkflowError::StepExecution`].
    pub fn run(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let stop_after = self.session.config().stop_after().map(str::to_string);

        for task in self.workflow.tasks() {
            let name = task.name();

            if self.ledger.status(name) == TaskStatus::Complete {
                info!("Task '{}' already complete, skipping", name);
                self.timeline.add_event(name, EventType::Skipped);
                summary.skipped += 1;
                continue;
            }

            info!("Running task '{}'", name);
            self.timeline.add_event(name, EventType::Started);

            if let Err(e) = task.run(&self.session) {
                error!("Task '{}' failed: {}", name, e);
                self.timeline.add_event(name, EventType::Failed);
                self.ledger.mark_failed(name);
                if let Err(save_err) = self.checkpoint() {
                    error!("Could not record failure of '{}': {}", name, save_err);
                }
                return Err(WorkflowError::StepExecution {
                    task: name.to_string(),
                    source: Box::new(e),
                });
            }

            self.timeline.add_event(name, EventType::Completed);
            self.ledger.mark_completed(name);
            self.checkpoint()?;
            summary.executed += 1;
            info!("Task '{}' complete", name);

            if stop_after.as_deref() == Some(name) {
                info!("Stopping workflow after '{}' as requested", name);
                summary.stopped_after = Some(name.to_string());
                break;
            }
        }

        self.checkpoint()?;
        info!(
            "Finished '{}' workflow: {} tasks executed, {} skipped",
            self.workflow.name(),
            summary.executed,
            summary.skipped
        );
        Ok(summary)
    }

    /// Saves the ledger and the configuration fingerprint.
    pub fn checkpoint(&self) -> Result<()> {
        self.ledger.save()?;
        self.write_fingerprint()
    }

    fn write_fingerprint(&self) -> Result<()> {
        let sidecar = Fingerprint::sidecar_for(self.ledger.path());
        self.fingerprint.write(&sidecar)
    }

    /// Resets every task of the active list to pending, e.g. before a new
    /// iteration. The ledger file changes on the next checkpoint.
    pub fn reset_ledger(&mut self) {
        self.ledger.reset(self.workflow.tasks().names());
    }

    /// Name and ledger status of every task, in task order.
    pub fn task_status(&self) -> Vec<TaskRecord> {
        self.workflow
            .tasks()
            .names()
            .into_iter()
            .map(|name| TaskRecord::new(name, self.ledger.status(name)))
            .collect()
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn timeline(&self) -> &ExecutionTimeline {
        &self.timeline
    }

    pub fn timeline_mut(&mut self) -> &mut ExecutionTimeline {
        &mut self.timeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{Role, RoleSet, SerialDispatcher};
    use crate::workflow::TaskList;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn counting_workflow(counter: Arc<AtomicUsize>, fail_on: Option<&'static str>) -> Workflow {
        let mut tasks = TaskList::new();
        for name in ["a", "b", "c"] {
            let counter = counter.clone();
            tasks
                .push(crate::workflow::Task::new(name, move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if fail_on == Some(name) {
                        return Err(WorkflowError::step("boom"));
                    }
                    Ok(())
                }))
                .unwrap();
        }
        Workflow::new("counting", RoleSet::new(&[Role::Dispatcher], &[]), tasks)
    }

    fn bundle() -> CapabilityBundle {
        CapabilityBundle::new().with_dispatcher(Arc::new(SerialDispatcher))
    }

    #[test]
    fn test_run_marks_tasks_complete() {
        let temp_dir = tempdir().unwrap();
        let config = Configuration::builder(temp_dir.path()).build();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut engine = Engine::new(counting_workflow(counter.clone(), None), config, bundle()).unwrap();
        engine.check().unwrap();
        engine.setup().unwrap();
        let summary = engine.run().unwrap();

        assert_eq!(summary.executed, 3);
        assert_eq!(summary.skipped, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(engine
            .task_status()
            .iter()
            .all(|r| r.status == TaskStatus::Complete));
        assert_eq!(engine.timeline().count(EventType::Completed), 3);
    }

    #[test]
    fn test_failure_is_wrapped_once() {
        let temp_dir = tempdir().unwrap();
        let config = Configuration::builder(temp_dir.path()).build();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut engine =
            Engine::new(counting_workflow(counter, Some("b")), config, bundle()).unwrap();
        engine.setup().unwrap();
        let err = engine.run().unwrap_err();

        match &err {
            WorkflowError::StepExecution { task, source } => {
                assert_eq!(task, "b");
                assert!(matches!(**source, WorkflowError::Step(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(engine.ledger().status("b"), TaskStatus::Failed);
    }

    #[test]
    fn test_check_rejects_missing_role_and_unknown_stop_after() {
        let temp_dir = tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let config = Configuration::builder(temp_dir.path()).build();
        let engine = Engine::new(
            counting_workflow(counter.clone(), None),
            config,
            CapabilityBundle::new(),
        )
        .unwrap();
        assert!(matches!(
            engine.check(),
            Err(WorkflowError::MissingRole { role, .. }) if role == "dispatcher"
        ));

        let config = Configuration::builder(temp_dir.path())
            .stop_after("z")
            .build();
        let engine = Engine::new(counting_workflow(counter, None), config, bundle()).unwrap();
        assert!(matches!(
            engine.check(),
            Err(WorkflowError::StopAfterUnknown { name, tasks }) if name == "z" && tasks.len() == 3
        ));
    }

    #[test]
    fn test_setup_creates_directories_and_ledger() {
        let temp_dir = tempdir().unwrap();
        let config = Configuration::builder(temp_dir.path()).build();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut engine = Engine::new(counting_workflow(counter, None), config, bundle()).unwrap();
        engine.setup().unwrap();

        for dir in ["scratch", "scratch/eval_grad", "output", "data"] {
            assert!(temp_dir.path().join(dir).is_dir(), "{dir} missing");
        }
        let ledger = fs::read_to_string(temp_dir.path().join("sfstate.txt")).unwrap();
        assert!(ledger.starts_with("# Simflow State File"));
        assert!(temp_dir.path().join("sfstate.txt.fingerprint").exists());
    }

    #[test]
    fn test_reset_ledger() {
        let temp_dir = tempdir().unwrap();
        let config = Configuration::builder(temp_dir.path()).build();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut engine =
            Engine::new(counting_workflow(counter.clone(), None), config, bundle()).unwrap();
        engine.setup().unwrap();
        engine.run().unwrap();
        engine.reset_ledger();
        engine.run().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 6);
    }
}
