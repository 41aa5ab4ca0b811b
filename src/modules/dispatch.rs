//! Execution Dispatch
//!
//! A dispatcher runs a sequence of unit tasks once per unit of work. Each
//! unit has its own identity and working directory, so units never share
//! mutable state; the order across units is unspecified. The first failing
//! unit fails the whole submission.
//!
//! Two dispatchers ship with the crate:
//! - [`SerialDispatcher`] runs units one after another
//! - [`ThreadDispatcher`] runs up to `max_parallel` units on worker threads

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use log::{debug, error, info};

use super::Module;
use crate::error::{Result, WorkflowError};

/// One independent item of work, e.g. one simulation source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOfWork {
    /// Position of the unit in the solver's source list
    pub index: usize,
    /// Identifying name, e.g. the source name
    pub name: String,
    /// Working directory owned by this unit alone
    pub cwd: PathBuf,
}

impl UnitOfWork {
    pub fn new(index: usize, name: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            index,
            name: name.into(),
            cwd: cwd.into(),
        }
    }
}

type UnitBody = dyn Fn(&UnitOfWork) -> Result<()> + Send + Sync;

/// A named function run once per unit.
#[derive(Clone)]
pub struct UnitTask {
    name: String,
    body: Arc<UnitBody>,
}

impl UnitTask {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&UnitOfWork) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(&self, unit: &UnitOfWork) -> Result<()> {
        (self.body)(unit)
    }
}

impl fmt::Debug for UnitTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitTask").field("name", &self.name).finish()
    }
}

/// Fans a task sequence out across units of work.
pub trait Dispatcher: Module {
    /// Runs `tasks`, in order, once for every unit in `units`.
    ///
    /// Blocks until every unit finished, or returns the first failure.
    fn submit(&self, units: &[UnitOfWork], tasks: &[UnitTask]) -> Result<()>;
}

/// Runs every task for a single unit, stopping at the first failure.
pub fn run_unit(unit: &UnitOfWork, tasks: &[UnitTask]) -> Result<()> {
    for task in tasks {
        debug!("[{}] running '{}'", unit.name, task.name());
        task.run(unit).map_err(|e| WorkflowError::UnitFailed {
            unit: unit.name.clone(),
            task: task.name().to_string(),
            source: Box::new(e),
        })?;
    }
    Ok(())
}

fn task_names(tasks: &[UnitTask]) -> Vec<&str> {
    tasks.iter().map(|t| t.name()).collect()
}

/// Runs units one after another in the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialDispatcher;

impl Module for SerialDispatcher {
    fn name(&self) -> &str {
        "serial"
    }
}

impl Dispatcher for SerialDispatcher {
    fn submit(&self, units: &[UnitOfWork], tasks: &[UnitTask]) -> Result<()> {
        info!(
            "Submitting {:?} for {} units (serial)",
            task_names(tasks),
            units.len()
        );
        for unit in units {
            run_unit(unit, tasks)?;
        }
        Ok(())
    }
}

/// Runs units on worker threads, at most `max_parallel` at a time.
///
/// Once a unit fails no further unit is started; units already running
/// are waited for and the first failure is returned.
#[derive(Debug, Clone)]
pub struct ThreadDispatcher {
    max_parallel: usize,
}

impl ThreadDispatcher {
    pub fn new(max_parallel: usize) -> Self {
        Self { max_parallel }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }
}

impl Default for ThreadDispatcher {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

impl Module for ThreadDispatcher {
    fn name(&self) -> &str {
        "threads"
    }

    fn check(&self) -> Result<()> {
        if self.max_parallel == 0 {
            return Err(WorkflowError::config(
                "dispatcher `parallel` must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Dispatcher for ThreadDispatcher {
    fn submit(&self, units: &[UnitOfWork], tasks: &[UnitTask]) -> Result<()> {
        info!(
            "Submitting {:?} for {} units (max parallel: {})",
            task_names(tasks),
            units.len(),
            self.max_parallel
        );

        let (tx, rx): (Sender<(String, Result<()>)>, Receiver<(String, Result<()>)>) = channel();
        let tasks: Arc<Vec<UnitTask>> = Arc::new(tasks.to_vec());
        let mut queue = units.iter();
        let mut running = 0;
        let mut first_error: Option<WorkflowError> = None;

        loop {
            while running < self.max_parallel.max(1) && first_error.is_none() {
                let Some(unit) = queue.next() else {
                    break;
                };

                let tx = tx.clone();
                let unit = unit.clone();
                let tasks = Arc::clone(&tasks);

                thread::spawn(move || {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| run_unit(&unit, &tasks)))
                        .unwrap_or_else(|_| {
                            Err(WorkflowError::step(format!("unit '{}' panicked", unit.name)))
                        });

                    if let Err(e) = tx.send((unit.name.clone(), result)) {
                        error!("Failed to send completion signal: {}", e);
                    }
                });

                running += 1;
            }

            if running == 0 {
                break;
            }

            let (unit, result) = rx
                .recv()
                .map_err(|e| WorkflowError::step(format!("failed to receive unit completion: {}", e)))?;
            running -= 1;

            match result {
                Ok(()) => debug!("Unit '{}' finished", unit),
                Err(e) => {
                    error!("Unit '{}' failed: {}", unit, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
