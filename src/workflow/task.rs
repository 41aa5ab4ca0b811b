//! Task lists and the workflow record.
//!
//! A step is a named function of the [`Session`]. A [`TaskList`] is the
//! ordered, duplicate-free sequence of steps of one workflow; variants
//! build theirs once and may replace or wrap individual steps by name, so
//! ledger records stay valid when switching variants.

use std::fmt;
use std::sync::Arc;

use super::session::Session;
use crate::error::{Result, WorkflowError};
use crate::modules::RoleSet;

/// Body of a task.
pub type StepFn = Arc<dyn Fn(&Session) -> Result<()> + Send + Sync>;

/// Additional validation run by `Engine::check`.
pub type CheckFn = Arc<dyn Fn(&Session) -> Result<()> + Send + Sync>;

/// A named step.
#[derive(Clone)]
pub struct Task {
    name: String,
    step: StepFn,
}

impl Task {
    pub fn new<F>(name: impl Into<String>, step: F) -> Self
    where
        F: Fn(&Session) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            step: Arc::new(step),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step(&self) -> &StepFn {
        &self.step
    }

    pub fn run(&self, session: &Session) -> Result<()> {
        (self.step)(session)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Task").field(&self.name).finish()
    }
}

/// Ordered steps with unique names.
#[derive(Clone, Default)]
pub struct TaskList {
    tasks: Vec<Task>,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a task; its name must not be taken yet.
    pub fn push(&mut self, task: Task) -> Result<()> {
        if self.contains(task.name()) {
            return Err(WorkflowError::DuplicateTask(task.name().to_string()));
        }
        self.tasks.push(task);
        Ok(())
    }

    /// Builder form of [`TaskList::push`].
    pub fn with<F>(mut self, name: &str, step: F) -> Result<Self>
    where
        F: Fn(&Session) -> Result<()> + Send + Sync + 'static,
    {
        self.push(Task::new(name, step))?;
        Ok(self)
    }

    /// Replaces the body of `name`, keeping its position.
    pub fn replace(&mut self, name: &str, step: StepFn) -> Result<()> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| WorkflowError::config(format!("no task named '{}'", name)))?;
        task.step = step;
        Ok(())
    }

    /// Replaces the body of `name` with one built from the current body,
    /// e.g. "run the base step, then do more".
    pub fn wrap<F>(&mut self, name: &str, wrapper: F) -> Result<()>
    where
        F: FnOnce(StepFn) -> StepFn,
    {
        let base = self
            .get(name)
            .map(|t| Arc::clone(&t.step))
            .ok_or_else(|| WorkflowError::config(format!("no task named '{}'", name)))?;
        self.replace(name, wrapper(base))
    }

    /// Drops every task before `name`, keeping `name` and what follows.
    pub fn tail_from(&self, name: &str) -> Result<Self> {
        let start = self
            .tasks
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| WorkflowError::config(format!("no task named '{}'", name)))?;
        Ok(Self {
            tasks: self.tasks[start..].to_vec(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl fmt::Debug for TaskList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl<'a> IntoIterator for &'a TaskList {
    type Item = &'a Task;
    type IntoIter = std::slice::Iter<'a, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.iter()
    }
}

/// A workflow variant: its roles, its task list and its extra checks.
#[derive(Clone)]
pub struct Workflow {
    name: String,
    roles: RoleSet,
    tasks: TaskList,
    checks: Vec<CheckFn>,
    iterative: bool,
}

impl Workflow {
    pub fn new(name: impl Into<String>, roles: RoleSet, tasks: TaskList) -> Self {
        Self {
            name: name.into(),
            roles,
            tasks,
            checks: Vec::new(),
            iterative: false,
        }
    }

    /// Adds a check run after the module checks.
    pub fn with_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&Session) -> Result<()> + Send + Sync + 'static,
    {
        self.checks.push(Arc::new(check));
        self
    }

    /// Marks the task list as repeated once per iteration.
    pub fn iterative(mut self) -> Self {
        self.iterative = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    pub fn tasks(&self) -> &TaskList {
        &self.tasks
    }

    pub fn checks(&self) -> &[CheckFn] {
        &self.checks
    }

    pub fn is_iterative(&self) -> bool {
        self.iterative
    }
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("roles", &self.roles)
            .field("tasks", &self.tasks)
            .field("checks", &self.checks.len())
            .field("iterative", &self.iterative)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::modules::CapabilityBundle;
    use std::sync::Mutex;

    fn session() -> Session {
        Session::new(
            "test",
            Arc::new(Configuration::builder("/run").build()),
            CapabilityBundle::new(),
        )
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = TaskList::new()
            .with("a", |_| Ok(()))
            .and_then(|list| list.with("a", |_| Ok(())));
        assert!(matches!(result, Err(WorkflowError::DuplicateTask(name)) if name == "a"));
    }

    #[test]
    fn test_names_keep_order() {
        let list = TaskList::new()
            .with("b", |_| Ok(()))
            .and_then(|l| l.with("a", |_| Ok(())))
            .and_then(|l| l.with("c", |_| Ok(())))
            .unwrap();
        assert_eq!(list.names(), vec!["b", "a", "c"]);
        assert_eq!(list.len(), 3);
        assert!(list.contains("a"));
        assert!(!list.contains("d"));
    }

    #[test]
    fn test_wrap_calls_base() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (l1, l2) = (log.clone(), log.clone());

        let mut list = TaskList::new()
            .with("step", move |_| {
                l1.lock().unwrap().push("base");
                Ok(())
            })
            .unwrap();

        list.wrap("step", |base| {
            Arc::new(move |session: &Session| {
                base(session)?;
                l2.lock().unwrap().push("extra");
                Ok(())
            })
        })
        .unwrap();

        list.get("step").unwrap().run(&session()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["base", "extra"]);
        assert_eq!(list.names(), vec!["step"]);
    }

    #[test]
    fn test_replace_unknown_task() {
        let mut list = TaskList::new();
        let step: StepFn = Arc::new(|_| Ok(()));
        assert!(list.replace("missing", step).unwrap_err().is_configuration());
    }

    #[test]
    fn test_tail_from() {
        let list = TaskList::new()
            .with("a", |_| Ok(()))
            .and_then(|l| l.with("b", |_| Ok(())))
            .and_then(|l| l.with("c", |_| Ok(())))
            .unwrap();
        assert_eq!(list.tail_from("b").unwrap().names(), vec!["b", "c"]);
        assert!(list.tail_from("z").is_err());
    }

    #[test]
    fn test_workflow_record() {
        let workflow = Workflow::new("demo", RoleSet::default(), TaskList::new())
            .with_check(|_| Ok(()))
            .iterative();
        assert_eq!(workflow.name(), "demo");
        assert_eq!(workflow.checks().len(), 1);
        assert!(workflow.is_iterative());
        assert!(format!("{:?}", workflow).contains("demo"));
    }
}
