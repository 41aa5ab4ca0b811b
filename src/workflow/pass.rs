//! Per-pass context.
//!
//! Every unit operation receives a [`PassContext`] describing the pass it
//! belongs to: the model being simulated, the point force and kernel
//! component of the current sub-pass, where residuals go. Sub-passes are
//! expressed by deriving a new context, never by mutating shared state,
//! so units dispatched concurrently always see a consistent value.

use std::path::{Path, PathBuf};

use crate::error::{Result, WorkflowError};
use crate::modules::{Component, Force, UnitOfWork};

/// Placeholder replaced by the unit name in residual file templates.
pub const SOURCE_PLACEHOLDER: &str = "{src}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassContext {
    /// Model simulated in this pass
    pub model: PathBuf,
    /// Keep forward wavefields for a following adjoint simulation
    pub save_forward: bool,
    /// Residual file template containing `{src}`
    pub save_residuals: Option<String>,
    /// Restricts misfit evaluation to these components
    pub components: Option<Vec<Component>>,
    pub force: Option<Force>,
    /// Kernel component of an adjoint sub-pass
    pub component: Option<Component>,
    /// Subdirectory of the unit kernel directory receiving kernels
    pub kernel_subdir: Option<String>,
    pub iteration: usize,
    pub step_count: usize,
}

impl PassContext {
    pub fn new(model: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            save_forward: false,
            save_residuals: None,
            components: None,
            force: None,
            component: None,
            kernel_subdir: None,
            iteration: 1,
            step_count: 0,
        }
    }

    pub fn save_forward(mut self, enabled: bool) -> Self {
        self.save_forward = enabled;
        self
    }

    /// Sets the residual file template.
    ///
    /// Every unit writes its own file, so the template must contain
    /// `{src}`.
    pub fn save_residuals(mut self, template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !template.contains(SOURCE_PLACEHOLDER) {
            return Err(WorkflowError::config(format!(
                "residual path '{}' must contain the {} placeholder",
                template, SOURCE_PLACEHOLDER
            )));
        }
        self.save_residuals = Some(template);
        Ok(self)
    }

    pub fn components(mut self, components: &[Component]) -> Self {
        self.components = Some(components.to_vec());
        self
    }

    pub fn force(mut self, force: Force) -> Self {
        self.force = Some(force);
        self
    }

    pub fn component(mut self, component: Component) -> Self {
        self.component = Some(component);
        self
    }

    pub fn kernel_subdir(mut self, subdir: impl Into<String>) -> Self {
        self.kernel_subdir = Some(subdir.into());
        self
    }

    pub fn iteration(mut self, iteration: usize, step_count: usize) -> Self {
        self.iteration = iteration;
        self.step_count = step_count;
        self
    }

    /// Residual file of `unit`, if residuals are saved in this pass.
    pub fn residuals_file(&self, unit: &UnitOfWork) -> Option<PathBuf> {
        self.save_residuals
            .as_ref()
            .map(|t| PathBuf::from(t.replace(SOURCE_PLACEHOLDER, &unit.name)))
    }

    /// The point force, for operations that are meaningless without one.
    pub fn require_force(&self, operation: &str) -> Result<Force> {
        self.force.ok_or_else(|| {
            WorkflowError::step(format!("'{}' requires a point force to be set", operation))
        })
    }
}

/// Trace directory of a unit: `traces/<tag>`, or `traces/<tag>_<comp>`
/// with the component in lower case.
pub fn trace_dir(unit: &UnitOfWork, tag: &str, comp: Option<&str>) -> PathBuf {
    let name = match comp {
        Some(comp) => format!("{}_{}", tag, comp).to_lowercase(),
        None => tag.to_string(),
    };
    unit.cwd.join("traces").join(name)
}

/// Kernel directory of a unit below `eval_grad`.
pub fn kernel_dir(eval_grad: &Path, unit: &str, subdir: Option<&str>) -> PathBuf {
    let dir = eval_grad.join("kernels").join(unit);
    match subdir {
        Some(subdir) => dir.join(subdir),
        None => dir,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_residuals_template_requires_source() {
        let err = PassContext::new("/m")
            .save_residuals("/eval/residuals.txt")
            .unwrap_err();
        assert!(err.is_configuration());

        let ctx = PassContext::new("/m")
            .save_residuals("/eval/residuals_{src}_1_0.txt")
            .unwrap();
        let unit = UnitOfWork::new(0, "S001", "/scratch/S001");
        assert_eq!(
            ctx.residuals_file(&unit),
            Some(PathBuf::from("/eval/residuals_S001_1_0.txt"))
        );
    }

    #[test]
    fn test_derived_contexts_leave_the_original_untouched() {
        let base = PassContext::new("/m").save_forward(true);
        let east = base.clone().force(Force::E).component(Component::T);

        assert_eq!(base.force, None);
        assert_eq!(east.force, Some(Force::E));
        assert!(east.save_forward);
        assert!(base.require_force("run_forward").is_err());
        assert_eq!(east.require_force("run_forward").unwrap(), Force::E);
    }

    #[test]
    fn test_trace_dir() {
        let unit = UnitOfWork::new(0, "S001", "/scratch/solver/S001");
        assert_eq!(
            trace_dir(&unit, "syn", None),
            PathBuf::from("/scratch/solver/S001/traces/syn")
        );
        assert_eq!(
            trace_dir(&unit, "syn", Some("E")),
            PathBuf::from("/scratch/solver/S001/traces/syn_e")
        );
    }

    #[test]
    fn test_kernel_dir() {
        let eval_grad = Path::new("/scratch/eval_grad");
        assert_eq!(
            kernel_dir(eval_grad, "S001", Some("ET")),
            PathBuf::from("/scratch/eval_grad/kernels/S001/ET")
        );
        assert_eq!(
            kernel_dir(eval_grad, "S001", None),
            PathBuf::from("/scratch/eval_grad/kernels/S001")
        );
    }
}
