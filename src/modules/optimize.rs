//! Optimizer contract for iterative variants.
//!
//! An optimizer owns the model update: it turns a gradient into a search
//! direction, proposes trial models along it and judges each trial misfit.
//! Methods take `&self`; implementations keep their state behind interior
//! mutability so a [`CapabilityBundle`](super::CapabilityBundle) can share
//! them.

use std::fs;
use std::path::{Path, PathBuf};

use super::Module;
use crate::error::{Result, WorkflowError};

/// Which model a misfit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MisfitKind {
    /// The accepted model of the current iteration
    Current,
    /// The trial model of the running line search
    Trial,
}

/// Verdict on a trial misfit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    /// The trial model is accepted
    Pass,
    /// Try another step length
    Try,
    /// The search failed
    Fail,
}

pub trait Optimizer: Module {
    /// Iteration currently being computed, starting at 1.
    fn iteration(&self) -> usize;

    /// Positions an optimizer that has not reached `iteration` yet at its
    /// start, e.g. to continue an inversion from an earlier run's model.
    fn start_at(&self, iteration: usize) -> Result<()>;

    /// Model of the current iteration; `None` selects the initial model.
    fn current_model(&self) -> Option<PathBuf>;

    /// Trial steps taken by the running line search.
    fn step_count(&self) -> usize;

    /// Reduces residual files to a scalar misfit and stores it.
    fn record_misfit(&self, residuals: &[PathBuf], kind: MisfitKind) -> Result<f64>;

    /// Derives the search direction from the gradient in `gradient`.
    fn compute_direction(&self, gradient: &Path) -> Result<()>;

    fn initialize_search(&self) -> Result<()>;

    /// Model to evaluate for the next trial step.
    fn trial_model(&self) -> Result<PathBuf>;

    /// Judges the most recent trial misfit.
    fn update_search(&self) -> Result<SearchStatus>;

    /// Resets the search after a failure, e.g. to steepest descent.
    fn restart(&self) -> Result<()>;

    /// Accepts the trial model.
    fn finalize_search(&self) -> Result<()>;

    /// Moves on to the next iteration.
    fn advance_iteration(&self) -> Result<()>;
}

/// Sum of squared residuals over every value in the given files.
///
/// Files hold whitespace-separated numbers.
pub fn sum_residuals(paths: &[PathBuf]) -> Result<f64> {
    let mut total = 0.0;
    for path in paths {
        let content = fs::read_to_string(path).map_err(|e| WorkflowError::io(path, e))?;
        for value in content.split_whitespace() {
            let value: f64 = value.parse().map_err(|_| {
                WorkflowError::step(format!(
                    "residual file '{}' holds a non-numeric value '{}'",
                    path.display(),
                    value
                ))
            })?;
            total += value * value;
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sum_residuals() {
        let temp_dir = tempdir().unwrap();
        let a = temp_dir.path().join("residuals_S001_1_0.txt");
        let b = temp_dir.path().join("residuals_S002_1_0.txt");
        fs::write(&a, "1.0\n2.0\n").unwrap();
        fs::write(&b, "3.0").unwrap();

        assert_eq!(sum_residuals(&[a, b]).unwrap(), 14.0);
        assert_eq!(sum_residuals(&[]).unwrap(), 0.0);
    }

    #[test]
    fn test_sum_residuals_rejects_garbage() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("residuals.txt");
        fs::write(&path, "1.0 nan? 2").unwrap();
        assert!(sum_residuals(&[path]).is_err());
    }
}
