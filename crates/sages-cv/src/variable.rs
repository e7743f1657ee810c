use std::fmt::Debug;

use nalgebra::{DMatrix, DVector};
use sages_core::{ErrorInfo, SageError, SimBox, Vec3};

/// Value of a collective variable together with its Jacobian.
///
/// `jacobian` has one row per CV component and three columns per selected
/// particle, ordered `[x0, y0, z0, x1, ...]` following the selection order.
#[derive(Debug, Clone, PartialEq)]
pub struct CvValue {
    /// CV value `ξ`.
    pub xi: DVector<f64>,
    /// Jacobian `∂ξ/∂r`.
    pub jacobian: DMatrix<f64>,
}

impl CvValue {
    /// Number of CV components.
    pub fn dimension(&self) -> usize {
        self.xi.len()
    }
}

/// A differentiable function of a tagged particle selection.
///
/// Implementations are pure functions of the positions they are handed and
/// the box; they keep no state between calls.
pub trait CollectiveVariable: Debug + Send + Sync {
    /// Short identifier used in diagnostics.
    fn name(&self) -> &'static str;

    /// Particle tags the variable depends on, in evaluation order.
    fn tags(&self) -> &[usize];

    /// Number of components of `ξ`.
    fn dimension(&self) -> usize {
        1
    }

    /// Whether positions must be unwrapped through image counters first.
    fn requires_box_unwrapping(&self) -> bool {
        false
    }

    /// Evaluates `(ξ, Jξ)` from the positions of the selected particles,
    /// given in the same order as [`CollectiveVariable::tags`].
    fn evaluate(&self, positions: &[Vec3], sim_box: &SimBox) -> Result<CvValue, SageError>;
}

pub(crate) fn invalid_selection(cv: &str, message: &str) -> SageError {
    SageError::Config(ErrorInfo::new("invalid-selection", message).with_context("cv", cv))
}

pub(crate) fn check_selection(cv: &str, tags: &[usize], expected: Option<usize>) -> Result<(), SageError> {
    if tags.is_empty() {
        return Err(invalid_selection(cv, "particle selection is empty"));
    }
    if let Some(count) = expected {
        if tags.len() != count {
            return Err(SageError::Config(
                ErrorInfo::new("invalid-selection", "wrong number of particles selected")
                    .with_context("cv", cv)
                    .with_context("expected", count.to_string())
                    .with_context("found", tags.len().to_string()),
            ));
        }
    }
    let mut sorted = tags.to_vec();
    sorted.sort_unstable();
    if sorted.windows(2).any(|pair| pair[0] == pair[1]) {
        return Err(invalid_selection(cv, "particle selected more than once"));
    }
    Ok(())
}

pub(crate) fn degenerate(cv: &str, message: &str) -> SageError {
    SageError::Numerical(ErrorInfo::new("non-finite-cv", message).with_context("cv", cv))
}
