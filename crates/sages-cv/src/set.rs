use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use sages_core::{ErrorInfo, SageError, SimBox, StepData, Vec3};

use crate::variable::{CollectiveVariable, CvValue};

/// Several collective variables stacked into one evaluator.
///
/// `ξ` is the concatenation of the member values. The Jacobian columns run
/// over the sorted union of the member selections; every member's row block
/// is zero outside its own particles.
#[derive(Debug, Clone)]
pub struct CvSet {
    cvs: Vec<Arc<dyn CollectiveVariable>>,
    tags: Vec<usize>,
    columns: Vec<Vec<usize>>,
    dimension: usize,
}

impl CvSet {
    /// Combines `cvs` in order.
    pub fn new(cvs: Vec<Arc<dyn CollectiveVariable>>) -> Result<Self, SageError> {
        if cvs.is_empty() {
            return Err(SageError::Config(ErrorInfo::new(
                "invalid-selection",
                "at least one collective variable is required",
            )));
        }
        let mut tags: Vec<usize> = cvs.iter().flat_map(|cv| cv.tags().iter().copied()).collect();
        tags.sort_unstable();
        tags.dedup();
        let columns = cvs
            .iter()
            .map(|cv| {
                cv.tags()
                    .iter()
                    .map(|tag| tags.binary_search(tag).unwrap_or_default())
                    .collect()
            })
            .collect();
        let dimension = cvs.iter().map(|cv| cv.dimension()).sum();
        Ok(Self {
            cvs,
            tags,
            columns,
            dimension,
        })
    }

    /// Set holding a single collective variable.
    pub fn single(cv: impl CollectiveVariable + 'static) -> Result<Self, SageError> {
        Self::new(vec![Arc::new(cv)])
    }

    /// Number of member variables.
    pub fn len(&self) -> usize {
        self.cvs.len()
    }

    /// Whether the set has no members; never true for a constructed set.
    pub fn is_empty(&self) -> bool {
        self.cvs.is_empty()
    }

    /// Total number of CV components.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Sorted union of the member selections.
    pub fn tags(&self) -> &[usize] {
        &self.tags
    }

    /// Whether any member needs unwrapped positions.
    pub fn requires_box_unwrapping(&self) -> bool {
        self.cvs.iter().any(|cv| cv.requires_box_unwrapping())
    }

    /// Storage slot of every selected particle, in [`CvSet::tags`] order.
    pub fn slots(&self, indices: &[usize]) -> Result<Vec<usize>, SageError> {
        self.tags
            .iter()
            .map(|&tag| {
                indices.get(tag).copied().ok_or_else(|| {
                    SageError::Config(
                        ErrorInfo::new("invalid-selection", "selected particle tag does not exist")
                            .with_context("tag", tag.to_string())
                            .with_context("particles", indices.len().to_string()),
                    )
                })
            })
            .collect()
    }

    /// Evaluates the stacked `(ξ, Jξ)` from per-slot positions.
    pub fn evaluate(
        &self,
        positions: &[Vec3],
        indices: &[usize],
        sim_box: &SimBox,
    ) -> Result<CvValue, SageError> {
        let slots = self.slots(indices)?;
        let mut xi = DVector::zeros(self.dimension);
        let mut jacobian = DMatrix::zeros(self.dimension, 3 * self.tags.len());
        let mut row = 0;
        for (cv, columns) in self.cvs.iter().zip(&self.columns) {
            let selected: Vec<Vec3> = columns.iter().map(|&column| positions[slots[column]]).collect();
            let value = cv.evaluate(&selected, sim_box)?;
            let rows = cv.dimension();
            if value.xi.len() != rows || value.jacobian.shape() != (rows, 3 * columns.len()) {
                return Err(SageError::dimension_mismatch(cv.name(), rows, value.xi.len()));
            }
            xi.rows_mut(row, rows).copy_from(&value.xi);
            for (local, &column) in columns.iter().enumerate() {
                jacobian
                    .view_mut((row, 3 * column), (rows, 3))
                    .copy_from(&value.jacobian.view((0, 3 * local), (rows, 3)));
            }
            row += rows;
        }
        if let Some(axis) = xi.iter().position(|value| !value.is_finite()) {
            return Err(SageError::Numerical(
                ErrorInfo::new("non-finite-cv", "collective variable is not finite")
                    .with_context("axis", axis.to_string()),
            ));
        }
        Ok(CvValue { xi, jacobian })
    }

    /// Evaluates the set on canonicalized step data.
    pub fn evaluate_step(&self, data: &StepData<'_>) -> Result<CvValue, SageError> {
        self.evaluate(&data.positions, &data.indices, data.sim_box)
    }

    /// Restricts a flat per-slot vector (`3N`) to the selected particles (`3m`).
    pub fn gather(&self, slots: &[usize], flat: &DVector<f64>) -> DVector<f64> {
        let mut selected = DVector::zeros(3 * slots.len());
        for (column, &slot) in slots.iter().enumerate() {
            selected
                .fixed_rows_mut::<3>(3 * column)
                .copy_from(&flat.fixed_rows::<3>(3 * slot));
        }
        selected
    }

    /// Spreads a selected-particle vector (`3m`) into per-slot 3-vectors,
    /// zero for every particle outside the selection.
    pub fn scatter(&self, slots: &[usize], natoms: usize, selected: &DVector<f64>) -> Vec<Vec3> {
        let mut out = vec![Vec3::zeros(); natoms];
        for (column, &slot) in slots.iter().enumerate() {
            out[slot] = selected.fixed_rows::<3>(3 * column).into_owned();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Component, Distance};

    fn sim_box() -> SimBox {
        SimBox::orthorhombic([20.0; 3], Vec3::zeros()).unwrap()
    }

    #[test]
    fn blocks_have_no_cross_terms() {
        let set = CvSet::new(vec![
            Arc::new(Distance::new(4, 1).unwrap()),
            Arc::new(Component::new(vec![2], 2).unwrap()),
        ])
        .unwrap();
        assert_eq!(set.tags(), &[1, 2, 4]);
        assert_eq!(set.dimension(), 2);

        let positions = [
            Vec3::zeros(),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 7.0),
            Vec3::zeros(),
            Vec3::new(4.0, 0.0, 0.0),
        ];
        let indices = [0, 1, 2, 3, 4];
        let value = set.evaluate(&positions, &indices, &sim_box()).unwrap();
        assert!((value.xi[0] - 3.0).abs() < 1e-12);
        assert_eq!(value.xi[1], 7.0);
        // tag 4 sits in union column 2, tag 1 in column 0
        assert!((value.jacobian[(0, 6)] - 1.0).abs() < 1e-12);
        assert!((value.jacobian[(0, 0)] + 1.0).abs() < 1e-12);
        assert!(value.jacobian.view((0, 3), (1, 3)).iter().all(|&v| v == 0.0));
        assert_eq!(value.jacobian[(1, 5)], 1.0);
        assert_eq!(value.jacobian.row(1).iter().filter(|&&v| v != 0.0).count(), 1);
    }

    #[test]
    fn slots_follow_indices() {
        let set = CvSet::single(Component::new(vec![0, 2], 0).unwrap()).unwrap();
        let slots = set.slots(&[2, 0, 1]).unwrap();
        assert_eq!(slots, vec![2, 1]);
        let flat = DVector::from_fn(9, |i, _| i as f64);
        let selected = set.gather(&slots, &flat);
        assert_eq!(selected.as_slice(), &[6.0, 7.0, 8.0, 3.0, 4.0, 5.0]);
        let spread = set.scatter(&slots, 3, &selected);
        assert_eq!(spread[0], Vec3::zeros());
        assert_eq!(spread[1], Vec3::new(3.0, 4.0, 5.0));
        assert_eq!(spread[2], Vec3::new(6.0, 7.0, 8.0));
    }

    #[test]
    fn unknown_tags_are_rejected() {
        let set = CvSet::single(Distance::new(0, 5).unwrap()).unwrap();
        let err = set
            .evaluate(&[Vec3::zeros(), Vec3::x()], &[0, 1], &sim_box())
            .unwrap_err();
        assert_eq!(err.code(), "invalid-selection");
        assert!(CvSet::new(Vec::new()).is_err());
    }
}
