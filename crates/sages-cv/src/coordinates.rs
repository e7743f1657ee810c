use nalgebra::{DMatrix, DVector};
use sages_core::{SageError, SimBox, Vec3};

use crate::variable::{check_selection, degenerate, invalid_selection, CollectiveVariable, CvValue};

/// One Cartesian component of the barycenter of a particle group.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    tags: Vec<usize>,
    axis: usize,
}

impl Component {
    /// Selects `axis` (0 = x, 1 = y, 2 = z) of the barycenter of `tags`.
    pub fn new(tags: Vec<usize>, axis: usize) -> Result<Self, SageError> {
        check_selection("component", &tags, None)?;
        if axis > 2 {
            return Err(invalid_selection("component", "axis must be 0, 1 or 2"));
        }
        Ok(Self { tags, axis })
    }

    /// Cartesian axis.
    pub fn axis(&self) -> usize {
        self.axis
    }
}

impl CollectiveVariable for Component {
    fn name(&self) -> &'static str {
        "component"
    }

    fn tags(&self) -> &[usize] {
        &self.tags
    }

    fn requires_box_unwrapping(&self) -> bool {
        true
    }

    fn evaluate(&self, positions: &[Vec3], _sim_box: &SimBox) -> Result<CvValue, SageError> {
        let n = positions.len();
        let weight = 1.0 / n as f64;
        let center = positions.iter().sum::<Vec3>() * weight;
        let mut jacobian = DMatrix::zeros(1, 3 * n);
        for particle in 0..n {
            jacobian[(0, 3 * particle + self.axis)] = weight;
        }
        Ok(CvValue {
            xi: DVector::from_element(1, center[self.axis]),
            jacobian,
        })
    }
}

/// Minimum-image distance between two particles.
#[derive(Debug, Clone, PartialEq)]
pub struct Distance {
    tags: [usize; 2],
}

impl Distance {
    /// Distance between particles `first` and `second`.
    pub fn new(first: usize, second: usize) -> Result<Self, SageError> {
        check_selection("distance", &[first, second], Some(2))?;
        Ok(Self {
            tags: [first, second],
        })
    }
}

impl CollectiveVariable for Distance {
    fn name(&self) -> &'static str {
        "distance"
    }

    fn tags(&self) -> &[usize] {
        &self.tags
    }

    fn evaluate(&self, positions: &[Vec3], sim_box: &SimBox) -> Result<CvValue, SageError> {
        let d = sim_box.minimum_image(&(positions[0] - positions[1]));
        let r = d.norm();
        if r == 0.0 {
            return Err(degenerate("distance", "distance gradient is undefined for coincident particles"));
        }
        let unit = d / r;
        let mut jacobian = DMatrix::zeros(1, 6);
        for axis in 0..3 {
            jacobian[(0, axis)] = unit[axis];
            jacobian[(0, 3 + axis)] = -unit[axis];
        }
        Ok(CvValue {
            xi: DVector::from_element(1, r),
            jacobian,
        })
    }
}
