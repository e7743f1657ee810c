use nalgebra::{DMatrix, DVector};
use sages_core::{SageError, SimBox, Vec3};

use crate::variable::{check_selection, CollectiveVariable, CvValue};

/// Squared radius of gyration of an unweighted particle group,
/// `Rg² = (1/n) Σ |rᵢ − r̄|²`.
#[derive(Debug, Clone, PartialEq)]
pub struct RadiusOfGyration {
    tags: Vec<usize>,
}

impl RadiusOfGyration {
    /// Radius of gyration of the particles in `tags`.
    pub fn new(tags: Vec<usize>) -> Result<Self, SageError> {
        check_selection("radius-of-gyration", &tags, None)?;
        Ok(Self { tags })
    }
}

impl CollectiveVariable for RadiusOfGyration {
    fn name(&self) -> &'static str {
        "radius-of-gyration"
    }

    fn tags(&self) -> &[usize] {
        &self.tags
    }

    fn requires_box_unwrapping(&self) -> bool {
        true
    }

    fn evaluate(&self, positions: &[Vec3], _sim_box: &SimBox) -> Result<CvValue, SageError> {
        let n = positions.len() as f64;
        let center = positions.iter().sum::<Vec3>() / n;
        let mut rg2 = 0.0;
        let mut jacobian = DMatrix::zeros(1, 3 * positions.len());
        for (particle, r) in positions.iter().enumerate() {
            let offset = r - center;
            rg2 += offset.norm_squared();
            // the centroid terms cancel because the offsets sum to zero
            for axis in 0..3 {
                jacobian[(0, 3 * particle + axis)] = 2.0 * offset[axis] / n;
            }
        }
        Ok(CvValue {
            xi: DVector::from_element(1, rg2 / n),
            jacobian,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_has_known_radius() {
        let cv = RadiusOfGyration::new(vec![0, 1, 2, 3]).unwrap();
        let corners = [
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-1.0, 1.0, 0.0),
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
        ];
        let sim_box = SimBox::orthorhombic([10.0; 3], Vec3::zeros()).unwrap();
        let value = cv.evaluate(&corners, &sim_box).unwrap();
        assert!((value.xi[0] - 2.0).abs() < 1e-12);
        assert!((value.jacobian[(0, 0)] - 0.5).abs() < 1e-12);
        assert!((value.jacobian[(0, 2)]).abs() < 1e-12);
    }
}
