use sages_core::{ErrorInfo, SageError};

use crate::grid::Grid;

/// Stateless map from a collective-variable value to its grid cell.
///
/// Bounded axes clamp out-of-range values onto the edge cells; periodic axes
/// wrap by the axis length.
#[derive(Debug, Clone, PartialEq)]
pub struct Indexer {
    lower: Vec<f64>,
    length: Vec<f64>,
    shape: Vec<usize>,
    periodic: Vec<bool>,
    strides: Vec<usize>,
}

/// Builds the indexer for `grid`.
pub fn build_indexer(grid: &Grid) -> Indexer {
    let dims = grid.dims();
    let mut strides = vec![1usize; dims];
    for axis in (0..dims.saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * grid.shape()[axis + 1];
    }
    Indexer {
        lower: grid.lower().to_vec(),
        length: (0..dims)
            .map(|axis| grid.upper()[axis] - grid.lower()[axis])
            .collect(),
        shape: grid.shape().to_vec(),
        periodic: (0..dims).map(|axis| grid.is_periodic(axis)).collect(),
        strides,
    }
}

impl Indexer {
    /// Number of axes.
    pub fn dims(&self) -> usize {
        self.shape.len()
    }

    /// Multi-index of the cell containing `xi`.
    pub fn index(&self, xi: &[f64]) -> Result<Vec<usize>, SageError> {
        if xi.len() != self.dims() {
            return Err(SageError::dimension_mismatch(
                "collective variable and grid",
                self.dims(),
                xi.len(),
            ));
        }
        xi.iter()
            .enumerate()
            .map(|(axis, &value)| self.axis_index(axis, value))
            .collect()
    }

    /// Row-major flat index of the cell containing `xi`.
    pub fn flat_index(&self, xi: &[f64]) -> Result<usize, SageError> {
        Ok(self.ravel(&self.index(xi)?))
    }

    /// Converts a multi-index into a row-major flat index.
    pub fn ravel(&self, multi: &[usize]) -> usize {
        multi
            .iter()
            .zip(&self.strides)
            .map(|(index, stride)| index * stride)
            .sum()
    }

    /// Converts a row-major flat index back into a multi-index.
    pub fn unravel(&self, mut flat: usize) -> Vec<usize> {
        self.strides
            .iter()
            .map(|stride| {
                let index = flat / stride;
                flat %= stride;
                index
            })
            .collect()
    }

    fn axis_index(&self, axis: usize, value: f64) -> Result<usize, SageError> {
        if !value.is_finite() {
            return Err(SageError::Numerical(
                ErrorInfo::new("non-finite-cv", "collective variable is not finite")
                    .with_context("axis", axis.to_string())
                    .with_context("value", value.to_string()),
            ));
        }
        let cells = self.shape[axis];
        let length = self.length[axis];
        let offset = value - self.lower[axis];
        let last = cells - 1;
        if self.periodic[axis] {
            let wrapped = offset.rem_euclid(length);
            let position = (wrapped / length * cells as f64).floor() as usize;
            // rem_euclid may round up to `length` for tiny negative offsets
            Ok(position.min(last))
        } else {
            let position = (offset / length * cells as f64).floor();
            if position <= 0.0 {
                Ok(0)
            } else {
                Ok((position as usize).min(last))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Periodicity;

    #[test]
    fn bounded_axes_clamp() {
        let grid = Grid::bounded(vec![-1.0], vec![1.0], vec![10]).unwrap();
        let indexer = build_indexer(&grid);
        assert_eq!(indexer.index(&[-1.0]).unwrap(), vec![0]);
        assert_eq!(indexer.index(&[0.05]).unwrap(), vec![5]);
        assert_eq!(indexer.index(&[1.0]).unwrap(), vec![9]);
        assert_eq!(indexer.index(&[25.0]).unwrap(), vec![9]);
        assert_eq!(indexer.index(&[-25.0]).unwrap(), vec![0]);
    }

    #[test]
    fn periodic_axes_wrap() {
        let grid = Grid::periodic(vec![-2.0], vec![2.0], vec![8]).unwrap();
        let indexer = build_indexer(&grid);
        assert_eq!(indexer.index(&[2.25]).unwrap(), vec![0]);
        assert_eq!(indexer.index(&[-2.25]).unwrap(), vec![7]);
        assert_eq!(indexer.index(&[1.75]).unwrap(), indexer.index(&[-2.25]).unwrap());
    }

    #[test]
    fn ravel_is_row_major_and_invertible() {
        let grid = Grid::new(
            vec![0.0, 0.0, 0.0],
            vec![1.0, 1.0, 1.0],
            vec![2, 3, 4],
            Periodicity::PerAxis(vec![false, true, false]),
        )
        .unwrap();
        let indexer = build_indexer(&grid);
        assert_eq!(indexer.ravel(&[1, 2, 3]), 23);
        assert_eq!(indexer.unravel(23), vec![1, 2, 3]);
        assert_eq!(indexer.flat_index(&[0.9, 0.4, 0.1]).unwrap(), 12 + 4);
    }

    #[test]
    fn rejects_non_finite_and_wrong_dimension() {
        let grid = Grid::bounded(vec![0.0], vec![1.0], vec![4]).unwrap();
        let indexer = build_indexer(&grid);
        let err = indexer.index(&[f64::NAN]).unwrap_err();
        assert!(err.is_numerical());
        assert_eq!(err.code(), "non-finite-cv");
        assert!(indexer.index(&[f64::INFINITY]).is_err());
        assert_eq!(indexer.index(&[0.1, 0.2]).unwrap_err().code(), "dimension-mismatch");
    }
}
