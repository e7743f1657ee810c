use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use sages_core::{
    generalize, ErrorInfo, HelperMethods, MethodBundle, MethodState, SageError, SamplingMethod,
    Snapshot, SnapshotFlags, StepData, Vec3,
};
use sages_cv::CvSet;
use sages_grid::{build_indexer, Grid};

use crate::check_dims;

const DEFAULT_N_MIN: u32 = 200;

/// Adaptive biasing force.
///
/// Estimates the mean generalized force on a grid over CV space from time
/// derivatives of the generalized momentum, and applies its negative as a
/// bias so the system diffuses freely along the CVs.
#[derive(Debug, Clone)]
pub struct Abf {
    cvs: CvSet,
    grid: Grid,
    n_min: u32,
    bias_feedback: bool,
}

/// State threaded through ABF updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbfState {
    /// Per-slot force correction.
    pub bias: Vec<Vec3>,
    /// Visits per grid cell (row-major).
    pub hist: Vec<u32>,
    /// Accumulated generalized force, `dims` values per cell.
    pub fsum: Vec<f64>,
    /// Estimate looked up on the last update.
    pub f: DVector<f64>,
    /// Generalized momentum on the last update.
    pub wp: DVector<f64>,
    /// Generalized momentum one update earlier.
    pub wp_prev: DVector<f64>,
    /// CV value on the last update.
    pub xi: DVector<f64>,
}

impl AbfState {
    fn new(natoms: usize, cells: usize, dims: usize) -> Self {
        Self {
            bias: vec![Vec3::zeros(); natoms],
            hist: vec![0; cells],
            fsum: vec![0.0; cells * dims],
            f: DVector::zeros(dims),
            wp: DVector::zeros(dims),
            wp_prev: DVector::zeros(dims),
            xi: DVector::zeros(dims),
        }
    }

    /// Number of CV dimensions.
    pub fn dims(&self) -> usize {
        self.f.len()
    }

    /// Accumulated force sum of `cell`.
    pub fn fsum_at(&self, cell: usize) -> &[f64] {
        let dims = self.dims();
        &self.fsum[cell * dims..(cell + 1) * dims]
    }

    /// Mean generalized force per visited cell; unvisited cells are zero.
    pub fn mean_force(&self) -> DMatrix<f64> {
        let dims = self.dims();
        DMatrix::from_fn(self.hist.len(), dims, |cell, k| {
            let visits = self.hist[cell];
            if visits == 0 {
                0.0
            } else {
                self.fsum[cell * dims + k] / f64::from(visits)
            }
        })
    }
}

impl MethodState for AbfState {
    fn bias(&self) -> Option<&[Vec3]> {
        Some(&self.bias)
    }

    fn xi(&self) -> Option<&DVector<f64>> {
        Some(&self.xi)
    }
}

impl Abf {
    /// ABF over `grid`; fails when the grid and CV dimensions differ.
    pub fn new(cvs: CvSet, grid: Grid) -> Result<Self, SageError> {
        check_dims(&cvs, &grid)?;
        Ok(Self {
            cvs,
            grid,
            n_min: DEFAULT_N_MIN,
            bias_feedback: true,
        })
    }

    /// Sets the visit count below which estimates are damped.
    pub fn with_n_min(mut self, n_min: u32) -> Self {
        self.n_min = n_min;
        self
    }

    /// With `false`, accumulates the estimate without applying it.
    pub fn with_bias_feedback(mut self, enabled: bool) -> Self {
        self.bias_feedback = enabled;
        self
    }

    /// Collective variables.
    pub fn cvs(&self) -> &CvSet {
        &self.cvs
    }

    /// Accumulation grid.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Minimum-sample floor.
    pub fn n_min(&self) -> u32 {
        self.n_min
    }
}

impl SamplingMethod for Abf {
    type State = AbfState;

    fn name(&self) -> &'static str {
        "abf"
    }

    fn snapshot_flags(&self) -> SnapshotFlags {
        SnapshotFlags::positions_only()
            .with_momenta()
            .with_unwrapped_positions(self.cvs.requires_box_unwrapping())
    }

    fn build(
        &self,
        snapshot: &Snapshot<'_>,
        helpers: &HelperMethods,
    ) -> Result<MethodBundle<AbfState>, SageError> {
        let cvs = self.cvs.clone();
        let indexer = build_indexer(&self.grid);
        let dims = self.grid.dims();
        let cells = self.grid.size();
        let natoms = snapshot.len();
        let n_min = self.n_min;
        let feedback = self.bias_feedback;
        let dt = snapshot.dt;
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SageError::Config(
                ErrorInfo::new("invalid-timestep", "abf needs a positive, finite integration timestep")
                    .with_context("dt", dt.to_string()),
            ));
        }
        log::debug!(
            "abf: {dims} dims over {cells} cells, n_min {n_min}, feedback {feedback}"
        );

        let update = move |state: &AbfState, data: &StepData<'_>| {
            let value = cvs.evaluate_step(data)?;
            let slots = cvs.slots(&data.indices)?;
            let momenta = data.momenta.as_ref().ok_or_else(|| {
                SageError::Engine(ErrorInfo::new(
                    "invalid-snapshot",
                    "momenta were not materialized for this step",
                ))
            })?;
            let p = cvs.gather(&slots, momenta);
            let jacobian = &value.jacobian;

            let projection = jacobian * jacobian.transpose();
            let wp = projection
                .cholesky()
                .map(|factor| factor.solve(&(jacobian * &p)))
                .filter(|wp| wp.iter().all(|v| v.is_finite()))
                .ok_or_else(|| {
                    SageError::Numerical(
                        ErrorInfo::new("singular-projection", "Jξ·Jξᵀ is not positive definite")
                            .with_context("xi", format!("{:?}", value.xi.as_slice()))
                            .with_hint("the selected particles do not determine every CV component"),
                    )
                })?;
            // second order backward difference
            let dwp_dt = (&wp * 1.5 - &state.wp * 2.0 + &state.wp_prev * 0.5) / dt;
            if dwp_dt.iter().any(|v| !v.is_finite()) {
                return Err(SageError::Numerical(
                    ErrorInfo::new("non-finite-force", "generalized force estimate is not finite")
                        .with_context("xi", format!("{:?}", value.xi.as_slice())),
                ));
            }

            let cell = indexer.flat_index(value.xi.as_slice())?;
            let mut hist = state.hist.clone();
            hist[cell] += 1;
            let mut fsum = state.fsum.clone();
            for k in 0..dims {
                let previous = if feedback { state.f[k] } else { 0.0 };
                fsum[cell * dims + k] += dwp_dt[k] + previous;
            }
            let count = f64::from(hist[cell].max(n_min));
            let f = DVector::from_fn(dims, |k, _| fsum[cell * dims + k] / count);

            let bias = if feedback {
                cvs.scatter(&slots, data.positions.len(), &-(jacobian.transpose() * &f))
            } else {
                vec![Vec3::zeros(); data.positions.len()]
            };
            Ok(AbfState {
                bias,
                hist,
                fsum,
                f,
                wp,
                wp_prev: state.wp.clone(),
                xi: value.xi,
            })
        };

        Ok(MethodBundle {
            initialize: Box::new(move || AbfState::new(natoms, cells, dims)),
            update: generalize(update, *helpers, self.snapshot_flags()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sages_cv::{Component, Distance};
    use std::sync::Arc;

    #[test]
    fn rejects_grid_with_wrong_axis_count() {
        let cvs = CvSet::new(vec![
            Arc::new(Component::new(vec![0], 0).unwrap()),
            Arc::new(Distance::new(0, 1).unwrap()),
        ])
        .unwrap();
        let grid = Grid::bounded(vec![0.0], vec![1.0], vec![10]).unwrap();
        let err = Abf::new(cvs, grid).unwrap_err();
        assert!(err.is_config());
        assert_eq!(err.code(), "dimension-mismatch");
    }

    #[test]
    fn requests_momenta_and_unwrapping() {
        let cvs = CvSet::single(Component::new(vec![0], 0).unwrap()).unwrap();
        let grid = Grid::bounded(vec![0.0], vec![1.0], vec![10]).unwrap();
        let abf = Abf::new(cvs, grid).unwrap();
        let flags = abf.snapshot_flags();
        assert!(flags.momenta);
        assert!(flags.unwrapped_positions);
        assert_eq!(abf.n_min(), 200);
    }

    #[test]
    fn mean_force_skips_unvisited_cells() {
        let mut state = AbfState::new(1, 3, 1);
        state.hist[1] = 4;
        state.fsum[1] = 10.0;
        let mean = state.mean_force();
        assert_eq!(mean[(0, 0)], 0.0);
        assert_eq!(mean[(1, 0)], 2.5);
        assert_eq!(state.fsum_at(1), &[10.0]);
    }
}
