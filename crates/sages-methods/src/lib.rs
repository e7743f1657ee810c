#![deny(missing_docs)]

//! Sampling methods for the SAGES engine.
//!
//! Every method implements [`sages_core::SamplingMethod`] and is attached to a
//! simulation through [`sages_backend::ContextWrapper`].

/// Adaptive biasing force estimator.
pub mod abf;
/// Method state checkpoints.
pub mod checkpoint;
/// YAML configuration schema.
pub mod config;
/// Restoring-force bias towards a fixed CV value.
pub mod harmonic_bias;
/// CV histogram logging callback.
pub mod histogram;
/// Multi-replica umbrella integration.
pub mod umbrella_integration;

use sages_core::SageError;
use sages_cv::CvSet;
use sages_grid::Grid;

pub use abf::{Abf, AbfState};
pub use checkpoint::StateCheckpoint;
pub use config::{ConfiguredMethod, CvConfig, MethodConfig, SamplingConfig};
pub use harmonic_bias::{Center, HarmonicBias, HarmonicBiasState, Kspring};
pub use histogram::{Histogram, HistogramLogger};
pub use umbrella_integration::{
    PerReplica, ReplicaResult, ResolvedPlan, UmbrellaIntegration, UmbrellaPlan, UmbrellaResult,
};

/// Rejects a grid whose axis count differs from the CV dimension.
pub fn check_dims(cvs: &CvSet, grid: &Grid) -> Result<(), SageError> {
    if cvs.dimension() != grid.dims() {
        return Err(SageError::dimension_mismatch(
            "grid and collective variable",
            cvs.dimension(),
            grid.dims(),
        ));
    }
    Ok(())
}
