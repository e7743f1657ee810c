#![deny(missing_docs)]

//! Collective variables: the `(ξ, Jξ)` evaluation contract, composite sets and
//! a handful of reference variables.

/// Geometric collective variables over particle coordinates.
pub mod coordinates;
/// Stacking several collective variables into one evaluator.
pub mod set;
/// Collective variables describing the shape of a particle group.
pub mod shape;
/// Evaluation contract shared by every collective variable.
pub mod variable;

pub use coordinates::{Component, Distance};
pub use set::CvSet;
pub use shape::RadiusOfGyration;
pub use variable::{CollectiveVariable, CvValue};
