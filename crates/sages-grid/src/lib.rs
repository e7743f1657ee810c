#![deny(missing_docs)]

//! Grids over collective-variable space and the cell indexer used by
//! histogram-based sampling methods.

/// Grid descriptions and validation.
pub mod grid;
/// Mapping from collective-variable values to grid cells.
pub mod indexer;

pub use grid::{Grid, GridSpec, Periodicity};
pub use indexer::{build_indexer, Indexer};
