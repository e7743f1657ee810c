#![deny(missing_docs)]

//! Binding between sampling methods and simulation engines.
//!
//! An engine is anything implementing [`SimulationContext`]; a method is bound
//! to it through [`ContextWrapper`], which installs a [`Sampler`] as the
//! per-step hook. [`LangevinContext`] is a small in-process engine used by the
//! test suites and benchmarks.

/// Per-step hook installation and the wrapped context handle.
pub mod binding;
/// Engine collaborator traits and scoped acquisition.
pub mod context;
/// Backend name validation.
pub mod kind;
/// Reference Langevin dynamics engine.
pub mod langevin;

pub use binding::{bind, run, Callback, ContextWrapper, NoCallback, RunOutcome, Sampler};
pub use context::{HalfStepHook, NoHook, ScopedContext, SimulationContext, SystemView};
pub use kind::{supported_backends, BackendKind};
pub use langevin::{ExternalForce, LangevinConfig, LangevinContext, ParticleSystem};
