use std::ops::{Deref, DerefMut};

use sages_core::{HelperMethods, OwnedSnapshot, SageError, Snapshot};

use crate::kind::BackendKind;

/// Live view of an engine's per-particle buffers.
pub trait SystemView {
    /// Waits for any pending device work touching the particle buffers.
    fn synchronize(&mut self) -> Result<(), SageError> {
        Ok(())
    }

    /// Helpers matching the engine's buffer layout.
    fn helpers(&self) -> HelperMethods;

    /// Borrows the current state; `forces` is writable for the bias.
    fn take_snapshot(&mut self) -> Snapshot<'_>;

    /// Writes a previously copied snapshot back into the engine, matching
    /// particles by tag.
    fn restore(&mut self, snapshot: &OwnedSnapshot) -> Result<(), SageError>;
}

/// Hook the engine calls once per integration step, between the force
/// computation and the second half kick.
pub trait HalfStepHook {
    /// Called with the engine's step counter after it has been advanced.
    fn update(&mut self, timestep: u64, view: &mut dyn SystemView) -> Result<(), SageError>;
}

/// Hook that does nothing; used when no method is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHook;

impl HalfStepHook for NoHook {
    fn update(&mut self, _timestep: u64, _view: &mut dyn SystemView) -> Result<(), SageError> {
        Ok(())
    }
}

/// A simulation engine that can be advanced and torn down.
pub trait SimulationContext: SystemView {
    /// Which backend implementation this is.
    fn backend(&self) -> BackendKind;

    /// Advances `timesteps` steps, calling `hook` on every one of them.
    fn run(&mut self, timesteps: u64, hook: &mut dyn HalfStepHook) -> Result<(), SageError>;

    /// Releases external resources. Called exactly once by [`ScopedContext`].
    fn teardown(&mut self) -> Result<(), SageError> {
        Ok(())
    }
}

/// Owns a context and tears it down exactly once, on every exit path.
#[derive(Debug)]
pub struct ScopedContext<C: SimulationContext> {
    context: C,
    torn_down: bool,
}

impl<C: SimulationContext> ScopedContext<C> {
    /// Takes ownership of `context`.
    pub fn new(context: C) -> Self {
        Self {
            context,
            torn_down: false,
        }
    }

    /// Tears the context down now and reports the outcome.
    pub fn finish(&mut self) -> Result<(), SageError> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        self.context.teardown()
    }
}

impl<C: SimulationContext> Deref for ScopedContext<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.context
    }
}

impl<C: SimulationContext> DerefMut for ScopedContext<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.context
    }
}

impl<C: SimulationContext> Drop for ScopedContext<C> {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            log::warn!("context teardown failed: {err}");
        }
    }
}
