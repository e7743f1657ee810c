use sages_core::{
    ErrorInfo, MethodState, OwnedSnapshot, SageError, SamplingMethod, Snapshot, UpdateFn,
};

use crate::context::{HalfStepHook, NoHook, ScopedContext, SimulationContext, SystemView};

/// User hook invoked after the bias has been applied on every step.
pub trait Callback<S> {
    /// Observes the step's snapshot and the freshly updated method state.
    fn call(&mut self, snapshot: &Snapshot<'_>, state: &S, timestep: u64);
}

impl<S, F> Callback<S> for F
where
    F: FnMut(&Snapshot<'_>, &S, u64),
{
    fn call(&mut self, snapshot: &Snapshot<'_>, state: &S, timestep: u64) {
        self(snapshot, state, timestep)
    }
}

/// Callback that ignores every step.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCallback;

impl<S> Callback<S> for NoCallback {
    fn call(&mut self, _snapshot: &Snapshot<'_>, _state: &S, _timestep: u64) {}
}

/// Per-step hook driving one sampling method.
pub struct Sampler<S, K> {
    update: UpdateFn<S>,
    state: S,
    callback: K,
}

impl<S: MethodState, K: Callback<S>> Sampler<S, K> {
    /// Current method state.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// The user callback.
    pub fn callback(&self) -> &K {
        &self.callback
    }

    /// Consumes the sampler, returning state and callback.
    pub fn into_parts(self) -> (S, K) {
        (self.state, self.callback)
    }
}

impl<S, K> std::fmt::Debug for Sampler<S, K>
where
    S: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<S: MethodState, K: Callback<S>> HalfStepHook for Sampler<S, K> {
    fn update(&mut self, timestep: u64, view: &mut dyn SystemView) -> Result<(), SageError> {
        view.synchronize()?;
        let mut snapshot = view.take_snapshot();
        let state = (self.update)(&snapshot, &self.state)?;
        if let Some(bias) = state.bias() {
            snapshot.add_bias(bias)?;
        }
        self.callback.call(&snapshot, &state, timestep);
        self.state = state;
        Ok(())
    }
}

/// Builds `method` against the context's current state and returns the hook
/// together with an owned copy of that state.
pub fn bind<C, M, K>(
    context: &mut C,
    method: &M,
    callback: K,
) -> Result<(Sampler<M::State, K>, OwnedSnapshot), SageError>
where
    C: SimulationContext + ?Sized,
    M: SamplingMethod,
    K: Callback<M::State>,
{
    context.synchronize()?;
    let helpers = context.helpers();
    let snapshot = context.take_snapshot();
    snapshot.validate()?;
    method.snapshot_flags().check(&snapshot)?;
    let initial = snapshot.to_owned_snapshot(&helpers)?;
    let bundle = method.build(&snapshot, &helpers)?;
    log::info!(
        "bound {} to {} backend with {} particles",
        method.name(),
        context.backend().name(),
        initial.positions.len()
    );
    let sampler = Sampler {
        state: (bundle.initialize)(),
        update: bundle.update,
        callback,
    };
    Ok((sampler, initial))
}

/// A simulation context with a sampling method attached.
///
/// The wrapped context is torn down when the wrapper is dropped.
pub struct ContextWrapper<C: SimulationContext, S, K> {
    context: ScopedContext<C>,
    sampler: Option<Sampler<S, K>>,
    initial: OwnedSnapshot,
}

impl<C, S, K> ContextWrapper<C, S, K>
where
    C: SimulationContext,
    S: MethodState,
    K: Callback<S>,
{
    /// Takes ownership of `context` and binds `method` to it.
    pub fn new<M>(context: C, method: &M, callback: K) -> Result<Self, SageError>
    where
        M: SamplingMethod<State = S>,
    {
        let mut context = ScopedContext::new(context);
        let (sampler, initial) = bind(&mut *context, method, callback)?;
        Ok(Self {
            context,
            sampler: Some(sampler),
            initial,
        })
    }

    /// Runs the context; the method's hook fires on every step while attached.
    pub fn run(&mut self, timesteps: u64) -> Result<(), SageError> {
        match self.sampler.as_mut() {
            Some(sampler) => self.context.run(timesteps, sampler),
            None => self.context.run(timesteps, &mut NoHook),
        }
    }

    /// Removes the hook. Detaching twice only logs a warning.
    pub fn detach(&mut self) -> Option<Sampler<S, K>> {
        let sampler = self.sampler.take();
        if sampler.is_none() {
            log::warn!("detach called on a context with no attached sampling method");
        }
        sampler
    }

    /// Whether a sampler is attached.
    pub fn is_attached(&self) -> bool {
        self.sampler.is_some()
    }

    /// The attached sampler, if any.
    pub fn sampler(&self) -> Option<&Sampler<S, K>> {
        self.sampler.as_ref()
    }

    /// Method state of the attached sampler.
    pub fn state(&self) -> Option<&S> {
        self.sampler.as_ref().map(Sampler::state)
    }

    /// The wrapped context.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Mutable access to the wrapped context.
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Copy of the state the context was in when the method was bound.
    pub fn initial_snapshot(&self) -> &OwnedSnapshot {
        &self.initial
    }

    /// Puts the engine back into the state it had at bind time.
    pub fn restore_initial(&mut self) -> Result<(), SageError> {
        self.context.restore(&self.initial)
    }

    /// Tears the context down, returning the sampler if still attached.
    pub fn finish(mut self) -> Result<Option<Sampler<S, K>>, SageError> {
        let sampler = self.sampler.take();
        self.context.finish()?;
        Ok(sampler)
    }

    /// Tears the context down and hands back the final state and callback.
    /// Fails with `detached` if the method is no longer attached.
    pub fn into_outcome(self) -> Result<RunOutcome<S, K>, SageError> {
        match self.finish()? {
            Some(sampler) => {
                let (state, callback) = sampler.into_parts();
                Ok(RunOutcome { state, callback })
            }
            None => Err(SageError::Engine(ErrorInfo::new(
                "detached",
                "sampling method was detached before the run finished",
            ))),
        }
    }
}

/// Final state of a single-replica run.
#[derive(Debug)]
pub struct RunOutcome<S, K> {
    /// Method state after the last step.
    pub state: S,
    /// The callback, with whatever it accumulated.
    pub callback: K,
}

/// Runs one simulation with `method` attached.
///
/// The context comes from `context_generator`; it is torn down before this
/// returns, whether the run succeeded or not.
pub fn run<M, C, G, K>(
    method: &M,
    context_generator: G,
    timesteps: u64,
    callback: K,
) -> Result<RunOutcome<M::State, K>, SageError>
where
    M: SamplingMethod,
    C: SimulationContext,
    G: FnOnce() -> Result<C, SageError>,
    K: Callback<M::State>,
{
    let context = context_generator()?;
    let mut wrapped = ContextWrapper::new(context, method, callback)?;
    wrapped.run(timesteps)?;
    wrapped.into_outcome()
}
