//! The per-timestep state machine every sampling method implements.

use std::borrow::Cow;
use std::fmt::Debug;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::errors::SageError;
use crate::snapshot::{missing_images_error, HelperMethods, SimBox, Snapshot, Vec3};

/// Which canonical fields a method needs materialized on every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotFlags {
    /// Flat per-slot momenta.
    pub momenta: bool,
    /// Per-slot masses.
    pub masses: bool,
    /// Positions unwrapped through image counters.
    pub unwrapped_positions: bool,
}

impl SnapshotFlags {
    /// Positions and indices only.
    pub fn positions_only() -> Self {
        Self::default()
    }

    /// Adds momenta to the requested fields.
    pub fn with_momenta(mut self) -> Self {
        self.momenta = true;
        self
    }

    /// Adds masses to the requested fields.
    pub fn with_masses(mut self) -> Self {
        self.masses = true;
        self
    }

    /// Requests unwrapped positions when `required` is set.
    pub fn with_unwrapped_positions(mut self, required: bool) -> Self {
        self.unwrapped_positions |= required;
        self
    }

    /// Fails if `snapshot` cannot provide the requested fields.
    pub fn check(&self, snapshot: &Snapshot<'_>) -> Result<(), SageError> {
        if self.unwrapped_positions && snapshot.images.is_none() {
            return Err(missing_images_error());
        }
        Ok(())
    }
}

/// Canonicalized per-step data handed to a method's concrete update.
#[derive(Debug, Clone)]
pub struct StepData<'a> {
    /// Positions per slot (borrowed unless unwrapping was required).
    pub positions: Cow<'a, [Vec3]>,
    /// Tag to slot map.
    pub indices: Vec<usize>,
    /// Flat per-slot momenta, when requested.
    pub momenta: Option<DVector<f64>>,
    /// Per-slot masses, when requested.
    pub masses: Option<Vec<f64>>,
    /// Periodic cell.
    pub sim_box: &'a SimBox,
    /// Integration timestep.
    pub dt: f64,
}

/// State threaded through a method's updates.
pub trait MethodState: Clone + Debug + Send + 'static {
    /// Per-slot force correction to add into the engine's force buffer.
    fn bias(&self) -> Option<&[Vec3]>;

    /// Collective variable value computed on the last update, if any.
    fn xi(&self) -> Option<&DVector<f64>>;
}

/// Boxed state initializer.
pub type InitializeFn<S> = Box<dyn Fn() -> S + Send>;

/// Boxed update in the raw-snapshot signature the binding layer calls.
pub type UpdateFn<S> = Box<dyn Fn(&Snapshot<'_>, &S) -> Result<S, SageError> + Send>;

/// Pair of functions returned by [`SamplingMethod::build`].
pub struct MethodBundle<S> {
    /// Allocates the initial state.
    pub initialize: InitializeFn<S>,
    /// Advances the state by one step.
    pub update: UpdateFn<S>,
}

impl<S> Debug for MethodBundle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodBundle").finish_non_exhaustive()
    }
}

/// Capability shared by all sampling methods.
///
/// New methods are added by implementing this trait; there is no shared
/// mutable base state.
pub trait SamplingMethod {
    /// Per-run state produced by `initialize` and replaced by every `update`.
    type State: MethodState;

    /// Short identifier used in logs and checkpoints.
    fn name(&self) -> &'static str;

    /// Fields the update needs from each snapshot.
    fn snapshot_flags(&self) -> SnapshotFlags;

    /// Builds the `initialize`/`update` pair for the engine described by `snapshot`.
    fn build(
        &self,
        snapshot: &Snapshot<'_>,
        helpers: &HelperMethods,
    ) -> Result<MethodBundle<Self::State>, SageError>;
}

/// Adapts a method-facing update `(state, data) -> state'` into the raw
/// snapshot signature, materializing only the fields named in `flags`.
///
/// The returned function never mutates its inputs, so calling it twice on the
/// same snapshot and state yields the same result.
pub fn generalize<S, F>(concrete: F, helpers: HelperMethods, flags: SnapshotFlags) -> UpdateFn<S>
where
    S: 'static,
    F: Fn(&S, &StepData<'_>) -> Result<S, SageError> + Send + 'static,
{
    Box::new(move |snapshot: &Snapshot<'_>, state: &S| {
        let data = StepData {
            positions: helpers.positions(snapshot, flags.unwrapped_positions)?,
            indices: helpers.indices(snapshot.ids)?,
            momenta: flags.momenta.then(|| helpers.momenta(&snapshot.vel_mass)),
            masses: flags.masses.then(|| helpers.masses(&snapshot.vel_mass)),
            sim_box: &snapshot.sim_box,
            dt: snapshot.dt,
        };
        concrete(state, &data)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{IdLayout, VelMass};

    #[derive(Debug, Clone, PartialEq)]
    struct Observed {
        first_x: f64,
        momentum_len: Option<usize>,
        slot_of_tag0: usize,
    }

    impl MethodState for Observed {
        fn bias(&self) -> Option<&[Vec3]> {
            None
        }

        fn xi(&self) -> Option<&DVector<f64>> {
            None
        }
    }

    #[test]
    fn generalize_materializes_requested_fields() {
        let positions = [Vec3::new(0.5, 0.0, 0.0), Vec3::zeros()];
        let packed = [[1.0, 0.0, 0.0, 2.0]; 2];
        let mut forces = [Vec3::zeros(); 2];
        let ids = [1, 0];
        let images = [[1, 0, 0], [0, 0, 0]];
        let snapshot = Snapshot {
            positions: &positions,
            vel_mass: VelMass::Packed(&packed),
            forces: &mut forces,
            ids: &ids,
            images: Some(&images),
            sim_box: SimBox::orthorhombic([1.0; 3], Vec3::zeros()).unwrap(),
            dt: 0.1,
        };
        let helpers = HelperMethods::new(IdLayout::TagPerSlot);

        let observe = |_: &Observed, data: &StepData<'_>| {
            Ok(Observed {
                first_x: data.positions[0].x,
                momentum_len: data.momenta.as_ref().map(DVector::len),
                slot_of_tag0: data.indices[0],
            })
        };
        let initial = Observed {
            first_x: 0.0,
            momentum_len: None,
            slot_of_tag0: 0,
        };

        let plain = generalize(observe, helpers, SnapshotFlags::positions_only());
        let state = plain(&snapshot, &initial).unwrap();
        assert_eq!(state.first_x, 0.5);
        assert_eq!(state.momentum_len, None);
        assert_eq!(state.slot_of_tag0, 1);

        let full = generalize(
            observe,
            helpers,
            SnapshotFlags::positions_only()
                .with_momenta()
                .with_unwrapped_positions(true),
        );
        let state = full(&snapshot, &initial).unwrap();
        assert_eq!(state.first_x, 1.5);
        assert_eq!(state.momentum_len, Some(6));
        // referentially transparent
        assert_eq!(full(&snapshot, &initial).unwrap(), state);
    }

    #[test]
    fn unwrapping_needs_image_counters() {
        let positions = [Vec3::zeros()];
        let velocities = [Vec3::zeros()];
        let masses = [1.0];
        let mut forces = [Vec3::zeros()];
        let snapshot = Snapshot {
            positions: &positions,
            vel_mass: VelMass::Split {
                velocities: &velocities,
                masses: &masses,
            },
            forces: &mut forces,
            ids: &[0],
            images: None,
            sim_box: SimBox::orthorhombic([1.0; 3], Vec3::zeros()).unwrap(),
            dt: 0.1,
        };
        assert!(SnapshotFlags::positions_only().with_momenta().check(&snapshot).is_ok());
        let err = SnapshotFlags::positions_only()
            .with_unwrapped_positions(true)
            .check(&snapshot)
            .unwrap_err();
        assert!(err.is_config());
        assert_eq!(err.code(), "missing-images");
    }
}
