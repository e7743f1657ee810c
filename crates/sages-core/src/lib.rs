#![deny(missing_docs)]
#![doc = "Core snapshot, error and sampling-method contracts for the SAGES enhanced sampling engine."]

pub mod errors;
pub mod method;
pub mod rng;
pub mod snapshot;

pub use errors::{ErrorInfo, SageError};
pub use method::{
    generalize, InitializeFn, MethodBundle, MethodState, SamplingMethod, SnapshotFlags, StepData,
    UpdateFn,
};
pub use rng::{derive_substream_seed, replica_seed, RngHandle};
pub use snapshot::{HelperMethods, IdLayout, OwnedSnapshot, SimBox, Snapshot, Vec3, VelMass};
