use serde::{Deserialize, Serialize};

use sages_core::{
    replica_seed, ErrorInfo, HelperMethods, OwnedSnapshot, RngHandle, SageError, SimBox, Snapshot,
    Vec3, VelMass,
};

use crate::context::{HalfStepHook, SimulationContext, SystemView};
use crate::kind::BackendKind;

/// Physical force acting on every particle, evaluated on unwrapped positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExternalForce {
    /// No force.
    #[default]
    Free,
    /// The same force on every particle.
    Constant {
        /// Force vector.
        force: [f64; 3],
    },
    /// Per-axis linear restoring force `-k ⊙ (r - anchor)`.
    Harmonic {
        /// Spring constant per axis.
        stiffness: [f64; 3],
        /// Rest position.
        #[serde(default)]
        anchor: [f64; 3],
    },
}

impl ExternalForce {
    fn force_on(&self, r: &Vec3) -> Vec3 {
        match self {
            ExternalForce::Free => Vec3::zeros(),
            ExternalForce::Constant { force } => Vec3::from(*force),
            ExternalForce::Harmonic { stiffness, anchor } => {
                let k = Vec3::from(*stiffness);
                -k.component_mul(&(r - Vec3::from(*anchor)))
            }
        }
    }
}

/// Settings of the reference Langevin engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LangevinConfig {
    /// Storage layout to expose.
    #[serde(default)]
    pub backend: BackendKind,
    /// Integration timestep.
    #[serde(default = "default_dt")]
    pub dt: f64,
    /// Friction coefficient `γ`; zero gives plain velocity Verlet.
    #[serde(default = "default_friction")]
    pub friction: f64,
    /// Thermal energy `kT`.
    #[serde(default = "default_kt")]
    pub kt: f64,
    /// Master seed of the thermostat noise.
    #[serde(default)]
    pub seed: u64,
    /// Orthorhombic box edge lengths.
    #[serde(default = "default_box_lengths")]
    pub box_lengths: [f64; 3],
    /// Wrap positions into the primary cell after every drift.
    #[serde(default = "default_wrap")]
    pub wrap: bool,
    /// Rotate particle storage every this many steps (0 disables).
    #[serde(default)]
    pub reorder_period: u64,
    /// Physical force field.
    #[serde(default)]
    pub external: ExternalForce,
}

fn default_dt() -> f64 {
    0.005
}

fn default_friction() -> f64 {
    1.0
}

fn default_kt() -> f64 {
    1.0
}

fn default_box_lengths() -> [f64; 3] {
    [10.0; 3]
}

fn default_wrap() -> bool {
    true
}

impl Default for LangevinConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            dt: default_dt(),
            friction: default_friction(),
            kt: default_kt(),
            seed: 0,
            box_lengths: default_box_lengths(),
            wrap: default_wrap(),
            reorder_period: 0,
            external: ExternalForce::default(),
        }
    }
}

impl LangevinConfig {
    /// Copy of this configuration with the seed derived for `replica_num`.
    pub fn for_replica(&self, replica_num: usize) -> Self {
        Self {
            seed: replica_seed(self.seed, replica_num),
            ..self.clone()
        }
    }

    fn validate(&self) -> Result<(), SageError> {
        let checks = [
            ("dt", self.dt, self.dt > 0.0),
            ("friction", self.friction, self.friction >= 0.0),
            ("kt", self.kt, self.kt >= 0.0),
        ];
        for (name, value, ok) in checks {
            if !(ok && value.is_finite()) {
                return Err(SageError::Config(
                    ErrorInfo::new("invalid-engine-config", "engine parameter out of range")
                        .with_context("parameter", name)
                        .with_context("value", value.to_string()),
                ));
            }
        }
        Ok(())
    }
}

/// Initial particle state, indexed by tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleSystem {
    /// Positions.
    pub positions: Vec<Vec3>,
    /// Velocities.
    pub velocities: Vec<Vec3>,
    /// Masses.
    pub masses: Vec<f64>,
}

impl ParticleSystem {
    /// Particles at rest, all with the same mass.
    pub fn at_rest(positions: Vec<Vec3>, mass: f64) -> Self {
        let n = positions.len();
        Self {
            positions,
            velocities: vec![Vec3::zeros(); n],
            masses: vec![mass; n],
        }
    }

    fn validate(&self) -> Result<(), SageError> {
        let n = self.positions.len();
        if self.velocities.len() != n || self.masses.len() != n {
            return Err(SageError::Config(
                ErrorInfo::new("invalid-snapshot", "particle arrays disagree on length")
                    .with_context("positions", n.to_string())
                    .with_context("velocities", self.velocities.len().to_string())
                    .with_context("masses", self.masses.len().to_string()),
            ));
        }
        if let Some(tag) = self.masses.iter().position(|&m| !(m.is_finite() && m > 0.0)) {
            return Err(SageError::Config(
                ErrorInfo::new("invalid-snapshot", "particle masses must be positive")
                    .with_context("tag", tag.to_string()),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum VelocityStore {
    Packed(Vec<[f64; 4]>),
    Split {
        velocities: Vec<Vec3>,
        masses: Vec<f64>,
    },
    Typed {
        velocities: Vec<Vec3>,
        type_masses: Vec<f64>,
        types: Vec<usize>,
    },
}

impl VelocityStore {
    fn build(kind: BackendKind, system: &ParticleSystem) -> Self {
        match kind {
            BackendKind::Langevin => VelocityStore::Packed(
                system
                    .velocities
                    .iter()
                    .zip(&system.masses)
                    .map(|(v, &m)| [v.x, v.y, v.z, m])
                    .collect(),
            ),
            BackendKind::LangevinSplit => VelocityStore::Split {
                velocities: system.velocities.clone(),
                masses: system.masses.clone(),
            },
            BackendKind::LangevinTyped => {
                let mut type_masses: Vec<f64> = Vec::new();
                let types = system
                    .masses
                    .iter()
                    .map(|&m| match type_masses.iter().position(|&t| t == m) {
                        Some(existing) => existing,
                        None => {
                            type_masses.push(m);
                            type_masses.len() - 1
                        }
                    })
                    .collect();
                VelocityStore::Typed {
                    velocities: system.velocities.clone(),
                    type_masses,
                    types,
                }
            }
        }
    }

    fn view(&self) -> VelMass<'_> {
        match self {
            VelocityStore::Packed(packed) => VelMass::Packed(packed),
            VelocityStore::Split { velocities, masses } => VelMass::Split { velocities, masses },
            VelocityStore::Typed {
                velocities,
                type_masses,
                types,
            } => VelMass::Typed {
                velocities,
                type_masses,
                types,
            },
        }
    }

    fn set_velocity(&mut self, slot: usize, v: Vec3) {
        match self {
            VelocityStore::Packed(packed) => {
                packed[slot][..3].copy_from_slice(v.as_slice());
            }
            VelocityStore::Split { velocities, .. } | VelocityStore::Typed { velocities, .. } => {
                velocities[slot] = v;
            }
        }
    }

    fn rotate(&mut self) {
        match self {
            VelocityStore::Packed(packed) => packed.rotate_left(1),
            VelocityStore::Split { velocities, masses } => {
                velocities.rotate_left(1);
                masses.rotate_left(1);
            }
            VelocityStore::Typed {
                velocities, types, ..
            } => {
                velocities.rotate_left(1);
                types.rotate_left(1);
            }
        }
    }
}

/// In-process Langevin dynamics engine (BAOAB splitting).
///
/// The hook fires after the drift and force evaluation, before the second
/// half kick, so a bias written into the force buffer acts on the same step.
/// Thermostat noise is drawn in tag order, which keeps trajectories
/// independent of the storage layout and of reordering.
#[derive(Debug, Clone)]
pub struct LangevinContext {
    config: LangevinConfig,
    sim_box: SimBox,
    positions: Vec<Vec3>,
    images: Vec<[i32; 3]>,
    forces: Vec<Vec3>,
    store: VelocityStore,
    tags: Vec<u64>,
    rtags: Vec<u64>,
    rng: RngHandle,
    step: u64,
    teardowns: usize,
}

impl LangevinContext {
    /// Creates an engine holding `system`.
    pub fn new(config: LangevinConfig, system: ParticleSystem) -> Result<Self, SageError> {
        config.validate()?;
        system.validate()?;
        let sim_box = SimBox::orthorhombic(config.box_lengths, Vec3::zeros())?;
        let n = system.positions.len();
        let mut positions = Vec::with_capacity(n);
        let mut images = Vec::with_capacity(n);
        for r in &system.positions {
            if config.wrap {
                let (wrapped, image) = sim_box.wrap(r);
                positions.push(wrapped);
                images.push(image);
            } else {
                positions.push(*r);
                images.push([0; 3]);
            }
        }
        let store = VelocityStore::build(config.backend, &system);
        log::debug!(
            "langevin engine: {} particles, backend {}, seed {}",
            n,
            config.backend.name(),
            config.seed
        );
        let mut context = Self {
            rng: RngHandle::from_seed(config.seed),
            config,
            sim_box,
            positions,
            images,
            forces: vec![Vec3::zeros(); n],
            store,
            tags: (0..n as u64).collect(),
            rtags: (0..n as u64).collect(),
            step: 0,
            teardowns: 0,
        };
        context.compute_forces();
        Ok(context)
    }

    /// Engine settings.
    pub fn config(&self) -> &LangevinConfig {
        &self.config
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the engine holds no particles.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Steps taken so far.
    pub fn current_step(&self) -> u64 {
        self.step
    }

    /// How many times [`SimulationContext::teardown`] ran.
    pub fn teardown_count(&self) -> usize {
        self.teardowns
    }

    /// Unwrapped position of particle `tag`.
    pub fn position_of(&self, tag: usize) -> Vec3 {
        let slot = self.rtags[tag] as usize;
        self.sim_box.unwrap(&self.positions[slot], self.images[slot])
    }

    /// Velocity of particle `tag`.
    pub fn velocity_of(&self, tag: usize) -> Vec3 {
        self.store.view().velocity(self.rtags[tag] as usize)
    }

    fn unwrapped(&self, slot: usize) -> Vec3 {
        self.sim_box.unwrap(&self.positions[slot], self.images[slot])
    }

    fn compute_forces(&mut self) {
        for slot in 0..self.positions.len() {
            self.forces[slot] = self.config.external.force_on(&self.unwrapped(slot));
        }
    }

    fn half_kick(&mut self) {
        let half = 0.5 * self.config.dt;
        for slot in 0..self.positions.len() {
            let view = self.store.view();
            let v = view.velocity(slot) + self.forces[slot] * (half / view.mass(slot));
            self.store.set_velocity(slot, v);
        }
    }

    fn drift(&mut self) {
        let dt = self.config.dt;
        for slot in 0..self.positions.len() {
            let r = self.positions[slot] + self.store.view().velocity(slot) * dt;
            if self.config.wrap {
                let (wrapped, shift) = self.sim_box.wrap(&r);
                self.positions[slot] = wrapped;
                for axis in 0..3 {
                    self.images[slot][axis] += shift[axis];
                }
            } else {
                self.positions[slot] = r;
            }
        }
    }

    fn thermostat(&mut self) {
        let c1 = (-self.config.friction * self.config.dt).exp();
        let noise_scale = ((1.0 - c1 * c1) * self.config.kt).sqrt();
        for tag in 0..self.positions.len() {
            let slot = self.rtags[tag] as usize;
            let view = self.store.view();
            let sigma = noise_scale / view.mass(slot).sqrt();
            let noise = if sigma > 0.0 {
                Vec3::new(
                    self.rng.standard_normal(),
                    self.rng.standard_normal(),
                    self.rng.standard_normal(),
                )
            } else {
                Vec3::zeros()
            };
            let v = view.velocity(slot) * c1 + noise * sigma;
            self.store.set_velocity(slot, v);
        }
    }

    fn reorder(&mut self) {
        self.positions.rotate_left(1);
        self.images.rotate_left(1);
        self.forces.rotate_left(1);
        self.tags.rotate_left(1);
        self.store.rotate();
        for (slot, &tag) in self.tags.iter().enumerate() {
            self.rtags[tag as usize] = slot as u64;
        }
    }

    fn step_once(&mut self, hook: &mut dyn HalfStepHook) -> Result<(), SageError> {
        self.half_kick();
        self.drift();
        self.compute_forces();
        self.step += 1;
        hook.update(self.step, self)?;
        self.half_kick();
        self.thermostat();
        let period = self.config.reorder_period;
        if period > 0 && self.step % period == 0 {
            self.reorder();
        }
        Ok(())
    }
}

impl SystemView for LangevinContext {
    fn helpers(&self) -> HelperMethods {
        HelperMethods::new(self.config.backend.id_layout())
    }

    fn take_snapshot(&mut self) -> Snapshot<'_> {
        let ids = match self.config.backend.id_layout() {
            sages_core::IdLayout::TagPerSlot => &self.tags,
            sages_core::IdLayout::SlotPerTag => &self.rtags,
        };
        Snapshot {
            positions: &self.positions,
            vel_mass: self.store.view(),
            forces: &mut self.forces,
            ids,
            images: Some(&self.images),
            sim_box: self.sim_box.clone(),
            dt: self.config.dt,
        }
    }

    fn restore(&mut self, snapshot: &OwnedSnapshot) -> Result<(), SageError> {
        let ids = match self.config.backend.id_layout() {
            sages_core::IdLayout::TagPerSlot => &self.tags,
            sages_core::IdLayout::SlotPerTag => &self.rtags,
        };
        let source = self.helpers().reconcile(snapshot, ids)?;
        for (slot, &previous) in source.iter().enumerate() {
            self.positions[slot] = snapshot.positions[previous];
            self.forces[slot] = snapshot.forces[previous];
            if let Some(images) = &snapshot.images {
                self.images[slot] = images[previous];
            }
            self.store.set_velocity(slot, snapshot.velocities[previous]);
        }
        Ok(())
    }
}

impl SimulationContext for LangevinContext {
    fn backend(&self) -> BackendKind {
        self.config.backend
    }

    fn run(&mut self, timesteps: u64, hook: &mut dyn HalfStepHook) -> Result<(), SageError> {
        for _ in 0..timesteps {
            self.step_once(hook)?;
        }
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), SageError> {
        self.teardowns += 1;
        log::debug!("langevin engine torn down after {} steps", self.step);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoHook;

    #[test]
    fn harmonic_force_points_to_anchor() {
        let force = ExternalForce::Harmonic {
            stiffness: [2.0, 0.0, 1.0],
            anchor: [1.0, 0.0, 0.0],
        };
        assert_eq!(force.force_on(&Vec3::new(2.0, 5.0, -1.0)), Vec3::new(-2.0, 0.0, 1.0));
    }

    #[test]
    fn free_particle_drifts_ballistically() {
        let config = LangevinConfig {
            friction: 0.0,
            kt: 0.0,
            dt: 0.1,
            ..LangevinConfig::default()
        };
        let mut system = ParticleSystem::at_rest(vec![Vec3::new(9.0, 0.0, 0.0)], 1.0);
        system.velocities[0] = Vec3::new(1.0, 0.0, 0.0);
        let mut context = LangevinContext::new(config, system).unwrap();
        context.run(50, &mut NoHook).unwrap();
        // crossed the box edge; the unwrapped coordinate keeps going
        assert!((context.position_of(0).x - 14.0).abs() < 1e-9);
        assert_eq!(context.images[0], [1, 0, 0]);
        assert_eq!(context.current_step(), 50);
    }

    #[test]
    fn typed_layout_groups_equal_masses() {
        let system = ParticleSystem {
            positions: vec![Vec3::zeros(); 3],
            velocities: vec![Vec3::zeros(); 3],
            masses: vec![2.0, 1.0, 2.0],
        };
        match VelocityStore::build(BackendKind::LangevinTyped, &system) {
            VelocityStore::Typed {
                type_masses, types, ..
            } => {
                assert_eq!(type_masses, vec![2.0, 1.0]);
                assert_eq!(types, vec![0, 1, 0]);
            }
            other => panic!("unexpected store {other:?}"),
        }
    }

    #[test]
    fn invalid_parameters_are_config_errors() {
        let config = LangevinConfig {
            dt: -1.0,
            ..LangevinConfig::default()
        };
        let err = LangevinContext::new(config, ParticleSystem::at_rest(vec![Vec3::zeros()], 1.0))
            .unwrap_err();
        assert!(err.is_config());
        let err = LangevinContext::new(
            LangevinConfig::default(),
            ParticleSystem::at_rest(vec![Vec3::zeros()], 0.0),
        )
        .unwrap_err();
        assert_eq!(err.code(), "invalid-snapshot");
    }
}
