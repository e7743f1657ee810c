//! Per-timestep views of simulation state and the helpers that canonicalize them.

use std::borrow::Cow;

use nalgebra::{DVector, Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, SageError};

/// Cartesian 3-vector used for positions, velocities and forces.
pub type Vec3 = Vector3<f64>;

/// Periodic simulation cell: affine transform `H` (upper triangular) plus origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimBox {
    h: Matrix3<f64>,
    origin: Vec3,
}

impl SimBox {
    /// Creates a box from an upper-triangular cell matrix and origin.
    pub fn new(h: Matrix3<f64>, origin: Vec3) -> Result<Self, SageError> {
        if h[(1, 0)] != 0.0 || h[(2, 0)] != 0.0 || h[(2, 1)] != 0.0 {
            return Err(SageError::Config(
                ErrorInfo::new("invalid-box", "box matrix must be upper triangular")
                    .with_hint("rotate the cell so that the first vector lies along x"),
            ));
        }
        for axis in 0..3 {
            let length = h[(axis, axis)];
            if !(length.is_finite() && length > 0.0) {
                return Err(SageError::Config(
                    ErrorInfo::new("invalid-box", "box lengths must be finite and positive")
                        .with_context("axis", axis.to_string())
                        .with_context("length", length.to_string()),
                ));
            }
        }
        Ok(Self { h, origin })
    }

    /// Orthorhombic box with the given edge lengths.
    pub fn orthorhombic(lengths: [f64; 3], origin: Vec3) -> Result<Self, SageError> {
        Self::triclinic(lengths, [0.0; 3], origin)
    }

    /// Triclinic box from edge lengths and tilt factors `(xy, xz, yz)`.
    pub fn triclinic(lengths: [f64; 3], tilts: [f64; 3], origin: Vec3) -> Result<Self, SageError> {
        let [lx, ly, lz] = lengths;
        let [xy, xz, yz] = tilts;
        #[rustfmt::skip]
        let h = Matrix3::new(
            lx,  xy * ly, xz * lz,
            0.0, ly,      yz * lz,
            0.0, 0.0,     lz,
        );
        Self::new(h, origin)
    }

    /// Cell matrix.
    pub fn h(&self) -> &Matrix3<f64> {
        &self.h
    }

    /// Lower corner of the cell.
    pub fn origin(&self) -> &Vec3 {
        &self.origin
    }

    /// Cell volume.
    pub fn volume(&self) -> f64 {
        self.h[(0, 0)] * self.h[(1, 1)] * self.h[(2, 2)]
    }

    fn h_inverse(&self) -> Matrix3<f64> {
        let (a, b, c) = (self.h[(0, 0)], self.h[(0, 1)], self.h[(0, 2)]);
        let (d, e) = (self.h[(1, 1)], self.h[(1, 2)]);
        let f = self.h[(2, 2)];
        #[rustfmt::skip]
        let inverse = Matrix3::new(
            1.0 / a, -b / (a * d), (b * e - c * d) / (a * d * f),
            0.0,     1.0 / d,      -e / (d * f),
            0.0,     0.0,          1.0 / f,
        );
        inverse
    }

    /// Fractional coordinates of `r` relative to the origin.
    pub fn fractional(&self, r: &Vec3) -> Vec3 {
        self.h_inverse() * (r - self.origin)
    }

    /// Wraps `r` into the primary cell, returning the wrapped position and the
    /// image shift that was removed.
    pub fn wrap(&self, r: &Vec3) -> (Vec3, [i32; 3]) {
        let s = self.fractional(r);
        let shift = s.map(f64::floor);
        let wrapped = self.origin + self.h * (s - shift);
        (wrapped, [shift.x as i32, shift.y as i32, shift.z as i32])
    }

    /// Recovers the unwrapped position from a wrapped one and its image counter.
    pub fn unwrap(&self, r: &Vec3, image: [i32; 3]) -> Vec3 {
        let n = Vec3::new(image[0] as f64, image[1] as f64, image[2] as f64);
        r + self.h * n
    }

    /// Applies the minimum image convention to a displacement.
    pub fn minimum_image(&self, d: &Vec3) -> Vec3 {
        let s = self.h_inverse() * d;
        let s = s - s.map(f64::round);
        self.h * s
    }
}

/// Engine-specific packing of velocities and masses.
#[derive(Debug, Clone, Copy)]
pub enum VelMass<'a> {
    /// `[vx, vy, vz, m]` per particle.
    Packed(&'a [[f64; 4]]),
    /// Separate velocity and mass buffers.
    Split {
        /// Per-particle velocities.
        velocities: &'a [Vec3],
        /// Per-particle masses.
        masses: &'a [f64],
    },
    /// Velocities with masses looked up by particle type.
    Typed {
        /// Per-particle velocities.
        velocities: &'a [Vec3],
        /// Mass of each particle type.
        type_masses: &'a [f64],
        /// Type id of each particle.
        types: &'a [usize],
    },
}

impl<'a> VelMass<'a> {
    /// Number of particles described.
    pub fn len(&self) -> usize {
        match self {
            VelMass::Packed(packed) => packed.len(),
            VelMass::Split { velocities, .. } | VelMass::Typed { velocities, .. } => {
                velocities.len()
            }
        }
    }

    /// Whether no particles are described.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Velocity stored in `slot`.
    pub fn velocity(&self, slot: usize) -> Vec3 {
        match self {
            VelMass::Packed(packed) => {
                let [vx, vy, vz, _] = packed[slot];
                Vec3::new(vx, vy, vz)
            }
            VelMass::Split { velocities, .. } | VelMass::Typed { velocities, .. } => {
                velocities[slot]
            }
        }
    }

    /// Mass of the particle stored in `slot`.
    pub fn mass(&self, slot: usize) -> f64 {
        match self {
            VelMass::Packed(packed) => packed[slot][3],
            VelMass::Split { masses, .. } => masses[slot],
            VelMass::Typed {
                type_masses, types, ..
            } => type_masses[types[slot]],
        }
    }

    fn check_types(&self) -> Result<(), SageError> {
        if let VelMass::Typed {
            velocities,
            type_masses,
            types,
        } = self
        {
            if types.len() != velocities.len() {
                return Err(snapshot_shape_error("types", velocities.len(), types.len()));
            }
            if let Some(bad) = types.iter().find(|&&t| t >= type_masses.len()) {
                return Err(SageError::Engine(
                    ErrorInfo::new("invalid-snapshot", "particle type has no mass entry")
                        .with_context("type", bad.to_string())
                        .with_context("types", type_masses.len().to_string()),
                ));
            }
        }
        if let VelMass::Split { velocities, masses } = self {
            if masses.len() != velocities.len() {
                return Err(snapshot_shape_error("masses", velocities.len(), masses.len()));
            }
        }
        Ok(())
    }
}

/// Read/write view of simulation state for a single timestep.
///
/// Every buffer is borrowed from the engine. `forces` is the only writable
/// field; the borrow ends with the step so no bias can leak into a later one.
#[derive(Debug)]
pub struct Snapshot<'a> {
    /// Particle positions, possibly wrapped into the primary cell.
    pub positions: &'a [Vec3],
    /// Velocities and masses in the engine's packing.
    pub vel_mass: VelMass<'a>,
    /// Net force buffer the bias is added into.
    pub forces: &'a mut [Vec3],
    /// Identity tags; see [`IdLayout`] for their interpretation.
    pub ids: &'a [u64],
    /// Optional periodic image counters matching `positions`.
    pub images: Option<&'a [[i32; 3]]>,
    /// Periodic cell.
    pub sim_box: SimBox,
    /// Integration timestep.
    pub dt: f64,
}

impl<'a> Snapshot<'a> {
    /// Number of local particles.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the snapshot holds no particles.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Checks that every per-particle buffer shares the same length.
    pub fn validate(&self) -> Result<(), SageError> {
        let n = self.positions.len();
        if self.vel_mass.len() != n {
            return Err(snapshot_shape_error("vel_mass", n, self.vel_mass.len()));
        }
        if self.forces.len() != n {
            return Err(snapshot_shape_error("forces", n, self.forces.len()));
        }
        if self.ids.len() != n {
            return Err(snapshot_shape_error("ids", n, self.ids.len()));
        }
        if let Some(images) = self.images {
            if images.len() != n {
                return Err(snapshot_shape_error("images", n, images.len()));
            }
        }
        self.vel_mass.check_types()
    }

    /// Adds a per-slot bias into the force buffer.
    pub fn add_bias(&mut self, bias: &[Vec3]) -> Result<(), SageError> {
        if bias.len() != self.forces.len() {
            return Err(SageError::Numerical(
                ErrorInfo::new("bias-shape", "bias does not match the force buffer")
                    .with_context("forces", self.forces.len().to_string())
                    .with_context("bias", bias.len().to_string()),
            ));
        }
        for (force, extra) in self.forces.iter_mut().zip(bias) {
            *force += extra;
        }
        Ok(())
    }

    /// Copies the snapshot into owned, layout-independent storage.
    pub fn to_owned_snapshot(&self, helpers: &HelperMethods) -> Result<OwnedSnapshot, SageError> {
        let n = self.len();
        Ok(OwnedSnapshot {
            positions: self.positions.to_vec(),
            velocities: (0..n).map(|slot| self.vel_mass.velocity(slot)).collect(),
            masses: (0..n).map(|slot| self.vel_mass.mass(slot)).collect(),
            forces: self.forces.to_vec(),
            tags: helpers.tags(self.ids)?,
            images: self.images.map(<[_]>::to_vec),
            sim_box: self.sim_box.clone(),
            dt: self.dt,
        })
    }
}

pub(crate) fn missing_images_error() -> SageError {
    SageError::Config(
        ErrorInfo::new(
            "missing-images",
            "collective variables require unwrapped positions but the engine exposes no image counters",
        )
        .with_hint("enable image tracking in the engine adapter"),
    )
}

fn snapshot_shape_error(field: &str, expected: usize, found: usize) -> SageError {
    SageError::Engine(
        ErrorInfo::new("invalid-snapshot", "snapshot buffers disagree on particle count")
            .with_context("field", field)
            .with_context("expected", expected.to_string())
            .with_context("found", found.to_string()),
    )
}

/// Owned copy of a snapshot with canonical layout (`tags[slot]` holds the tag).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedSnapshot {
    /// Positions per slot.
    pub positions: Vec<Vec3>,
    /// Velocities per slot.
    pub velocities: Vec<Vec3>,
    /// Masses per slot.
    pub masses: Vec<f64>,
    /// Forces per slot.
    pub forces: Vec<Vec3>,
    /// Tag of the particle in each slot.
    pub tags: Vec<u64>,
    /// Image counters per slot, when the engine tracks them.
    pub images: Option<Vec<[i32; 3]>>,
    /// Periodic cell.
    pub sim_box: SimBox,
    /// Integration timestep.
    pub dt: f64,
}

/// How an engine's `ids` buffer is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IdLayout {
    /// `ids[slot]` is the tag of the particle stored in `slot`.
    #[default]
    TagPerSlot,
    /// `ids[tag]` is the slot currently holding particle `tag` (reverse tags).
    SlotPerTag,
}

/// Engine-specific conversions from raw buffers to canonical forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HelperMethods {
    /// Layout of the `ids` buffer.
    pub id_layout: IdLayout,
}

impl HelperMethods {
    /// Creates helpers for the given id layout.
    pub fn new(id_layout: IdLayout) -> Self {
        Self { id_layout }
    }

    /// Maps every particle tag to its current storage slot.
    pub fn indices(&self, ids: &[u64]) -> Result<Vec<usize>, SageError> {
        let n = ids.len();
        match self.id_layout {
            IdLayout::SlotPerTag => ids
                .iter()
                .enumerate()
                .map(|(tag, &slot)| {
                    check_id(slot, n, tag as u64)?;
                    Ok(slot as usize)
                })
                .collect(),
            IdLayout::TagPerSlot => invert(ids),
        }
    }

    /// Tag of the particle stored in each slot.
    pub fn tags(&self, ids: &[u64]) -> Result<Vec<u64>, SageError> {
        match self.id_layout {
            IdLayout::TagPerSlot => {
                for (slot, &tag) in ids.iter().enumerate() {
                    check_id(tag, ids.len(), slot as u64)?;
                }
                Ok(ids.to_vec())
            }
            IdLayout::SlotPerTag => {
                Ok(invert(ids)?.into_iter().map(|tag| tag as u64).collect())
            }
        }
    }

    /// Flat per-slot momentum vector `[p0x, p0y, p0z, p1x, ...]`.
    pub fn momenta(&self, vel_mass: &VelMass<'_>) -> DVector<f64> {
        let n = vel_mass.len();
        let mut p = DVector::zeros(3 * n);
        for slot in 0..n {
            let momentum = vel_mass.velocity(slot) * vel_mass.mass(slot);
            p.fixed_rows_mut::<3>(3 * slot).copy_from(&momentum);
        }
        p
    }

    /// Per-slot masses.
    pub fn masses(&self, vel_mass: &VelMass<'_>) -> Vec<f64> {
        (0..vel_mass.len()).map(|slot| vel_mass.mass(slot)).collect()
    }

    /// Positions, unwrapped through the image counters when requested.
    ///
    /// Borrows the engine buffer when no unwrapping is needed.
    pub fn positions<'s>(
        &self,
        snapshot: &'s Snapshot<'_>,
        unwrapped: bool,
    ) -> Result<Cow<'s, [Vec3]>, SageError> {
        if !unwrapped {
            return Ok(Cow::Borrowed(snapshot.positions));
        }
        let images = snapshot.images.ok_or_else(missing_images_error)?;
        Ok(Cow::Owned(
            snapshot
                .positions
                .iter()
                .zip(images)
                .map(|(r, &image)| snapshot.sim_box.unwrap(r, image))
                .collect(),
        ))
    }

    /// For each current slot, the slot the same particle occupied in `previous`.
    pub fn reconcile(&self, previous: &OwnedSnapshot, ids: &[u64]) -> Result<Vec<usize>, SageError> {
        if previous.tags.len() != ids.len() {
            return Err(snapshot_shape_error("ids", previous.tags.len(), ids.len()));
        }
        let previous_slots = invert(&previous.tags)?;
        let current_tags = self.tags(ids)?;
        Ok(current_tags
            .into_iter()
            .map(|tag| previous_slots[tag as usize])
            .collect())
    }
}

fn check_id(value: u64, n: usize, position: u64) -> Result<(), SageError> {
    if value as usize >= n {
        return Err(SageError::Engine(
            ErrorInfo::new("invalid-ids", "particle id out of range")
                .with_context("position", position.to_string())
                .with_context("value", value.to_string())
                .with_context("particles", n.to_string()),
        ));
    }
    Ok(())
}

fn invert(map: &[u64]) -> Result<Vec<usize>, SageError> {
    let n = map.len();
    let mut inverse = vec![usize::MAX; n];
    for (position, &value) in map.iter().enumerate() {
        check_id(value, n, position as u64)?;
        let entry = &mut inverse[value as usize];
        if *entry != usize::MAX {
            return Err(SageError::Engine(
                ErrorInfo::new("invalid-ids", "duplicate particle id")
                    .with_context("value", value.to_string()),
            ));
        }
        *entry = position;
    }
    Ok(inverse)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> SimBox {
        SimBox::orthorhombic([2.0, 3.0, 4.0], Vec3::new(-1.0, -1.5, -2.0)).unwrap()
    }

    #[test]
    fn wrap_then_unwrap_recovers_position() {
        let sim_box = SimBox::triclinic([2.0, 3.0, 4.0], [0.5, 0.25, -0.5], Vec3::zeros()).unwrap();
        let r = Vec3::new(7.3, -4.1, 9.9);
        let (wrapped, image) = sim_box.wrap(&r);
        let s = sim_box.fractional(&wrapped);
        assert!(s.iter().all(|&c| c > -1e-12 && c < 1.0 + 1e-12));
        assert!((sim_box.unwrap(&wrapped, image) - r).norm() < 1e-12);
    }

    #[test]
    fn minimum_image_picks_nearest_copy() {
        let sim_box = unit_box();
        let d = sim_box.minimum_image(&Vec3::new(1.9, -2.9, 0.5));
        assert!((d - Vec3::new(-0.1, 0.1, 0.5)).norm() < 1e-12);
    }

    #[test]
    fn rejects_lower_triangular_entries() {
        let mut h = Matrix3::identity();
        h[(2, 0)] = 0.1;
        let err = SimBox::new(h, Vec3::zeros()).unwrap_err();
        assert_eq!(err.code(), "invalid-box");
    }

    #[test]
    fn indices_invert_tag_per_slot_ids() {
        let helpers = HelperMethods::new(IdLayout::TagPerSlot);
        assert_eq!(helpers.indices(&[2, 0, 1]).unwrap(), vec![1, 2, 0]);
        let reverse = HelperMethods::new(IdLayout::SlotPerTag);
        assert_eq!(reverse.indices(&[1, 2, 0]).unwrap(), vec![1, 2, 0]);
        assert_eq!(reverse.tags(&[1, 2, 0]).unwrap(), vec![2, 0, 1]);
    }

    #[test]
    fn duplicate_ids_are_engine_errors() {
        let helpers = HelperMethods::default();
        let err = helpers.indices(&[0, 0, 1]).unwrap_err();
        assert!(matches!(err, SageError::Engine(_)));
    }

    #[test]
    fn momenta_agree_across_layouts() {
        let helpers = HelperMethods::default();
        let packed = [[1.0, 2.0, 3.0, 2.0], [-1.0, 0.0, 0.5, 4.0]];
        let velocities = [Vec3::new(1.0, 2.0, 3.0), Vec3::new(-1.0, 0.0, 0.5)];
        let masses = [2.0, 4.0];
        let types = [1, 0];
        let type_masses = [4.0, 2.0];

        let from_packed = helpers.momenta(&VelMass::Packed(&packed));
        let from_split = helpers.momenta(&VelMass::Split {
            velocities: &velocities,
            masses: &masses,
        });
        let from_typed = helpers.momenta(&VelMass::Typed {
            velocities: &velocities,
            type_masses: &type_masses,
            types: &types,
        });
        let expected = DVector::from_vec(vec![2.0, 4.0, 6.0, -4.0, 0.0, 2.0]);
        assert_eq!(from_packed, expected);
        assert_eq!(from_split, expected);
        assert_eq!(from_typed, expected);
    }

    #[test]
    fn snapshot_validation_and_bias() {
        let positions = [Vec3::zeros(), Vec3::x()];
        let packed = [[0.0, 0.0, 0.0, 1.0]; 2];
        let mut forces = [Vec3::zeros(); 2];
        let ids = [0, 1];
        let images = [[0, 0, 0], [1, 0, 0]];
        let mut snapshot = Snapshot {
            positions: &positions,
            vel_mass: VelMass::Packed(&packed),
            forces: &mut forces,
            ids: &ids,
            images: Some(&images),
            sim_box: unit_box(),
            dt: 0.01,
        };
        snapshot.validate().unwrap();
        snapshot.add_bias(&[Vec3::y(), -Vec3::y()]).unwrap();
        assert!(snapshot.add_bias(&[Vec3::y()]).is_err());

        let helpers = HelperMethods::default();
        let unwrapped = helpers.positions(&snapshot, true).unwrap();
        assert_eq!(unwrapped[1], Vec3::new(3.0, 0.0, 0.0));
        assert!(matches!(helpers.positions(&snapshot, false).unwrap(), Cow::Borrowed(_)));
        assert_eq!(forces[0], Vec3::y());
    }

    #[test]
    fn reconcile_follows_tags() {
        let helpers = HelperMethods::default();
        let positions = [Vec3::zeros(), Vec3::x(), Vec3::y()];
        let packed = [[0.0, 0.0, 0.0, 1.0]; 3];
        let mut forces = [Vec3::zeros(); 3];
        let ids = [0, 1, 2];
        let snapshot = Snapshot {
            positions: &positions,
            vel_mass: VelMass::Packed(&packed),
            forces: &mut forces,
            ids: &ids,
            images: None,
            sim_box: unit_box(),
            dt: 0.01,
        };
        let owned = snapshot.to_owned_snapshot(&helpers).unwrap();
        // particles reversed in storage
        let mapping = helpers.reconcile(&owned, &[2, 1, 0]).unwrap();
        assert_eq!(mapping, vec![2, 1, 0]);
    }
}
