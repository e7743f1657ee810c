use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use sages_core::{
    generalize, ErrorInfo, HelperMethods, MethodBundle, MethodState, SageError, SamplingMethod,
    Snapshot, SnapshotFlags, StepData, Vec3,
};
use sages_cv::CvSet;

/// Spring constant as written in configuration: one value for every CV, one
/// per CV, or a full `d × d` tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Kspring {
    /// Same constant on every axis.
    Scalar(f64),
    /// Diagonal tensor.
    Vector(Vec<f64>),
    /// Full tensor, row by row.
    Matrix(Vec<Vec<f64>>),
}

impl Kspring {
    /// Expands into a `dims × dims` tensor.
    pub fn to_matrix(&self, dims: usize) -> Result<DMatrix<f64>, SageError> {
        let tensor = match self {
            Kspring::Scalar(k) => DMatrix::from_diagonal_element(dims, dims, *k),
            Kspring::Vector(ks) => {
                if ks.len() != dims {
                    return Err(invalid_kspring(dims, format!("{} values", ks.len())));
                }
                DMatrix::from_diagonal(&DVector::from_column_slice(ks))
            }
            Kspring::Matrix(rows) => {
                if rows.len() != dims || rows.iter().any(|row| row.len() != dims) {
                    return Err(invalid_kspring(dims, format!("{} rows", rows.len())));
                }
                DMatrix::from_fn(dims, dims, |i, j| rows[i][j])
            }
        };
        if tensor.iter().any(|k| !k.is_finite()) {
            return Err(invalid_kspring(dims, "non-finite entries".to_string()));
        }
        Ok(tensor)
    }
}

impl From<f64> for Kspring {
    fn from(k: f64) -> Self {
        Kspring::Scalar(k)
    }
}

fn invalid_kspring(dims: usize, found: String) -> SageError {
    SageError::Config(
        ErrorInfo::new("invalid-kspring", "spring constant does not fit the collective variables")
            .with_context("dims", dims.to_string())
            .with_context("found", found),
    )
}

/// Target CV value as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Center {
    /// Value of a one-dimensional CV.
    Scalar(f64),
    /// One value per CV component.
    Vector(Vec<f64>),
}

impl Center {
    /// Expands into a vector of length `dims`.
    pub fn to_vector(&self, dims: usize) -> Result<DVector<f64>, SageError> {
        let values = match self {
            Center::Scalar(c) => vec![*c],
            Center::Vector(cs) => cs.clone(),
        };
        if values.len() != dims || values.iter().any(|c| !c.is_finite()) {
            return Err(SageError::Config(
                ErrorInfo::new("invalid-center", "center does not fit the collective variables")
                    .with_context("dims", dims.to_string())
                    .with_context("found", values.len().to_string()),
            ));
        }
        Ok(DVector::from_vec(values))
    }
}

impl From<f64> for Center {
    fn from(c: f64) -> Self {
        Center::Scalar(c)
    }
}

/// Harmonic restraint `U = ½ (ξ − c)ᵀ K (ξ − c)` on the collective variables.
///
/// `center` and `kspring` can be changed between runs; a bundle already
/// built keeps the values it was built with.
#[derive(Debug, Clone)]
pub struct HarmonicBias {
    cvs: CvSet,
    kspring: DMatrix<f64>,
    center: DVector<f64>,
}

/// State of a harmonic bias run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicBiasState {
    /// Per-slot restoring force.
    pub bias: Vec<Vec3>,
    /// CV value on the last update.
    pub xi: DVector<f64>,
}

impl MethodState for HarmonicBiasState {
    fn bias(&self) -> Option<&[Vec3]> {
        Some(&self.bias)
    }

    fn xi(&self) -> Option<&DVector<f64>> {
        Some(&self.xi)
    }
}

impl HarmonicBias {
    /// Restraint of `cvs` around `center`.
    pub fn new(cvs: CvSet, kspring: &Kspring, center: &Center) -> Result<Self, SageError> {
        let dims = cvs.dimension();
        Ok(Self {
            kspring: kspring.to_matrix(dims)?,
            center: center.to_vector(dims)?,
            cvs,
        })
    }

    /// Collective variables.
    pub fn cvs(&self) -> &CvSet {
        &self.cvs
    }

    /// Spring tensor.
    pub fn kspring(&self) -> &DMatrix<f64> {
        &self.kspring
    }

    /// Target CV value.
    pub fn center(&self) -> &DVector<f64> {
        &self.center
    }

    /// Replaces the spring constant.
    pub fn set_kspring(&mut self, kspring: &Kspring) -> Result<(), SageError> {
        self.kspring = kspring.to_matrix(self.cvs.dimension())?;
        Ok(())
    }

    /// Replaces the target value.
    pub fn set_center(&mut self, center: &Center) -> Result<(), SageError> {
        self.center = center.to_vector(self.cvs.dimension())?;
        Ok(())
    }

    pub(crate) fn retarget(&mut self, center: DVector<f64>, kspring: DMatrix<f64>) {
        self.center = center;
        self.kspring = kspring;
    }
}

impl SamplingMethod for HarmonicBias {
    type State = HarmonicBiasState;

    fn name(&self) -> &'static str {
        "harmonic-bias"
    }

    fn snapshot_flags(&self) -> SnapshotFlags {
        SnapshotFlags::positions_only().with_unwrapped_positions(self.cvs.requires_box_unwrapping())
    }

    fn build(
        &self,
        snapshot: &Snapshot<'_>,
        helpers: &HelperMethods,
    ) -> Result<MethodBundle<HarmonicBiasState>, SageError> {
        let cvs = self.cvs.clone();
        let kspring = self.kspring.clone();
        let center = self.center.clone();
        let natoms = snapshot.len();
        let dims = cvs.dimension();

        let update = move |_: &HarmonicBiasState, data: &StepData<'_>| {
            let value = cvs.evaluate_step(data)?;
            let slots = cvs.slots(&data.indices)?;
            let generalized = &kspring * (&value.xi - &center);
            let forces = -(value.jacobian.transpose() * generalized);
            Ok(HarmonicBiasState {
                bias: cvs.scatter(&slots, data.positions.len(), &forces),
                xi: value.xi,
            })
        };

        Ok(MethodBundle {
            initialize: Box::new(move || HarmonicBiasState {
                bias: vec![Vec3::zeros(); natoms],
                xi: DVector::zeros(dims),
            }),
            update: generalize(update, *helpers, self.snapshot_flags()),
        })
    }
}
