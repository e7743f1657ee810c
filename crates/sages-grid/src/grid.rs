use sages_core::{ErrorInfo, SageError};
use serde::{Deserialize, Serialize};

/// Periodicity declared for a grid, either for all axes or per axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Periodicity {
    /// Same periodicity for every axis.
    All(bool),
    /// Explicit periodicity per axis.
    PerAxis(Vec<bool>),
}

impl Default for Periodicity {
    fn default() -> Self {
        Periodicity::All(false)
    }
}

/// Serializable grid description as it appears in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Lower bound per axis.
    pub lower: Vec<f64>,
    /// Upper bound per axis.
    pub upper: Vec<f64>,
    /// Number of cells per axis.
    pub shape: Vec<usize>,
    /// Periodic axes.
    #[serde(default)]
    pub periodic: Periodicity,
}

/// Validated lattice over collective-variable space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GridSpec", into = "GridSpec")]
pub struct Grid {
    lower: Vec<f64>,
    upper: Vec<f64>,
    shape: Vec<usize>,
    periodic: Vec<bool>,
}

impl Grid {
    /// Creates a grid, validating every axis eagerly.
    pub fn new(
        lower: Vec<f64>,
        upper: Vec<f64>,
        shape: Vec<usize>,
        periodic: Periodicity,
    ) -> Result<Self, SageError> {
        let dims = shape.len();
        if dims == 0 {
            return Err(invalid_grid("grid must have at least one axis", None));
        }
        if lower.len() != dims {
            return Err(SageError::dimension_mismatch("grid lower bound and shape", dims, lower.len()));
        }
        if upper.len() != dims {
            return Err(SageError::dimension_mismatch("grid upper bound and shape", dims, upper.len()));
        }
        let periodic = match periodic {
            Periodicity::All(flag) => vec![flag; dims],
            Periodicity::PerAxis(flags) => {
                if flags.len() != dims {
                    return Err(SageError::dimension_mismatch(
                        "grid periodicity and shape",
                        dims,
                        flags.len(),
                    ));
                }
                flags
            }
        };
        for axis in 0..dims {
            if shape[axis] == 0 {
                return Err(invalid_grid("every axis needs at least one cell", Some(axis)));
            }
            if !(lower[axis].is_finite() && upper[axis].is_finite()) {
                return Err(invalid_grid("grid bounds must be finite", Some(axis)));
            }
            if lower[axis] >= upper[axis] {
                return Err(SageError::Config(
                    ErrorInfo::new("invalid-grid", "lower bound must be below upper bound")
                        .with_context("axis", axis.to_string())
                        .with_context("lower", lower[axis].to_string())
                        .with_context("upper", upper[axis].to_string()),
                ));
            }
        }
        Ok(Self {
            lower,
            upper,
            shape,
            periodic,
        })
    }

    /// Grid with no periodic axes.
    pub fn bounded(lower: Vec<f64>, upper: Vec<f64>, shape: Vec<usize>) -> Result<Self, SageError> {
        Self::new(lower, upper, shape, Periodicity::All(false))
    }

    /// Grid where every axis is periodic.
    pub fn periodic(lower: Vec<f64>, upper: Vec<f64>, shape: Vec<usize>) -> Result<Self, SageError> {
        Self::new(lower, upper, shape, Periodicity::All(true))
    }

    /// Number of axes.
    pub fn dims(&self) -> usize {
        self.shape.len()
    }

    /// Cells per axis.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Lower bounds.
    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    /// Upper bounds.
    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// Whether `axis` wraps around.
    pub fn is_periodic(&self, axis: usize) -> bool {
        self.periodic[axis]
    }

    /// Total number of cells.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Width of one cell along each axis.
    pub fn cell_size(&self) -> Vec<f64> {
        (0..self.dims())
            .map(|axis| (self.upper[axis] - self.lower[axis]) / self.shape[axis] as f64)
            .collect()
    }

    /// Centres of the cells along `axis`.
    pub fn cell_centers(&self, axis: usize) -> Vec<f64> {
        let width = self.cell_size()[axis];
        (0..self.shape[axis])
            .map(|cell| self.lower[axis] + (cell as f64 + 0.5) * width)
            .collect()
    }
}

impl TryFrom<GridSpec> for Grid {
    type Error = SageError;

    fn try_from(spec: GridSpec) -> Result<Self, Self::Error> {
        Grid::new(spec.lower, spec.upper, spec.shape, spec.periodic)
    }
}

impl From<Grid> for GridSpec {
    fn from(grid: Grid) -> Self {
        GridSpec {
            lower: grid.lower,
            upper: grid.upper,
            shape: grid.shape,
            periodic: Periodicity::PerAxis(grid.periodic),
        }
    }
}

fn invalid_grid(message: &str, axis: Option<usize>) -> SageError {
    let mut info = ErrorInfo::new("invalid-grid", message);
    if let Some(axis) = axis {
        info = info.with_context("axis", axis.to_string());
    }
    SageError::Config(info)
}
