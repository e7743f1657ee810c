use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use sages_backend::LangevinConfig;
use sages_core::{ErrorInfo, SageError};
use sages_cv::{CollectiveVariable, Component, CvSet, Distance, RadiusOfGyration};
use sages_grid::Grid;

use crate::abf::Abf;
use crate::harmonic_bias::{Center, HarmonicBias, Kspring};
use crate::umbrella_integration::{UmbrellaIntegration, UmbrellaPlan};

/// YAML description of a sampling run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Collective variables, concatenated in order.
    pub cvs: Vec<CvConfig>,
    /// Accumulation grid; required by grid-based methods.
    #[serde(default)]
    pub grid: Option<Grid>,
    /// Sampling method and its hyperparameters.
    pub method: MethodConfig,
    /// Reference engine settings.
    #[serde(default)]
    pub engine: LangevinConfig,
}

/// One collective variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CvConfig {
    /// Mean coordinate of `indices` along `axis`.
    Component {
        /// Particle tags.
        indices: Vec<usize>,
        /// Cartesian axis (0, 1 or 2).
        axis: usize,
    },
    /// Minimum-image distance between two particles.
    Distance {
        /// The two particle tags.
        indices: [usize; 2],
    },
    /// Squared radius of gyration of `indices`.
    RadiusOfGyration {
        /// Particle tags.
        indices: Vec<usize>,
    },
}

impl CvConfig {
    fn build(&self) -> Result<Arc<dyn CollectiveVariable>, SageError> {
        let cv: Arc<dyn CollectiveVariable> = match self {
            CvConfig::Component { indices, axis } => Arc::new(Component::new(indices.clone(), *axis)?),
            CvConfig::Distance { indices: [a, b] } => Arc::new(Distance::new(*a, *b)?),
            CvConfig::RadiusOfGyration { indices } => Arc::new(RadiusOfGyration::new(indices.clone())?),
        };
        Ok(cv)
    }
}

/// Method selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MethodConfig {
    /// Adaptive biasing force.
    Abf {
        /// Visit count below which estimates are damped.
        #[serde(default = "default_n_min")]
        n_min: u32,
        /// Apply the estimate as a bias.
        #[serde(default = "default_bias_feedback")]
        bias_feedback: bool,
    },
    /// Fixed harmonic restraint.
    HarmonicBias {
        /// Spring constant.
        kspring: Kspring,
        /// Target CV value.
        center: Center,
    },
    /// Umbrella integration over a replica path.
    UmbrellaIntegration(UmbrellaPlan),
}

fn default_n_min() -> u32 {
    200
}

fn default_bias_feedback() -> bool {
    true
}

/// A method built from configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredMethod {
    /// See [`Abf`].
    Abf(Abf),
    /// See [`HarmonicBias`].
    HarmonicBias(HarmonicBias),
    /// See [`UmbrellaIntegration`]; the plan drives its run.
    UmbrellaIntegration(UmbrellaIntegration, UmbrellaPlan),
}

impl SamplingConfig {
    /// Parses a YAML document.
    pub fn from_yaml_str(contents: &str) -> Result<Self, SageError> {
        serde_yaml::from_str(contents).map_err(|err| {
            SageError::Serde(ErrorInfo::new("config-parse", err.to_string()))
        })
    }

    /// Reads and parses a YAML file.
    pub fn load(path: &Path) -> Result<Self, SageError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            SageError::Serde(
                ErrorInfo::new("config-read", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        Self::from_yaml_str(&contents).map_err(|err| match err {
            SageError::Serde(info) => SageError::Serde(info.with_context("path", path.display().to_string())),
            other => other,
        })
    }

    /// The configured CV set.
    pub fn build_cvs(&self) -> Result<CvSet, SageError> {
        let cvs = self.cvs.iter().map(CvConfig::build).collect::<Result<Vec<_>, _>>()?;
        CvSet::new(cvs)
    }

    /// Builds and validates the configured method.
    pub fn build_method(&self) -> Result<ConfiguredMethod, SageError> {
        let cvs = self.build_cvs()?;
        match &self.method {
            MethodConfig::Abf { n_min, bias_feedback } => {
                let grid = self.grid.clone().ok_or_else(|| {
                    SageError::Config(
                        ErrorInfo::new("invalid-grid", "abf needs a grid")
                            .with_hint("add a `grid` section with lower, upper and shape"),
                    )
                })?;
                let abf = Abf::new(cvs, grid)?
                    .with_n_min(*n_min)
                    .with_bias_feedback(*bias_feedback);
                Ok(ConfiguredMethod::Abf(abf))
            }
            MethodConfig::HarmonicBias { kspring, center } => {
                Ok(ConfiguredMethod::HarmonicBias(HarmonicBias::new(cvs, kspring, center)?))
            }
            MethodConfig::UmbrellaIntegration(plan) => {
                let method = UmbrellaIntegration::new(cvs)?;
                plan.resolve(method.bias().cvs().dimension())?;
                Ok(ConfiguredMethod::UmbrellaIntegration(method, plan.clone()))
            }
        }
    }
}
