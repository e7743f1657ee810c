use std::fs::File;
use std::io::Write;
use std::path::Path;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use sages_backend::{ContextWrapper, SimulationContext};
use sages_core::{ErrorInfo, SageError};
use sages_cv::CvSet;

use crate::harmonic_bias::{Center, HarmonicBias, Kspring};
use crate::histogram::HistogramLogger;

/// A per-replica argument: one value for every replica, or one per replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerReplica<T> {
    /// Explicit value for each replica, in path order.
    List(Vec<T>),
    /// Value broadcast to every replica.
    Single(T),
}

impl<T: Default> Default for PerReplica<T> {
    fn default() -> Self {
        PerReplica::Single(T::default())
    }
}

impl<T: Clone> PerReplica<T> {
    /// Same value for every replica.
    pub fn single(value: T) -> Self {
        PerReplica::Single(value)
    }

    /// One value per replica.
    pub fn list(values: Vec<T>) -> Self {
        PerReplica::List(values)
    }

    /// Expands to exactly `n_replica` values.
    pub fn collect(&self, n_replica: usize, name: &str) -> Result<Vec<T>, SageError> {
        match self {
            PerReplica::List(values) if values.len() != n_replica => {
                Err(SageError::length_mismatch(name, n_replica, values.len()))
            }
            PerReplica::List(values) => Ok(values.clone()),
            PerReplica::Single(value) => Ok(vec![value.clone(); n_replica]),
        }
    }
}

/// Replica path and per-replica run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UmbrellaPlan {
    /// CV centers along the path; their count is the number of replicas.
    pub centers: Vec<Center>,
    /// Spring constant of each replica.
    pub ksprings: PerReplica<Kspring>,
    /// Steps to run each replica.
    pub timesteps: PerReplica<u64>,
    /// Histogram logging period of each replica.
    pub hist_periods: PerReplica<u64>,
    /// Calls skipped before each replica's histogram starts.
    #[serde(default)]
    pub hist_offsets: PerReplica<u64>,
}

/// A plan expanded to one value per replica.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPlan {
    /// Replica centers.
    pub centers: Vec<DVector<f64>>,
    /// Replica spring tensors.
    pub ksprings: Vec<DMatrix<f64>>,
    /// Steps per replica.
    pub timesteps: Vec<u64>,
    /// Histogram periods.
    pub hist_periods: Vec<u64>,
    /// Histogram offsets.
    pub hist_offsets: Vec<u64>,
}

impl UmbrellaPlan {
    /// Number of replicas.
    pub fn n_replica(&self) -> usize {
        self.centers.len()
    }

    /// Expands every per-replica argument and checks it against `dims` CV
    /// components.
    pub fn resolve(&self, dims: usize) -> Result<ResolvedPlan, SageError> {
        let n_replica = self.n_replica();
        if n_replica == 0 {
            return Err(SageError::Config(ErrorInfo::new(
                "length-mismatch",
                "umbrella integration needs at least one center",
            )));
        }
        let timesteps = self.timesteps.collect(n_replica, "timesteps")?;
        let ksprings = self.ksprings.collect(n_replica, "ksprings")?;
        let hist_periods = self.hist_periods.collect(n_replica, "hist_periods")?;
        let hist_offsets = self.hist_offsets.collect(n_replica, "hist_offsets")?;
        Ok(ResolvedPlan {
            centers: self
                .centers
                .iter()
                .map(|center| center.to_vector(dims))
                .collect::<Result<_, _>>()?,
            ksprings: ksprings
                .iter()
                .map(|kspring| kspring.to_matrix(dims))
                .collect::<Result<_, _>>()?,
            timesteps,
            hist_periods,
            hist_offsets,
        })
    }
}

/// Outcome of one replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaResult {
    /// Center of the harmonic bias.
    pub center: DVector<f64>,
    /// Spring tensor of the harmonic bias.
    pub kspring: DMatrix<f64>,
    /// Logged CV values.
    pub histogram: HistogramLogger,
    /// Mean logged CV value.
    pub mean: DVector<f64>,
    /// Free-energy gradient estimate `−K (mean − center)`.
    pub gradient: DVector<f64>,
    /// Free energy relative to the first replica.
    pub free_energy: f64,
}

/// Per-replica results, ordered along the path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UmbrellaResult {
    /// One entry per replica.
    pub replicas: Vec<ReplicaResult>,
}

impl UmbrellaResult {
    /// Replica centers.
    pub fn centers(&self) -> Vec<&DVector<f64>> {
        self.replicas.iter().map(|r| &r.center).collect()
    }

    /// Histogram means.
    pub fn means(&self) -> Vec<&DVector<f64>> {
        self.replicas.iter().map(|r| &r.mean).collect()
    }

    /// Free-energy gradients.
    pub fn gradients(&self) -> Vec<&DVector<f64>> {
        self.replicas.iter().map(|r| &r.gradient).collect()
    }

    /// Integrated free energies.
    pub fn free_energies(&self) -> Vec<f64> {
        self.replicas.iter().map(|r| r.free_energy).collect()
    }

    /// Writes `replica,center,kspring,mean,gradient,free_energy` rows.
    /// Vector and tensor fields are space separated, tensors row-major.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), SageError> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(["replica", "center", "kspring", "mean", "gradient", "free_energy"])
            .map_err(csv_error)?;
        for (index, replica) in self.replicas.iter().enumerate() {
            let kspring: Vec<f64> = replica.kspring.transpose().iter().copied().collect();
            csv.write_record([
                index.to_string(),
                joined(replica.center.iter()),
                joined(kspring.iter()),
                joined(replica.mean.iter()),
                joined(replica.gradient.iter()),
                replica.free_energy.to_string(),
            ])
            .map_err(csv_error)?;
        }
        csv.flush().map_err(|err| {
            SageError::Serde(ErrorInfo::new("csv-write", err.to_string()))
        })
    }

    /// Writes the CSV export to `path`.
    pub fn export_csv(&self, path: &Path) -> Result<(), SageError> {
        let file = File::create(path).map_err(|err| {
            SageError::Serde(
                ErrorInfo::new("csv-write", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        self.write_csv(file)
    }
}

fn joined<'a>(values: impl Iterator<Item = &'a f64>) -> String {
    values.map(f64::to_string).collect::<Vec<_>>().join(" ")
}

fn csv_error(err: csv::Error) -> SageError {
    SageError::Serde(ErrorInfo::new("csv-write", err.to_string()))
}

/// Umbrella integration along a path of harmonic-bias replicas.
///
/// Replicas run one after the other; the free energy is integrated forward
/// with `A₀ = 0` and `Aᵢ = Aᵢ₋₁ + ∇Aᵢ₋₁ · (cᵢ − cᵢ₋₁)`.
#[derive(Debug, Clone)]
pub struct UmbrellaIntegration {
    bias: HarmonicBias,
}

impl UmbrellaIntegration {
    /// Integration over `cvs`; centers and springs come from the plan.
    pub fn new(cvs: CvSet) -> Result<Self, SageError> {
        let dims = cvs.dimension();
        let bias = HarmonicBias::new(cvs, &Kspring::Scalar(0.0), &Center::Vector(vec![0.0; dims]))?;
        Ok(Self { bias })
    }

    /// The shared harmonic bias, retargeted for every replica.
    pub fn bias(&self) -> &HarmonicBias {
        &self.bias
    }

    /// Runs every replica of `plan` and integrates the free energy.
    ///
    /// All per-replica arguments are validated before the first context is
    /// created. `context_generator` receives the replica number; any failure
    /// aborts the whole integration.
    pub fn run<C, G>(&mut self, mut context_generator: G, plan: &UmbrellaPlan) -> Result<UmbrellaResult, SageError>
    where
        C: SimulationContext,
        G: FnMut(usize) -> Result<C, SageError>,
    {
        let plan = plan.resolve(self.bias.cvs().dimension())?;
        let n_replica = plan.centers.len();

        let mut result = UmbrellaResult::default();
        for replica in 0..n_replica {
            self.bias.retarget(plan.centers[replica].clone(), plan.ksprings[replica].clone());
            log::info!(
                "umbrella replica {}/{}: center {:?}, {} steps",
                replica + 1,
                n_replica,
                self.bias.center().as_slice(),
                plan.timesteps[replica]
            );

            let context = context_generator(replica)?;
            let logger = HistogramLogger::new(plan.hist_periods[replica], plan.hist_offsets[replica]);
            let mut wrapped = ContextWrapper::new(context, &self.bias, logger)?;
            wrapped.run(plan.timesteps[replica])?;
            let histogram = wrapped.into_outcome()?.callback;

            let center = self.bias.center().clone();
            let kspring = self.bias.kspring().clone();
            let mean = histogram.means()?;
            let gradient = -(&kspring * (&mean - &center));
            let free_energy = match result.replicas.last() {
                None => 0.0,
                Some(previous) => previous.free_energy + previous.gradient.dot(&(&center - &previous.center)),
            };
            log::debug!("replica {replica}: mean {:?}, A = {free_energy}", mean.as_slice());
            result.replicas.push(ReplicaResult {
                center,
                kspring,
                histogram,
                mean,
                gradient,
                free_energy,
            });
        }
        Ok(result)
    }
}
