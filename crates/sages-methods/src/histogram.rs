use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use sages_backend::Callback;
use sages_core::{ErrorInfo, MethodState, SageError, Snapshot};

/// Callback recording the CV value on engine timesteps past `offset` that
/// are multiples of `period`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramLogger {
    period: u64,
    offset: u64,
    counter: u64,
    data: Vec<DVector<f64>>,
}

/// Counts of one CV component over evenly spaced bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// `bins + 1` bin edges.
    pub edges: Vec<f64>,
    /// Samples per bin.
    pub counts: Vec<u64>,
}

impl HistogramLogger {
    /// Logger sampling every `period` timesteps after timestep `offset`.
    /// A zero period is treated as one.
    pub fn new(period: u64, offset: u64) -> Self {
        Self {
            period: period.max(1),
            offset,
            counter: 0,
            data: Vec::new(),
        }
    }

    /// Calls seen so far.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Recorded CV values, in order.
    pub fn data(&self) -> &[DVector<f64>] {
        &self.data
    }

    /// Records `xi` if `timestep` falls on the logging schedule.
    pub fn record(&mut self, xi: &DVector<f64>, timestep: u64) {
        self.counter += 1;
        if timestep > self.offset && timestep % self.period == 0 {
            self.data.push(xi.clone());
        }
    }

    /// Mean of the recorded values.
    pub fn means(&self) -> Result<DVector<f64>, SageError> {
        let first = self.data.first().ok_or_else(|| self.empty())?;
        let sum = self
            .data
            .iter()
            .fold(DVector::zeros(first.len()), |acc, xi| acc + xi);
        Ok(sum / self.data.len() as f64)
    }

    /// Unbiased sample covariance of the recorded values.
    pub fn covariance(&self) -> Result<DMatrix<f64>, SageError> {
        if self.data.len() < 2 {
            return Err(self.empty());
        }
        let mean = self.means()?;
        let dims = mean.len();
        let mut cov = DMatrix::zeros(dims, dims);
        for xi in &self.data {
            let delta = xi - &mean;
            cov += &delta * delta.transpose();
        }
        Ok(cov / (self.data.len() - 1) as f64)
    }

    /// Per-component histograms with `bins` bins over `range`, or over the
    /// observed range when `range` is `None`. The last bin includes its upper
    /// edge.
    pub fn histograms(&self, bins: usize, range: Option<(f64, f64)>) -> Result<Vec<Histogram>, SageError> {
        let first = self.data.first().ok_or_else(|| self.empty())?;
        let bins = bins.max(1);
        (0..first.len())
            .map(|axis| {
                let values: Vec<f64> = self.data.iter().map(|xi| xi[axis]).collect();
                let (low, high) = match range {
                    Some(bounds) => bounds,
                    None => values.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                        (lo.min(v), hi.max(v))
                    }),
                };
                // degenerate ranges get a unit width around the value
                let (low, high) = if high > low { (low, high) } else { (low - 0.5, low + 0.5) };
                let width = (high - low) / bins as f64;
                let edges = (0..=bins).map(|i| low + i as f64 * width).collect();
                let mut counts = vec![0; bins];
                for v in values {
                    if v < low || v > high {
                        continue;
                    }
                    let bin = (((v - low) / width) as usize).min(bins - 1);
                    counts[bin] += 1;
                }
                Ok(Histogram { edges, counts })
            })
            .collect()
    }

    fn empty(&self) -> SageError {
        SageError::Numerical(
            ErrorInfo::new("empty-histogram", "not enough samples were logged")
                .with_context("samples", self.data.len().to_string())
                .with_context("calls", self.counter.to_string())
                .with_hint("run longer or lower the logging offset"),
        )
    }
}

impl<S: MethodState> Callback<S> for HistogramLogger {
    fn call(&mut self, _snapshot: &Snapshot<'_>, state: &S, timestep: u64) {
        if let Some(xi) = state.xi() {
            self.record(xi, timestep);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logged(values: &[f64], period: u64, offset: u64) -> HistogramLogger {
        let mut logger = HistogramLogger::new(period, offset);
        for (step, &v) in (1..).zip(values) {
            logger.record(&DVector::from_element(1, v), step);
        }
        logger
    }

    #[test]
    fn respects_period_and_offset() {
        let logger = logged(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0], 2, 3);
        // calls 4 and 6 are logged
        let recorded: Vec<f64> = logger.data().iter().map(|xi| xi[0]).collect();
        assert_eq!(recorded, vec![4.0, 6.0]);
        assert_eq!(logger.means().unwrap()[0], 5.0);
        assert_eq!(logger.counter(), 7);
    }

    #[test]
    fn schedule_follows_the_engine_timestep() {
        // an engine resumed at step 100
        let mut logger = HistogramLogger::new(5, 102);
        for step in 101..=115 {
            logger.record(&DVector::from_element(1, step as f64), step);
        }
        let recorded: Vec<f64> = logger.data().iter().map(|xi| xi[0]).collect();
        assert_eq!(recorded, vec![105.0, 110.0, 115.0]);
        assert_eq!(logger.counter(), 15);
    }

    #[test]
    fn covariance_is_unbiased() {
        let logger = logged(&[1.0, 2.0, 3.0, 4.0], 1, 0);
        let cov = logger.covariance().unwrap();
        assert!((cov[(0, 0)] - 5.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn histogram_includes_upper_edge() {
        let logger = logged(&[0.0, 0.1, 0.5, 1.0], 1, 0);
        let hist = &logger.histograms(2, Some((0.0, 1.0))).unwrap()[0];
        assert_eq!(hist.counts, vec![2, 2]);
        assert_eq!(hist.edges, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn empty_logger_reports_numerical_error() {
        let logger = logged(&[1.0], 1, 5);
        let err = logger.means().unwrap_err();
        assert!(err.is_numerical());
        assert_eq!(err.code(), "empty-histogram");
    }
}
