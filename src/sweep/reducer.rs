//! Reduction of a batch of repeated readings to mean and dispersion.

use serde::{Deserialize, Serialize};

/// Mean, population standard deviation and count of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReducedSample {
    /// Arithmetic mean
    pub mean: f64,
    /// Population standard deviation (divides by `n`)
    pub std: f64,
    /// Number of readings reduced
    pub n: usize,
}

impl ReducedSample {
    /// Reduce `samples`.
    ///
    /// A single reading has `std == 0.0`. An empty batch reduces to all zeros.
    pub fn from_samples(samples: &[f64]) -> Self {
        let n = samples.len();
        if n == 0 {
            return Self::default();
        }
        let first = samples[0];
        if samples.iter().all(|&v| v == first) {
            return Self {
                mean: first,
                std: 0.0,
                n,
            };
        }
        let count = n as f64;
        let mean = samples.iter().sum::<f64>() / count;
        let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
        Self {
            mean,
            std: variance.sqrt(),
            n,
        }
    }

    /// Scale by `factor`. The mean takes the sign of `factor`; the std scales by its magnitude.
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            mean: self.mean * factor,
            std: self.std * factor.abs(),
            n: self.n,
        }
    }
}

/// Raw readings taken at one level, one vector per channel, in read order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawBatch {
    /// Readings on the voltage channel
    pub voltage: Vec<f64>,
    /// Readings on the current channel
    pub current: Vec<f64>,
}

impl RawBatch {
    /// Empty batch sized for `rep_num` readings per channel.
    pub fn with_capacity(rep_num: usize) -> Self {
        Self {
            voltage: Vec::with_capacity(rep_num),
            current: Vec::with_capacity(rep_num),
        }
    }

    /// Append one reading pair.
    pub fn push(&mut self, voltage: f64, current: f64) {
        self.voltage.push(voltage);
        self.current.push(current);
    }

    /// Number of reading pairs.
    pub fn len(&self) -> usize {
        self.voltage.len()
    }

    /// True if nothing has been read.
    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }

    /// Iterate reading pairs in the order they were taken.
    pub fn pairs(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.voltage.iter().copied().zip(self.current.iter().copied())
    }
}
