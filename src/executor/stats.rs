//! Step latency statistics

use std::time::Duration;

/// Latency samples, one per executor step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyStats {
    samples: Vec<Duration>,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, sample: Duration) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[Duration] {
        &self.samples
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    /// Sum of all samples
    pub fn total(&self) -> Duration {
        self.samples.iter().sum()
    }

    /// Arithmetic mean (zero without samples)
    pub fn mean(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.mean_secs())
    }

    /// Sample standard deviation, `n - 1` in the denominator (zero below two samples)
    pub fn std_dev(&self) -> Duration {
        let n = self.samples.len();
        if n < 2 {
            return Duration::ZERO;
        }
        let mean = self.mean_secs();
        let sum_sq: f64 = self
            .samples
            .iter()
            .map(|s| {
                let d = s.as_secs_f64() - mean;
                d * d
            })
            .sum();
        Duration::from_secs_f64((sum_sq / (n - 1) as f64).sqrt())
    }

    pub fn min(&self) -> Option<Duration> {
        self.samples.iter().min().copied()
    }

    pub fn max(&self) -> Option<Duration> {
        self.samples.iter().max().copied()
    }

    fn mean_secs(&self) -> f64 {
        self.samples.iter().map(Duration::as_secs_f64).sum::<f64>() / self.samples.len() as f64
    }
}
