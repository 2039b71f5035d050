//! Empirical job-cost model for the scheduler.
//!
//! Wall-clock cost per group grows much faster than group size, and the
//! distribution of group sizes is heavily skewed, so balancing on raw size
//! starves some workers. Instead every finished job appends
//! `(size, seconds)` to an append-only log, and each run fits a
//! least-squares line over the history to estimate the cost of the next
//! batch.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

/// One observed job: group size and measured wall-clock seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostSample {
    pub size: usize,
    pub seconds: f64,
}

/// Floor for estimates so zero-size groups still cost something to
/// schedule.
const MIN_ESTIMATE: f64 = 1e-3;

/// Least-squares line over the observed samples.
#[derive(Debug, Clone, Copy)]
pub struct CostModel {
    slope: f64,
    intercept: f64,
    samples: usize,
}

impl CostModel {
    /// Fit from history. With fewer than two distinct sizes there is no
    /// line to fit; the fallback estimates cost as raw size.
    pub fn fit(samples: &[CostSample]) -> Self {
        let mut sizes: Vec<usize> = samples.iter().map(|s| s.size).collect();
        sizes.sort_unstable();
        sizes.dedup();
        if sizes.len() < 2 {
            return Self {
                slope: 1.0,
                intercept: 0.0,
                samples: samples.len(),
            };
        }

        let n = samples.len() as f64;
        let mean_x = samples.iter().map(|s| s.size as f64).sum::<f64>() / n;
        let mean_y = samples.iter().map(|s| s.seconds).sum::<f64>() / n;
        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for sample in samples {
            let dx = sample.size as f64 - mean_x;
            sxx += dx * dx;
            sxy += dx * (sample.seconds - mean_y);
        }
        let slope = sxy / sxx;
        Self {
            slope,
            intercept: mean_y - slope * mean_x,
            samples: samples.len(),
        }
    }

    /// Estimated seconds for a group of the given size.
    pub fn estimate(&self, size: usize) -> f64 {
        (self.slope * size as f64 + self.intercept).max(MIN_ESTIMATE)
    }

    /// Number of samples behind the fit.
    pub fn samples(&self) -> usize {
        self.samples
    }
}

/// Append-only `(size, seconds)` log backing the cost model.
#[derive(Debug, Clone)]
pub struct CostLog {
    path: PathBuf,
}

impl CostLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one finished job.
    pub fn append(&self, sample: CostSample) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}\t{:.6}", sample.size, sample.seconds)
    }

    /// Read the full history. A missing log is an empty history;
    /// malformed lines are skipped with a warning, since a torn append
    /// must not block scheduling.
    pub fn load(&self) -> std::io::Result<Vec<CostSample>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let mut samples = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let mut parts = line.split('\t');
            let parsed = match (parts.next(), parts.next()) {
                (Some(size), Some(seconds)) => size
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .zip(seconds.trim().parse::<f64>().ok()),
                _ => None,
            };
            match parsed {
                Some((size, seconds)) if seconds.is_finite() && seconds >= 0.0 => {
                    samples.push(CostSample { size, seconds });
                }
                _ => warn!(path = %self.path.display(), line, "cost_log_line_skipped"),
            }
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fit_recovers_a_line() {
        let samples: Vec<CostSample> = (1..=10)
            .map(|size| CostSample {
                size,
                seconds: 2.0 * size as f64 + 1.0,
            })
            .collect();
        let model = CostModel::fit(&samples);
        assert!((model.estimate(20) - 41.0).abs() < 1e-9);
        assert_eq!(model.samples(), 10);
    }

    #[test]
    fn too_little_history_falls_back_to_size() {
        let model = CostModel::fit(&[]);
        assert_eq!(model.estimate(42), 42.0);
        let model = CostModel::fit(&[CostSample {
            size: 5,
            seconds: 100.0,
        }]);
        assert_eq!(model.estimate(42), 42.0);
    }

    #[test]
    fn estimate_never_goes_non_positive() {
        let samples = vec![
            CostSample {
                size: 1,
                seconds: 10.0,
            },
            CostSample {
                size: 10,
                seconds: 1.0,
            },
        ];
        let model = CostModel::fit(&samples);
        assert!(model.estimate(1000) > 0.0);
    }

    #[test]
    fn log_roundtrip_and_bad_lines() {
        let dir = TempDir::new().unwrap();
        let log = CostLog::new(dir.path().join("cost.log"));
        assert!(log.load().unwrap().is_empty());

        log.append(CostSample {
            size: 12,
            seconds: 0.5,
        })
        .unwrap();
        log.append(CostSample {
            size: 90,
            seconds: 4.25,
        })
        .unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .and_then(|mut f| writeln!(f, "garbage line"))
            .unwrap();

        let samples = log.load().unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].size, 12);
        assert!((samples[1].seconds - 4.25).abs() < 1e-9);
    }
}
