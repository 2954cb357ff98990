// Per-epoch training metrics, appended to a CSV file:
//
//   epoch,train_loss,train_accuracy,valid_accuracy,seconds
//   0,0.012345,0.612000,0.701000,12.34

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use derive_new::new;

use crate::error::{Error, Result};

const HEADER: &str = "epoch,train_loss,train_accuracy,valid_accuracy,seconds";

#[derive(new, Debug, Clone, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    /// Sum of batch losses divided by the number of training examples.
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub valid_accuracy: f64,
    pub seconds: f64,
}

/// Fraction of correct predictions; zero for an empty set.
pub fn accuracy(correct: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    correct as f64 / total as f64
}

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Starts a fresh CSV file at `csv_path`, replacing an older one.
    pub fn create(csv_path: impl Into<PathBuf>) -> Result<Self> {
        let csv_path = csv_path.into();
        fs::write(&csv_path, format!("{HEADER}\n")).map_err(Error::io(&csv_path))?;
        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .map_err(Error::io(&self.csv_path))?;

        writeln!(
            file,
            "{},{:.6},{:.6},{:.6},{:.2}",
            m.epoch, m.train_loss, m.train_accuracy, m.valid_accuracy, m.seconds
        )
        .map_err(Error::io(&self.csv_path))?;

        tracing::debug!("Logged epoch {} metrics", m.epoch);
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
