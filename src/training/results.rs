//! `results.csv` training log.
//!
//! ```text
//! epoch,train_loss,train_error,valid_loss,valid_error,test_error
//! 001,2.118200,0.701234,1.90230,0.65476,
//! ,,,,,0.31250
//! ```

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::utils::error::Result;

pub const RESULTS_FILE: &str = "results.csv";
pub const RESULTS_HEADER: &str = "epoch,train_loss,train_error,valid_loss,valid_error,test_error";

/// Appends rows to `<save_dir>/results.csv`
#[derive(Debug, Clone)]
pub struct ResultsLog {
    path: PathBuf,
}

impl ResultsLog {
    /// Start a fresh log, truncating any previous one
    pub fn create<P: AsRef<Path>>(save_dir: P) -> Result<Self> {
        let path = save_dir.as_ref().join(RESULTS_FILE);
        let mut file = File::create(&path)?;
        writeln!(file, "{RESULTS_HEADER}")?;
        Ok(Self { path })
    }

    /// Append to an existing log
    pub fn open<P: AsRef<Path>>(save_dir: P) -> Self {
        Self {
            path: save_dir.as_ref().join(RESULTS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one epoch row; validation columns stay empty without validation
    pub fn append_epoch(
        &self,
        epoch: usize,
        train_loss: f64,
        train_error: f64,
        valid: Option<(f64, f64)>,
    ) -> Result<()> {
        self.append_line(&format_epoch_row(epoch, train_loss, train_error, valid))
    }

    /// Append the final test row
    pub fn append_test(&self, test_error: f64) -> Result<()> {
        self.append_line(&format_test_row(test_error))
    }

    fn append_line(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

/// `%03d,%0.6f,%0.6f,%0.5f,%0.5f,`
pub fn format_epoch_row(
    epoch: usize,
    train_loss: f64,
    train_error: f64,
    valid: Option<(f64, f64)>,
) -> String {
    let valid = match valid {
        Some((loss, error)) => format!("{loss:.5},{error:.5}"),
        None => ",".to_string(),
    };
    format!("{epoch:03},{train_loss:.6},{train_error:.6},{valid},")
}

/// `,,,,,%0.5f`
pub fn format_test_row(test_error: f64) -> String {
    format!(",,,,,{test_error:.5}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_row_format() {
        assert_eq!(
            format_epoch_row(7, 1.5, 0.25, Some((2.0, 0.123459))),
            "007,1.500000,0.250000,2.00000,0.12346,"
        );
        assert_eq!(format_epoch_row(12, 0.1, 0.0, None), "012,0.100000,0.000000,,,");
    }

    #[test]
    fn test_log_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let log = ResultsLog::create(dir.path()).unwrap();
        log.append_epoch(1, 2.0, 0.5, Some((1.0, 0.25))).unwrap();
        log.append_test(0.125).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines[0], RESULTS_HEADER);
        assert_eq!(lines[1], "001,2.000000,0.500000,1.00000,0.25000,");
        assert_eq!(lines[2], ",,,,,0.12500");
    }

    #[test]
    fn test_create_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let log = ResultsLog::create(dir.path()).unwrap();
        log.append_test(0.5).unwrap();

        let log = ResultsLog::create(dir.path()).unwrap();
        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content, format!("{RESULTS_HEADER}\n"));
    }
}
