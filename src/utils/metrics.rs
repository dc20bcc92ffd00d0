//! Metrics Module
//!
//! Running-average bookkeeping for the training loop and a confusion matrix
//! for per-class evaluation reports.

use serde::{Deserialize, Serialize};

/// Computes and stores the average and current value of a metric.
///
/// `update(val, n)` records `val` as the mean over `n` samples, so the
/// running `avg` is weighted by batch size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AverageMeter {
    /// Most recent value
    pub val: f64,
    /// Sample-weighted average
    pub avg: f64,
    /// Weighted sum of all values
    pub sum: f64,
    /// Number of samples seen
    pub count: usize,
}

impl AverageMeter {
    /// Create a new, empty meter
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all accumulated values
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record `val` observed over `n` samples
    pub fn update(&mut self, val: f64, n: usize) {
        self.val = val;
        self.sum += val * n as f64;
        self.count += n;
        if self.count > 0 {
            self.avg = self.sum / self.count as f64;
        }
    }
}

/// Confusion Matrix for multi-class classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Number of classes
    pub num_classes: usize,

    /// Matrix data (row = actual, column = predicted), row-major
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    /// Create a new empty confusion matrix
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Add a single prediction to the matrix
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            let idx = actual * self.num_classes + predicted;
            self.matrix[idx] += 1;
        }
    }

    /// Add a batch of predictions
    pub fn add_batch(&mut self, actual: &[usize], predicted: &[usize]) {
        for (&a, &p) in actual.iter().zip(predicted.iter()) {
            self.add(a, p);
        }
    }

    /// Get the count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    /// Get the total count
    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Get the number of correct predictions (diagonal sum)
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    /// Get overall accuracy
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Number of samples per actual class
    pub fn support(&self, class: usize) -> usize {
        (0..self.num_classes).map(|col| self.get(class, col)).sum()
    }

    /// Recall of one class, `None` when the class never occurs
    pub fn class_accuracy(&self, class: usize) -> Option<f64> {
        let support = self.support(class);
        if support == 0 {
            None
        } else {
            Some(self.get(class, class) as f64 / support as f64)
        }
    }

    /// Render per-class accuracy lines, using names where available
    pub fn per_class_report(&self, class_names: &[String]) -> String {
        let mut output = String::new();
        for class in 0..self.num_classes {
            let name = class_names
                .get(class)
                .map(String::as_str)
                .unwrap_or("unknown");
            match self.class_accuracy(class) {
                Some(acc) => output.push_str(&format!(
                    "  {:>3}. {:12} {:>6} samples  acc {:>6.2}%\n",
                    class,
                    name,
                    self.support(class),
                    acc * 100.0
                )),
                None => output.push_str(&format!(
                    "  {:>3}. {:12} {:>6} samples\n",
                    class, name, 0
                )),
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_meter_weights_by_count() {
        let mut meter = AverageMeter::new();
        meter.update(1.0, 1);
        meter.update(0.5, 3);

        assert_eq!(meter.val, 0.5);
        assert_eq!(meter.count, 4);
        assert!((meter.sum - 2.5).abs() < 1e-12);
        assert!((meter.avg - 0.625).abs() < 1e-12);

        meter.reset();
        assert_eq!(meter, AverageMeter::default());
    }

    #[test]
    fn test_average_meter_zero_samples() {
        let mut meter = AverageMeter::new();
        meter.update(3.0, 0);
        assert_eq!(meter.val, 3.0);
        assert_eq!(meter.avg, 0.0);
    }

    #[test]
    fn test_confusion_matrix() {
        let actual = vec![0, 1, 2, 0, 2, 2, 1, 0, 1, 2];
        let predicted = vec![0, 1, 2, 0, 1, 2, 0, 0, 2, 2];

        let mut cm = ConfusionMatrix::new(3);
        cm.add_batch(&actual, &predicted);

        assert_eq!(cm.get(0, 0), 3);
        assert_eq!(cm.get(1, 1), 1);
        assert_eq!(cm.get(2, 2), 3);
        assert_eq!(cm.total(), 10);
        assert_eq!(cm.correct(), 7);
        assert!((cm.accuracy() - 0.7).abs() < 0.001);
        assert_eq!(cm.support(1), 3);
        assert!((cm.class_accuracy(1).unwrap() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_class_accuracy_without_support() {
        let mut cm = ConfusionMatrix::new(2);
        cm.add(0, 0);
        assert_eq!(cm.class_accuracy(1), None);

        let report = cm.per_class_report(&["norm".to_string()]);
        assert!(report.contains("norm"));
        assert!(report.contains("unknown"));
    }
}
