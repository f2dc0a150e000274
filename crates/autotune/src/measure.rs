//! Per-configuration measurement aggregation.

use gridtune_launch::Dim3;

/// Collects `(problem size, elapsed seconds)` records for one configuration
/// and reduces them to a throughput estimate.
///
/// Collection continues until `max_evals` records have been gathered or the
/// summed elapsed time reaches `max_seconds`, with a floor of
/// `min_evals + num_outliers` records. The `num_outliers` slowest records
/// are dropped before the estimate `total_workload / total_time` is formed,
/// where workload is `x·y·z` of the problem size.
#[derive(Debug, Clone)]
pub struct PerfAggregator {
    records: Vec<(Dim3, f64)>,
    min_evals: usize,
    max_evals: usize,
    max_seconds: f64,
    num_outliers: usize,
}

impl PerfAggregator {
    pub fn new(min_evals: usize, max_evals: usize, max_seconds: f64, num_outliers: usize) -> Self {
        PerfAggregator {
            records: Vec::new(),
            min_evals,
            max_evals,
            max_seconds,
            num_outliers,
        }
    }

    pub fn reset(&mut self) {
        self.records.clear();
    }

    pub fn add(&mut self, problem: Dim3, seconds: f64) {
        self.records.push((problem, seconds));
    }

    /// The throughput estimate, once enough records are in; `None` asks for
    /// more measurements.
    pub fn collect(&mut self) -> Option<f64> {
        if self.records.len() < self.min_evals + self.num_outliers {
            return None;
        }

        // slowest first, so outliers are a prefix
        self.records
            .sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut total_workload = 0.0;
        let mut total_time = 0.0;
        for (problem, seconds) in self.records.iter().skip(self.num_outliers) {
            total_workload += problem.volume() as f64;
            total_time += seconds;
        }

        if self.records.len() < self.max_evals && total_time < self.max_seconds {
            return None;
        }

        Some(total_workload / total_time)
    }
}

impl Default for PerfAggregator {
    fn default() -> Self {
        PerfAggregator::new(0, 20, 1.0, 1)
    }
}
