//! Result of one reconciliation run.

use crate::Value;
use crate::store::ColumnStats;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Passed,
    Failed,
    /// The run was cancelled before every check finished.
    Incomplete,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Passed => write!(f, "PASSED"),
            Outcome::Failed => write!(f, "FAILED"),
            Outcome::Incomplete => write!(f, "INCOMPLETE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowCountResult {
    pub source_table: String,
    pub target_table: String,
    pub source_count: u64,
    pub target_count: u64,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricResult {
    pub target_table: String,
    pub column: String,
    pub source: ColumnStats,
    pub target: ColumnStats,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleResult {
    pub target_table: String,
    pub key: Value,
    pub source_present: bool,
    pub target_present: bool,
    pub rows_equal: bool,
    /// Target column names whose values differ.
    pub mismatched_columns: Vec<String>,
}

/// A failed finding, for logging and callers that only care about failures.
#[derive(Debug, Clone, PartialEq)]
pub enum Mismatch {
    RowCount {
        table: String,
        source_count: u64,
        target_count: u64,
    },
    Metric {
        table: String,
        column: String,
        source: ColumnStats,
        target: ColumnStats,
    },
    Sample {
        table: String,
        key: Value,
        mismatched_columns: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub row_counts: Vec<RowCountResult>,
    pub metrics: Vec<MetricResult>,
    pub samples: Vec<SampleResult>,
    pub complete: bool,
    pub overall_ok: bool,
    pub outcome: Outcome,
}

impl ReconciliationReport {
    pub fn new(
        row_counts: Vec<RowCountResult>,
        metrics: Vec<MetricResult>,
        samples: Vec<SampleResult>,
        complete: bool,
    ) -> Self {
        let all_passed = row_counts.iter().all(|r| r.passed)
            && metrics.iter().all(|m| m.passed)
            && samples.iter().all(|s| s.rows_equal);
        let outcome = match (complete, all_passed) {
            (false, _) => Outcome::Incomplete,
            (true, true) => Outcome::Passed,
            (true, false) => Outcome::Failed,
        };
        Self {
            row_counts,
            metrics,
            samples,
            complete,
            overall_ok: outcome == Outcome::Passed,
            outcome,
        }
    }

    pub fn rowcount_ok(&self) -> bool {
        self.row_counts.iter().all(|r| r.passed)
    }

    pub fn metrics_ok(&self) -> bool {
        self.metrics.iter().all(|m| m.passed)
    }

    pub fn samples_ok(&self) -> bool {
        self.samples.iter().all(|s| s.rows_equal)
    }

    pub fn mismatches(&self) -> Vec<Mismatch> {
        let counts = self
            .row_counts
            .iter()
            .filter(|r| !r.passed)
            .map(|r| Mismatch::RowCount {
                table: r.target_table.clone(),
                source_count: r.source_count,
                target_count: r.target_count,
            });
        let metrics = self.metrics.iter().filter(|m| !m.passed).map(|m| Mismatch::Metric {
            table: m.target_table.clone(),
            column: m.column.clone(),
            source: m.source,
            target: m.target,
        });
        let samples = self
            .samples
            .iter()
            .filter(|s| !s.rows_equal)
            .map(|s| Mismatch::Sample {
                table: s.target_table.clone(),
                key: s.key.clone(),
                mismatched_columns: s.mismatched_columns.clone(),
            });
        counts.chain(metrics).chain(samples).collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "Validation {} (rowcount_ok={} metrics_ok={} samples_ok={}, {} tables, {} metrics, {} samples)",
            self.outcome,
            self.rowcount_ok(),
            self.metrics_ok(),
            self.samples_ok(),
            self.row_counts.len(),
            self.metrics.len(),
            self.samples.len()
        )
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
