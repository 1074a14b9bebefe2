use super::{Partial, cancelled};
use crate::report::MetricResult;
use crate::store::{ColumnStats, ReadSession, ReadStore};
use crate::{Result, TableMapping};
use std::sync::atomic::AtomicBool;
use tracing::{debug, warn};

pub(crate) fn check<S: ReadStore, T: ReadStore>(
    source: &S,
    target: &T,
    tables: &[&TableMapping],
    tolerance: f64,
    stop: &AtomicBool,
) -> Result<Partial<MetricResult>> {
    let mut src = source.session()?;
    let mut tgt = target.session()?;
    let mut results = Vec::new();
    for mapping in tables {
        if cancelled(stop) {
            return Ok(Partial::cancelled(results));
        }
        for (source_column, target_column) in mapping.metric_pairs() {
            let source_stats = src.aggregate(&mapping.source, &source_column)?;
            let target_stats = tgt.aggregate(&mapping.target, &target_column)?;
            let passed = within(&source_stats, &target_stats, tolerance);
            if passed {
                debug!(table = %mapping.target, column = %target_column, "metrics match");
            } else {
                warn!(
                    table = %mapping.target,
                    column = %target_column,
                    source = ?source_stats,
                    target = ?target_stats,
                    "metric mismatch"
                );
            }
            results.push(MetricResult {
                target_table: mapping.target.to_string(),
                column: target_column,
                source: source_stats,
                target: target_stats,
                passed,
            });
        }
    }
    Ok(Partial::finished(results))
}

/// Every statistic must be within `tolerance` of its counterpart.
fn within(a: &ColumnStats, b: &ColumnStats, tolerance: f64) -> bool {
    let close = |x: f64, y: f64| (x - y).abs() <= tolerance;
    close(a.count as f64, b.count as f64) && close(a.sum, b.sum) && close(a.max, b.max)
}
