use super::{Partial, cancelled};
use crate::report::RowCountResult;
use crate::store::{CountStrategy, ReadSession, ReadStore};
use crate::{Result, TableMapping};
use std::sync::atomic::AtomicBool;
use tracing::{info, warn};

/// Counts must agree exactly; there is no tolerance on row counts.
pub(crate) fn check<S: ReadStore, T: ReadStore>(
    source: &S,
    target: &T,
    tables: &[&TableMapping],
    strategies: (CountStrategy, CountStrategy),
    stop: &AtomicBool,
) -> Result<Partial<RowCountResult>> {
    let (source_strategy, target_strategy) = strategies;
    let mut src = source.session()?;
    let mut tgt = target.session()?;
    let mut results = Vec::with_capacity(tables.len());
    for mapping in tables {
        if cancelled(stop) {
            return Ok(Partial::cancelled(results));
        }
        let source_count = src.count_rows(&mapping.source, source_strategy)?;
        let target_count = tgt.count_rows(&mapping.target, target_strategy)?;
        let passed = source_count == target_count;
        if passed {
            info!("{} src={source_count} tgt={target_count} [OK]", mapping.source);
        } else {
            warn!("{} src={source_count} tgt={target_count} [MISMATCH]", mapping.source);
        }
        results.push(RowCountResult {
            source_table: mapping.source.to_string(),
            target_table: mapping.target.to_string(),
            source_count,
            target_count,
            passed,
        });
    }
    Ok(Partial::finished(results))
}
