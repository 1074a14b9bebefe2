//! Proves two stores agree, using three increasingly expensive checks.
//!
//! The checks only read, so they run side by side, each with its own
//! session (one consistent snapshot) per store. Consistency with a live
//! applier is the caller's job: quiesce it first.

mod metrics;
mod rowcount;
mod samples;

use crate::report::ReconciliationReport;
use crate::store::{CountStrategy, ReadStore};
use crate::{MappingRegistry, Result, TableMapping};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{info, warn};

pub const DEFAULT_SAMPLE_SIZE: usize = 50;
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOptions {
    /// Keys drawn per table; tables with fewer rows are sampled entirely.
    pub sample_size: usize,
    /// Absolute tolerance applied to each metric statistic.
    pub tolerance: f64,
    /// Fixes the sample draw for reproducible runs.
    pub seed: Option<u64>,
    pub source_count: CountStrategy,
    pub target_count: CountStrategy,
    /// Restricts the run to these tables (source or target names).
    pub tables: Option<Vec<String>>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            tolerance: DEFAULT_TOLERANCE,
            seed: None,
            source_count: CountStrategy::Exact,
            target_count: CountStrategy::Exact,
            tables: None,
        }
    }
}

/// What one check produced before finishing or being cancelled.
pub(crate) struct Partial<T> {
    pub results: Vec<T>,
    pub complete: bool,
}

impl<T> Partial<T> {
    fn finished(results: Vec<T>) -> Self {
        Self {
            results,
            complete: true,
        }
    }

    fn cancelled(results: Vec<T>) -> Self {
        Self {
            results,
            complete: false,
        }
    }
}

fn cancelled(stop: &AtomicBool) -> bool {
    stop.load(Ordering::Relaxed)
}

pub struct Reconciler<'a, S, T> {
    registry: &'a MappingRegistry,
    source: &'a S,
    target: &'a T,
    options: ReconcileOptions,
}

impl<'a, S: ReadStore, T: ReadStore> Reconciler<'a, S, T> {
    pub fn new(registry: &'a MappingRegistry, source: &'a S, target: &'a T) -> Self {
        Self {
            registry,
            source,
            target,
            options: ReconcileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    fn strategies(&self) -> (CountStrategy, CountStrategy) {
        (self.options.source_count, self.options.target_count)
    }

    fn tables(&self) -> Result<Vec<&'a TableMapping>> {
        let registry = self.registry;
        match &self.options.tables {
            None => Ok(registry.mappings().collect()),
            Some(names) => names.iter().map(|name| registry.resolve_any(name)).collect(),
        }
    }

    /// Runs every check and combines them. Raising `stop` abandons the
    /// remaining tables and yields an incomplete report; store failures are
    /// returned as errors rather than folded into a verdict.
    pub fn run(&self, stop: &AtomicBool) -> Result<ReconciliationReport> {
        let tables = self.tables()?;
        info!(tables = tables.len(), "reconciliation started");
        let (counts, metrics, samples) = thread::scope(|s| {
            let counts = s.spawn(|| {
                rowcount::check(self.source, self.target, &tables, self.strategies(), stop)
            });
            let metrics = s.spawn(|| {
                metrics::check(self.source, self.target, &tables, self.options.tolerance, stop)
            });
            let samples = s.spawn(|| {
                samples::check(
                    self.source,
                    self.target,
                    &tables,
                    self.options.sample_size,
                    self.options.seed,
                    stop,
                )
            });
            (join(counts), join(metrics), join(samples))
        });
        let (counts, metrics, samples) = (counts?, metrics?, samples?);
        let report = ReconciliationReport::new(
            counts.results,
            metrics.results,
            samples.results,
            counts.complete && metrics.complete && samples.complete,
        );
        if report.complete {
            info!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
        }
        Ok(report)
    }

    /// The cheap tier on its own.
    pub fn row_counts(&self, stop: &AtomicBool) -> Result<ReconciliationReport> {
        let tables = self.tables()?;
        let counts = rowcount::check(self.source, self.target, &tables, self.strategies(), stop)?;
        Ok(ReconciliationReport::new(
            counts.results,
            vec![],
            vec![],
            counts.complete,
        ))
    }
}

fn join<R>(handle: thread::ScopedJoinHandle<'_, R>) -> R {
    handle
        .join()
        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
}
