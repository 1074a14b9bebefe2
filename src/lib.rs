//! Main library entry point for cdc-reconcile.

pub mod applier;
pub mod args;
pub mod column_map;
pub mod config;
pub mod error;
pub mod event;
pub mod mapping;
pub mod reconcile;
pub mod report;
pub mod store;
pub mod stream;
pub mod table;
pub mod value;

// Re-export key types for ergonomic access

pub use self::table::*;
pub use applier::{Applier, ApplyStats, RetryPolicy, spawn_applier};
pub use column_map::*;
pub use error::{Error, Result};
pub use event::{ChangeEvent, EventFormat, Operation};
pub use mapping::{KeyPair, MappingRegistry, TableMapping};
pub use reconcile::{ReconcileOptions, Reconciler};
pub use report::*;
pub use value::{RowImage, Value};

use anyhow::{Context, anyhow};
use std::path::Path;
use std::sync::{Arc, atomic::AtomicBool};
use store::{ReadStore, TargetStore};
use stream::ChangeStream;
use tracing::info;

/// Loads the mapping file at `path`, or the built-in AdventureWorks mapping.
pub fn load_registry(path: Option<&Path>) -> anyhow::Result<MappingRegistry> {
    let registry = match path {
        Some(path) => MappingRegistry::load(path)
            .with_context(|| format!("loading mappings from {}", path.display()))?,
        None => MappingRegistry::builtin()?,
    };
    info!(tables = registry.len(), "mapping registry loaded");
    Ok(registry)
}

/// Apply mode: one applier thread per feed until every feed closes or
/// `stop` is raised. Each feed must own a disjoint key-space.
pub fn run_apply<S, T>(
    registry: Arc<MappingRegistry>,
    feeds: Vec<S>,
    target: T,
    stop: Arc<AtomicBool>,
) -> anyhow::Result<ApplyStats>
where
    S: ChangeStream + 'static,
    T: TargetStore + Clone + 'static,
{
    let handles: Vec<_> = feeds
        .into_iter()
        .map(|feed| spawn_applier(registry.clone(), feed, target.clone(), stop.clone()))
        .collect();
    let mut total = ApplyStats::default();
    let mut first_error = None;
    for handle in handles {
        match handle.join() {
            Ok(Ok(stats)) => total += stats,
            Ok(Err(err)) => {
                first_error.get_or_insert(anyhow::Error::from(err));
            }
            Err(_) => {
                first_error.get_or_insert(anyhow!("applier thread panicked"));
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(total),
    }
}

/// Validate mode: reconciles both stores and, with `report_path`, writes the
/// JSON report for downstream publication.
pub fn run_validate<S: ReadStore, T: ReadStore>(
    registry: &MappingRegistry,
    source: &S,
    target: &T,
    options: ReconcileOptions,
    report_path: Option<&Path>,
    stop: &AtomicBool,
) -> anyhow::Result<ReconciliationReport> {
    let report = Reconciler::new(registry, source, target)
        .with_options(options)
        .run(stop)?;
    if let Some(path) = report_path {
        std::fs::write(path, report.to_json()?)
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }
    Ok(report)
}
