//! Main binary entry point for cdc-reconcile.

use anyhow::{Result, bail};
use cdc_reconcile::args::{Command, get_args};
use cdc_reconcile::store::PgStore;
use cdc_reconcile::stream::{ChangeStream, FileStream, Slot, SlotStream};
use cdc_reconcile::{Outcome, ReconcileOptions};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::{error, info};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = get_args()?;
    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = stop.clone();
    ctrlc::set_handler(move || {
        stop_clone.store(true, Ordering::Relaxed);
    })?;

    match args.command {
        Command::Apply {
            target,
            mappings,
            feed,
            format,
            follow,
            slot,
            source,
            create_slot,
        } => {
            let registry = Arc::new(cdc_reconcile::load_registry(mappings.as_deref())?);
            let mut feeds: Vec<Box<dyn ChangeStream>> = Vec::new();
            for path in &feed {
                feeds.push(Box::new(FileStream::open(path, format, follow)?));
            }
            if let (Some(slot), Some(source)) = (slot, source.as_deref()) {
                let source = PgStore::connect(source)?;
                let stream = SlotStream::open(source.pool().clone(), Slot::new(slot), create_slot)?;
                feeds.push(Box::new(stream));
            }
            if feeds.is_empty() {
                bail!("nothing to apply: pass at least one --feed or a --slot");
            }
            let target = PgStore::connect(&target)?;
            let stats = cdc_reconcile::run_apply(registry, feeds, target, stop)?;
            info!(
                applied = stats.applied,
                upserted = stats.upserted,
                deleted = stats.deleted,
                skipped = stats.skipped_malformed,
                unknown_table = stats.unknown_table,
                "apply finished"
            );
        }
        Command::Validate {
            source,
            target,
            mappings,
            sample_size,
            tolerance,
            seed,
            source_count,
            target_count,
            tables,
            report,
        } => {
            let registry = cdc_reconcile::load_registry(mappings.as_deref())?;
            let source = PgStore::connect(&source)?;
            let target = PgStore::connect(&target)?;
            let options = ReconcileOptions {
                sample_size,
                tolerance,
                seed,
                source_count,
                target_count,
                tables: (!tables.is_empty()).then_some(tables),
            };
            let report = cdc_reconcile::run_validate(
                &registry,
                &source,
                &target,
                options,
                report.as_deref(),
                &stop,
            )?;
            if report.outcome != Outcome::Passed {
                for mismatch in report.mismatches() {
                    error!(?mismatch, "validation mismatch");
                }
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
