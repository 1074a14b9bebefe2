//! Applies an ordered change feed to the target store.
//!
//! One applier owns one key-space: it processes records strictly in receipt
//! order and commits each event's effect before moving the feed position, so
//! at-least-once delivery re-asserts state instead of compounding it.

use crate::event::{Decoded, decode};
use crate::store::{Mutation, TargetStore};
use crate::stream::{ChangeStream, Next, StreamRecord};
use crate::{ChangeEvent, Error, MappingRegistry, Operation, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// Backoff for transient store failures before they are treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub applied: u64,
    pub upserted: u64,
    pub deleted: u64,
    pub skipped_malformed: u64,
    pub unknown_table: u64,
    /// Tombstones and transaction markers.
    pub control: u64,
}

impl std::ops::AddAssign for ApplyStats {
    fn add_assign(&mut self, other: Self) {
        self.applied += other.applied;
        self.upserted += other.upserted;
        self.deleted += other.deleted;
        self.skipped_malformed += other.skipped_malformed;
        self.unknown_table += other.unknown_table;
        self.control += other.control;
    }
}

pub struct Applier<S, T> {
    registry: Arc<MappingRegistry>,
    stream: S,
    target: T,
    retry: RetryPolicy,
    poll_interval: Duration,
    stats: ApplyStats,
}

impl<S: ChangeStream, T: TargetStore> Applier<S, T> {
    pub fn new(registry: Arc<MappingRegistry>, stream: S, target: T) -> Self {
        Self {
            registry,
            stream,
            target,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(200),
            stats: ApplyStats::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn stats(&self) -> ApplyStats {
        self.stats
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// Consumes the feed until it closes or `stop` is raised. `stop` is only
    /// checked between events, so the target always reflects a committed
    /// prefix of the feed. A store error returns without committing the
    /// failed record's position.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<ApplyStats> {
        info!("change applier started");
        while !stop.load(Ordering::Relaxed) {
            match self.stream.poll(self.poll_interval)? {
                Next::Idle => continue,
                Next::Closed => {
                    info!("change feed closed");
                    break;
                }
                Next::Record(record) => {
                    self.handle(&record)?;
                    self.stream.commit(&record.position)?;
                }
            }
        }
        let stats = self.stats;
        info!(
            applied = stats.applied,
            skipped = stats.skipped_malformed,
            unknown_table = stats.unknown_table,
            "change applier stopped"
        );
        Ok(stats)
    }

    fn handle(&mut self, record: &StreamRecord) -> Result<()> {
        let result = match decode(self.stream.format(), &record.payload, &self.registry) {
            Ok(Decoded::Event(event)) => self.apply_event(&event),
            Ok(Decoded::Tombstone | Decoded::Control) => {
                self.stats.control += 1;
                Ok(())
            }
            Err(err) => Err(err),
        };
        match result {
            Err(err) if err.is_skippable() => {
                warn!(position = %record.position, error = %err, "skipping malformed change event");
                self.stats.skipped_malformed += 1;
                Ok(())
            }
            Err(Error::UnknownTable(table)) => {
                error!(position = %record.position, %table, "change event for unmapped table not applied");
                self.stats.unknown_table += 1;
                Ok(())
            }
            other => other,
        }
    }

    /// Resolves, projects and commits a single event.
    pub fn apply_event(&mut self, event: &ChangeEvent) -> Result<()> {
        let mutation = plan(&self.registry, event)?;
        self.apply_with_retry(&mutation)?;
        match mutation {
            Mutation::Upsert { .. } => self.stats.upserted += 1,
            Mutation::Delete { .. } => self.stats.deleted += 1,
        }
        self.stats.applied += 1;
        info!(
            table = %mutation.table(),
            key = %event.key,
            op = %event.operation,
            "applied change"
        );
        Ok(())
    }

    fn apply_with_retry(&mut self, mutation: &Mutation) -> Result<()> {
        let mut attempt = 1;
        let mut backoff = self.retry.initial_backoff;
        loop {
            match self.target.apply(mutation) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    warn!(table = %mutation.table(), attempt, error = %err, "store unavailable, retrying");
                    thread::sleep(backoff);
                    backoff *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Translates an event into the target write it implies.
pub fn plan(registry: &MappingRegistry, event: &ChangeEvent) -> Result<Mutation> {
    let mapping = registry.resolve(&event.source_table)?;
    let table = mapping.target.clone();
    let key_column = mapping.primary_key.target.clone();
    match event.operation {
        Operation::Delete => Ok(Mutation::Delete {
            table,
            key_column,
            key: event.key.clone(),
        }),
        Operation::Create | Operation::SnapshotRead | Operation::Update => {
            let after = event.after.as_ref().ok_or_else(|| {
                Error::MalformedEvent(format!(
                    "{} on {} has no after image",
                    event.operation, event.source_table
                ))
            })?;
            let row = mapping.project_to_target(after)?;
            Ok(Mutation::Upsert {
                table,
                key_column,
                key: event.key.clone(),
                columns: row.columns,
                values: row.values,
            })
        }
    }
}

/// Runs an applier for one key-space on its own thread.
pub fn spawn_applier<S, T>(
    registry: Arc<MappingRegistry>,
    stream: S,
    target: T,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<Result<ApplyStats>>
where
    S: ChangeStream + 'static,
    T: TargetStore + 'static,
{
    thread::spawn(move || Applier::new(registry, stream, target).run(&stop))
}
