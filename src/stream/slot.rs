// Logical replication slot feed (wal2json, format-version 2).
//
// Changes are read with pg_logical_slot_peek_changes, which leaves the slot
// where it is. The slot is advanced past a transaction only once the consumer
// commits that transaction's closing record, so a restart replays from the
// first transaction not fully applied.

use super::{ChangeStream, Lsn, Next, Position, StreamRecord};
use crate::store::pg::PgPool;
use crate::{Error, EventFormat, Result};
use postgres::GenericClient;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct Slot {
    pub name: String,
    pub plugin: String,
}

impl Slot {
    pub fn new(name: String) -> Self {
        Slot {
            name,
            plugin: "wal2json".to_string(),
        }
    }

    /// A fresh, uniquely named slot.
    pub fn generate() -> Self {
        Self::new(format!("cdc_slot_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn exists<C: GenericClient>(&self, client: &mut C) -> Result<bool> {
        let row = client.query_opt(
            "SELECT 1 FROM pg_replication_slots WHERE slot_name = $1",
            &[&self.name],
        )?;
        Ok(row.is_some())
    }

    pub fn create_slot<C: GenericClient>(&self, client: &mut C) -> Result<()> {
        client.query_one(
            "SELECT pg_create_logical_replication_slot($1, $2)::text",
            &[&self.name, &self.plugin],
        )?;
        Ok(())
    }

    pub fn drop_slot<C: GenericClient>(&self, client: &mut C) -> Result<()> {
        client.query_one("SELECT pg_drop_replication_slot($1)::text", &[&self.name])?;
        Ok(())
    }

    /// Reads up to `upto_n_changes` rows (rounded up to a transaction
    /// boundary) without consuming them.
    pub fn peek_changes<C: GenericClient>(
        &self,
        client: &mut C,
        upto_n_changes: i32,
    ) -> Result<Vec<(Lsn, String)>> {
        let rows = client.query(
            "SELECT lsn::text, data FROM pg_logical_slot_peek_changes($1, NULL, $2, 'format-version', '2')",
            &[&self.name, &upto_n_changes],
        )?;
        rows.iter()
            .map(|row| {
                let lsn: String = row.get(0);
                let lsn = Lsn::from_pg_string(&lsn)
                    .ok_or_else(|| Error::Store(format!("unparseable lsn {lsn:?}")))?;
                Ok((lsn, row.get(1)))
            })
            .collect()
    }

    pub fn advance<C: GenericClient>(&self, client: &mut C, lsn: Lsn) -> Result<()> {
        client.query_one(
            "SELECT pg_replication_slot_advance($1, $2::text::pg_lsn)::text",
            &[&self.name, &lsn.to_pg_string()],
        )?;
        Ok(())
    }
}

pub struct SlotStream {
    pool: PgPool,
    slot: Slot,
    batch_size: i32,
    buffer: VecDeque<StreamRecord>,
}

impl SlotStream {
    /// Attaches to `slot`, creating it when `create` is set and it does not exist yet.
    pub fn open(pool: PgPool, slot: Slot, create: bool) -> Result<Self> {
        let mut client = pool.get()?;
        if !slot.exists(&mut *client)? {
            if !create {
                return Err(Error::Config(format!(
                    "replication slot {} does not exist",
                    slot.name
                )));
            }
            slot.create_slot(&mut *client)?;
            info!(slot = %slot.name, plugin = %slot.plugin, "created replication slot");
        }
        Ok(Self {
            pool,
            slot,
            batch_size: 100,
            buffer: VecDeque::new(),
        })
    }

    pub fn with_batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn slot(&self) -> &Slot {
        &self.slot
    }

    fn refill(&mut self) -> Result<()> {
        let mut client = self.pool.get()?;
        let changes = self.slot.peek_changes(&mut *client, self.batch_size)?;
        debug!(slot = %self.slot.name, count = changes.len(), "peeked changes");
        self.buffer.extend(changes.into_iter().map(|(lsn, data)| {
            let closes_transaction = is_commit_record(&data);
            StreamRecord {
                position: Position::Wal {
                    lsn,
                    closes_transaction,
                },
                payload: data.into_bytes(),
            }
        }));
        Ok(())
    }
}

fn is_commit_record(data: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(|v| v.get("action").and_then(|a| a.as_str()).map(|a| a == "C"))
        .unwrap_or(false)
}

impl ChangeStream for SlotStream {
    fn poll(&mut self, timeout: Duration) -> Result<Next> {
        if self.buffer.is_empty() {
            self.refill()?;
        }
        match self.buffer.pop_front() {
            Some(record) => Ok(Next::Record(record)),
            None => {
                std::thread::sleep(timeout);
                Ok(Next::Idle)
            }
        }
    }

    fn commit(&mut self, position: &Position) -> Result<()> {
        match position {
            Position::Wal {
                lsn,
                closes_transaction: true,
            } => {
                let mut client = self.pool.get()?;
                self.slot.advance(&mut *client, *lsn)
            }
            Position::Wal { .. } => Ok(()),
            Position::Line(_) => Err(Error::Config(format!(
                "{position} does not belong to slot {}",
                self.slot.name
            ))),
        }
    }

    fn format(&self) -> EventFormat {
        EventFormat::Wal2json
    }
}
