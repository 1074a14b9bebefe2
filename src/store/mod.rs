pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

use crate::{Result, Table, Value};
use rand::Rng;
use serde::Serialize;

/// A committed write against the target, expressed in target names.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert-or-overwrite of every mapped column for `key`.
    Upsert {
        table: Table,
        key_column: String,
        key: Value,
        columns: Vec<String>,
        values: Vec<Value>,
    },
    /// Removes the row for `key`; an absent row is not an error.
    Delete {
        table: Table,
        key_column: String,
        key: Value,
    },
}

impl Mutation {
    pub fn table(&self) -> &Table {
        match self {
            Mutation::Upsert { table, .. } | Mutation::Delete { table, .. } => table,
        }
    }
}

pub trait TargetStore: Send {
    /// Applies `mutation` and makes it durable before returning.
    fn apply(&mut self, mutation: &Mutation) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CountStrategy {
    /// `count(*)` over the table.
    #[default]
    Exact,
    /// Live-tuple statistics kept by the store.
    Statistics,
}

/// count/sum/max over one numeric column; NULLs are excluded from all three.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ColumnStats {
    pub count: u64,
    pub sum: f64,
    pub max: f64,
}

pub trait ReadStore: Sync {
    type Session<'a>: ReadSession
    where
        Self: 'a;

    /// Opens one consistent read view of the store.
    fn session(&self) -> Result<Self::Session<'_>>;
}

pub trait ReadSession {
    fn count_rows(&mut self, table: &Table, strategy: CountStrategy) -> Result<u64>;

    fn aggregate(&mut self, table: &Table, column: &str) -> Result<ColumnStats>;

    /// Up to `amount` live primary keys drawn uniformly with `rng`; every key
    /// when the table holds fewer. Keys are visited in ascending order, so a
    /// seeded `rng` draws the same keys from the same data.
    fn sample_keys<R: Rng + ?Sized>(
        &mut self,
        table: &Table,
        key_column: &str,
        amount: usize,
        rng: &mut R,
    ) -> Result<Vec<Value>>;

    fn fetch_row(
        &mut self,
        table: &Table,
        key_column: &str,
        key: &Value,
        columns: &[String],
    ) -> Result<Option<Vec<Value>>>;
}
