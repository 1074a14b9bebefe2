//! In-process store backed by ordered maps.

use super::{ColumnStats, CountStrategy, Mutation, ReadSession, ReadStore, TargetStore};
use crate::value::OrderedValue;
use crate::{Error, Result, RowImage, Table, Value};
use rand::Rng;
use rand::seq::IteratorRandom;
use std::collections::BTreeMap;

type Rows = BTreeMap<OrderedValue, RowImage>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStore {
    tables: BTreeMap<Table, Rows>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a whole row, keyed by the value of `key_column`.
    pub fn insert_row(&mut self, table: &Table, key_column: &str, row: RowImage) -> Result<()> {
        let key = row
            .get(key_column)
            .cloned()
            .ok_or_else(|| Error::Store(format!("row for {table} has no {key_column}")))?;
        self.tables
            .entry(table.clone())
            .or_default()
            .insert(OrderedValue(key), row);
        Ok(())
    }

    pub fn row(&self, table: &Table, key: &Value) -> Option<&RowImage> {
        self.tables
            .get(table)
            .and_then(|rows| rows.get(&OrderedValue(key.clone())))
    }

    pub fn row_count(&self, table: &Table) -> usize {
        self.tables.get(table).map_or(0, BTreeMap::len)
    }

    fn rows(&self, table: &Table) -> Result<&Rows> {
        self.tables
            .get(table)
            .ok_or_else(|| Error::Store(format!("relation {table} does not exist")))
    }
}

impl TargetStore for MemoryStore {
    fn apply(&mut self, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::Upsert {
                table,
                key,
                columns,
                values,
                ..
            } => {
                let row = self
                    .tables
                    .entry(table.clone())
                    .or_default()
                    .entry(OrderedValue(key.clone()))
                    .or_default();
                for (column, value) in columns.iter().zip(values) {
                    row.insert(column.clone(), value.clone());
                }
            }
            Mutation::Delete { table, key, .. } => {
                if let Some(rows) = self.tables.get_mut(table) {
                    rows.remove(&OrderedValue(key.clone()));
                }
            }
        }
        Ok(())
    }
}

impl ReadStore for MemoryStore {
    type Session<'a> = MemorySession<'a>;

    fn session(&self) -> Result<MemorySession<'_>> {
        Ok(MemorySession { store: self })
    }
}

/// Shared borrow of the store; nothing can write while it is held.
pub struct MemorySession<'a> {
    store: &'a MemoryStore,
}

impl ReadSession for MemorySession<'_> {
    fn count_rows(&mut self, table: &Table, _strategy: CountStrategy) -> Result<u64> {
        Ok(self.store.rows(table)?.len() as u64)
    }

    fn aggregate(&mut self, table: &Table, column: &str) -> Result<ColumnStats> {
        let mut stats = ColumnStats::default();
        let mut max: Option<f64> = None;
        for row in self.store.rows(table)?.values() {
            let number = match row.get(column) {
                None | Some(Value::Null) => continue,
                Some(Value::Int(i)) => *i as f64,
                Some(Value::Float(f)) => *f,
                Some(Value::Text(s)) => s.parse::<f64>().map_err(|_| {
                    Error::Store(format!("{table}.{column} holds non-numeric value {s:?}"))
                })?,
                Some(Value::Bool(b)) => f64::from(u8::from(*b)),
            };
            stats.count += 1;
            stats.sum += number;
            max = Some(max.map_or(number, |m| m.max(number)));
        }
        stats.max = max.unwrap_or(0.0);
        Ok(stats)
    }

    fn sample_keys<R: Rng + ?Sized>(
        &mut self,
        table: &Table,
        _key_column: &str,
        amount: usize,
        rng: &mut R,
    ) -> Result<Vec<Value>> {
        Ok(self
            .store
            .rows(table)?
            .keys()
            .map(|k| k.0.clone())
            .choose_multiple(rng, amount))
    }

    fn fetch_row(
        &mut self,
        table: &Table,
        _key_column: &str,
        key: &Value,
        columns: &[String],
    ) -> Result<Option<Vec<Value>>> {
        let Some(row) = self.store.rows(table)?.get(&OrderedValue(key.clone())) else {
            return Ok(None);
        };
        columns
            .iter()
            .map(|col| {
                row.get(col)
                    .cloned()
                    .ok_or_else(|| Error::Store(format!("column {table}.{col} does not exist")))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}
