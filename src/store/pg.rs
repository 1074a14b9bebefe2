// PostgreSQL store: parameterized upsert/delete on the write side and
// snapshot-consistent counting, aggregation and row fetches on the read side.

use super::{ColumnStats, CountStrategy, Mutation, ReadSession, ReadStore, TargetStore};
use crate::table::quote_ident;
use crate::value::select_expr;
use crate::{Error, Result, Table, Value};
use itertools::Itertools;
use postgres::GenericClient;
use postgres::fallible_iterator::FallibleIterator;
use postgres::types::{ToSql, Type};
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::{PostgresConnectionManager, postgres::NoTls as R2d2NoTls};
use rand::Rng;
use rand::seq::IteratorRandom;
use std::collections::HashMap;
use tracing::debug;

pub type PgPool = Pool<PostgresConnectionManager<R2d2NoTls>>;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    column_types: HashMap<Table, HashMap<String, Type>>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            column_types: HashMap::new(),
        }
    }

    pub fn connect(uri: &str) -> Result<Self> {
        let config: postgres::Config = uri
            .parse()
            .map_err(|e| Error::Config(format!("bad connection string: {e}")))?;
        let manager = PostgresConnectionManager::new(config, R2d2NoTls);
        let pool = Pool::new(manager)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Column types for the write path, discovered once per table.
    fn cached_types<C: GenericClient>(
        &mut self,
        client: &mut C,
        table: &Table,
        columns: &[String],
    ) -> Result<Vec<Type>> {
        let known = self.column_types.entry(table.clone()).or_default();
        let missing: Vec<String> = columns
            .iter()
            .filter(|c| !known.contains_key(*c))
            .cloned()
            .collect();
        if !missing.is_empty() {
            let types = column_types(client, table, &missing)?;
            debug!(%table, columns = ?missing, "discovered column types");
            known.extend(missing.into_iter().zip(types));
        }
        Ok(columns.iter().map(|c| known[c].clone()).collect())
    }
}

impl TargetStore for PgStore {
    fn apply(&mut self, mutation: &Mutation) -> Result<()> {
        let mut client = self.pool.get()?;
        let mut txn = client.transaction()?;
        match mutation {
            Mutation::Upsert {
                table,
                key_column,
                columns,
                values,
                ..
            } => {
                let types = self.cached_types(&mut txn, table, columns)?;
                let sql = upsert_sql(table, key_column, columns, &types);
                let params: Vec<Option<String>> = values.iter().map(Value::to_text).collect();
                txn.execute(&sql, &as_params(&params))?;
            }
            Mutation::Delete {
                table,
                key_column,
                key,
            } => {
                let types = self.cached_types(&mut txn, table, std::slice::from_ref(key_column))?;
                let sql = format!(
                    "DELETE FROM {} WHERE {} = $1::text::{}",
                    table.quoted(),
                    quote_ident(key_column),
                    cast_target(&types[0])
                );
                txn.execute(&sql, &[&key.to_text()])?;
            }
        }
        txn.commit()?;
        Ok(())
    }
}

impl ReadStore for PgStore {
    type Session<'a> = PgSession;

    fn session(&self) -> Result<PgSession> {
        let mut client = self.pool.get()?;
        client.batch_execute("BEGIN ISOLATION LEVEL REPEATABLE READ, READ ONLY")?;
        Ok(PgSession { client })
    }
}

/// A pooled connection holding an open repeatable-read transaction, so every
/// query in the session sees the same snapshot. Rolled back on drop.
pub struct PgSession {
    client: PooledConnection<PostgresConnectionManager<R2d2NoTls>>,
}

impl Drop for PgSession {
    fn drop(&mut self) {
        let _ = self.client.batch_execute("ROLLBACK");
    }
}

impl ReadSession for PgSession {
    fn count_rows(&mut self, table: &Table, strategy: CountStrategy) -> Result<u64> {
        let count: i64 = match strategy {
            CountStrategy::Exact => {
                let sql = format!("SELECT count(*) FROM {}", table.quoted());
                self.client.query_one(&sql, &[])?.get(0)
            }
            CountStrategy::Statistics => {
                let row = self.client.query_opt(
                    "SELECT n_live_tup FROM pg_stat_all_tables WHERE relid = $1::text::regclass",
                    &[&table.quoted()],
                )?;
                row.ok_or_else(|| Error::Store(format!("no statistics for {table}")))?
                    .get(0)
            }
        };
        Ok(count.max(0) as u64)
    }

    fn aggregate(&mut self, table: &Table, column: &str) -> Result<ColumnStats> {
        let col = quote_ident(column);
        let sql = format!(
            "SELECT count({col}), COALESCE(sum({col}::float8), 0)::float8, COALESCE(max({col}::float8), 0)::float8 FROM {}",
            table.quoted()
        );
        let row = self.client.query_one(&sql, &[])?;
        let count: i64 = row.get(0);
        Ok(ColumnStats {
            count: count as u64,
            sum: row.get(1),
            max: row.get(2),
        })
    }

    /// Streams the key column through a reservoir sample, so only `amount`
    /// keys are held at a time.
    fn sample_keys<R: Rng + ?Sized>(
        &mut self,
        table: &Table,
        key_column: &str,
        amount: usize,
        rng: &mut R,
    ) -> Result<Vec<Value>> {
        let types = column_types(&mut *self.client, table, &[key_column.to_string()])?;
        let key = quote_ident(key_column);
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {key}",
            select_expr(&key, &types[0]),
            table.quoted()
        );
        let rows = self.client.query_raw(&sql, Vec::<String>::new())?;
        let mut failure = None;
        let keys = rows
            .iterator()
            .map_while(|row| match row.and_then(|row| Value::from_pg(&row, 0)) {
                Ok(value) => Some(value),
                Err(err) => {
                    failure = Some(err);
                    None
                }
            })
            .choose_multiple(rng, amount);
        match failure {
            Some(err) => Err(err.into()),
            None => Ok(keys),
        }
    }

    fn fetch_row(
        &mut self,
        table: &Table,
        key_column: &str,
        key: &Value,
        columns: &[String],
    ) -> Result<Option<Vec<Value>>> {
        let mut wanted = vec![key_column.to_string()];
        wanted.extend(columns.iter().cloned());
        let types = column_types(&mut *self.client, table, &wanted)?;
        let projection = columns
            .iter()
            .zip(&types[1..])
            .map(|(col, ty)| select_expr(&quote_ident(col), ty))
            .join(", ");
        let projection = if projection.is_empty() {
            "1".to_string()
        } else {
            projection
        };
        let sql = format!(
            "SELECT {projection} FROM {} WHERE {} = $1::text::{}",
            table.quoted(),
            quote_ident(key_column),
            cast_target(&types[0])
        );
        let Some(row) = self.client.query_opt(&sql, &[&key.to_text()])? else {
            return Ok(None);
        };
        (0..columns.len())
            .map(|idx| Value::from_pg(&row, idx).map_err(Error::from))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}

/// Prepares a zero-row select to learn the declared types of `columns`.
fn column_types<C: GenericClient>(
    client: &mut C,
    table: &Table,
    columns: &[String],
) -> Result<Vec<Type>> {
    let sql = format!(
        "SELECT {} FROM {} LIMIT 0",
        columns.iter().map(|c| quote_ident(c)).join(", "),
        table.quoted()
    );
    let stmt = client.prepare(&sql)?;
    Ok(stmt.columns().iter().map(|c| c.type_().clone()).collect())
}

fn cast_target(ty: &Type) -> String {
    format!("{}.{}", quote_ident(ty.schema()), quote_ident(ty.name()))
}

/// Single conditional write: insert, or overwrite every mapped non-key column.
fn upsert_sql(table: &Table, key_column: &str, columns: &[String], types: &[Type]) -> String {
    let cols = columns.iter().map(|c| quote_ident(c)).join(", ");
    let placeholders = types
        .iter()
        .enumerate()
        .map(|(i, ty)| format!("${}::text::{}", i + 1, cast_target(ty)))
        .join(", ");
    let updates = columns
        .iter()
        .filter(|c| c.as_str() != key_column)
        .map(|c| format!("{col} = EXCLUDED.{col}", col = quote_ident(c)))
        .join(", ");
    let on_conflict = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {updates}")
    };
    format!(
        "INSERT INTO {} ({cols}) VALUES ({placeholders}) ON CONFLICT ({}) {on_conflict}",
        table.quoted(),
        quote_ident(key_column)
    )
}

fn as_params(params: &[Option<String>]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_sql() {
        let table: Table = "public.orders".parse().unwrap();
        let sql = upsert_sql(
            &table,
            "order_id",
            &["order_id".into(), "total_amount".into()],
            &[Type::INT4, Type::NUMERIC],
        );
        assert_eq!(
            sql,
            "INSERT INTO \"public\".\"orders\" (\"order_id\", \"total_amount\") \
             VALUES ($1::text::\"pg_catalog\".\"int4\", $2::text::\"pg_catalog\".\"numeric\") \
             ON CONFLICT (\"order_id\") DO UPDATE SET \"total_amount\" = EXCLUDED.\"total_amount\""
        );
    }

    #[test]
    fn test_upsert_sql_key_only() {
        let table: Table = "tags".parse().unwrap();
        let sql = upsert_sql(&table, "tag", &["tag".into()], &[Type::TEXT]);
        assert!(sql.ends_with("ON CONFLICT (\"tag\") DO NOTHING"));
    }
}
