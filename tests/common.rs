#![allow(dead_code)]

use cdc_reconcile::store::{MemoryStore, Mutation, TargetStore};
use cdc_reconcile::stream::{ChangeStream, Next, Position, StreamRecord};
use cdc_reconcile::{Error, EventFormat, MappingRegistry, RowImage, Table, Value};
use r2d2::Pool;
use r2d2_postgres::{PostgresConnectionManager, postgres::NoTls as R2d2NoTls};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const ORDERS_MAPPING: &str = r#"
[[tables]]
source = "dbo.Orders"
target = "public.orders"
primary_key = { source = "OrderID", target = "order_id" }
metrics = ["total_amount"]
columns = [
    { source = "OrderID", target = "order_id" },
    { source = "TotalAmount", target = "total_amount" },
    { source = "Status", target = "status" },
    { source = "RowVersion", ignored = true },
]
"#;

pub fn registry() -> Arc<MappingRegistry> {
    Arc::new(MappingRegistry::from_toml_str(ORDERS_MAPPING).unwrap())
}

pub fn source_orders() -> Table {
    "dbo.Orders".parse().unwrap()
}

pub fn target_orders() -> Table {
    "public.orders".parse().unwrap()
}

pub fn order(id: i64, total: f64, status: &str) -> serde_json::Value {
    json!({ "OrderID": id, "TotalAmount": total, "Status": status, "RowVersion": 7 })
}

/// A Debezium envelope for `dbo.Orders`.
pub fn debezium(
    op: &str,
    before: Option<serde_json::Value>,
    after: Option<serde_json::Value>,
) -> String {
    json!({
        "payload": {
            "op": op,
            "before": before,
            "after": after,
            "source": { "schema": "dbo", "table": "Orders" }
        }
    })
    .to_string()
}

pub fn create(id: i64, total: f64) -> String {
    debezium("c", None, Some(order(id, total, "new")))
}

pub fn update(id: i64, total: f64) -> String {
    debezium("u", Some(order(id, 0.0, "new")), Some(order(id, total, "paid")))
}

pub fn delete(id: i64) -> String {
    debezium("d", Some(order(id, 0.0, "paid")), None)
}

/// Source-side row in source column names.
pub fn source_row(id: i64, total: f64, status: &str) -> RowImage {
    RowImage::from([
        ("OrderID".to_string(), Value::Int(id)),
        ("TotalAmount".to_string(), Value::Float(total)),
        ("Status".to_string(), Value::Text(status.to_string())),
        ("RowVersion".to_string(), Value::Int(7)),
    ])
}

pub fn source_store(rows: &[(i64, f64, &str)]) -> MemoryStore {
    let mut store = MemoryStore::new();
    for (id, total, status) in rows {
        store
            .insert_row(&source_orders(), "OrderID", source_row(*id, *total, status))
            .unwrap();
    }
    store
}

pub const CUSTOMERS_MAPPING: &str = r#"
[[tables]]
source = "dbo.Customers"
target = "public.customers"
primary_key = { source = "CustomerID", target = "customer_id" }
columns = [
    { source = "CustomerID", target = "customer_id" },
    { source = "Email", target = "email" },
]
"#;

/// Orders plus customers, for runs with more than one key-space.
pub fn two_table_registry() -> Arc<MappingRegistry> {
    let toml = format!("{ORDERS_MAPPING}\n{CUSTOMERS_MAPPING}");
    Arc::new(MappingRegistry::from_toml_str(&toml).unwrap())
}

pub fn create_customer(id: i64, email: &str) -> String {
    json!({
        "payload": {
            "op": "c",
            "before": null,
            "after": { "CustomerID": id, "Email": email },
            "source": { "schema": "dbo", "table": "Customers" }
        }
    })
    .to_string()
}

/// In-memory feed that records what the consumer committed.
pub struct VecStream {
    records: VecDeque<StreamRecord>,
    pub committed: Arc<Mutex<Vec<Position>>>,
    stop_after: Option<(usize, Arc<AtomicBool>)>,
}

impl VecStream {
    pub fn new<I: IntoIterator<Item = String>>(payloads: I) -> Self {
        let records = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| StreamRecord {
                position: Position::Line(i as u64 + 1),
                payload: payload.into_bytes(),
            })
            .collect();
        VecStream {
            records,
            committed: Arc::new(Mutex::new(Vec::new())),
            stop_after: None,
        }
    }

    /// Raises `stop` as soon as `commits` positions have been committed.
    pub fn stopping_after(mut self, commits: usize, stop: Arc<AtomicBool>) -> Self {
        self.stop_after = Some((commits, stop));
        self
    }

    pub fn last_committed(&self) -> Option<Position> {
        self.committed.lock().unwrap().last().cloned()
    }
}

impl ChangeStream for VecStream {
    fn poll(&mut self, _timeout: Duration) -> cdc_reconcile::Result<Next> {
        Ok(match self.records.pop_front() {
            Some(record) => Next::Record(record),
            None => Next::Closed,
        })
    }

    fn commit(&mut self, position: &Position) -> cdc_reconcile::Result<()> {
        let mut committed = self.committed.lock().unwrap();
        committed.push(position.clone());
        if let Some((commits, stop)) = &self.stop_after {
            if committed.len() >= *commits {
                stop.store(true, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn format(&self) -> EventFormat {
        EventFormat::Debezium
    }
}

/// Memory target shared between applier threads.
#[derive(Clone, Default)]
pub struct SharedStore(pub Arc<Mutex<MemoryStore>>);

impl TargetStore for SharedStore {
    fn apply(&mut self, mutation: &Mutation) -> cdc_reconcile::Result<()> {
        self.0.lock().unwrap().apply(mutation)
    }
}

/// Target whose writes fail for a range of attempts, delegating to memory otherwise.
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub attempts: u32,
    fail_from: u32,
    fail_until: u32,
    transient: bool,
}

impl FlakyStore {
    /// The first `failures` attempts fail.
    pub fn new(failures: u32, transient: bool) -> Self {
        FlakyStore {
            inner: MemoryStore::new(),
            attempts: 0,
            fail_from: 1,
            fail_until: failures,
            transient,
        }
    }

    /// Accepts `successes` writes, then rejects everything permanently.
    pub fn broken_after(successes: u32) -> Self {
        FlakyStore {
            inner: MemoryStore::new(),
            attempts: 0,
            fail_from: successes + 1,
            fail_until: u32::MAX,
            transient: false,
        }
    }
}

impl TargetStore for FlakyStore {
    fn apply(&mut self, mutation: &Mutation) -> cdc_reconcile::Result<()> {
        self.attempts += 1;
        if (self.fail_from..=self.fail_until).contains(&self.attempts) {
            return Err(if self.transient {
                Error::StoreUnavailable("connection reset".into())
            } else {
                Error::Store("permission denied".into())
            });
        }
        self.inner.apply(mutation)
    }
}

pub struct TestDb {
    pub pool: Pool<PostgresConnectionManager<R2d2NoTls>>,
    pub dbname: String,
    pub admin_url: String,
}

/// Creates a throwaway database, or `None` when no server is configured.
pub fn setup_test_db() -> Option<TestDb> {
    let admin_url = std::env::var("CDC_RECONCILE_TEST_DB_URL").ok()?;
    let dbname = format!("test_db_{}", Uuid::new_v4().simple());
    let mut admin_client = postgres::Client::connect(&admin_url, postgres::NoTls).unwrap();
    admin_client
        .simple_query(&format!("CREATE DATABASE {dbname}"))
        .unwrap();
    let mut config: postgres::Config = admin_url.parse().unwrap();
    config.dbname(&dbname);
    let manager = PostgresConnectionManager::new(config, R2d2NoTls);
    let pool = Pool::builder().max_size(8).build(manager).unwrap();
    Some(TestDb {
        pool,
        dbname,
        admin_url,
    })
}

impl TestDb {
    pub fn get_client(
        &self,
    ) -> r2d2::PooledConnection<PostgresConnectionManager<R2d2NoTls>> {
        self.pool.get().unwrap()
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        let Ok(mut admin_client) = postgres::Client::connect(&self.admin_url, postgres::NoTls)
        else {
            return;
        };
        // Terminate all connections to the test DB before dropping
        let terminate_sql = format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = '{}' AND pid <> pg_backend_pid()",
            self.dbname
        );
        let _ = admin_client.simple_query(&terminate_sql);
        let _ = admin_client.simple_query(&format!("DROP DATABASE IF EXISTS {}", self.dbname));
    }
}
