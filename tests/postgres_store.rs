// Live PostgreSQL tests; skipped unless CDC_RECONCILE_TEST_DB_URL is set.

mod common;

use cdc_reconcile::store::{CountStrategy, Mutation, PgStore, ReadSession, ReadStore, TargetStore};
use cdc_reconcile::{Applier, Outcome, ReconcileOptions, Reconciler, Value};
use common::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serial_test::serial;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

fn setup_orders(db: &TestDb) {
    let mut client = db.get_client();
    client
        .batch_execute(
            r#"
            CREATE SCHEMA dbo;
            CREATE TABLE dbo."Orders" (
                "OrderID" INT PRIMARY KEY,
                "TotalAmount" NUMERIC(12, 2),
                "Status" VARCHAR(20),
                "RowVersion" INT
            );
            CREATE TABLE public.orders (
                order_id BIGINT PRIMARY KEY,
                total_amount NUMERIC(12, 2),
                status TEXT
            );
            "#,
        )
        .unwrap();
}

fn upsert(id: i64, total: f64, status: &str) -> Mutation {
    Mutation::Upsert {
        table: target_orders(),
        key_column: "order_id".into(),
        key: Value::Int(id),
        columns: vec!["order_id".into(), "total_amount".into(), "status".into()],
        values: vec![Value::Int(id), Value::Float(total), Value::Text(status.into())],
    }
}

#[test]
#[serial]
fn test_upsert_and_delete_are_idempotent() {
    let Some(db) = setup_test_db() else { return };
    setup_orders(&db);
    let mut store = PgStore::new(db.pool.clone());
    store.apply(&upsert(1, 100.0, "new")).unwrap();
    store.apply(&upsert(1, 150.0, "paid")).unwrap();
    store.apply(&upsert(1, 150.0, "paid")).unwrap();
    let mut session = store.session().unwrap();
    assert_eq!(session.count_rows(&target_orders(), CountStrategy::Exact).unwrap(), 1);
    let stats = session.aggregate(&target_orders(), "total_amount").unwrap();
    assert_eq!(stats.sum, 150.0);
    assert_eq!(stats.max, 150.0);
    drop(session);

    let delete = Mutation::Delete {
        table: target_orders(),
        key_column: "order_id".into(),
        key: Value::Int(1),
    };
    store.apply(&delete).unwrap();
    store.apply(&delete).unwrap();
    let mut session = store.session().unwrap();
    assert_eq!(session.count_rows(&target_orders(), CountStrategy::Exact).unwrap(), 0);
}

#[test]
#[serial]
fn test_session_reads_typed_rows() {
    let Some(db) = setup_test_db() else { return };
    setup_orders(&db);
    let mut store = PgStore::new(db.pool.clone());
    store.apply(&upsert(2, 20.5, "new")).unwrap();
    store.apply(&upsert(1, 10.0, "paid")).unwrap();
    let mut session = store.session().unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let mut keys = session
        .sample_keys(&target_orders(), "order_id", 10, &mut rng)
        .unwrap();
    keys.sort_by_key(|k| k.to_string());
    assert_eq!(keys, vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(
        session
            .sample_keys(&target_orders(), "order_id", 1, &mut rng)
            .unwrap()
            .len(),
        1
    );
    let columns = vec!["total_amount".to_string(), "status".to_string()];
    assert_eq!(
        session
            .fetch_row(&target_orders(), "order_id", &Value::Int(2), &columns)
            .unwrap(),
        Some(vec![Value::Float(20.5), Value::Text("new".into())])
    );
    assert_eq!(
        session
            .fetch_row(&target_orders(), "order_id", &Value::Int(9), &columns)
            .unwrap(),
        None
    );
}

#[test]
#[serial]
fn test_apply_then_reconcile_against_postgres() {
    let Some(db) = setup_test_db() else { return };
    setup_orders(&db);
    db.get_client()
        .batch_execute(
            r#"INSERT INTO dbo."Orders" VALUES (1, 150.00, 'paid', 7), (3, 30.00, 'new', 7)"#,
        )
        .unwrap();
    let feed = VecStream::new(vec![
        create(1, 100.0),
        update(1, 150.0),
        create(2, 20.0),
        create(3, 30.0),
        delete(2),
    ]);
    let target = PgStore::new(db.pool.clone());
    let mut applier = Applier::new(registry(), feed, target);
    let stats = applier.run(&AtomicBool::new(false)).unwrap();
    assert_eq!(stats.applied, 5);

    let source = PgStore::new(db.pool.clone());
    let registry = registry();
    let options = ReconcileOptions {
        seed: Some(1),
        ..Default::default()
    };
    let report = Reconciler::new(&registry, &source, applier.target())
        .with_options(options)
        .run(&AtomicBool::new(false))
        .unwrap();
    assert_eq!(report.row_counts[0].target_count, 2);
    assert_eq!(report.samples.len(), 2);
    assert_eq!(report.outcome, Outcome::Passed, "{:?}", report.mismatches());
}

#[test]
#[serial]
fn test_statistics_count_after_analyze() {
    let Some(db) = setup_test_db() else { return };
    setup_orders(&db);
    let mut store = PgStore::new(db.pool.clone());
    for id in 1..=3 {
        store.apply(&upsert(id, id as f64, "new")).unwrap();
    }
    // statistics lag behind committed writes until they are flushed and analyzed
    let deadline = Instant::now() + Duration::from_secs(15);
    let estimate = loop {
        db.get_client().batch_execute("ANALYZE public.orders").unwrap();
        let estimate = store
            .session()
            .unwrap()
            .count_rows(&target_orders(), CountStrategy::Statistics)
            .unwrap();
        if estimate == 3 || Instant::now() > deadline {
            break estimate;
        }
        std::thread::sleep(Duration::from_millis(250));
    };
    assert_eq!(estimate, 3);
    let mut session = store.session().unwrap();
    assert_eq!(session.count_rows(&target_orders(), CountStrategy::Exact).unwrap(), 3);
}

#[test]
#[serial]
fn test_statistics_count_for_unknown_table_is_an_error() {
    let Some(db) = setup_test_db() else { return };
    let store = PgStore::new(db.pool.clone());
    let mut session = store.session().unwrap();
    let missing: cdc_reconcile::Table = "public.nowhere".parse().unwrap();
    assert!(session.count_rows(&missing, CountStrategy::Statistics).is_err());
}
