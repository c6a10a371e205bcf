use fedindex::core::broker::{self, BrokerEvent, DbBroker};
use fedindex::core::config::{self, EngineConfig};
use fedindex::core::db;
use fedindex::core::error::FederationError;
use fedindex::core::pool;
use fedindex::core::schemas;
use fedindex::core::store::Store;
use fedindex::core::time::{self, CancelToken, Clock, Deadline, ManualClock};
use rusqlite::params;
use std::fs;
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn scratch_db(store: &Store, name: &str) -> DbBroker {
    fs::create_dir_all(store.federation_dir(name)).expect("federation dir");
    DbBroker::new(store, name)
}

#[test]
fn store_layout_is_rooted_at_home() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::new(tmp.path());

    assert_eq!(store.config_path(), tmp.path().join("config.toml"));
    assert_eq!(
        store.federation_db_path("platform"),
        tmp.path().join("federations").join("platform").join("index.db")
    );
    assert_eq!(
        store.federation_events_path("platform"),
        tmp.path()
            .join("federations")
            .join("platform")
            .join("federation.events.jsonl")
    );
    assert!(!store.federation_exists("platform"));
}

#[test]
fn config_file_is_optional_and_validated() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::new(tmp.path());
    assert_eq!(config::load_config(&store).expect("defaults"), EngineConfig::default());

    fs::write(
        store.config_path(),
        "[sync]\nworkers = 2\n\n[remote]\ndefault_cache_ttl_secs = 600\nworkers = 8\n",
    )
    .expect("write config");
    let cfg = config::load_config(&store).expect("load");
    assert_eq!(cfg.sync.workers, 2);
    assert_eq!(cfg.remote.default_cache_ttl_secs, 600);
    assert_eq!(cfg.remote.workers, 8);
    assert_eq!(cfg.remote.default_timeout(), Duration::from_secs(30));
    assert_eq!(cfg.query.hotspot_min_score, 0.3);

    fs::write(store.config_path(), "[remote]\ndefault_cache_ttl_secs = 0\n").expect("write config");
    assert!(matches!(
        config::load_config(&store),
        Err(FederationError::ConfigError(_))
    ));
}

#[test]
fn write_connections_enforce_foreign_keys_and_wal() {
    let tmp = tempdir().expect("tempdir");
    let db_path = tmp.path().join("index.db");
    let conn = db::db_connect(&db_path, 5).expect("db connect");

    let fk_on: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .expect("pragma foreign_keys");
    assert_eq!(fk_on, 1);
    let mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .expect("pragma journal_mode");
    assert_eq!(mode.to_lowercase(), "wal");

    let readonly = db::db_connect_readonly(&db_path).expect("readonly");
    assert!(readonly.execute("CREATE TABLE t(x INTEGER)", []).is_err());
}

#[test]
fn broker_round_trip_and_audit() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::new(tmp.path());
    let broker = scratch_db(&store, "scratch");

    broker
        .with_write("tester", "scratch.insert", |conn| {
            conn.execute_batch("CREATE TABLE IF NOT EXISTS items (id INTEGER PRIMARY KEY, label TEXT)")?;
            conn.execute("INSERT INTO items(label) VALUES (?1)", params!["first"])?;
            Ok(())
        })
        .expect("broker success path");

    let result: Result<(), FederationError> = broker.with_write("tester", "scratch.fail", |_| {
        Err(FederationError::ValidationError("intentional".to_string()))
    });
    assert!(result.is_err());

    let label: String = broker
        .with_read(|conn| Ok(conn.query_row("SELECT label FROM items", [], |row| row.get(0))?))
        .expect("read back");
    assert_eq!(label, "first");

    let events: Vec<BrokerEvent> = broker::read_audit_log(&store, "scratch").expect("audit log");
    let summary: Vec<(&str, &str)> = events
        .iter()
        .map(|ev| (ev.op.as_str(), ev.status.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![("scratch.insert", "success"), ("scratch.fail", "error")]
    );
    assert!(events.iter().all(|ev| ev.actor == "tester" && ev.db_id == "scratch"));
    assert!(events.iter().all(|ev| ulid::Ulid::from_string(&ev.event_id).is_ok()));
    assert!(broker::read_audit_log(&store, "missing").expect("empty").is_empty());
}

#[test]
fn writes_to_one_database_are_serialized() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::new(tmp.path());
    let broker = Arc::new(scratch_db(&store, "serial"));
    broker
        .with_write("tester", "init", |conn| {
            conn.execute_batch("CREATE TABLE counter (n INTEGER); INSERT INTO counter VALUES (0);")?;
            Ok(())
        })
        .expect("init");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let b = Arc::clone(&broker);
            std::thread::spawn(move || {
                b.with_write("tester", "bump", |conn| {
                    let n: i64 = conn.query_row("SELECT n FROM counter", [], |row| row.get(0))?;
                    std::thread::sleep(Duration::from_millis(5));
                    conn.execute("UPDATE counter SET n = ?1", [n + 1])?;
                    Ok(())
                })
            })
        })
        .collect();
    for h in handles {
        h.join().expect("join").expect("bump");
    }

    let n: i64 = broker
        .with_read(|conn| Ok(conn.query_row("SELECT n FROM counter", [], |row| row.get(0))?))
        .expect("read");
    assert_eq!(n, 8);
}

#[test]
fn concurrent_writers_keep_the_audit_log_line_per_event() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::new(tmp.path());
    let broker = Arc::new(scratch_db(&store, "busy"));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let b = Arc::clone(&broker);
            std::thread::spawn(move || {
                for i in 0..100 {
                    b.with_write(&format!("writer-{}", t), &format!("op.{}.{}", t, i), |_| Ok(()))
                        .expect("write");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("join");
    }

    let events = broker::read_audit_log(&store, "busy").expect("every line parses");
    assert_eq!(events.len(), 800);
    for t in 0..8 {
        let actor = format!("writer-{}", t);
        assert_eq!(events.iter().filter(|ev| ev.actor == actor).count(), 100);
    }
}

#[test]
fn audit_failure_does_not_fail_a_committed_write() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::new(tmp.path());
    let broker = scratch_db(&store, "noaudit");
    // a directory where the log file should be makes every append fail
    fs::create_dir_all(store.federation_events_path("noaudit")).expect("block audit log");

    broker
        .with_write("tester", "scratch.insert", |conn| {
            conn.execute_batch("CREATE TABLE items (label TEXT); INSERT INTO items VALUES ('kept');")?;
            Ok(())
        })
        .expect("write succeeds without audit");
    let label: String = broker
        .with_read(|conn| Ok(conn.query_row("SELECT label FROM items", [], |row| row.get(0))?))
        .expect("read back");
    assert_eq!(label, "kept");
}

#[test]
fn writes_to_different_databases_run_in_parallel() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::new(tmp.path());
    let broker_a = scratch_db(&store, "a");
    let broker_b = scratch_db(&store, "b");
    let barrier = Arc::new(Barrier::new(3));

    let gate1 = Arc::clone(&barrier);
    let h1 = std::thread::spawn(move || {
        broker_a.with_write("tester", "parallel.a", |conn| {
            conn.execute("CREATE TABLE IF NOT EXISTS t (id INTEGER)", [])?;
            gate1.wait();
            std::thread::sleep(Duration::from_millis(150));
            Ok(())
        })
    });
    let gate2 = Arc::clone(&barrier);
    let h2 = std::thread::spawn(move || {
        broker_b.with_write("tester", "parallel.b", |conn| {
            conn.execute("CREATE TABLE IF NOT EXISTS t (id INTEGER)", [])?;
            gate2.wait();
            std::thread::sleep(Duration::from_millis(150));
            Ok(())
        })
    });

    barrier.wait();
    let started = Instant::now();
    h1.join().expect("join a").expect("write a");
    h2.join().expect("join b").expect("write b");
    assert!(started.elapsed() < Duration::from_millis(280));
}

#[test]
fn exclusive_section_blocks_writers() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::new(tmp.path());
    let broker = scratch_db(&store, "locked");
    let db_path = broker.db_path().to_path_buf();

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let entered = Arc::new(Barrier::new(2));
    let (o1, e1, path) = (Arc::clone(&order), Arc::clone(&entered), db_path.clone());
    let holder = std::thread::spawn(move || {
        pool::global_pool().with_exclusive(&path, || {
            e1.wait();
            std::thread::sleep(Duration::from_millis(100));
            o1.lock().expect("order").push("exclusive");
            Ok(())
        })
    });

    entered.wait();
    broker
        .with_write("tester", "after", |_| {
            order.lock().expect("order").push("write");
            Ok(())
        })
        .expect("write");
    holder.join().expect("join").expect("exclusive");
    assert_eq!(*order.lock().expect("order"), vec!["exclusive", "write"]);
}

#[test]
fn schema_description_lists_every_table() {
    let schema = schemas::schema();
    assert_eq!(schema["name"], "federation");
    assert_eq!(schema["analysis_versions"]["current"], 6);

    let conn = rusqlite::Connection::open_in_memory().expect("memory db");
    for ddl in schemas::federation_schema() {
        conn.execute_batch(ddl).expect("ddl");
    }
    conn.execute_batch(schemas::FEDERATION_DB_INDEXES).expect("indexes");
    for table in schema["tables"].as_array().expect("tables") {
        assert!(db::table_exists(&conn, table.as_str().expect("name")).expect("table lookup"));
    }
}

#[test]
fn clocks_and_deadlines() {
    let clock = ManualClock::new(1_000);
    let shared = clock.clone();
    shared.advance(30);
    assert_eq!(clock.now(), 1_030);
    clock.set(5);
    assert_eq!(shared.now(), 5);

    let wall = time::SystemClock.now();
    assert!((wall - time::now_epoch()).abs() <= 1);
    assert!(time::now_epoch_z().ends_with('Z'));

    let cancel = CancelToken::new();
    let deadline = Deadline::after(Duration::from_secs(60), cancel.clone());
    assert_eq!(deadline.stop_reason(), None);
    assert!(deadline.remaining() > Duration::from_secs(50));
    cancel.cancel();
    assert_eq!(deadline.stop_reason(), Some("cancelled"));

    let expired = Deadline::after(Duration::ZERO, CancelToken::new());
    assert!(expired.stop_reason().is_some());
    assert_eq!(expired.remaining(), Duration::ZERO);

    assert_eq!(time::format_age(100, None), "never");
}
