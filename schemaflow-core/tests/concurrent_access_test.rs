//! Concurrent batch tests
//!
//! A batch holds an exclusive advisory lock for its whole run. A second
//! batch against the same database must fail fast with
//! `ConcurrentRunDetected` instead of interleaving with the first.
//!
//! Run with: cargo test --test concurrent_access_test -- --nocapture

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use schemaflow_core::adapters::duckdb::Store;
use schemaflow_core::domain::{ChangeUnit, ColumnSpec, ColumnType, Namespace, Operation, UnitSet};
use schemaflow_core::services::{BatchLock, RunOptions, Runner};

/// Number of threads racing for the batch lock
const THREAD_COUNT: usize = 4;

/// Database path handed to the helper process that holds the store open
const HOLDER_DB_ENV: &str = "SCHEMAFLOW_TEST_HOLDER_DB";

/// How long either side waits for the other before giving up
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

fn units() -> UnitSet {
    UnitSet::new(
        Namespace::Migrations,
        vec![ChangeUnit::reversible(
            "20211109123054-conseiller",
            Operation::create_table(
                "conseiller",
                vec![ColumnSpec::new("id", ColumnType::Varchar(None)).primary_key()],
            ),
        )
        .unwrap()],
    )
    .unwrap()
}

/// Test: a held lock on `<database>.lock` blocks a batch, and the ledger
/// is never touched
#[test]
fn test_held_lock_rejects_batch() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("app.duckdb");
    let store = Store::open(&db_path).unwrap();
    let units = units();
    let runner = Runner::new(&store, &units, RunOptions::default());

    let lock_path = store.default_lock_path().unwrap();
    assert_eq!(lock_path, temp_dir.path().join("app.duckdb.lock"));

    let held = BatchLock::acquire(&lock_path).unwrap();
    let err = runner.up(None).unwrap_err();
    assert_eq!(err.kind(), "ConcurrentRunDetected");
    assert!(err.to_string().contains("app.duckdb.lock"));
    assert!(!store.table_exists("schema_migrations").unwrap());
    assert!(!store.table_exists("conseiller").unwrap());

    // Status only reads, so it does not need the lock
    assert_eq!(runner.status().unwrap().pending.len(), 1);

    drop(held);
    assert_eq!(runner.up(None).unwrap().units.len(), 1);
}

/// Test: the lock is released when a batch fails
#[test]
fn test_lock_released_after_failure() {
    let temp_dir = TempDir::new().unwrap();
    let store = Store::open(&temp_dir.path().join("app.duckdb")).unwrap();
    let failing = UnitSet::new(
        Namespace::Migrations,
        vec![ChangeUnit::irreversible(
            "001-bad",
            Operation::raw_sql("INSERT INTO nowhere VALUES (1)", vec![]),
        )],
    )
    .unwrap();

    let runner = Runner::new(&store, &failing, RunOptions::default());
    assert_eq!(runner.up(None).unwrap_err().kind(), "ExecutionFailure");

    let lock_path = store.default_lock_path().unwrap();
    assert!(BatchLock::acquire(&lock_path).is_ok());
}

/// Test: an explicit lock path overrides the default
#[test]
fn test_configured_lock_path() {
    let temp_dir = TempDir::new().unwrap();
    let store = Store::open(&temp_dir.path().join("app.duckdb")).unwrap();
    let units = units();
    let custom = temp_dir.path().join("deploy.lock");

    let _held = BatchLock::acquire(&custom).unwrap();

    let runner = Runner::new(
        &store,
        &units,
        RunOptions::default().lock_path(Some(custom.clone())),
    );
    assert_eq!(runner.up(None).unwrap_err().kind(), "ConcurrentRunDetected");

    // The default path is free, so a runner using it proceeds
    let other = Runner::new(&store, &units, RunOptions::default());
    assert!(other.up(None).is_ok());
}

/// Test: threads racing for the same lock file; at most one holds it at a time
///
/// Every thread either acquires the lock or sees `ConcurrentRunDetected`;
/// no other error is acceptable.
#[test]
fn test_racing_lock_acquisitions() {
    let temp_dir = TempDir::new().unwrap();
    let lock_path = Arc::new(temp_dir.path().join("race.lock"));
    let barrier = Arc::new(Barrier::new(THREAD_COUNT));
    let holders = Arc::new(Barrier::new(THREAD_COUNT));

    let mut handles = vec![];
    for _ in 0..THREAD_COUNT {
        let lock_path = Arc::clone(&lock_path);
        let barrier = Arc::clone(&barrier);
        let holders = Arc::clone(&holders);

        handles.push(thread::spawn(move || {
            barrier.wait();
            let result = BatchLock::acquire(&lock_path);
            // Keep any acquired lock until every thread has tried
            holders.wait();
            match result {
                Ok(_lock) => Ok(()),
                Err(e) => Err(e.kind()),
            }
        }));
    }

    let mut acquired = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(()) => acquired += 1,
            Err(kind) => assert_eq!(kind, "ConcurrentRunDetected"),
        }
    }

    assert_eq!(acquired, 1, "exactly one thread should hold the lock");
}

fn marker(db_path: &Path, suffix: &str) -> PathBuf {
    let mut name = db_path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn wait_for(path: &Path) -> bool {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() > HANDSHAKE_TIMEOUT {
            return false;
        }
        thread::sleep(Duration::from_millis(20));
    }
    true
}

/// Helper run in a child process: keeps the database open until released
#[test]
#[ignore]
fn hold_store_open_until_released() {
    let Some(db_path) = env::var_os(HOLDER_DB_ENV).map(PathBuf::from) else {
        return;
    };
    let _store = Store::open(&db_path).unwrap();
    std::fs::write(marker(&db_path, ".ready"), b"").unwrap();
    assert!(wait_for(&marker(&db_path, ".release")));
}

/// Test: another process holding the database makes `Store::open` fail
/// with `ConcurrentRunDetected` once the retries run out
#[test]
fn test_store_held_by_other_process() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("app.duckdb");

    let mut holder = Command::new(env::current_exe().unwrap())
        .args(["hold_store_open_until_released", "--exact", "--ignored", "--nocapture"])
        .env(HOLDER_DB_ENV, &db_path)
        .spawn()
        .unwrap();
    assert!(wait_for(&marker(&db_path, ".ready")), "holder never opened the store");

    let err = Store::open(&db_path).err().unwrap();
    assert_eq!(err.kind(), "ConcurrentRunDetected");
    assert!(err.to_string().contains("app.duckdb"));

    std::fs::write(marker(&db_path, ".release"), b"").unwrap();
    assert!(holder.wait().unwrap().success());

    let store = Store::open(&db_path).unwrap();
    assert_eq!(Runner::new(&store, &units(), RunOptions::default()).up(None).unwrap().units.len(), 1);
}
