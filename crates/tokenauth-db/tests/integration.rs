use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rusqlite::Connection;
use tempfile::TempDir;
use tokenauth_db::{
    hash_credential, run_migrations, ConnectionSettings, DatabaseServices, DatabaseSettings,
    DbError, LookupOutcome, PoolSettings, ReaderService, ReaderSettings, WriterService,
    WriterSettings,
};

fn db_path(dir: &TempDir) -> String {
    dir.path().join("users.db").to_str().unwrap().to_string()
}

fn small_settings() -> DatabaseSettings {
    DatabaseSettings {
        read_only: false,
        reader: ReaderSettings {
            connection: ConnectionSettings {
                max_open: 16,
                max_idle: 0,
                ..ReaderSettings::default().connection
            },
            pool: PoolSettings {
                capacity: 4,
                ..PoolSettings::default()
            },
            synthetic_bypass: false,
        },
        writer: WriterSettings::default(),
    }
}

fn row_count(path: &str) -> i64 {
    let conn = Connection::open(path).expect("failed to open raw connection");
    conn.query_row("SELECT COUNT(*) FROM user", [], |row| row.get(0))
        .expect("failed to count users")
}

#[test]
fn seed_three_then_lookup_example() {
    let dir = tempfile::tempdir().unwrap();
    let services = DatabaseServices::open(&db_path(&dir), small_settings())
        .expect("failed to open services");

    assert_eq!(services.seed(3).expect("seed failed"), 3);

    assert_eq!(
        services
            .lookup("user2@example.com", &hash_credential("password2"))
            .unwrap(),
        LookupOutcome::Found(2)
    );
    assert_eq!(
        services
            .lookup("user2@example.com", &hash_credential("wrongpass"))
            .unwrap(),
        LookupOutcome::NotFound
    );
    assert_eq!(
        services
            .lookup("user9@example.com", &hash_credential("password9"))
            .unwrap(),
        LookupOutcome::NotFound,
        "unknown identifiers are not errors"
    );

    services.close();
}

#[test]
fn every_seeded_record_can_be_looked_up() {
    let dir = tempfile::tempdir().unwrap();
    let services = DatabaseServices::open(&db_path(&dir), small_settings()).unwrap();
    services.seed(25).unwrap();

    for i in 1..=25 {
        let outcome = services
            .lookup(
                &format!("user{i}@example.com"),
                &hash_credential(&format!("password{i}")),
            )
            .unwrap();
        assert_eq!(outcome, LookupOutcome::Found(i));
    }
    assert_eq!(services.reader().stats().available, 4);
    assert_eq!(services.reader().stats().fallbacks_created, 0);
}

#[test]
fn reseed_fully_replaces_previous_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let services = DatabaseServices::open(&path, small_settings()).unwrap();

    services.seed(5).unwrap();
    services.seed(3).unwrap();

    assert_eq!(row_count(&path), 3);
    assert_eq!(
        services
            .lookup("user5@example.com", &hash_credential("password5"))
            .unwrap(),
        LookupOutcome::NotFound,
        "records from the earlier seed must be gone"
    );
    assert!(matches!(
        services
            .lookup("user3@example.com", &hash_credential("password3"))
            .unwrap(),
        LookupOutcome::Found(_)
    ));
}

#[test]
fn failed_late_insert_leaves_table_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let services = DatabaseServices::open(&path, small_settings()).unwrap();
    services.seed(4).unwrap();

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER fail_late_insert BEFORE INSERT ON user
         WHEN NEW.mail = 'user9@example.com'
         BEGIN SELECT RAISE(ABORT, 'injected failure'); END;",
    )
    .unwrap();

    let err = services.seed(10).expect_err("injected failure should abort the seed");
    assert!(!matches!(err, DbError::RetryExhausted { .. }), "not a contention error: {err}");

    assert_eq!(row_count(&path), 4, "prior rows must be untouched");
    assert_eq!(
        services
            .lookup("user4@example.com", &hash_credential("password4"))
            .unwrap(),
        LookupOutcome::Found(4)
    );
}

#[test]
fn held_write_lock_exhausts_seed_retries_then_clears() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let writer = WriterService::open(
        &path,
        WriterSettings {
            connection: ConnectionSettings {
                busy_timeout_ms: 0,
                ..WriterSettings::default().connection
            },
        },
    )
    .unwrap();
    writer.seed(2).unwrap();

    let blocker = Connection::open(&path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let err = writer.seed(5).expect_err("write lock is held elsewhere");
    match err {
        DbError::RetryExhausted {
            operation,
            attempts,
            source,
        } => {
            assert_eq!(operation, "seed");
            assert_eq!(attempts, 3);
            assert!(source.is_transient());
        }
        other => panic!("expected retry exhaustion, got {other:?}"),
    }

    blocker.execute_batch("COMMIT;").unwrap();
    assert_eq!(writer.seed(5).unwrap(), 5);
    assert_eq!(writer.user_count().unwrap(), 5);
}

#[test]
fn read_only_services_refuse_to_seed() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let writer = WriterService::open(&path, WriterSettings::default()).unwrap();
    writer.seed(2).unwrap();

    let services = DatabaseServices::open(
        &path,
        DatabaseSettings {
            read_only: true,
            ..small_settings()
        },
    )
    .unwrap();

    assert!(services.is_read_only());
    assert!(matches!(services.seed(1), Err(DbError::ReadOnly)));
    assert_eq!(
        services
            .lookup("user1@example.com", &hash_credential("password1"))
            .unwrap(),
        LookupOutcome::Found(1)
    );
}

#[test]
fn reader_startup_fails_without_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    Connection::open(&path)
        .unwrap()
        .execute_batch("CREATE TABLE unrelated (id INTEGER PRIMARY KEY);")
        .unwrap();

    let err = ReaderService::open(&path, small_settings().reader)
        .err()
        .expect("missing user table must abort startup");
    assert!(matches!(err, DbError::Sqlite(_)), "{err:?}");
}

#[test]
fn concurrent_lookups_beyond_pool_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let services = Arc::new(DatabaseServices::open(&db_path(&dir), small_settings()).unwrap());
    services.seed(20).unwrap();

    let workers: Vec<_> = (0..12)
        .map(|worker| {
            let services = Arc::clone(&services);
            thread::spawn(move || {
                for round in 0..20 {
                    let i = (worker + round) % 20 + 1;
                    let found = services
                        .lookup(
                            &format!("user{i}@example.com"),
                            &hash_credential(&format!("password{i}")),
                        )
                        .expect("lookup should not fail");
                    assert_eq!(found, LookupOutcome::Found(i as i64));

                    let missing = services
                        .lookup(&format!("user{i}@example.com"), "bad-hash")
                        .expect("lookup should not fail");
                    assert_eq!(missing, LookupOutcome::NotFound);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker should not panic");
    }

    let stats = services.reader().stats();
    assert_eq!(stats.available, stats.capacity, "no handle leaked");

    match Arc::try_unwrap(services) {
        Ok(services) => services.close(),
        Err(_) => panic!("all workers finished, services should be unique"),
    }
}

#[test]
fn lookups_continue_while_seed_is_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let services = DatabaseServices::open(&path, small_settings()).unwrap();
    services.seed(3).unwrap();

    // An uncommitted write transaction must not hide committed rows from
    // the WAL reader.
    let blocker = Connection::open(&path).unwrap();
    blocker
        .execute_batch("BEGIN IMMEDIATE; DELETE FROM user;")
        .unwrap();

    assert_eq!(
        services
            .lookup("user1@example.com", &hash_credential("password1"))
            .unwrap(),
        LookupOutcome::Found(1)
    );

    blocker.execute_batch("ROLLBACK;").unwrap();
    assert_eq!(row_count(&path), 3);
}

#[test]
fn exclusive_lock_exhausts_lookup_retries_without_leaking_handles() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);

    // Rollback-journal file: an EXCLUSIVE lock here shuts out readers, which
    // WAL mode would not.
    let blocker = Connection::open(&path).unwrap();
    run_migrations(&blocker).unwrap();
    blocker
        .execute(
            "INSERT INTO user (mail, hashed_password) VALUES (?1, ?2)",
            ["user1@example.com", hash_credential("password1").as_str()],
        )
        .unwrap();

    let reader = ReaderService::open(&path, small_settings().reader).unwrap();
    let hashed = hash_credential("password1");
    assert_eq!(
        reader.lookup("user1@example.com", &hashed).unwrap(),
        LookupOutcome::Found(1)
    );

    blocker
        .execute_batch("BEGIN EXCLUSIVE; UPDATE user SET mail = mail;")
        .unwrap();

    let started = Instant::now();
    let err = reader
        .lookup("user1@example.com", &hashed)
        .expect_err("readers cannot pass an exclusive lock");
    match err {
        DbError::RetryExhausted {
            operation,
            attempts,
            source,
        } => {
            assert_eq!(operation, "lookup");
            assert_eq!(attempts, 3);
            assert!(source.is_transient(), "{source:?}");
        }
        other => panic!("expected retry exhaustion, got {other:?}"),
    }
    // 10 ms after the first attempt, 20 ms after the second.
    assert!(started.elapsed() >= Duration::from_millis(30));

    let stats = reader.stats();
    assert_eq!(stats.available, stats.capacity, "handle must return on error");

    blocker.execute_batch("COMMIT;").unwrap();
    assert_eq!(
        reader.lookup("user1@example.com", &hashed).unwrap(),
        LookupOutcome::Found(1)
    );
    assert_eq!(reader.stats().available, reader.stats().capacity);
}
