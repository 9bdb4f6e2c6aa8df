//! Sequential append semantics for both concurrency strategies.

use std::sync::Arc;
use std::time::Duration;

use quota_ledger::lock::{LocalLockProvider, LockProvider};
use quota_ledger::{EnforcerConfig, QuotaEnforcer, QuotaSubject, Record, RecordStore};

fn setup() -> (tempfile::TempDir, Arc<RecordStore>, QuotaEnforcer) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(RecordStore::open(dir.path().to_path_buf()).expect("open store"));
    let enforcer =
        QuotaEnforcer::new(Arc::clone(&store), EnforcerConfig::default()).expect("enforcer");
    (dir, store, enforcer)
}

fn assert_limit_of_two(store: &RecordStore, enforcer: &QuotaEnforcer) {
    let first = Record::new("first", "u1", "2024-01-01");
    let second = Record::new("second", "u1", "2024-01-01");
    let third = Record::new("third", "u1", "2024-01-01");

    enforcer.append(&first, 2).expect("first append under limit");
    enforcer.append(&second, 2).expect("second append under limit");

    let err = enforcer.append(&third, 2).unwrap_err();
    assert!(err.is_quota_exceeded());

    let records = store.records_for("u1", "2024-01-01").unwrap();
    assert_eq!(records.len(), 2);

    // Rejection is stable: the same append keeps failing without inserting.
    let err = enforcer.append(&third, 2).unwrap_err();
    assert!(err.is_quota_exceeded());
    assert_eq!(store.records_for("u1", "2024-01-01").unwrap().len(), 2);
}

#[test]
fn test_limit_of_two_serializable() {
    let (_dir, store, enforcer) = setup();
    assert_limit_of_two(&store, &enforcer);
}

#[test]
fn test_limit_of_two_locked() {
    let (_dir, store, mut enforcer) = setup();
    enforcer.attach_lock_provider(Arc::new(LocalLockProvider::new()));
    assert_limit_of_two(&store, &enforcer);
}

#[test]
fn test_zero_limit_rejects_immediately() {
    let (_dir, store, enforcer) = setup();

    let record = Record::new("never", "u1", "2024-01-01");
    let err = enforcer.append(&record, 0).unwrap_err();
    assert!(err.is_quota_exceeded());
    assert!(store.records_for("u1", "2024-01-01").unwrap().is_empty());
}

#[test]
fn test_quota_counts_are_scoped_per_period() {
    let (_dir, store, enforcer) = setup();

    enforcer
        .append(&Record::new("a", "u1", "2024-01-01"), 1)
        .unwrap();
    enforcer
        .append(&Record::new("b", "u1", "2024-01-02"), 1)
        .unwrap();

    assert!(enforcer
        .append(&Record::new("c", "u1", "2024-01-01"), 1)
        .unwrap_err()
        .is_quota_exceeded());
    assert_eq!(store.records_for("u1", "2024-01-01").unwrap().len(), 1);
    assert_eq!(store.records_for("u1", "2024-01-02").unwrap().len(), 1);
}

#[test]
fn test_quota_counts_are_scoped_per_owner() {
    let (_dir, _store, enforcer) = setup();

    enforcer
        .append(&Record::new("a", "u1", "2024-01-01"), 1)
        .unwrap();
    enforcer
        .append(&Record::new("b", "u2", "2024-01-01"), 1)
        .unwrap();

    assert!(enforcer
        .append(&Record::new("c", "u1", "2024-01-01"), 1)
        .unwrap_err()
        .is_quota_exceeded());
}

#[test]
fn test_subject_limit_drives_enforcement() {
    let (_dir, store, enforcer) = setup();

    store
        .create_subject(&QuotaSubject {
            id: "u1".into(),
            secret: "hunter2".into(),
            record_limit: 1,
        })
        .unwrap();

    let limit = store.subject_limit("u1").unwrap();
    enforcer
        .append(&Record::new("a", "u1", "2024-01-01"), limit)
        .unwrap();
    assert!(enforcer
        .append(&Record::new("b", "u1", "2024-01-01"), limit)
        .unwrap_err()
        .is_quota_exceeded());
}

#[test]
fn test_mutex_released_after_quota_exceeded() {
    let (_dir, _store, mut enforcer) = setup();

    let provider = Arc::new(LocalLockProvider::with_timeout(Duration::from_millis(100)));
    enforcer.attach_lock_provider(Arc::clone(&provider) as Arc<dyn LockProvider>);

    let record = Record::new("never", "u1", "2024-01-01");
    assert!(enforcer.append(&record, 0).unwrap_err().is_quota_exceeded());

    // The owner's mutex must be free again for the next caller.
    let mut mutex = provider.new_mutex("u1").unwrap();
    mutex.lock().expect("mutex free after rejected append");
    mutex.unlock().unwrap();
}

#[test]
fn test_mutex_released_after_store_error() {
    let (_dir, store, mut enforcer) = setup();

    let provider = Arc::new(LocalLockProvider::with_timeout(Duration::from_millis(100)));
    enforcer.attach_lock_provider(Arc::clone(&provider) as Arc<dyn LockProvider>);

    let conn = store.connect().unwrap();
    conn.execute_batch("DROP TABLE records;").unwrap();

    let record = Record::new("task", "u1", "2024-01-01");
    let err = enforcer.append(&record, 5).unwrap_err();
    assert!(matches!(err, quota_ledger::QuotaError::Storage(_)));

    let mut mutex = provider.new_mutex("u1").unwrap();
    mutex.lock().expect("mutex free after failed append");
    mutex.unlock().unwrap();
}

#[test]
fn test_mutex_released_after_successful_append() {
    let (_dir, _store, mut enforcer) = setup();

    let provider = Arc::new(LocalLockProvider::with_timeout(Duration::from_millis(100)));
    enforcer.attach_lock_provider(Arc::clone(&provider) as Arc<dyn LockProvider>);

    enforcer
        .append(&Record::new("task", "u1", "2024-01-01"), 5)
        .unwrap();

    let mut mutex = provider.new_mutex("u1").unwrap();
    mutex.lock().expect("mutex free after successful append");
    mutex.unlock().unwrap();
}
