use async_trait::async_trait;
use glossd::core::GlossdError;
use glossd::core::db::{ConnectionPool, DbBinding, ManagedConnection};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Shared knobs and counters for the mock connection factory.
#[derive(Clone, Default)]
struct MockSettings {
    established: Arc<AtomicUsize>,
    probes: Arc<AtomicUsize>,
    fail_establish: Arc<AtomicBool>,
    probe_ok: Arc<AtomicBool>,
}

impl MockSettings {
    fn new() -> Self {
        let settings = Self::default();
        settings.probe_ok.store(true, Ordering::SeqCst);
        settings
    }
}

struct MockConn {
    settings: MockSettings,
}

#[async_trait]
impl ManagedConnection for MockConn {
    type Settings = MockSettings;

    async fn establish(settings: &MockSettings) -> Result<Self, GlossdError> {
        if settings.fail_establish.load(Ordering::SeqCst) {
            return Err(GlossdError::Database("mock connect refused".to_string()));
        }
        settings.established.fetch_add(1, Ordering::SeqCst);
        Ok(MockConn {
            settings: settings.clone(),
        })
    }

    async fn probe(&mut self) -> bool {
        self.settings.probes.fetch_add(1, Ordering::SeqCst);
        self.settings.probe_ok.load(Ordering::SeqCst)
    }

    async fn close(self) {}
}

#[tokio::test]
async fn test_bootstrap_creates_exactly_max_size_connections() {
    let settings = MockSettings::new();
    let pool = ConnectionPool::<MockConn>::bootstrap(settings.clone(), 3)
        .await
        .unwrap();

    assert_eq!(pool.max_size(), 3);
    assert_eq!(pool.idle_count(), 3);
    assert_eq!(settings.established.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_bootstrap_failure_is_fatal() {
    let settings = MockSettings::new();
    settings.fail_establish.store(true, Ordering::SeqCst);
    let result = ConnectionPool::<MockConn>::bootstrap(settings, 2).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_invariant_holds_across_acquire_release_sequences() {
    let settings = MockSettings::new();
    let pool = ConnectionPool::<MockConn>::bootstrap(settings.clone(), 3)
        .await
        .unwrap();

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    // idle + loaned == 3 at every stable point.
    assert_eq!(pool.idle_count(), 1);

    pool.release(a).await.unwrap();
    assert_eq!(pool.idle_count(), 2);

    pool.release(b).await.unwrap();
    assert_eq!(pool.idle_count(), 3);
    // No connections were created beyond the initial three.
    assert_eq!(settings.established.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_acquire_blocks_until_release() {
    let settings = MockSettings::new();
    let pool = ConnectionPool::<MockConn>::bootstrap(settings, 1)
        .await
        .unwrap();

    let held = pool.acquire().await.unwrap();

    let pool_clone = pool.clone();
    let waiter = tokio::spawn(async move {
        let conn = pool_clone.acquire().await.unwrap();
        pool_clone.release(conn).await.unwrap();
    });

    // The waiter cannot proceed while the only connection is loaned out.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    pool.release(held).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter must be woken by the release")
        .unwrap();
}

#[tokio::test]
async fn test_unhealthy_release_destroys_and_replaces() {
    let settings = MockSettings::new();
    let pool = ConnectionPool::<MockConn>::bootstrap(settings.clone(), 2)
        .await
        .unwrap();

    let mut conn = pool.acquire().await.unwrap();
    conn.mark_unhealthy();
    pool.release(conn).await.unwrap();

    // The dead connection was replaced, preserving pool size.
    assert_eq!(pool.idle_count(), 2);
    assert_eq!(settings.established.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_dropped_guard_returns_connection_and_forces_probe() {
    let settings = MockSettings::new();
    let pool = ConnectionPool::<MockConn>::bootstrap(settings.clone(), 1)
        .await
        .unwrap();

    let conn = pool.acquire().await.unwrap();
    assert_eq!(pool.idle_count(), 0);
    drop(conn);
    assert_eq!(pool.idle_count(), 1);

    let probes_before = settings.probes.load(Ordering::SeqCst);
    let conn = pool.acquire().await.unwrap();
    assert!(
        settings.probes.load(Ordering::SeqCst) > probes_before,
        "a connection returned by drop must be probed before reuse"
    );
    pool.release(conn).await.unwrap();
}

#[tokio::test]
async fn test_failed_probe_on_acquire_creates_replacement() {
    let settings = MockSettings::new();
    let pool = ConnectionPool::<MockConn>::bootstrap(settings.clone(), 1)
        .await
        .unwrap();

    // Return a connection through the drop path so the next acquire probes
    // it, and make that probe fail.
    let conn = pool.acquire().await.unwrap();
    drop(conn);
    settings.probe_ok.store(false, Ordering::SeqCst);

    let conn = pool.acquire().await.unwrap();
    assert!(conn.is_healthy());
    // bootstrap + replacement.
    assert_eq!(settings.established.load(Ordering::SeqCst), 2);
    pool.release(conn).await.unwrap();
    assert_eq!(pool.idle_count(), 1);
}

#[tokio::test]
async fn test_replacement_failure_propagates_then_heals() {
    let settings = MockSettings::new();
    let pool = ConnectionPool::<MockConn>::bootstrap(settings.clone(), 1)
        .await
        .unwrap();

    let mut conn = pool.acquire().await.unwrap();
    conn.mark_unhealthy();
    settings.fail_establish.store(true, Ordering::SeqCst);

    // Destroy-and-replace cannot create the replacement: the error reaches
    // the caller and the pool runs one short.
    assert!(pool.release(conn).await.is_err());
    assert_eq!(pool.idle_count(), 0);

    // Once the backend recovers, the next acquire heals the deficit.
    settings.fail_establish.store(false, Ordering::SeqCst);
    let conn = tokio::time::timeout(Duration::from_secs(1), pool.acquire())
        .await
        .expect("acquire must not block while a deficit is healable")
        .unwrap();
    pool.release(conn).await.unwrap();
    assert_eq!(pool.idle_count(), 1);
}

#[tokio::test]
async fn test_binding_reuses_cached_connection() {
    let settings = MockSettings::new();
    let pool = ConnectionPool::<MockConn>::bootstrap(settings.clone(), 2)
        .await
        .unwrap();

    let mut binding = DbBinding::new(pool.clone());
    binding.connection().await.unwrap();
    assert_eq!(pool.idle_count(), 1);

    // Consecutive uses do not round-trip through the pool.
    binding.connection().await.unwrap();
    binding.connection().await.unwrap();
    assert_eq!(pool.idle_count(), 1);
    assert_eq!(settings.established.load(Ordering::SeqCst), 2);

    binding.release().await;
    assert_eq!(pool.idle_count(), 2);
}

#[tokio::test]
async fn test_poisoned_binding_swaps_its_connection() {
    let settings = MockSettings::new();
    let pool = ConnectionPool::<MockConn>::bootstrap(settings.clone(), 2)
        .await
        .unwrap();

    let mut binding = DbBinding::new(pool.clone());
    binding.connection().await.unwrap();
    binding.poison();

    // The poisoned connection goes back for replacement; the binding picks
    // up a different one.
    binding.connection().await.unwrap();
    assert_eq!(pool.idle_count(), 1);
    assert_eq!(
        settings.established.load(Ordering::SeqCst),
        3,
        "poisoned connection must be destroyed and replaced"
    );

    binding.release().await;
    assert_eq!(pool.idle_count(), 2);
}
