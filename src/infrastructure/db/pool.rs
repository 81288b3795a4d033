//! Bounded connection pool
//!
//! Invariant: `idle + in_use <= max` at every point. A connection is only
//! created while its acquirer holds one of the `max` semaphore permits and
//! the idle queue is empty. Leases return their connection on drop, so every
//! exit path (success, error, timeout, cancellation, panic) releases exactly
//! once. Broken connections are discarded on release and replaced lazily by
//! the next acquire.

use super::{ConnectionFactory, SqlConnection};
use crate::domain::error::{DbFailure, PoolError};
use crate::domain::query::QueryResult;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub min_connections: usize,
    pub max_connections: usize,
    /// Default wait for a free slot, used by [`ConnectionPool::acquire_default`].
    pub acquire_timeout: Duration,
    pub connect_timeout: Duration,
    /// Extra attempts after the first failed connect on acquire.
    pub connect_retries: u32,
    /// Linear backoff step between connect attempts.
    pub retry_backoff: Duration,
    pub health_check_on_acquire: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            acquire_timeout: Duration::from_millis(5000),
            connect_timeout: Duration::from_millis(10000),
            connect_retries: 3,
            retry_backoff: Duration::from_millis(200),
            health_check_on_acquire: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSize {
    pub idle: usize,
    pub in_use: usize,
    pub max: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub in_use: usize,
    pub max: usize,
    pub total_acquired: u64,
    pub total_released: u64,
    pub total_created: u64,
    pub total_discarded: u64,
}

struct Slots {
    idle: VecDeque<Box<dyn SqlConnection>>,
    in_use: usize,
}

struct PoolInner {
    factory: Arc<dyn ConnectionFactory>,
    settings: PoolSettings,
    permits: Arc<Semaphore>,
    slots: Mutex<Slots>,
    closed: AtomicBool,
    total_acquired: AtomicU64,
    total_released: AtomicU64,
    total_created: AtomicU64,
    total_discarded: AtomicU64,
}

impl PoolInner {
    fn slots(&self) -> MutexGuard<'_, Slots> {
        // Slot bookkeeping stays consistent even if a holder panicked
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn give_back(&self, conn: Box<dyn SqlConnection>, broken: bool) {
        self.total_released.fetch_add(1, Ordering::Relaxed);

        let discarded = {
            let mut slots = self.slots();
            slots.in_use = slots.in_use.saturating_sub(1);
            if broken || self.closed.load(Ordering::Acquire) {
                Some(conn)
            } else {
                slots.idle.push_back(conn);
                None
            }
        };

        if let Some(conn) = discarded {
            self.total_discarded.fetch_add(1, Ordering::Relaxed);
            if broken {
                debug!("Discarded broken connection; a replacement is created on demand");
            }
            drop(conn);
        }
    }
}

/// Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Build the pool and open `max(min_connections, 1)` connections up front.
    /// Fails fast (no retries) when the first connection cannot be opened.
    pub async fn connect(
        factory: Arc<dyn ConnectionFactory>,
        settings: PoolSettings,
    ) -> Result<Self, PoolError> {
        let mut settings = settings;
        settings.max_connections = settings.max_connections.max(1);
        settings.min_connections = settings.min_connections.min(settings.max_connections);

        let inner = Arc::new(PoolInner {
            factory,
            permits: Arc::new(Semaphore::new(settings.max_connections)),
            slots: Mutex::new(Slots {
                idle: VecDeque::with_capacity(settings.max_connections),
                in_use: 0,
            }),
            settings,
            closed: AtomicBool::new(false),
            total_acquired: AtomicU64::new(0),
            total_released: AtomicU64::new(0),
            total_created: AtomicU64::new(0),
            total_discarded: AtomicU64::new(0),
        });
        let pool = Self { inner };

        let warm = pool.inner.settings.min_connections.max(1);
        for _ in 0..warm {
            let conn = pool.open_once().await.map_err(|e| {
                PoolError::Unavailable(format!(
                    "initial connection to {} failed: {}",
                    pool.inner.factory.describe(),
                    e
                ))
            })?;
            pool.inner.slots().idle.push_back(conn);
        }

        info!(
            database = %pool.inner.factory.describe(),
            warm,
            max = pool.inner.settings.max_connections,
            "Connection pool ready"
        );

        Ok(pool)
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    pub async fn acquire_default(&self) -> Result<Lease, PoolError> {
        self.acquire(self.inner.settings.acquire_timeout).await
    }

    /// Wait up to `timeout` for a free slot. Returns `Exhausted` when none
    /// frees up in time.
    pub async fn acquire(&self, timeout: Duration) -> Result<Lease, PoolError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let permit = match tokio::time::timeout(timeout, self.inner.permits.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Connection pool exhausted"
                );
                return Err(PoolError::Exhausted);
            }
        };

        loop {
            let candidate = self.inner.slots().idle.pop_front();

            let conn = match candidate {
                Some(mut conn) => {
                    if self.inner.settings.health_check_on_acquire && !self.is_healthy(&mut conn).await {
                        self.inner.total_discarded.fetch_add(1, Ordering::Relaxed);
                        warn!("Idle connection failed health check; discarding");
                        continue;
                    }
                    conn
                }
                None => self.open_with_retry().await?,
            };

            return Ok(self.lease(conn, permit));
        }
    }

    /// Return a lease explicitly. Equivalent to dropping it.
    pub fn release(&self, lease: Lease) {
        drop(lease);
    }

    pub fn size(&self) -> PoolSize {
        let slots = self.inner.slots();
        PoolSize {
            idle: slots.idle.len(),
            in_use: slots.in_use,
            max: self.inner.settings.max_connections,
        }
    }

    pub fn stats(&self) -> PoolStats {
        let size = self.size();
        PoolStats {
            idle: size.idle,
            in_use: size.in_use,
            max: size.max,
            total_acquired: self.inner.total_acquired.load(Ordering::Relaxed),
            total_released: self.inner.total_released.load(Ordering::Relaxed),
            total_created: self.inner.total_created.load(Ordering::Relaxed),
            total_discarded: self.inner.total_discarded.load(Ordering::Relaxed),
        }
    }

    /// Stop handing out leases and drop idle connections. Outstanding
    /// leases are discarded when they come back.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.permits.close();
        let drained: Vec<_> = self.inner.slots().idle.drain(..).collect();
        info!(closed = drained.len(), "Connection pool closed");
    }

    fn lease(&self, conn: Box<dyn SqlConnection>, permit: OwnedSemaphorePermit) -> Lease {
        self.inner.slots().in_use += 1;
        self.inner.total_acquired.fetch_add(1, Ordering::Relaxed);
        Lease {
            conn: Some(conn),
            broken: false,
            pool: Arc::clone(&self.inner),
            _permit: permit,
        }
    }

    async fn is_healthy(&self, conn: &mut Box<dyn SqlConnection>) -> bool {
        matches!(
            tokio::time::timeout(self.inner.settings.connect_timeout, conn.ping()).await,
            Ok(Ok(()))
        )
    }

    async fn open_once(&self) -> Result<Box<dyn SqlConnection>, DbFailure> {
        let conn = tokio::time::timeout(
            self.inner.settings.connect_timeout,
            self.inner.factory.connect(),
        )
        .await
        .map_err(|_| DbFailure::connection("connect timed out"))??;
        self.inner.total_created.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    async fn open_with_retry(&self) -> Result<Box<dyn SqlConnection>, PoolError> {
        let attempts = self.inner.settings.connect_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.open_once().await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Connection attempt failed");
                    last_error = e.message;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.inner.settings.retry_backoff * attempt).await;
            }
        }

        Err(PoolError::Unavailable(last_error))
    }
}

/// Exclusive use of one pooled connection until dropped.
pub struct Lease {
    conn: Option<Box<dyn SqlConnection>>,
    broken: bool,
    pool: Arc<PoolInner>,
    // Released after `Drop::drop` has returned the connection
    _permit: OwnedSemaphorePermit,
}

impl Lease {
    /// The connection must not return to the idle queue.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub async fn ping(&mut self) -> Result<(), DbFailure> {
        match self.conn.as_mut() {
            Some(conn) => conn.ping().await,
            None => Err(DbFailure::connection("lease has no connection")),
        }
    }

    pub async fn fetch_rows(
        &mut self,
        sql: &str,
        params: &[Value],
        max_rows: usize,
    ) -> Result<QueryResult, DbFailure> {
        match self.conn.as_mut() {
            Some(conn) => conn.fetch_rows(sql, params, max_rows).await,
            None => Err(DbFailure::connection("lease has no connection")),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn, self.broken);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct FakeConn {
        healthy: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SqlConnection for FakeConn {
        async fn ping(&mut self) -> Result<(), DbFailure> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(DbFailure::connection("gone"))
            }
        }

        async fn fetch_rows(
            &mut self,
            _sql: &str,
            _params: &[Value],
            _max_rows: usize,
        ) -> Result<QueryResult, DbFailure> {
            Ok(QueryResult::default())
        }
    }

    struct FakeFactory {
        /// Number of upcoming connects that fail
        failures: AtomicUsize,
        connects: AtomicUsize,
        healthy: Arc<AtomicBool>,
    }

    impl FakeFactory {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicUsize::new(failures),
                connects: AtomicUsize::new(0),
                healthy: Arc::new(AtomicBool::new(true)),
            })
        }
    }

    #[async_trait]
    impl ConnectionFactory for FakeFactory {
        async fn connect(&self) -> Result<Box<dyn SqlConnection>, DbFailure> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(DbFailure::connection("connection refused"));
            }
            Ok(Box::new(FakeConn {
                healthy: Arc::clone(&self.healthy),
            }))
        }
    }

    fn settings(max: usize) -> PoolSettings {
        PoolSettings {
            min_connections: 1,
            max_connections: max,
            acquire_timeout: Duration::from_millis(50),
            connect_timeout: Duration::from_millis(200),
            connect_retries: 2,
            retry_backoff: Duration::from_millis(1),
            health_check_on_acquire: true,
        }
    }

    #[tokio::test]
    async fn test_construction_fails_fast() {
        let factory = FakeFactory::new(1);
        let result = ConnectionPool::connect(factory.clone(), settings(2)).await;
        assert!(matches!(result, Err(PoolError::Unavailable(_))));
        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_returns_connection_to_idle() {
        let pool = ConnectionPool::connect(FakeFactory::new(0), settings(2)).await.unwrap();
        assert_eq!(pool.size(), PoolSize { idle: 1, in_use: 0, max: 2 });

        let lease = pool.acquire_default().await.unwrap();
        assert_eq!(pool.size(), PoolSize { idle: 0, in_use: 1, max: 2 });

        pool.release(lease);
        assert_eq!(pool.size(), PoolSize { idle: 1, in_use: 0, max: 2 });

        let stats = pool.stats();
        assert_eq!(stats.total_acquired, 1);
        assert_eq!(stats.total_released, 1);
        assert_eq!(stats.total_created, 1);
    }

    #[tokio::test]
    async fn test_exhausted_when_all_leased() {
        let pool = ConnectionPool::connect(FakeFactory::new(0), settings(2)).await.unwrap();
        let _a = pool.acquire_default().await.unwrap();
        let _b = pool.acquire_default().await.unwrap();

        let third = pool.acquire(Duration::from_millis(20)).await;
        assert!(matches!(third, Err(PoolError::Exhausted)));

        let size = pool.size();
        assert!(size.idle + size.in_use <= size.max);
    }

    #[tokio::test]
    async fn test_waiter_gets_released_connection() {
        let pool = ConnectionPool::connect(FakeFactory::new(0), settings(1)).await.unwrap();
        let held = pool.acquire_default().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(Duration::from_secs(2)).await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);

        assert!(waiter.await.unwrap());
        assert_eq!(pool.stats().total_created, 1);
    }

    #[tokio::test]
    async fn test_broken_connection_replaced_lazily() {
        let factory = FakeFactory::new(0);
        let pool = ConnectionPool::connect(factory.clone(), settings(2)).await.unwrap();

        let mut lease = pool.acquire_default().await.unwrap();
        lease.mark_broken();
        drop(lease);

        // Not replenished eagerly
        assert_eq!(pool.size(), PoolSize { idle: 0, in_use: 0, max: 2 });
        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);

        let _lease = pool.acquire_default().await.unwrap();
        assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().total_discarded, 1);
    }

    #[tokio::test]
    async fn test_unhealthy_idle_connection_never_leased() {
        let factory = FakeFactory::new(0);
        let pool = ConnectionPool::connect(factory.clone(), settings(2)).await.unwrap();
        factory.healthy.store(false, Ordering::SeqCst);

        let mut lease = pool.acquire_default().await.unwrap();
        // The idle connection was discarded and a new one opened
        assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().total_discarded, 1);
        factory.healthy.store(true, Ordering::SeqCst);
        assert!(lease.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_retries_then_unavailable() {
        let factory = FakeFactory::new(0);
        let pool = ConnectionPool::connect(factory.clone(), settings(2)).await.unwrap();
        let _held = pool.acquire_default().await.unwrap();

        // Initial attempt plus two retries all fail
        factory.failures.store(3, Ordering::SeqCst);
        let result = pool.acquire_default().await;
        assert!(matches!(result, Err(PoolError::Unavailable(_))));
        assert_eq!(factory.connects.load(Ordering::SeqCst), 4);

        // The failed acquire gave its slot back
        factory.failures.store(2, Ordering::SeqCst);
        assert!(pool.acquire_default().await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_acquire() {
        let pool = ConnectionPool::connect(FakeFactory::new(0), settings(2)).await.unwrap();
        let lease = pool.acquire_default().await.unwrap();
        pool.close();

        assert!(matches!(pool.acquire_default().await, Err(PoolError::Closed)));
        drop(lease);
        assert_eq!(pool.size().idle, 0);
    }

    #[tokio::test]
    async fn test_panic_while_leased_still_releases() {
        let pool = ConnectionPool::connect(FakeFactory::new(0), settings(1)).await.unwrap();
        let task_pool = pool.clone();
        let result = tokio::spawn(async move {
            let _lease = task_pool.acquire_default().await.unwrap();
            panic!("boom");
        })
        .await;
        assert!(result.is_err());

        assert_eq!(pool.size(), PoolSize { idle: 1, in_use: 0, max: 1 });
        assert!(pool.acquire_default().await.is_ok());
    }
}
