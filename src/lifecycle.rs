//! Connection lifecycle: acquire one handle, run one operation, release it exactly once.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::{ConnectionConfig, DispatcherConfig};
use crate::error::{DriverError, QueryError, QueryResult};
use crate::rows::NativeRows;
use crate::translator::NativeQuery;

/// Network driver for one backend. Pooling, if any, lives behind `open`.
#[async_trait]
pub trait BackendDriver: Send + Sync {
    type Handle: Send;

    async fn open(&self, config: &ConnectionConfig) -> Result<Self::Handle, DriverError>;

    async fn execute(
        &self,
        handle: &mut Self::Handle,
        query: &NativeQuery,
    ) -> Result<NativeRows, DriverError>;

    async fn close(&self, handle: Self::Handle) -> Result<(), DriverError>;
}

/// Work performed against a borrowed connection handle.
#[async_trait]
pub trait ConnectionOperation<H: Send>: Send {
    type Output: Send;

    async fn run(self, handle: &mut H) -> QueryResult<Self::Output>;
}

/// Runs a single native query.
pub struct ExecuteQuery<'q, D: ?Sized> {
    pub driver: &'q D,
    pub query: &'q NativeQuery,
}

#[async_trait]
impl<'q, D> ConnectionOperation<D::Handle> for ExecuteQuery<'q, D>
where
    D: BackendDriver + ?Sized,
{
    type Output = NativeRows;

    async fn run(self, handle: &mut D::Handle) -> QueryResult<NativeRows> {
        self.driver.execute(handle, self.query).await.map_err(QueryError::Execution)
    }
}

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Holds an acquired handle until it is released explicitly.
///
/// If the owning future is dropped first (an outer `timeout`, a `select!`
/// losing branch, an aborted task) the handle is passed to `orphaned`
/// instead of being silently dropped.
struct HandleGuard<H, F: FnOnce(H)> {
    conn_id: u64,
    handle: Option<H>,
    orphaned: Option<F>,
}

impl<H, F: FnOnce(H)> HandleGuard<H, F> {
    fn new(conn_id: u64, orphaned: F) -> Self {
        Self { conn_id, handle: None, orphaned: Some(orphaned) }
    }

    fn release(&mut self) -> Option<H> {
        self.orphaned = None;
        self.handle.take()
    }
}

impl<H, F: FnOnce(H)> Drop for HandleGuard<H, F> {
    fn drop(&mut self) {
        if let (Some(handle), Some(orphaned)) = (self.handle.take(), self.orphaned.take()) {
            warn!(conn_id = self.conn_id, "operation dropped before release");
            orphaned(handle);
        }
    }
}

/// Acquire a handle from `driver`, run `operation`, and release the handle.
///
/// If `open` fails the operation is never run and the driver error is
/// returned as [`QueryError::Connection`]. Once a handle exists, `close` is
/// called exactly once whether the operation succeeds, fails, is cancelled
/// through `cancel`, or panics; a panic resumes after the release. A failed
/// release is logged and never replaces the operation's own result.
///
/// Stop early through `cancel`. Dropping this future mid-operation only logs
/// a warning and drops the handle, because a borrowed driver cannot be
/// closed from a background task; [`LifecycleManager::run`] closes it.
pub async fn with_connection<D, O>(
    driver: &D,
    config: &ConnectionConfig,
    cancel: &CancellationToken,
    operation: O,
) -> QueryResult<O::Output>
where
    D: BackendDriver + ?Sized,
    O: ConnectionOperation<D::Handle>,
{
    scoped(driver, config, cancel, operation, drop).await
}

async fn scoped<D, O, F>(
    driver: &D,
    config: &ConnectionConfig,
    cancel: &CancellationToken,
    operation: O,
    orphaned: F,
) -> QueryResult<O::Output>
where
    D: BackendDriver + ?Sized,
    O: ConnectionOperation<D::Handle>,
    F: FnOnce(D::Handle) + Send,
{
    let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    if cancel.is_cancelled() {
        return Err(QueryError::Cancelled);
    }

    let mut guard = HandleGuard::new(conn_id, orphaned);
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(QueryError::Cancelled),
        opened = driver.open(config) => match opened {
            Ok(handle) => handle,
            Err(e) => {
                error!(
                    conn_id,
                    engine = %config.engine,
                    error = %e,
                    "failed to acquire connection"
                );
                return Err(QueryError::Connection(e));
            }
        },
    };
    debug!(conn_id, engine = %config.engine, "connection acquired");

    let started = Instant::now();
    let outcome = {
        let handle = guard.handle.insert(opened);
        let run = AssertUnwindSafe(operation.run(handle)).catch_unwind();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = run => Some(result),
        }
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    if let Some(handle) = guard.release() {
        if let Err(e) = driver.close(handle).await {
            warn!(conn_id, error = %e, "failed to release connection");
        } else {
            debug!(conn_id, duration_ms, "connection released");
        }
    }

    match outcome {
        None => {
            debug!(conn_id, duration_ms, "operation cancelled");
            Err(QueryError::Cancelled)
        }
        Some(Err(panic)) => std::panic::resume_unwind(panic),
        Some(Ok(result)) => {
            if let Err(e) = &result {
                error!(conn_id, duration_ms, error = %e, "operation failed");
            }
            result
        }
    }
}

/// Shared driver plus an optional per-operation time limit.
pub struct LifecycleManager<D: ?Sized> {
    driver: Arc<D>,
    timeout: Option<Duration>,
}

impl<D: ?Sized> Clone for LifecycleManager<D> {
    fn clone(&self) -> Self {
        Self { driver: Arc::clone(&self.driver), timeout: self.timeout }
    }
}

impl<D> LifecycleManager<D>
where
    D: BackendDriver + ?Sized + 'static,
    D::Handle: 'static,
{
    pub fn new(driver: Arc<D>) -> Self {
        Self { driver, timeout: None }
    }

    /// Build a manager with the operation timeout from `config`.
    pub fn from_config(driver: Arc<D>, config: &DispatcherConfig) -> Self {
        Self { driver, timeout: config.operation_timeout() }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Like [`with_connection`], cancelling the operation once the timeout elapses.
    ///
    /// If this future is dropped while the operation holds a handle, the
    /// handle is closed on a background task.
    pub async fn run<O>(
        &self,
        config: &ConnectionConfig,
        cancel: &CancellationToken,
        operation: O,
    ) -> QueryResult<O::Output>
    where
        O: ConnectionOperation<D::Handle>,
    {
        let child = cancel.child_token();
        let work = scoped(&*self.driver, config, &child, operation, self.background_release());

        let Some(limit) = self.timeout else {
            return work.await;
        };

        tokio::pin!(work);
        tokio::select! {
            result = &mut work => result,
            _ = tokio::time::sleep(limit) => {
                warn!(
                    timeout_ms = limit.as_millis() as u64,
                    engine = %config.engine,
                    "operation timed out"
                );
                child.cancel();
                work.await
            }
        }
    }

    /// Execute one native query on a fresh connection.
    pub async fn execute(
        &self,
        config: &ConnectionConfig,
        cancel: &CancellationToken,
        query: &NativeQuery,
    ) -> QueryResult<NativeRows> {
        self.run(config, cancel, ExecuteQuery { driver: &*self.driver, query }).await
    }

    fn background_release(&self) -> impl FnOnce(D::Handle) + Send {
        let driver = Arc::clone(&self.driver);
        move |handle| match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = driver.close(handle).await {
                        warn!(error = %e, "failed to release abandoned connection");
                    }
                });
            }
            Err(_) => warn!("no runtime left to release abandoned connection"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct FlakyRelease {
        closed: AtomicUsize,
    }

    #[async_trait]
    impl BackendDriver for FlakyRelease {
        type Handle = u32;

        async fn open(&self, _config: &ConnectionConfig) -> Result<u32, DriverError> {
            Ok(7)
        }

        async fn execute(
            &self,
            _handle: &mut u32,
            _query: &NativeQuery,
        ) -> Result<NativeRows, DriverError> {
            Ok(NativeRows::Count(3))
        }

        async fn close(&self, _handle: u32) -> Result<(), DriverError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Err("socket already closed".into())
        }
    }

    struct ReadHandle;

    #[async_trait]
    impl ConnectionOperation<u32> for ReadHandle {
        type Output = u32;

        async fn run(self, handle: &mut u32) -> QueryResult<u32> {
            Ok(*handle)
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_release_failure_does_not_mask_result() {
        let driver = FlakyRelease::default();
        let config = ConnectionConfig::new("Postgres");
        let result = with_connection(&driver, &config, &CancellationToken::new(), ReadHandle).await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(driver.closed.load(Ordering::SeqCst), 1);
        assert!(logs_contain("failed to release connection"));
        assert!(logs_contain("socket already closed"));
    }

    #[test]
    fn test_manager_takes_timeout_from_config() {
        let config = DispatcherConfig { operation_timeout_ms: Some(250), ..Default::default() };
        let manager = LifecycleManager::from_config(Arc::new(FlakyRelease::default()), &config);
        assert_eq!(manager.timeout(), Some(Duration::from_millis(250)));

        let defaults = DispatcherConfig::default();
        let manager = LifecycleManager::from_config(Arc::new(FlakyRelease::default()), &defaults);
        assert_eq!(manager.timeout(), None);
    }

    #[tokio::test]
    async fn test_precancelled_token_skips_acquisition() {
        let driver = FlakyRelease::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let config = ConnectionConfig::new("Postgres");
        let result = with_connection(&driver, &config, &cancel, ReadHandle).await;
        assert!(matches!(result, Err(QueryError::Cancelled)));
        assert_eq!(driver.closed.load(Ordering::SeqCst), 0);
    }
}
