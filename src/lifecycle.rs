use crate::error::RelayError;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

const IN_FLIGHT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One instance per server; clones share state.
#[derive(Clone, Default)]
pub struct LifecycleManager {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    in_flight: AtomicI64,
    draining: AtomicBool,
    draining_started: Notify,
    tasks: TaskTracker,
}

/// Releases its request slot exactly once, on drop.
#[must_use = "dropping the guard ends the request immediately"]
pub struct InFlightGuard {
    inner: Arc<Inner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let now = self.inner.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::gauge!("relay_in_flight_requests").set(now as f64);
    }
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_request(&self) -> InFlightGuard {
        let now = self.inner.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::gauge!("relay_in_flight_requests").set(now as f64);
        InFlightGuard {
            inner: self.inner.clone(),
        }
    }

    /// Spawns work that must finish before shutdown but not before the response.
    pub fn run_critical<F>(&self, name: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        metrics::counter!("relay_critical_tasks_total", "task" => name).increment(1);
        self.inner
            .tasks
            .spawn(task.instrument(tracing::debug_span!("critical_task", task = name)))
    }

    /// One-way. Does not reject requests by itself.
    pub fn set_draining(&self) {
        if !self.inner.draining.swap(true, Ordering::AcqRel) {
            tracing::info!(in_flight = self.in_flight(), "draining");
            self.inner.draining_started.notify_waiters();
        }
    }

    /// Resolves once [`set_draining`](Self::set_draining) has been called.
    /// The server's accept loop stops admitting connections on this.
    pub async fn draining(&self) {
        let notified = self.inner.draining_started.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_draining() {
            return;
        }
        notified.await;
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> i64 {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Waits for critical tasks, then for in-flight requests, then once more for
    /// tasks registered by those last requests. Outstanding work is not
    /// cancelled on timeout.
    pub async fn drain(&self, timeout: Duration) -> Result<(), RelayError> {
        self.inner.tasks.close();
        let wait_all = async {
            self.inner.tasks.wait().await;
            while self.in_flight() > 0 {
                tokio::time::sleep(IN_FLIGHT_POLL_INTERVAL).await;
            }
            self.inner.tasks.wait().await;
        };
        match tokio::time::timeout(timeout, wait_all).await {
            Ok(()) => {
                tracing::info!("drain complete");
                Ok(())
            }
            Err(_) => Err(RelayError::DrainTimeout {
                in_flight: self.in_flight(),
                pending_tasks: self.pending_tasks(),
            }),
        }
    }
}

pub async fn track_in_flight(
    State(lifecycle): State<LifecycleManager>,
    req: Request,
    next: Next,
) -> Response {
    let _guard = lifecycle.begin_request();
    next.run(req).await
}
