//! Background execution of long-running device actions.
//!
//! [`Executor`] wraps a multi-thread tokio runtime (owned, or borrowed via a
//! [`Handle`]). Actions are submitted together with the [`Status`] they
//! resolve; the status is the only object shared between the worker and the
//! caller. Errors and panics inside an action never escape the worker: they
//! are delivered as a failed status.
//!
//! [`ActionSlot`] enforces the one-action-at-a-time policy of a device:
//! a second action while one is pending is rejected with `Busy`.
//!
//! All simulated delays use `tokio::time::sleep`, never `std::thread::sleep`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{DeviceError, DeviceResult};
use crate::status::Status;

struct ExecutorInner {
    handle: Handle,
    runtime: Option<Runtime>,
    worker_threads: Option<usize>,
}

impl Drop for ExecutorInner {
    fn drop(&mut self) {
        // Safe to call from inside another runtime, unlike a plain drop
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Shared pool of background workers. Cheap to clone.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("owned_runtime", &self.inner.runtime.is_some())
            .field("worker_threads", &self.inner.worker_threads)
            .finish()
    }
}

impl Executor {
    /// Start an owned runtime with a fixed number of worker threads.
    pub fn new(worker_threads: usize) -> DeviceResult<Self> {
        let worker_threads = worker_threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("simdaq-worker")
            .enable_time()
            .build()
            .map_err(|e| DeviceError::Executor(format!("failed to start runtime: {e}")))?;
        debug!(worker_threads, "executor started");
        Ok(Self {
            inner: Arc::new(ExecutorInner {
                handle: runtime.handle().clone(),
                runtime: Some(runtime),
                worker_threads: Some(worker_threads),
            }),
        })
    }

    /// Run actions on an existing runtime (which must have time enabled).
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                handle,
                runtime: None,
                worker_threads: None,
            }),
        }
    }

    /// Use the runtime of the calling context.
    pub fn current() -> DeviceResult<Self> {
        Handle::try_current()
            .map(Self::from_handle)
            .map_err(|e| DeviceError::Executor(format!("no runtime in context: {e}")))
    }

    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Worker count of an owned runtime; `None` when borrowing a handle.
    pub fn worker_threads(&self) -> Option<usize> {
        self.inner.worker_threads
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.handle.spawn(future)
    }

    /// Run `action` in the background and resolve `status` with its result.
    ///
    /// An action that already resolved its status (e.g. through
    /// [`Status::commit_with`]) leaves it untouched. A panicking action fails
    /// the status with `Computation`.
    pub fn submit<F>(&self, status: &Status, action: F)
    where
        F: Future<Output = DeviceResult<()>> + Send + 'static,
    {
        let status = status.clone();
        let handle = self.inner.handle.clone();
        self.inner.handle.spawn(async move {
            let outcome = match handle.spawn(action).await {
                Ok(result) => result,
                Err(join_err) => Err(DeviceError::Computation(format!(
                    "action '{}' aborted: {join_err}",
                    status.label()
                ))),
            };
            if let Err(err) = &outcome {
                warn!(status = %status.label(), error = %err, "action failed");
            }
            status.resolve_pending(outcome);
        });
    }

    /// Fail `status` with `Timeout` if it is still pending after `timeout`.
    pub fn watchdog(&self, status: &Status, timeout: Duration) {
        let status = status.clone();
        self.inner.handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            if status.resolve_pending(Err(DeviceError::Timeout(timeout))) {
                warn!(status = %status.label(), ?timeout, "status deadline exceeded");
            }
        });
    }
}

/// Slack added to an action's expected duration before its watchdog fires.
pub const DEFAULT_DEADLINE_MARGIN_MS: u64 = 10_000;

/// Tracks the single in-flight action of a device.
#[derive(Debug)]
pub struct ActionSlot {
    device: String,
    current: Mutex<Option<Status>>,
}

impl ActionSlot {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            current: Mutex::new(None),
        }
    }

    /// Start a new action, or fail with `Busy` while one is pending.
    pub fn begin(&self, label: impl Into<String>) -> DeviceResult<Status> {
        let mut current = self.current.lock();
        if let Some(status) = current.as_ref() {
            if !status.is_done() {
                return Err(DeviceError::Busy(self.device.clone()));
            }
        }
        let status = Status::new(label);
        *current = Some(status.clone());
        Ok(status)
    }

    /// The pending action, if any.
    pub fn current(&self) -> Option<Status> {
        self.current
            .lock()
            .as_ref()
            .filter(|status| !status.is_done())
            .cloned()
    }

    pub fn is_busy(&self) -> bool {
        self.current().is_some()
    }

    /// Fail the pending action with `Stopped`. Returns whether one was halted.
    ///
    /// An action already committing keeps the slot until it resolves.
    pub fn stop(&self) -> bool {
        let status = self.current.lock().clone();
        match status {
            Some(status) => status.resolve_pending(Err(DeviceError::Stopped(self.device.clone()))),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusState;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_submit_resolves_success() {
        let executor = Executor::new(2).unwrap();
        let status = Status::new("job");
        executor.submit(&status, async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(())
        });
        status.wait(Some(Duration::from_secs(5))).unwrap();
        assert!(status.success());
    }

    #[test]
    fn test_submit_captures_errors_and_panics() {
        let executor = Executor::new(1).unwrap();

        let failing = Status::new("failing");
        executor.submit(&failing, async {
            Err(DeviceError::SimulatedFailure("det".into()))
        });
        assert_eq!(
            failing.wait(Some(Duration::from_secs(5))),
            Err(DeviceError::SimulatedFailure("det".into()))
        );

        let panicking = Status::new("panicking");
        let explode = true;
        executor.submit(&panicking, async move {
            if explode {
                panic!("boom");
            }
            Ok(())
        });
        assert!(matches!(
            panicking.wait(Some(Duration::from_secs(5))),
            Err(DeviceError::Computation(_))
        ));
    }

    #[test]
    fn test_watchdog_times_out_pending_status() {
        let executor = Executor::new(1).unwrap();
        let status = Status::new("slow");
        executor.watchdog(&status, Duration::from_millis(10));
        assert!(matches!(
            status.wait(Some(Duration::from_secs(5))),
            Err(DeviceError::Timeout(_))
        ));
        assert_eq!(status.state(), StatusState::Failed);
    }

    #[test]
    fn test_action_slot_rejects_second_action() {
        let slot = ActionSlot::new("x");
        let first = slot.begin("x.set").unwrap();
        assert!(matches!(slot.begin("x.set"), Err(DeviceError::Busy(_))));
        assert!(slot.is_busy());

        first.mark_success().unwrap();
        assert!(!slot.is_busy());
        assert!(slot.begin("x.set").is_ok());
    }

    #[test]
    fn test_action_slot_stop() {
        let slot = ActionSlot::new("x");
        let status = slot.begin("x.set").unwrap();
        assert!(slot.stop());
        assert_eq!(status.wait(None), Err(DeviceError::Stopped("x".into())));
        assert!(!slot.stop());
    }

    #[test]
    fn test_stop_during_commit_keeps_slot_busy() {
        let slot = Arc::new(ActionSlot::new("x"));
        let status = slot.begin("x.set").unwrap();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let committer = status.clone();
        let handle = thread::spawn(move || {
            committer.commit_with(|| {
                entered_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                Ok(())
            })
        });
        entered_rx.recv().unwrap();

        assert!(!slot.stop());
        assert!(slot.is_busy());
        assert!(matches!(slot.begin("x.set"), Err(DeviceError::Busy(_))));

        release_tx.send(()).unwrap();
        handle.join().unwrap().unwrap();
        assert!(status.success());
        assert!(!slot.is_busy());
        assert!(slot.begin("x.set").is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_executor_from_current_runtime() {
        let executor = Executor::current().unwrap();
        assert!(executor.worker_threads().is_none());
        let status = Status::new("job");
        executor.submit(&status, async { Ok(()) });
        status.wait_async().await.unwrap();
    }
}
