//! Status - one-shot completion handle for device actions
//!
//! Every `trigger()`/`set()` returns a [`Status`]. The action resolves it
//! exactly once, either to success or to failure with a [`DeviceError`];
//! callers poll it, block on it, await it or attach callbacks.
//!
//! # State machine
//!
//! ```text
//!            mark_success / commit_with(Ok)
//!   Pending ───────────────────────────────▶ Success
//!      │
//!      │   mark_failed / cancel / stop / deadline
//!      └───────────────────────────────────▶ Failed(error)
//! ```
//!
//! Resolved states are terminal; resolving twice returns `InvalidState`.
//!
//! # Commit and cancellation
//!
//! Actions that mutate device state do so inside [`Status::commit_with`].
//! Once a commit has started, `cancel()` and `stop` have no effect, so a
//! cancellation race resolves in favour of the state mutation.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DeviceError, DeviceResult};

/// Final result carried by a resolved status.
pub type Outcome = DeviceResult<()>;

type Callback = Box<dyn FnOnce(&Outcome) + Send + 'static>;

/// Observable state of a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusState {
    Pending,
    Success,
    Failed,
}

struct Resolution {
    outcome: Option<Outcome>,
    committing: bool,
    callbacks: Vec<Callback>,
    finished_at: Option<Instant>,
}

struct Inner {
    id: Uuid,
    label: String,
    created_at: Instant,
    resolution: Mutex<Resolution>,
    resolved: Condvar,
    notify: Notify,
}

/// Shared completion handle. Clones observe the same resolution.
#[derive(Clone)]
pub struct Status {
    inner: Arc<Inner>,
}

impl Status {
    /// New pending status labelled with the action that owns it.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                label: label.into(),
                created_at: Instant::now(),
                resolution: Mutex::new(Resolution {
                    outcome: None,
                    committing: false,
                    callbacks: Vec::new(),
                    finished_at: None,
                }),
                resolved: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Already-successful status for instantaneous actions.
    pub fn finished(label: impl Into<String>) -> Self {
        let status = Self::new(label);
        status.resolve_pending(Ok(()));
        status
    }

    /// Already-failed status.
    pub fn failed(label: impl Into<String>, error: DeviceError) -> Self {
        let status = Self::new(label);
        status.resolve_pending(Err(error));
        status
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn state(&self) -> StatusState {
        match &self.inner.resolution.lock().outcome {
            None => StatusState::Pending,
            Some(Ok(())) => StatusState::Success,
            Some(Err(_)) => StatusState::Failed,
        }
    }

    pub fn is_done(&self) -> bool {
        self.inner.resolution.lock().outcome.is_some()
    }

    pub fn success(&self) -> bool {
        self.state() == StatusState::Success
    }

    /// Failure carried by a failed status.
    pub fn error(&self) -> Option<DeviceError> {
        match &self.inner.resolution.lock().outcome {
            Some(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }

    /// Time from creation to resolution (or to now while pending).
    pub fn elapsed(&self) -> Duration {
        let finished_at = self.inner.resolution.lock().finished_at;
        finished_at
            .unwrap_or_else(Instant::now)
            .duration_since(self.inner.created_at)
    }

    /// Resolve to success. Fails with `InvalidState` if already resolved.
    pub fn mark_success(&self) -> DeviceResult<()> {
        self.resolve(Ok(()))
    }

    /// Resolve to failure. Fails with `InvalidState` if already resolved.
    pub fn mark_failed(&self, error: DeviceError) -> DeviceResult<()> {
        self.resolve(Err(error))
    }

    fn resolve(&self, outcome: Outcome) -> DeviceResult<()> {
        let callbacks = {
            let mut resolution = self.inner.resolution.lock();
            if resolution.outcome.is_some() {
                return Err(DeviceError::InvalidState(format!(
                    "status '{}' already resolved",
                    self.inner.label
                )));
            }
            resolution.outcome = Some(outcome.clone());
            resolution.finished_at = Some(Instant::now());
            std::mem::take(&mut resolution.callbacks)
        };
        self.finish(outcome, callbacks);
        Ok(())
    }

    /// Resolve only if still pending and no commit is in progress.
    ///
    /// Used for cancellation, stop and deadlines. Returns whether this call
    /// resolved the status.
    pub fn resolve_pending(&self, outcome: Outcome) -> bool {
        let callbacks = {
            let mut resolution = self.inner.resolution.lock();
            if resolution.outcome.is_some() || resolution.committing {
                return false;
            }
            resolution.outcome = Some(outcome.clone());
            resolution.finished_at = Some(Instant::now());
            std::mem::take(&mut resolution.callbacks)
        };
        self.finish(outcome, callbacks);
        true
    }

    fn finish(&self, outcome: Outcome, callbacks: Vec<Callback>) {
        debug!(
            status = %self.inner.label,
            id = %self.inner.id,
            success = outcome.is_ok(),
            "status resolved"
        );
        self.inner.resolved.notify_all();
        self.inner.notify.notify_waiters();
        for callback in callbacks {
            callback(&outcome);
        }
    }

    /// Best-effort cancellation.
    ///
    /// Fails the status with `Cancelled` unless it is already resolved or
    /// its final state mutation has started. Returns whether it took effect.
    pub fn cancel(&self) -> bool {
        self.resolve_pending(Err(DeviceError::Cancelled))
    }

    /// Run the final state mutation of an action and resolve accordingly.
    ///
    /// If the status was already resolved (cancelled, stopped, timed out)
    /// the mutation is skipped and that failure is returned. Once `commit`
    /// starts, cancellation can no longer win. A panicking `commit` fails
    /// the status with `Computation`.
    pub fn commit_with<T, F>(&self, commit: F) -> DeviceResult<T>
    where
        F: FnOnce() -> DeviceResult<T>,
    {
        {
            let mut resolution = self.inner.resolution.lock();
            match &resolution.outcome {
                Some(Err(err)) => return Err(err.clone()),
                Some(Ok(())) => {
                    return Err(DeviceError::InvalidState(format!(
                        "status '{}' already resolved",
                        self.inner.label
                    )))
                }
                None if resolution.committing => {
                    return Err(DeviceError::InvalidState(format!(
                        "status '{}' is already committing",
                        self.inner.label
                    )))
                }
                None => resolution.committing = true,
            }
        }

        let result = panic::catch_unwind(AssertUnwindSafe(commit)).unwrap_or_else(|payload| {
            Err(DeviceError::Computation(format!(
                "commit of '{}' panicked: {}",
                self.inner.label,
                panic_message(payload.as_ref())
            )))
        });
        let outcome = match &result {
            Ok(_) => Ok(()),
            Err(err) => Err(err.clone()),
        };
        // Only this commit may resolve a committing status
        let _ = self.resolve(outcome);
        result
    }

    /// Attach a completion callback. Runs immediately if already resolved.
    pub fn add_callback<F>(&self, callback: F)
    where
        F: FnOnce(&Outcome) + Send + 'static,
    {
        let outcome = {
            let mut resolution = self.inner.resolution.lock();
            match &resolution.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    resolution.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&outcome);
    }

    /// Block the calling thread until resolved or `timeout` elapses.
    ///
    /// A failed status returns its error on every call. On timeout the
    /// status stays pending and `Timeout` is returned.
    pub fn wait(&self, timeout: Option<Duration>) -> DeviceResult<()> {
        // Timeouts past the clock's range wait without bound
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut resolution = self.inner.resolution.lock();
        while resolution.outcome.is_none() {
            match deadline {
                Some(deadline) => {
                    if self
                        .inner
                        .resolved
                        .wait_until(&mut resolution, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
                None => self.inner.resolved.wait(&mut resolution),
            }
        }
        match &resolution.outcome {
            Some(outcome) => outcome.clone(),
            None => Err(DeviceError::Timeout(timeout.unwrap_or_default())),
        }
    }

    /// Await resolution from async code.
    pub async fn wait_async(&self) -> DeviceResult<()> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent resolve is not missed
            notified.as_mut().enable();
            if let Some(outcome) = self.inner.resolution.lock().outcome.clone() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Combine statuses: succeeds when all succeed, fails with the first failure.
    pub fn all<I>(label: impl Into<String>, statuses: I) -> Status
    where
        I: IntoIterator<Item = Status>,
    {
        let combined = Status::new(label);
        let statuses: Vec<Status> = statuses.into_iter().collect();
        if statuses.is_empty() {
            combined.resolve_pending(Ok(()));
            return combined;
        }

        let remaining = Arc::new(AtomicUsize::new(statuses.len()));
        for status in statuses {
            let combined = combined.clone();
            let remaining = Arc::clone(&remaining);
            status.add_callback(move |outcome| match outcome {
                Ok(()) => {
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        combined.resolve_pending(Ok(()));
                    }
                }
                Err(err) => {
                    combined.resolve_pending(Err(err.clone()));
                }
            });
        }
        combined
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Status")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        write!(
            f,
            "Status({}, done={}, success={})",
            self.inner.label,
            state != StatusState::Pending,
            state == StatusState::Success
        )
    }
}
