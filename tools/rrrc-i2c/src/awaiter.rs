//! Completion handle for long-running motor goals.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::GoalError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    /// The motor reported itself blocked.
    Blocked,
    /// A newer control request replaced the goal.
    Superseded,
    /// The caller or the port driver gave up on the goal.
    Requested,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AwaiterState {
    Pending,
    Finished,
    Cancelled(CancelReason),
    TimedOut,
}

type FinishedCallback = Box<dyn FnOnce() + Send>;
type CancelledCallback = Box<dyn FnOnce(CancelReason) + Send>;

struct Inner {
    state: AwaiterState,
    on_finished: Option<FinishedCallback>,
    on_cancelled: Option<CancelledCallback>,
}

/// Shared handle; clones observe the same goal. Every terminal transition
/// happens at most once and its callback runs outside the internal lock.
#[derive(Clone)]
pub struct Awaiter {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for Awaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Awaiter")
            .field("state", &self.state())
            .finish()
    }
}

impl Default for Awaiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Awaiter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: AwaiterState::Pending,
                on_finished: None,
                on_cancelled: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> AwaiterState {
        self.lock().state
    }

    pub fn is_pending(&self) -> bool {
        self.state() == AwaiterState::Pending
    }

    pub fn on_finished(&self, callback: impl FnOnce() + Send + 'static) {
        self.lock().on_finished = Some(Box::new(callback));
    }

    pub fn on_cancelled(&self, callback: impl FnOnce(CancelReason) + Send + 'static) {
        self.lock().on_cancelled = Some(Box::new(callback));
    }

    /// Mark the goal reached. Returns `false` if the handle was already
    /// terminal.
    pub fn finish(&self) -> bool {
        let callback = {
            let mut inner = self.lock();
            if inner.state != AwaiterState::Pending {
                return false;
            }
            inner.state = AwaiterState::Finished;
            inner.on_cancelled = None;
            inner.on_finished.take()
        };
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    pub fn cancel(&self, reason: CancelReason) -> bool {
        let callback = {
            let mut inner = self.lock();
            if inner.state != AwaiterState::Pending {
                return false;
            }
            inner.state = AwaiterState::Cancelled(reason);
            inner.on_finished = None;
            inner.on_cancelled.take()
        };
        if let Some(callback) = callback {
            callback(reason);
        }
        true
    }

    fn time_out(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != AwaiterState::Pending {
            return false;
        }
        inner.state = AwaiterState::TimedOut;
        inner.on_finished = None;
        inner.on_cancelled = None;
        true
    }

    /// Drive `tick` (typically a status poll that dispatches to the port
    /// drivers) until the goal settles or `timeout` elapses.
    pub fn wait(&self, timeout: Duration, mut tick: impl FnMut()) -> Result<(), GoalError> {
        let start = Instant::now();
        while self.is_pending() && start.elapsed() < timeout {
            tick();
        }
        self.time_out();
        self.result()
    }

    pub fn result(&self) -> Result<(), GoalError> {
        match self.state() {
            AwaiterState::Finished => Ok(()),
            AwaiterState::Cancelled(CancelReason::Blocked) => Err(GoalError::Blocked),
            AwaiterState::Cancelled(reason) => Err(GoalError::Cancelled(reason)),
            AwaiterState::TimedOut | AwaiterState::Pending => Err(GoalError::TimedOut),
        }
    }
}
