// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Result delivered with an async completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub timed_out: bool,
    /// Units that did not finish; `None` when nothing failed.
    pub failed_units: Option<Vec<usize>>,
}

type Notify = Box<dyn Fn(&DispatchOutcome) + Send + Sync>;

/// Completion event for an async dispatch.
///
/// Fired exactly once per dispatch, from the timer context. The outcome is
/// owned by whoever takes it.
pub struct DispatchSignal {
    signaled: AtomicBool,
    finished: AtomicBool,
    outcome: Mutex<Option<DispatchOutcome>>,
    notify: Option<Notify>,
}

impl Default for DispatchSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchSignal {
    pub fn new() -> Self {
        Self {
            signaled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            outcome: Mutex::new(None),
            notify: None,
        }
    }

    /// Signal that also invokes `notify` when it fires.
    pub fn with_notify<F>(notify: F) -> Self
    where
        F: Fn(&DispatchOutcome) + Send + Sync + 'static,
    {
        Self {
            notify: Some(Box::new(notify)),
            ..Self::new()
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// For single-unit dispatch: true once the unit finished before its deadline.
    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn take_outcome(&self) -> Option<DispatchOutcome> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Poll until signaled or `timeout` passes, then take the outcome.
    pub fn wait(&self, timeout: Duration) -> Option<DispatchOutcome> {
        let start = Instant::now();
        while !self.is_signaled() {
            if start.elapsed() >= timeout {
                return None;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.take_outcome()
    }

    /// Reset for a new dispatch.
    pub(crate) fn arm(&self) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.finished.store(false, Ordering::Release);
        self.signaled.store(false, Ordering::Release);
    }

    /// Publish the outcome, then notify. The callback already sees the
    /// signal as fired and may take the outcome itself.
    pub(crate) fn fire(&self, outcome: DispatchOutcome, finished: bool) {
        let seen = self.notify.as_ref().map(|_| outcome.clone());
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        self.finished.store(finished, Ordering::Release);
        let already = self.signaled.swap(true, Ordering::AcqRel);
        debug_assert!(!already, "dispatch signal fired twice");

        if let (Some(notify), Some(outcome)) = (&self.notify, seen) {
            notify(&outcome);
        }
    }
}

impl fmt::Debug for DispatchSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchSignal")
            .field("signaled", &self.is_signaled())
            .field("finished", &self.finished())
            .field("has_notify", &self.notify.is_some())
            .finish()
    }
}
