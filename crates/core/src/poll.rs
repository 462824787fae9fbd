// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Deadline engine.
//!
//! A request is advanced by repeated calls to its `check_and_advance`. The
//! blocking driver stalls the controller between rounds; the async driver
//! hands each round to the timer service. Both go through [`PollLoop::tick`],
//! so serial promotion and deadline accounting behave identically.

use crate::platform::{TimerControl, TimerService};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

pub const DEFAULT_POLL_QUANTUM_US: u64 = 50_000;

/// Elapsed/budget pair in microseconds. A zero budget never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline {
    budget_us: u64,
    elapsed_us: u64,
}

impl Deadline {
    pub fn new(budget_us: u64) -> Self {
        Self {
            budget_us,
            elapsed_us: 0,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    pub fn is_unbounded(&self) -> bool {
        self.budget_us == 0
    }

    pub fn budget_us(&self) -> u64 {
        self.budget_us
    }

    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_us
    }

    pub fn remaining_us(&self) -> Option<u64> {
        if self.is_unbounded() {
            None
        } else {
            Some(self.budget_us.saturating_sub(self.elapsed_us))
        }
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_us() == Some(0)
    }

    /// Length of the next wait: one quantum, clipped to what is left.
    pub fn next_step(&self, quantum_us: u64) -> u64 {
        match self.remaining_us() {
            Some(remaining) => quantum_us.min(remaining),
            None => quantum_us,
        }
    }

    pub fn consume(&mut self, us: u64) {
        self.elapsed_us = self.elapsed_us.saturating_add(us);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Pending,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Complete,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Wait this many microseconds, then tick again.
    Wait(u64),
    Done(PollStatus),
}

/// A request the engine can drive.
pub trait Pollable: Send {
    /// Observe every targeted unit and move bookkeeping forward.
    fn check_and_advance(&mut self) -> Progress;
}

#[derive(Debug)]
pub struct PollLoop<P> {
    request: P,
    deadline: Deadline,
    quantum_us: u64,
}

impl<P: Pollable> PollLoop<P> {
    pub fn new(request: P, deadline: Deadline, quantum_us: u64) -> Self {
        Self {
            request,
            deadline,
            quantum_us: quantum_us.max(1),
        }
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn request(&self) -> &P {
        &self.request
    }

    /// One round: check, then either finish or charge the next wait
    /// against the budget.
    pub fn tick(&mut self) -> Step {
        if self.request.check_and_advance() == Progress::Complete {
            return Step::Done(PollStatus::Complete);
        }
        if self.deadline.is_expired() {
            return Step::Done(PollStatus::TimedOut);
        }
        let step = self.deadline.next_step(self.quantum_us);
        self.deadline.consume(step);
        Step::Wait(step)
    }

    /// Stall the calling context until the request completes or expires.
    pub fn run_blocking(mut self, timer: &dyn TimerService) -> (P, PollStatus) {
        loop {
            match self.tick() {
                Step::Done(status) => return (self.request, status),
                Step::Wait(us) => timer.sleep_us(us),
            }
        }
    }
}

impl<P: Pollable + 'static> PollLoop<P> {
    /// Re-run [`tick`](Self::tick) every quantum from the timer service.
    /// `on_done` runs exactly once, after which the periodic timer cancels
    /// itself. If the timer cannot be registered the request is driven to
    /// completion on the calling context instead.
    pub fn run_async<F>(self, timer: &dyn TimerService, on_done: F)
    where
        F: FnOnce(P, PollStatus) + Send + 'static,
    {
        let quantum_us = self.quantum_us;
        let slot = Arc::new(Mutex::new(Some((self, on_done))));
        let tick_slot = slot.clone();

        let registered = timer.every_us(
            quantum_us,
            Box::new(move || {
                let mut guard = tick_slot.lock().unwrap_or_else(PoisonError::into_inner);
                let status = match guard.as_mut() {
                    None => return TimerControl::Cancel,
                    Some((poll, _)) => match poll.tick() {
                        Step::Wait(_) => return TimerControl::Continue,
                        Step::Done(status) => status,
                    },
                };
                let finished = guard.take();
                drop(guard);
                if let Some((poll, done)) = finished {
                    done(poll.request, status);
                }
                TimerControl::Cancel
            }),
        );

        if let Err(e) = registered {
            warn!("Periodic poll timer unavailable ({}), completing inline", e);
            let pending = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some((poll, done)) = pending {
                let (request, status) = poll.run_blocking(timer);
                done(request, status);
            }
        }
    }
}
