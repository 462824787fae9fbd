// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Collaborators the coordinator consumes but does not implement: the
//! activation primitive, self-identification, coherency maintenance and the
//! timer service.

pub mod threads;

use crate::registry::UnitTopology;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use threads::{ThreadPlatform, ThreadTimer};

/// Code a unit starts executing when activated.
pub type EntryPoint = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum HwError {
    #[error("Unit {0} refused activation")]
    Rejected(usize),
    #[error("Unit {0} is not known to the platform")]
    UnknownUnit(usize),
    #[error("Failed to start execution context: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Trait representing the hardware (or simulated hardware) the units run on
pub trait Platform: Send + Sync {
    /// Units discovered at boot, in index order.
    fn topology(&self) -> Vec<UnitTopology>;

    /// Identity of the unit executing the caller, if the platform knows it.
    fn current_identity(&self) -> Option<u64>;

    /// Make the idle unit `index` begin executing `entry`.
    fn activate(&self, index: usize, entry: EntryPoint) -> Result<(), HwError>;

    /// Make `len` bytes at `addr` visible to every other unit.
    fn publish(&self, addr: usize, len: usize);
}

/// Publish the memory backing `value`.
pub fn publish_value<T>(platform: &dyn Platform, value: &T) {
    platform.publish(value as *const T as usize, std::mem::size_of::<T>());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerControl {
    Continue,
    Cancel,
}

pub type TimerCallback = Box<dyn FnMut() -> TimerControl + Send>;

pub trait TimerService: Send + Sync {
    /// One-shot stall of the calling context.
    fn sleep_us(&self, us: u64);

    /// Run `callback` every `period_us` until it returns `Cancel` or the
    /// handle is cancelled.
    fn every_us(&self, period_us: u64, callback: TimerCallback) -> Result<TimerHandle, HwError>;
}

#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
