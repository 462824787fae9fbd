// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Simulation backend: every unit is an OS thread.
//!
//! Activation spawns a fresh named thread that adopts the unit's identity and
//! exits when the entry point returns. The thread that constructs the
//! platform is the controller.

use super::{EntryPoint, HwError, Platform, TimerCallback, TimerControl, TimerHandle, TimerService};
use crate::registry::UnitTopology;
use mpdispatch_config::TopologyManifest;
use std::cell::Cell;
use std::sync::atomic::{fence, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;

thread_local! {
    static CURRENT_IDENTITY: Cell<Option<u64>> = const { Cell::new(None) };
}

#[derive(Debug)]
pub struct ThreadPlatform {
    topology: Vec<UnitTopology>,
    controller_thread: ThreadId,
    controller_identity: Option<u64>,
}

impl ThreadPlatform {
    /// Units with the given identities; `controller` indexes into `identities`.
    pub fn new(identities: &[u64], controller: usize) -> Self {
        let topology = identities
            .iter()
            .enumerate()
            .map(|(i, &identity)| UnitTopology {
                identity,
                is_current: i == controller,
                healthy: true,
            })
            .collect();
        Self {
            topology,
            controller_thread: thread::current().id(),
            controller_identity: identities.get(controller).copied(),
        }
    }

    /// `count` units with identities `0..count`, unit 0 as controller.
    pub fn uniform(count: usize) -> Self {
        let identities: Vec<u64> = (0..count as u64).collect();
        Self::new(&identities, 0)
    }

    pub fn from_manifest(manifest: &TopologyManifest) -> Self {
        let topology: Vec<UnitTopology> = manifest
            .units
            .iter()
            .map(|u| UnitTopology {
                identity: u.identity,
                is_current: u.controller,
                healthy: u.healthy,
            })
            .collect();
        let controller_identity = topology.iter().find(|u| u.is_current).map(|u| u.identity);
        Self {
            topology,
            controller_thread: thread::current().id(),
            controller_identity,
        }
    }
}

impl Platform for ThreadPlatform {
    fn topology(&self) -> Vec<UnitTopology> {
        self.topology.clone()
    }

    fn current_identity(&self) -> Option<u64> {
        CURRENT_IDENTITY.with(|c| c.get()).or_else(|| {
            if thread::current().id() == self.controller_thread {
                self.controller_identity
            } else {
                None
            }
        })
    }

    fn activate(&self, index: usize, entry: EntryPoint) -> Result<(), HwError> {
        let identity = self
            .topology
            .get(index)
            .ok_or(HwError::UnknownUnit(index))?
            .identity;

        thread::Builder::new()
            .name(format!("mp-unit-{}", index))
            .spawn(move || {
                CURRENT_IDENTITY.with(|c| c.set(Some(identity)));
                entry();
            })?;
        Ok(())
    }

    fn publish(&self, _addr: usize, _len: usize) {
        fence(Ordering::SeqCst);
    }
}

/// Timer service backed by `thread::sleep` and one helper thread per
/// periodic registration.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadTimer;

impl ThreadTimer {
    pub fn new() -> Self {
        Self
    }
}

impl TimerService for ThreadTimer {
    fn sleep_us(&self, us: u64) {
        thread::sleep(Duration::from_micros(us));
    }

    fn every_us(
        &self,
        period_us: u64,
        mut callback: TimerCallback,
    ) -> Result<TimerHandle, HwError> {
        let handle = TimerHandle::new();
        let tick = handle.clone();
        let period = Duration::from_micros(period_us.max(1));

        thread::Builder::new()
            .name("mp-timer".to_string())
            .spawn(move || loop {
                thread::sleep(period);
                if tick.is_cancelled() {
                    break;
                }
                if callback() == TimerControl::Cancel {
                    tick.cancel();
                    break;
                }
            })?;
        Ok(handle)
    }
}
