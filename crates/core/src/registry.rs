// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::state::StateCell;
use crate::{MpError, MpResult, UnitState, WorkItem};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

bitflags::bitflags! {
    /// Capability and status bits reported for each unit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct UnitStatusFlags: u32 {
        /// The unit that owns the dispatch interface
        const CONTROLLER = 1 << 0;
        /// Eligible as a dispatch target
        const ENABLED = 1 << 1;
        /// Passed its health checks
        const HEALTHY = 1 << 2;
    }
}

/// Physical position of a unit, decoded from the affinity fields of its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorLocation {
    pub package: u32,
    pub core: u32,
    pub thread: u32,
}

impl ProcessorLocation {
    pub fn from_identity(identity: u64) -> Self {
        Self {
            package: ((identity >> 16) & 0xFF) as u32,
            core: ((identity >> 8) & 0xFF) as u32,
            thread: (identity & 0xFF) as u32,
        }
    }
}

/// One entry of the boot-time topology list handed over by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitTopology {
    pub identity: u64,
    /// True for the unit executing initialization; it becomes the controller.
    pub is_current: bool,
    pub healthy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    pub index: usize,
    pub identity: u64,
    pub flags: UnitStatusFlags,
    pub location: ProcessorLocation,
}

#[derive(Debug)]
pub struct ProcessingUnit {
    index: usize,
    identity: u64,
    is_controller: bool,
    enabled: AtomicBool,
    healthy: AtomicBool,
    pub(crate) state: StateCell,
    // Held by the request that moved the unit out of Idle until that request
    // reaps or abandons it. Set and checked on the controller only.
    claimed: AtomicBool,
    // Written by the coordinator while the unit is Idle, taken once by the
    // unit's trampoline. The lock is never contended while the state
    // protocol holds.
    work: Mutex<Option<WorkItem>>,
}

impl ProcessingUnit {
    fn new(index: usize, entry: &UnitTopology) -> Self {
        // The controller never takes work, so it sits in Busy for good.
        let initial = if entry.is_current {
            UnitState::Busy
        } else {
            UnitState::Idle
        };
        Self {
            index,
            identity: entry.identity,
            is_controller: entry.is_current,
            enabled: AtomicBool::new(true),
            healthy: AtomicBool::new(entry.healthy),
            state: StateCell::new(initial),
            claimed: AtomicBool::new(false),
            work: Mutex::new(None),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn identity(&self) -> u64 {
        self.identity
    }

    pub fn is_controller(&self) -> bool {
        self.is_controller
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn state(&self) -> UnitState {
        self.state.load()
    }

    pub fn flags(&self) -> UnitStatusFlags {
        let mut flags = UnitStatusFlags::empty();
        flags.set(UnitStatusFlags::CONTROLLER, self.is_controller);
        flags.set(UnitStatusFlags::ENABLED, self.is_enabled());
        flags.set(UnitStatusFlags::HEALTHY, self.is_healthy());
        flags
    }

    pub fn descriptor(&self) -> UnitDescriptor {
        UnitDescriptor {
            index: self.index,
            identity: self.identity,
            flags: self.flags(),
            location: ProcessorLocation::from_identity(self.identity),
        }
    }

    /// Is this unit an eligible dispatch target right now (flags only).
    pub fn is_worker(&self) -> bool {
        !self.is_controller && self.is_enabled()
    }

    pub(crate) fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// False if another in-flight request still owns the unit.
    pub(crate) fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    pub(crate) fn assign(&self, work: WorkItem) {
        *self.work.lock().unwrap_or_else(PoisonError::into_inner) = Some(work);
    }

    pub(crate) fn take_work(&self) -> Option<WorkItem> {
        self.work
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    #[serde(flatten)]
    pub descriptor: UnitDescriptor,
    pub state: UnitState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub total: usize,
    pub enabled: usize,
    pub units: Vec<UnitSnapshot>,
}

impl RegistrySnapshot {
    pub fn count_in(&self, state: UnitState) -> usize {
        self.units.iter().filter(|u| u.state == state).count()
    }
}

/// Table of processing units. Topology and identities are fixed after
/// construction; flags change only on the controller while a unit is Idle.
#[derive(Debug)]
pub struct UnitRegistry {
    units: Vec<ProcessingUnit>,
    controller: usize,
    enabled_count: AtomicUsize,
}

impl UnitRegistry {
    pub fn from_topology(topology: &[UnitTopology]) -> MpResult<Self> {
        if topology.is_empty() {
            return Err(MpError::InvalidArgument("topology lists no units"));
        }

        let mut controller = None;
        let mut seen = HashSet::with_capacity(topology.len());
        for (index, entry) in topology.iter().enumerate() {
            if !seen.insert(entry.identity) {
                return Err(MpError::InvalidArgument("duplicate unit identity"));
            }
            if entry.is_current {
                if controller.is_some() {
                    return Err(MpError::InvalidArgument(
                        "more than one unit claims to be the controller",
                    ));
                }
                controller = Some(index);
            }
        }
        let controller =
            controller.ok_or(MpError::InvalidArgument("topology names no controller"))?;

        let units: Vec<ProcessingUnit> = topology
            .iter()
            .enumerate()
            .map(|(index, entry)| ProcessingUnit::new(index, entry))
            .collect();

        Ok(Self {
            enabled_count: AtomicUsize::new(units.len()),
            units,
            controller,
        })
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn controller_index(&self) -> usize {
        self.controller
    }

    pub fn units(&self) -> &[ProcessingUnit] {
        &self.units
    }

    pub fn unit(&self, index: usize) -> MpResult<&ProcessingUnit> {
        self.units.get(index).ok_or(MpError::NotFound(index))
    }

    /// (total, enabled)
    pub fn count(&self) -> (usize, usize) {
        (self.units.len(), self.enabled_count.load(Ordering::Acquire))
    }

    pub fn describe(&self, index: usize) -> MpResult<UnitDescriptor> {
        Ok(self.unit(index)?.descriptor())
    }

    pub fn lookup(&self, identity: u64) -> Option<usize> {
        self.units.iter().position(|u| u.identity == identity)
    }

    /// Indices of enabled, non-controller units in ascending order.
    pub fn worker_indices(&self) -> Vec<usize> {
        self.units
            .iter()
            .filter(|u| u.is_worker())
            .map(|u| u.index)
            .collect()
    }

    pub fn set_enabled(&self, index: usize, enabled: bool, healthy: Option<bool>) -> MpResult<()> {
        let unit = self.unit(index)?;
        if unit.is_controller {
            return Err(MpError::InvalidArgument(
                "the controller cannot be enabled or disabled",
            ));
        }
        if unit.state() != UnitState::Idle {
            return Err(MpError::Unsupported("unit is busy"));
        }

        let was = unit.enabled.swap(enabled, Ordering::AcqRel);
        match (was, enabled) {
            (false, true) => {
                self.enabled_count.fetch_add(1, Ordering::AcqRel);
            }
            (true, false) => {
                self.enabled_count.fetch_sub(1, Ordering::AcqRel);
            }
            _ => {}
        }
        if let Some(healthy) = healthy {
            unit.healthy.store(healthy, Ordering::Release);
        }

        debug_assert_eq!(
            self.enabled_count.load(Ordering::Acquire),
            self.units.iter().filter(|u| u.is_enabled()).count(),
            "enabled count drifted"
        );
        Ok(())
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let (total, enabled) = self.count();
        RegistrySnapshot {
            total,
            enabled,
            units: self
                .units
                .iter()
                .map(|u| UnitSnapshot {
                    descriptor: u.descriptor(),
                    state: u.state(),
                })
                .collect(),
        }
    }
}
