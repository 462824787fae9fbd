// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Per-unit dispatch state.
//!
//! Each unit owns exactly one state word. At any moment a single side writes
//! it: the coordinator moves a unit out of `Idle` and reaps it back, the
//! unit's own trampoline marks itself `Busy` and then `Finished`. Nothing
//! arbitrates between writers at runtime; the split below is the protocol.

use std::sync::atomic::{AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Idle = 0,
    Ready = 1,
    Blocked = 2,
    Busy = 3,
    Finished = 4,
}

impl UnitState {
    pub fn from_raw(val: u8) -> Self {
        match val {
            1 => UnitState::Ready,
            2 => UnitState::Blocked,
            3 => UnitState::Busy,
            4 => UnitState::Finished,
            _ => UnitState::Idle,
        }
    }

    /// Idle or Finished: the unit holds no outstanding work.
    pub fn is_quiescent(self) -> bool {
        matches!(self, UnitState::Idle | UnitState::Finished)
    }
}

/// Which side performs a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Writer {
    Coordinator,
    Unit,
}

/// Transition table of the single-writer protocol.
pub fn is_permitted(writer: Writer, from: UnitState, to: UnitState) -> bool {
    use UnitState::*;
    match writer {
        Writer::Coordinator => matches!(
            (from, to),
            (Idle, Ready) | (Idle, Blocked) | (Blocked, Ready) | (Finished, Idle)
        ),
        Writer::Unit => matches!((from, to), (Ready, Busy) | (Busy, Finished)),
    }
}

/// The shared state word of one unit.
#[derive(Debug)]
pub struct StateCell {
    raw: AtomicU8,
}

impl StateCell {
    pub fn new(state: UnitState) -> Self {
        Self {
            raw: AtomicU8::new(state as u8),
        }
    }

    pub fn load(&self) -> UnitState {
        UnitState::from_raw(self.raw.load(Ordering::Acquire))
    }

    /// Coordinator-side transition. `from` is the state the coordinator last
    /// observed; anything outside the table is a bug in the coordinator.
    pub(crate) fn advance(&self, from: UnitState, to: UnitState) {
        debug_assert!(
            is_permitted(Writer::Coordinator, from, to),
            "coordinator may not move a unit {:?} -> {:?}",
            from,
            to
        );
        self.raw.store(to as u8, Ordering::Release);
    }

    /// Terminal bookkeeping after a deadline or a failed activation: the
    /// coordinator takes the word back regardless of where the unit got to.
    /// The unit's thread may still be running.
    pub(crate) fn abandon(&self) -> UnitState {
        UnitState::from_raw(self.raw.swap(UnitState::Idle as u8, Ordering::AcqRel))
    }

    /// Unit-side write. Not checked: a unit abandoned after a deadline still
    /// finishes eventually and writes over whatever the coordinator left.
    pub(crate) fn mark(&self, to: UnitState) {
        debug_assert!(matches!(to, UnitState::Busy | UnitState::Finished));
        self.raw.store(to as u8, Ordering::Release);
    }
}
