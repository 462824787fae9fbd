// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{MpError, MpResult, UnitState};

/// Units that did not complete one dispatch, in first-observed order.
///
/// Unit counts are small, so membership is a linear scan.
#[derive(Debug, Clone)]
pub struct FailureLedger {
    controller: usize,
    failed: Vec<usize>,
}

impl FailureLedger {
    /// Reserves room for every unit up front so that recording never
    /// allocates mid-flight.
    pub fn with_capacity(controller: usize, units: usize) -> MpResult<Self> {
        let mut failed = Vec::new();
        failed
            .try_reserve_exact(units)
            .map_err(|_| MpError::OutOfResources)?;
        Ok(Self { controller, failed })
    }

    /// Record `index` as failed given the state it was last observed in.
    /// Returns whether the entry was added.
    pub fn record(&mut self, index: usize, observed: UnitState) -> bool {
        if index == self.controller || observed.is_quiescent() || self.contains(index) {
            return false;
        }
        self.failed.push(index);
        true
    }

    pub fn contains(&self, index: usize) -> bool {
        self.failed.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failed.is_empty()
    }

    /// Hand the entries to the caller. `None` means nothing failed.
    pub fn drain(&mut self) -> Option<Vec<usize>> {
        if self.failed.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.failed))
        }
    }
}
