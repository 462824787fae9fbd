// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Code a worker unit runs after activation.

use super::Shared;
use crate::UnitState;
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, warn};

/// Take the assigned work, run it, report Finished and return (park).
/// Never calls back into the coordinator.
pub(crate) fn unit_entry(shared: &Shared) {
    let index = match shared.identify_self() {
        Ok(index) => index,
        Err(e) => {
            error!("Activated unit cannot find itself in the registry: {}", e);
            return;
        }
    };
    let unit = &shared.registry.units()[index];

    unit.state.mark(UnitState::Busy);
    shared.publish(unit);

    match unit.take_work() {
        Some(work) => {
            if panic::catch_unwind(AssertUnwindSafe(|| work.run())).is_err() {
                error!("Work item panicked on unit {}", index);
            }
        }
        None => warn!("Unit {} activated with no work assigned", index),
    }

    unit.state.mark(UnitState::Finished);
    shared.publish(unit);
}
