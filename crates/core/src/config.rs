// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::poll::DEFAULT_POLL_QUANTUM_US;
use mpdispatch_config::CoordinatorSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Re-check interval of both poll drivers, in microseconds.
    pub poll_quantum_us: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_quantum_us: DEFAULT_POLL_QUANTUM_US,
        }
    }
}

impl From<&CoordinatorSettings> for CoordinatorConfig {
    fn from(settings: &CoordinatorSettings) -> Self {
        Self {
            poll_quantum_us: settings.poll_quantum_us,
        }
    }
}
