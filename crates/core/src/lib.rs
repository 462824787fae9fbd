// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod builder;
pub mod config;
pub mod coordinator;
pub mod ledger;
pub mod metrics;
pub mod milestone;
pub mod platform;
pub mod poll;
pub mod registry;
pub mod signal;
pub mod state;

use std::fmt;
use std::sync::Arc;

mod tests;

pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use milestone::LateBootSignal;
pub use registry::{ProcessorLocation, UnitDescriptor, UnitStatusFlags};
pub use signal::{DispatchOutcome, DispatchSignal};
pub use state::UnitState;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MpError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("Operation is restricted to the controller unit")]
    CallerNotController,
    #[error("Unit index {0} is out of range")]
    NotFound(usize),
    /// The executing unit's identity matches no registry entry. This is a
    /// platform configuration fault, not something a caller can retry.
    #[error("Executing unit identity {0:?} is not registered")]
    UnknownIdentity(Option<u64>),
    #[error("No enabled worker unit is available")]
    NotStarted,
    #[error("Unit {0} is not in a dispatchable state")]
    NotReady(usize),
    #[error("Unsupported: {0}")]
    Unsupported(&'static str),
    #[error("Dispatch timed out; unfinished units: {failed:?}")]
    Timeout { failed: Vec<usize> },
    #[error("Out of resources while preparing dispatch bookkeeping")]
    OutOfResources,
}

pub type MpResult<T> = Result<T, MpError>;

/// Caller-supplied procedure run on a worker unit. It receives the opaque
/// argument word stored alongside it.
pub type Procedure = Arc<dyn Fn(usize) + Send + Sync>;

/// A procedure together with its argument.
#[derive(Clone)]
pub struct WorkItem {
    procedure: Procedure,
    argument: usize,
}

impl WorkItem {
    pub fn new<F>(procedure: F, argument: usize) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        Self {
            procedure: Arc::new(procedure),
            argument,
        }
    }

    pub fn from_procedure(procedure: Procedure, argument: usize) -> Self {
        Self {
            procedure,
            argument,
        }
    }

    pub fn argument(&self) -> usize {
        self.argument
    }

    pub fn run(&self) {
        (self.procedure)(self.argument)
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("argument", &format_args!("{:#x}", self.argument))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// One worker at a time, ascending index order.
    Serial,
    /// Every eligible worker at once.
    Parallel,
}

/// How the caller learns that a dispatch is over.
#[derive(Debug, Clone)]
pub enum Completion {
    Blocking,
    Async(Arc<DispatchSignal>),
}

impl Completion {
    pub fn is_async(&self) -> bool {
        matches!(self, Completion::Async(_))
    }
}
