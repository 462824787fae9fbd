// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Controller-side entry points.
//!
//! Every operation except [`Coordinator::identify_self`] and
//! [`Coordinator::snapshot`] is restricted to the controller unit. Validation
//! happens before any unit leaves Idle; once a dispatch is committed it
//! always resolves, either by returning or by firing its signal.

mod request;
mod trampoline;

use crate::config::CoordinatorConfig;
use crate::ledger::FailureLedger;
use crate::metrics::{DispatchKind, DispatchObserver};
use crate::milestone::LateBootSignal;
use crate::platform::{publish_value, EntryPoint, HwError, Platform, TimerService};
use crate::poll::{Deadline, PollLoop, PollStatus};
use crate::registry::{ProcessingUnit, RegistrySnapshot, UnitRegistry};
use crate::{
    Completion, DispatchMode, DispatchOutcome, MpError, MpResult, UnitDescriptor, UnitState,
    WorkItem,
};
use request::{AllRequest, SingleRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State shared between the controller, the timer context and worker
/// trampolines.
pub(crate) struct Shared {
    pub(crate) registry: UnitRegistry,
    platform: Arc<dyn Platform>,
    timer: Arc<dyn TimerService>,
    observers: Vec<Arc<dyn DispatchObserver>>,
    async_locked: AtomicBool,
    config: CoordinatorConfig,
}

impl Shared {
    pub(crate) fn identify_self(&self) -> MpResult<usize> {
        let identity = self.platform.current_identity();
        identity
            .and_then(|id| self.registry.lookup(id))
            .ok_or(MpError::UnknownIdentity(identity))
    }

    fn ensure_controller(&self) -> MpResult<()> {
        match self.identify_self() {
            Ok(index) if index == self.registry.controller_index() => Ok(()),
            _ => Err(MpError::CallerNotController),
        }
    }

    pub(crate) fn publish(&self, unit: &ProcessingUnit) {
        publish_value(self.platform.as_ref(), unit);
    }

    pub(crate) fn notify(&self, event: impl Fn(&dyn DispatchObserver)) {
        for observer in &self.observers {
            event(observer.as_ref());
        }
    }

    /// Assign `work` to the unit and activate it. On failure the work slot
    /// is cleared again; the caller owns the state rollback.
    pub(crate) fn launch(self: &Arc<Self>, index: usize, work: &WorkItem) -> Result<(), HwError> {
        let unit = &self.registry.units()[index];
        unit.assign(work.clone());
        self.publish(unit);

        let shared = Arc::clone(self);
        let entry: EntryPoint = Arc::new(move || trampoline::unit_entry(&shared));
        match self.platform.activate(index, entry) {
            Ok(()) => {
                debug!("Activated unit {}", index);
                self.notify(|o| o.on_unit_activated(index));
                Ok(())
            }
            Err(e) => {
                warn!("Activation of unit {} failed: {}", index, e);
                unit.take_work();
                self.publish(unit);
                Err(e)
            }
        }
    }

    fn lock_async(&self) {
        if !self.async_locked.swap(true, Ordering::AcqRel) {
            info!("Late boot reached; asynchronous dispatch is now disabled");
        }
    }
}

pub struct CoordinatorBuilder {
    platform: Arc<dyn Platform>,
    timer: Arc<dyn TimerService>,
    config: CoordinatorConfig,
    observers: Vec<Arc<dyn DispatchObserver>>,
    late_boot: Option<Arc<LateBootSignal>>,
}

impl CoordinatorBuilder {
    pub fn new(platform: Arc<dyn Platform>, timer: Arc<dyn TimerService>) -> Self {
        Self {
            platform,
            timer,
            config: CoordinatorConfig::default(),
            observers: Vec::new(),
            late_boot: None,
        }
    }

    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Subscribe to the late-boot milestone that latches async dispatch off.
    pub fn late_boot(mut self, signal: Arc<LateBootSignal>) -> Self {
        self.late_boot = Some(signal);
        self
    }

    /// Build the registry from the platform topology. Must run on the
    /// unit the topology marks as current.
    pub fn build(self) -> MpResult<Coordinator> {
        let registry = UnitRegistry::from_topology(&self.platform.topology())?;
        if self.config.poll_quantum_us == 0 {
            return Err(MpError::InvalidArgument("poll quantum must be nonzero"));
        }

        let shared = Arc::new(Shared {
            registry,
            platform: self.platform,
            timer: self.timer,
            observers: self.observers,
            async_locked: AtomicBool::new(false),
            config: self.config,
        });
        shared.ensure_controller()?;

        if let Some(signal) = self.late_boot {
            let weak = Arc::downgrade(&shared);
            signal.subscribe(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.lock_async();
                }
            });
        }

        let (total, _) = shared.registry.count();
        info!(
            "Coordinator ready: {} unit(s), controller is unit {}",
            total,
            shared.registry.controller_index()
        );
        Ok(Coordinator { shared })
    }
}

/// Dispatch coordinator. One per boot.
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Coordinator {
    pub fn builder(platform: Arc<dyn Platform>, timer: Arc<dyn TimerService>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(platform, timer)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.shared.config
    }

    pub fn controller_index(&self) -> usize {
        self.shared.registry.controller_index()
    }

    pub fn is_async_locked(&self) -> bool {
        self.shared.async_locked.load(Ordering::Acquire)
    }

    /// (total, enabled)
    pub fn get_unit_count(&self) -> MpResult<(usize, usize)> {
        self.shared.ensure_controller()?;
        Ok(self.shared.registry.count())
    }

    pub fn describe_unit(&self, index: usize) -> MpResult<UnitDescriptor> {
        self.shared.ensure_controller()?;
        self.shared.registry.describe(index)
    }

    /// Index of the unit executing the caller. Callable from any unit.
    pub fn identify_self(&self) -> MpResult<usize> {
        self.shared.identify_self()
    }

    /// Diagnostic view of every unit. Callable from any unit; the states are
    /// sampled one by one, not atomically as a whole.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.shared.registry.snapshot()
    }

    pub fn set_enabled(&self, index: usize, enabled: bool, healthy: Option<bool>) -> MpResult<()> {
        self.shared.ensure_controller()?;
        self.shared.registry.set_enabled(index, enabled, healthy)?;
        debug!(
            "Unit {} enabled: {}, healthy: {:?}",
            index, enabled, healthy
        );
        Ok(())
    }

    /// Moving the controller role is not supported.
    pub fn switch_controller(&self, target: usize, keep_old_enabled: bool) -> MpResult<()> {
        debug!(
            "switch_controller(target: {}, keep_old_enabled: {}) rejected",
            target, keep_old_enabled
        );
        Err(MpError::Unsupported("controller role cannot migrate"))
    }

    fn check_async_allowed(&self, completion: &Completion) -> MpResult<()> {
        if completion.is_async() && self.is_async_locked() {
            return Err(MpError::Unsupported(
                "asynchronous dispatch is disabled after late boot",
            ));
        }
        Ok(())
    }

    /// Run `work` on every enabled worker unit.
    ///
    /// Blocking: returns the units that failed, `None` when all finished, or
    /// `Timeout` carrying the unfinished units. Async: returns `Ok(None)`
    /// at once and delivers the ledger through the signal.
    pub fn dispatch_all(
        &self,
        work: WorkItem,
        mode: DispatchMode,
        timeout_us: u64,
        completion: Completion,
    ) -> MpResult<Option<Vec<usize>>> {
        let shared = &self.shared;
        shared.ensure_controller()?;
        self.check_async_allowed(&completion)?;

        let registry = &shared.registry;
        let targets = registry.worker_indices();
        if targets.is_empty() {
            return Err(MpError::NotStarted);
        }
        for &index in &targets {
            let unit = &registry.units()[index];
            match unit.state() {
                UnitState::Idle if !unit.is_claimed() => {}
                UnitState::Finished if !unit.is_claimed() => {
                    warn!(
                        "Unit {} finished after its dispatch was abandoned; dispatch_one to it reaps the completion",
                        index
                    );
                    return Err(MpError::NotReady(index));
                }
                _ => return Err(MpError::NotReady(index)),
            }
        }
        let ledger = FailureLedger::with_capacity(registry.controller_index(), registry.len())?;

        debug!(
            "dispatch_all: {} target(s), {:?}, timeout {}us",
            targets.len(),
            mode,
            timeout_us
        );
        shared.notify(|o| o.on_dispatch_start(DispatchKind::All, targets.len()));

        let mut request = AllRequest::new(Arc::clone(shared), work, mode, targets, ledger);
        request.commit();
        let deadline = Deadline::new(timeout_us);
        let quantum_us = shared.config.poll_quantum_us;

        match completion {
            Completion::Blocking => {
                request.start();
                let (request, status) =
                    PollLoop::new(request, deadline, quantum_us).run_blocking(shared.timer.as_ref());
                match (status, request.finish(status)) {
                    (PollStatus::TimedOut, Some(failed)) => Err(MpError::Timeout { failed }),
                    (_, failed) => Ok(failed),
                }
            }
            Completion::Async(signal) => {
                signal.arm();
                request.start();
                PollLoop::new(request, deadline, quantum_us).run_async(
                    shared.timer.as_ref(),
                    move |request, status| {
                        let timed_out = status == PollStatus::TimedOut;
                        let failed_units = request.finish(status);
                        signal.fire(
                            DispatchOutcome {
                                timed_out,
                                failed_units,
                            },
                            !timed_out,
                        );
                    },
                );
                Ok(None)
            }
        }
    }

    /// Run `work` on unit `target`.
    ///
    /// Blocking: `Ok(())` once the unit finished, `Timeout` otherwise. Async:
    /// `Ok(())` at once; the signal's `finished` flag turns true only if the
    /// unit finished before the deadline.
    pub fn dispatch_one(
        &self,
        work: WorkItem,
        target: usize,
        timeout_us: u64,
        completion: Completion,
    ) -> MpResult<()> {
        let shared = &self.shared;
        shared.ensure_controller()?;
        self.check_async_allowed(&completion)?;

        let unit = shared.registry.unit(target)?;
        if unit.is_controller() {
            return Err(MpError::InvalidArgument("cannot dispatch to the controller"));
        }
        if !unit.is_enabled() {
            return Err(MpError::InvalidArgument("target unit is disabled"));
        }
        let observed = unit.state();
        if !observed.is_quiescent() || !unit.try_claim() {
            return Err(MpError::NotReady(target));
        }

        debug!("dispatch_one: unit {}, timeout {}us", target, timeout_us);
        shared.notify(|o| o.on_dispatch_start(DispatchKind::One, 1));

        if observed == UnitState::Finished {
            unit.state.advance(UnitState::Finished, UnitState::Idle);
        }
        unit.state.advance(UnitState::Idle, UnitState::Ready);
        shared.publish(unit);

        if shared.launch(target, &work).is_err() {
            unit.state.abandon();
            shared.publish(unit);
            unit.release();
            shared.notify(|o| o.on_unit_failed(target));
            shared.notify(|o| o.on_dispatch_end(DispatchKind::One, false));
            return Err(MpError::NotReady(target));
        }

        let request = SingleRequest::new(Arc::clone(shared), target);
        let poll = PollLoop::new(request, Deadline::new(timeout_us), shared.config.poll_quantum_us);

        match completion {
            Completion::Blocking => {
                let (request, status) = poll.run_blocking(shared.timer.as_ref());
                if request.finish(status) {
                    Ok(())
                } else {
                    Err(MpError::Timeout {
                        failed: vec![target],
                    })
                }
            }
            Completion::Async(signal) => {
                signal.arm();
                poll.run_async(shared.timer.as_ref(), move |request, status| {
                    let finished = request.finish(status);
                    signal.fire(
                        DispatchOutcome {
                            timed_out: !finished,
                            failed_units: (!finished).then(|| vec![target]),
                        },
                        finished,
                    );
                });
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (total, enabled) = self.shared.registry.count();
        f.debug_struct("Coordinator")
            .field("total", &total)
            .field("enabled", &enabled)
            .field("controller", &self.controller_index())
            .field("async_locked", &self.is_async_locked())
            .finish()
    }
}
