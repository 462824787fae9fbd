// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::Shared;
use crate::ledger::FailureLedger;
use crate::metrics::DispatchKind;
use crate::poll::{PollStatus, Pollable, Progress};
use crate::{DispatchMode, UnitState, WorkItem};
use std::sync::Arc;
use tracing::{debug, warn};

/// Bookkeeping for one `dispatch_all` call.
pub(crate) struct AllRequest {
    shared: Arc<Shared>,
    work: WorkItem,
    mode: DispatchMode,
    targets: Vec<usize>,
    // Per target: reaped or abandoned by this request and released. A settled
    // unit may already be running someone else's work.
    settled: Vec<bool>,
    ledger: FailureLedger,
    start_count: usize,
    finish_count: usize,
}

impl AllRequest {
    pub(crate) fn new(
        shared: Arc<Shared>,
        work: WorkItem,
        mode: DispatchMode,
        targets: Vec<usize>,
        ledger: FailureLedger,
    ) -> Self {
        Self {
            settled: vec![false; targets.len()],
            shared,
            work,
            mode,
            targets,
            ledger,
            start_count: 0,
            finish_count: 0,
        }
    }

    /// Claim every target and move it out of Idle. The caller has checked
    /// that all of them are Idle and unclaimed, so this cannot fail part way.
    pub(crate) fn commit(&mut self) {
        for (pos, &index) in self.targets.iter().enumerate() {
            let unit = &self.shared.registry.units()[index];
            let claimed = unit.try_claim();
            debug_assert!(claimed, "unit {} already claimed", index);
            let to = match self.mode {
                DispatchMode::Serial if pos > 0 => UnitState::Blocked,
                _ => UnitState::Ready,
            };
            unit.state.advance(UnitState::Idle, to);
            self.shared.publish(unit);
        }
    }

    /// Activate whatever `commit` left in Ready.
    pub(crate) fn start(&mut self) {
        match self.mode {
            DispatchMode::Parallel => {
                for pos in 0..self.targets.len() {
                    self.launch(pos);
                }
            }
            DispatchMode::Serial => {
                if !self.targets.is_empty() && !self.launch(0) {
                    self.promote_next();
                }
            }
        }
    }

    fn launch(&mut self, pos: usize) -> bool {
        let index = self.targets[pos];
        match self.shared.launch(index, &self.work) {
            Ok(()) => {
                self.start_count += 1;
                true
            }
            Err(_) => {
                let unit = &self.shared.registry.units()[index];
                let observed = unit.state.abandon();
                self.shared.publish(unit);
                self.settle(pos);
                self.record_failure(index, observed);
                false
            }
        }
    }

    fn settle(&mut self, pos: usize) {
        self.settled[pos] = true;
        self.shared.registry.units()[self.targets[pos]].release();
    }

    /// Serial mode: hand the work to the lowest-indexed Blocked unit. Units
    /// whose activation fails are skipped.
    fn promote_next(&mut self) {
        let shared = Arc::clone(&self.shared);
        loop {
            let next = (0..self.targets.len()).find(|&pos| {
                !self.settled[pos]
                    && shared.registry.units()[self.targets[pos]].state() == UnitState::Blocked
            });
            let Some(pos) = next else {
                break;
            };
            let unit = &shared.registry.units()[self.targets[pos]];
            unit.state.advance(UnitState::Blocked, UnitState::Ready);
            shared.publish(unit);
            if self.launch(pos) {
                break;
            }
        }
    }

    fn record_failure(&mut self, index: usize, observed: UnitState) {
        if self.ledger.record(index, observed) {
            self.shared.notify(|o| o.on_unit_failed(index));
        }
    }

    /// Terminal step: record whatever did not finish, reap every target this
    /// request still owns and hand the ledger over.
    pub(crate) fn finish(mut self, status: PollStatus) -> Option<Vec<usize>> {
        let shared = Arc::clone(&self.shared);
        for pos in 0..self.targets.len() {
            if self.settled[pos] {
                continue;
            }
            let index = self.targets[pos];
            let unit = &shared.registry.units()[index];
            let observed = unit.state.abandon();
            unit.take_work();
            shared.publish(unit);
            self.settle(pos);
            match observed {
                UnitState::Finished => {
                    self.finish_count += 1;
                    shared.notify(|o| o.on_unit_finished(index));
                }
                UnitState::Idle => {}
                _ => {
                    warn!("Unit {} abandoned in state {:?}", index, observed);
                    self.record_failure(index, observed);
                }
            }
        }

        let timed_out = status == PollStatus::TimedOut;
        debug!(
            "dispatch_all done: started {}, finished {}, failed {}, timed out: {}",
            self.start_count,
            self.finish_count,
            self.ledger.len(),
            timed_out
        );
        shared.notify(|o| o.on_dispatch_end(DispatchKind::All, timed_out));
        self.ledger.drain()
    }
}

impl Pollable for AllRequest {
    fn check_and_advance(&mut self) -> Progress {
        let shared = Arc::clone(&self.shared);
        for pos in 0..self.targets.len() {
            if self.settled[pos] {
                continue;
            }
            let index = self.targets[pos];
            let unit = &shared.registry.units()[index];
            if unit.state() != UnitState::Finished {
                continue;
            }
            unit.state.advance(UnitState::Finished, UnitState::Idle);
            shared.publish(unit);
            self.settle(pos);
            self.finish_count += 1;
            debug_assert!(self.finish_count <= self.start_count);
            debug!("Unit {} finished ({}/{})", index, self.finish_count, self.start_count);
            shared.notify(|o| o.on_unit_finished(index));

            if self.mode == DispatchMode::Serial {
                self.promote_next();
            }
        }

        if self.settled.iter().all(|&s| s) {
            Progress::Complete
        } else {
            Progress::Pending
        }
    }
}

/// Bookkeeping for one `dispatch_one` call.
pub(crate) struct SingleRequest {
    shared: Arc<Shared>,
    index: usize,
    finished: bool,
}

impl SingleRequest {
    pub(crate) fn new(shared: Arc<Shared>, index: usize) -> Self {
        Self {
            shared,
            index,
            finished: false,
        }
    }

    /// Reap the unit if this request still owns it and report whether it
    /// finished.
    pub(crate) fn finish(mut self, status: PollStatus) -> bool {
        let unit = &self.shared.registry.units()[self.index];
        if !self.finished {
            let observed = unit.state.abandon();
            unit.take_work();
            self.shared.publish(unit);
            unit.release();
            match observed {
                UnitState::Finished => {
                    self.finished = true;
                    self.shared.notify(|o| o.on_unit_finished(self.index));
                }
                _ => {
                    warn!("Unit {} abandoned in state {:?}", self.index, observed);
                    self.shared.notify(|o| o.on_unit_failed(self.index));
                }
            }
        }

        let timed_out = status == PollStatus::TimedOut && !self.finished;
        debug!("dispatch_one on unit {} done, finished: {}", self.index, self.finished);
        self.shared
            .notify(|o| o.on_dispatch_end(DispatchKind::One, timed_out));
        self.finished
    }
}

impl Pollable for SingleRequest {
    fn check_and_advance(&mut self) -> Progress {
        let unit = &self.shared.registry.units()[self.index];
        if !self.finished && unit.state() == UnitState::Finished {
            unit.state.advance(UnitState::Finished, UnitState::Idle);
            self.shared.publish(unit);
            unit.release();
            self.finished = true;
            self.shared.notify(|o| o.on_unit_finished(self.index));
        }
        if self.finished {
            Progress::Complete
        } else {
            Progress::Pending
        }
    }
}
