// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    All,
    One,
}

/// Trait for observing dispatch events in a modular way.
///
/// Callbacks may arrive on the controller or on the timer context.
pub trait DispatchObserver: fmt::Debug + Send + Sync {
    fn on_dispatch_start(&self, _kind: DispatchKind, _targets: usize) {}
    fn on_unit_activated(&self, _index: usize) {}
    fn on_unit_finished(&self, _index: usize) {}
    fn on_unit_failed(&self, _index: usize) {}
    fn on_dispatch_end(&self, _kind: DispatchKind, _timed_out: bool) {}
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub dispatches: u64,
    pub units_activated: u64,
    pub units_finished: u64,
    pub units_failed: u64,
    pub timeouts: u64,
    pub failures_by_unit: BTreeMap<usize, u64>,
    pub uptime_ms: u128,
}

#[derive(Debug)]
pub struct DispatchMetrics {
    dispatch_count: AtomicU64,
    activated_count: AtomicU64,
    finished_count: AtomicU64,
    failed_count: AtomicU64,
    timeout_count: AtomicU64,
    failures_by_unit: Mutex<BTreeMap<usize, u64>>,
    start_time: Instant,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self {
            dispatch_count: AtomicU64::new(0),
            activated_count: AtomicU64::new(0),
            finished_count: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
            timeout_count: AtomicU64::new(0),
            failures_by_unit: Mutex::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn reset(&self) {
        self.dispatch_count.store(0, Ordering::SeqCst);
        self.activated_count.store(0, Ordering::SeqCst);
        self.finished_count.store(0, Ordering::SeqCst);
        self.failed_count.store(0, Ordering::SeqCst);
        self.timeout_count.store(0, Ordering::SeqCst);
        if let Ok(mut m) = self.failures_by_unit.lock() {
            m.clear();
        }
    }

    pub fn get_dispatches(&self) -> u64 {
        self.dispatch_count.load(Ordering::SeqCst)
    }

    pub fn get_activated(&self) -> u64 {
        self.activated_count.load(Ordering::SeqCst)
    }

    pub fn get_finished(&self) -> u64 {
        self.finished_count.load(Ordering::SeqCst)
    }

    pub fn get_failed(&self) -> u64 {
        self.failed_count.load(Ordering::SeqCst)
    }

    pub fn get_timeouts(&self) -> u64 {
        self.timeout_count.load(Ordering::SeqCst)
    }

    pub fn get_failures_for(&self, index: usize) -> u64 {
        self.failures_by_unit
            .lock()
            .ok()
            .and_then(|m| m.get(&index).copied())
            .unwrap_or(0)
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            dispatches: self.get_dispatches(),
            units_activated: self.get_activated(),
            units_finished: self.get_finished(),
            units_failed: self.get_failed(),
            timeouts: self.get_timeouts(),
            failures_by_unit: self
                .failures_by_unit
                .lock()
                .map(|m| m.clone())
                .unwrap_or_default(),
            uptime_ms: self.start_time.elapsed().as_millis(),
        }
    }
}

impl DispatchObserver for DispatchMetrics {
    fn on_dispatch_start(&self, _kind: DispatchKind, _targets: usize) {
        self.dispatch_count.fetch_add(1, Ordering::SeqCst);
    }

    fn on_unit_activated(&self, _index: usize) {
        self.activated_count.fetch_add(1, Ordering::SeqCst);
    }

    fn on_unit_finished(&self, _index: usize) {
        self.finished_count.fetch_add(1, Ordering::SeqCst);
    }

    fn on_unit_failed(&self, index: usize) {
        self.failed_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut m) = self.failures_by_unit.lock() {
            *m.entry(index).or_insert(0) += 1;
        }
    }

    fn on_dispatch_end(&self, _kind: DispatchKind, timed_out: bool) {
        if timed_out {
            self.timeout_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}
