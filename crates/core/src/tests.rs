// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

#[cfg(test)]
mod integration_tests {
    use crate::config::CoordinatorConfig;
    use crate::metrics::DispatchMetrics;
    use crate::platform::{
        EntryPoint, HwError, Platform, TimerCallback, TimerControl, TimerHandle, TimerService,
    };
    use crate::registry::UnitTopology;
    use crate::{
        Completion, Coordinator, DispatchMode, DispatchOutcome, DispatchSignal, LateBootSignal,
        MpError, UnitState, UnitStatusFlags, WorkItem,
    };
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Platform whose units run on the activating thread, or are parked until
    /// released. Identity is whatever `run_as` last installed.
    struct ManualPlatform {
        identities: Vec<u64>,
        current: Mutex<Option<u64>>,
        hold: AtomicBool,
        refuse: Mutex<Vec<usize>>,
        activations: Mutex<Vec<usize>>,
        held: Mutex<Vec<(usize, EntryPoint)>>,
    }

    impl ManualPlatform {
        fn new(units: usize) -> Arc<Self> {
            let identities: Vec<u64> = (0..units as u64).map(|i| 0x10 + i).collect();
            Arc::new(Self {
                current: Mutex::new(identities.first().copied()),
                identities,
                hold: AtomicBool::new(false),
                refuse: Mutex::new(Vec::new()),
                activations: Mutex::new(Vec::new()),
                held: Mutex::new(Vec::new()),
            })
        }

        fn run_as<R>(&self, index: usize, f: impl FnOnce() -> R) -> R {
            let prev = self.current.lock().unwrap().replace(self.identities[index]);
            let out = f();
            *self.current.lock().unwrap() = prev;
            out
        }

        fn release_held(&self) {
            let held = std::mem::take(&mut *self.held.lock().unwrap());
            for (index, entry) in held {
                self.run_as(index, || entry());
            }
        }

        fn activations(&self) -> Vec<usize> {
            self.activations.lock().unwrap().clone()
        }
    }

    impl Platform for ManualPlatform {
        fn topology(&self) -> Vec<UnitTopology> {
            self.identities
                .iter()
                .enumerate()
                .map(|(i, &identity)| UnitTopology {
                    identity,
                    is_current: i == 0,
                    healthy: true,
                })
                .collect()
        }

        fn current_identity(&self) -> Option<u64> {
            *self.current.lock().unwrap()
        }

        fn activate(&self, index: usize, entry: EntryPoint) -> Result<(), HwError> {
            if self.refuse.lock().unwrap().contains(&index) {
                return Err(HwError::Rejected(index));
            }
            self.activations.lock().unwrap().push(index);
            if self.hold.load(Ordering::SeqCst) {
                self.held.lock().unwrap().push((index, entry));
            } else {
                self.run_as(index, || entry());
            }
            Ok(())
        }

        fn publish(&self, _addr: usize, _len: usize) {}
    }

    /// Sleeps cost nothing; periodic callbacks run inline until they cancel.
    #[derive(Default)]
    struct FakeTimer {
        slept_us: AtomicU64,
    }

    impl TimerService for FakeTimer {
        fn sleep_us(&self, us: u64) {
            self.slept_us.fetch_add(us, Ordering::SeqCst);
        }

        fn every_us(
            &self,
            period_us: u64,
            mut callback: TimerCallback,
        ) -> Result<TimerHandle, HwError> {
            let handle = TimerHandle::new();
            while callback() == TimerControl::Continue {
                self.slept_us.fetch_add(period_us, Ordering::SeqCst);
            }
            handle.cancel();
            Ok(handle)
        }
    }

    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            poll_quantum_us: 50,
        }
    }

    fn setup(units: usize) -> (Arc<ManualPlatform>, Arc<FakeTimer>, Coordinator) {
        let platform = ManualPlatform::new(units);
        let timer = Arc::new(FakeTimer::default());
        let coordinator = Coordinator::builder(platform.clone(), timer.clone())
            .config(config())
            .build()
            .unwrap();
        (platform, timer, coordinator)
    }

    fn noop() -> WorkItem {
        WorkItem::new(|_| {}, 0)
    }

    fn worker_states(coordinator: &Coordinator) -> Vec<UnitState> {
        coordinator
            .snapshot()
            .units
            .iter()
            .skip(1)
            .map(|u| u.state)
            .collect()
    }

    #[test]
    fn test_counts_and_descriptors() {
        let (_, _, coordinator) = setup(4);
        assert_eq!(coordinator.get_unit_count().unwrap(), (4, 4));

        let controller = coordinator.describe_unit(0).unwrap();
        assert!(controller.flags.contains(UnitStatusFlags::CONTROLLER));
        assert_eq!(controller.identity, 0x10);
        assert_eq!(coordinator.describe_unit(9), Err(MpError::NotFound(9)));
        assert_eq!(coordinator.identify_self(), Ok(0));
    }

    #[test]
    fn test_serial_runs_in_ascending_order() {
        let (platform, _, coordinator) = setup(4);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let p = platform.clone();
        let s = seen.clone();
        let work = WorkItem::new(
            move |_| {
                if let Some(id) = p.current_identity() {
                    s.lock().unwrap().push(id);
                }
            },
            0,
        );

        let result = coordinator.dispatch_all(work, DispatchMode::Serial, 0, Completion::Blocking);
        assert_eq!(result, Ok(None));
        assert_eq!(*seen.lock().unwrap(), vec![0x11, 0x12, 0x13]);
        assert_eq!(platform.activations(), vec![1, 2, 3]);
        assert_eq!(worker_states(&coordinator), vec![UnitState::Idle; 3]);
        assert_eq!(coordinator.snapshot().units[0].state, UnitState::Busy);
    }

    #[test]
    fn test_parallel_counter() {
        let (_, _, coordinator) = setup(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let work = WorkItem::new(
            move |step| {
                c.fetch_add(step, Ordering::SeqCst);
            },
            1,
        );

        let result = coordinator.dispatch_all(work, DispatchMode::Parallel, 0, Completion::Blocking);
        assert_eq!(result, Ok(None));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_disabled_units_are_skipped() {
        let (platform, _, coordinator) = setup(4);
        coordinator.set_enabled(2, false, None).unwrap();
        assert_eq!(coordinator.get_unit_count().unwrap(), (4, 3));

        let result = coordinator.dispatch_all(noop(), DispatchMode::Parallel, 0, Completion::Blocking);
        assert_eq!(result, Ok(None));
        assert_eq!(platform.activations(), vec![1, 3]);
    }

    #[test]
    fn test_no_workers_is_not_started() {
        let (_, _, single) = setup(1);
        assert_eq!(
            single.dispatch_all(noop(), DispatchMode::Parallel, 0, Completion::Blocking),
            Err(MpError::NotStarted)
        );

        let (_, _, coordinator) = setup(3);
        coordinator.set_enabled(1, false, None).unwrap();
        coordinator.set_enabled(2, false, None).unwrap();
        assert_eq!(
            coordinator.dispatch_all(noop(), DispatchMode::Serial, 0, Completion::Blocking),
            Err(MpError::NotStarted)
        );
    }

    #[test]
    fn test_timeout_reports_unfinished_units() {
        let (platform, timer, coordinator) = setup(4);
        platform.hold.store(true, Ordering::SeqCst);

        let result = coordinator.dispatch_all(noop(), DispatchMode::Parallel, 100, Completion::Blocking);
        assert_eq!(
            result,
            Err(MpError::Timeout {
                failed: vec![1, 2, 3]
            })
        );
        assert_eq!(timer.slept_us.load(Ordering::SeqCst), 100);
        assert_eq!(worker_states(&coordinator), vec![UnitState::Idle; 3]);
    }

    #[test]
    fn test_serial_timeout_lists_blocked_units() {
        let (platform, _, coordinator) = setup(4);
        platform.hold.store(true, Ordering::SeqCst);

        let result = coordinator.dispatch_all(noop(), DispatchMode::Serial, 200, Completion::Blocking);
        assert_eq!(
            result,
            Err(MpError::Timeout {
                failed: vec![1, 2, 3]
            })
        );
        // Only the first unit was ever activated.
        assert_eq!(platform.activations(), vec![1]);
    }

    #[test]
    fn test_stale_worker_after_timeout() {
        let (platform, _, coordinator) = setup(3);
        platform.hold.store(true, Ordering::SeqCst);
        let result = coordinator.dispatch_all(noop(), DispatchMode::Parallel, 50, Completion::Blocking);
        assert!(matches!(result, Err(MpError::Timeout { .. })));

        // The abandoned workers eventually run and report Finished on Idle units.
        platform.hold.store(false, Ordering::SeqCst);
        platform.release_held();
        assert_eq!(worker_states(&coordinator), vec![UnitState::Finished; 2]);

        assert_eq!(
            coordinator.dispatch_all(noop(), DispatchMode::Parallel, 0, Completion::Blocking),
            Err(MpError::NotReady(1))
        );
        assert!(matches!(
            coordinator.set_enabled(1, false, None),
            Err(MpError::Unsupported(_))
        ));

        // A single-unit dispatch reaps the stale completion first.
        coordinator
            .dispatch_one(noop(), 2, 0, Completion::Blocking)
            .unwrap();
        assert_eq!(worker_states(&coordinator), vec![UnitState::Finished, UnitState::Idle]);
    }

    #[test]
    fn test_activation_failure_is_recorded() {
        for mode in [DispatchMode::Parallel, DispatchMode::Serial] {
            let (platform, _, coordinator) = setup(4);
            platform.refuse.lock().unwrap().push(2);

            let result = coordinator.dispatch_all(noop(), mode, 0, Completion::Blocking);
            assert_eq!(result, Ok(Some(vec![2])), "{:?}", mode);
            assert_eq!(platform.activations(), vec![1, 3], "{:?}", mode);
            assert_eq!(worker_states(&coordinator), vec![UnitState::Idle; 3]);
        }
    }

    #[test]
    fn test_dispatch_one_rejections() {
        let (platform, _, coordinator) = setup(4);

        assert!(matches!(
            coordinator.dispatch_one(noop(), 0, 0, Completion::Blocking),
            Err(MpError::InvalidArgument(_))
        ));
        assert_eq!(
            coordinator.dispatch_one(noop(), 7, 0, Completion::Blocking),
            Err(MpError::NotFound(7))
        );

        coordinator.set_enabled(2, false, None).unwrap();
        let before = coordinator.snapshot();
        assert!(matches!(
            coordinator.dispatch_one(noop(), 2, 1000, Completion::Blocking),
            Err(MpError::InvalidArgument(_))
        ));
        assert_eq!(coordinator.snapshot(), before);
        assert!(platform.activations().is_empty());
    }

    #[test]
    fn test_dispatch_one_activation_failure() {
        let (platform, _, coordinator) = setup(3);
        platform.refuse.lock().unwrap().push(1);

        assert_eq!(
            coordinator.dispatch_one(noop(), 1, 0, Completion::Blocking),
            Err(MpError::NotReady(1))
        );
        assert_eq!(worker_states(&coordinator), vec![UnitState::Idle; 2]);
    }

    #[test]
    fn test_async_dispatch_one_activation_failure_leaves_signal() {
        let (platform, _, coordinator) = setup(3);
        let signal = Arc::new(DispatchSignal::new());
        coordinator
            .dispatch_one(noop(), 2, 0, Completion::Async(signal.clone()))
            .unwrap();
        assert!(signal.is_signaled());

        platform.refuse.lock().unwrap().push(1);
        assert_eq!(
            coordinator.dispatch_one(noop(), 1, 0, Completion::Async(signal.clone())),
            Err(MpError::NotReady(1))
        );
        // The earlier completion is still there to collect.
        assert!(signal.is_signaled());
        assert!(signal.finished());
        assert_eq!(
            signal.take_outcome(),
            Some(DispatchOutcome {
                timed_out: false,
                failed_units: None
            })
        );

        // The failed attempt released the unit.
        platform.refuse.lock().unwrap().clear();
        coordinator
            .dispatch_one(noop(), 1, 0, Completion::Blocking)
            .unwrap();
        assert_eq!(worker_states(&coordinator), vec![UnitState::Idle; 2]);
    }

    #[test]
    fn test_dispatch_one_blocking() {
        let (platform, _, coordinator) = setup(3);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let work = WorkItem::new(
            move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            },
            0,
        );
        coordinator
            .dispatch_one(work, 2, 0, Completion::Blocking)
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(platform.activations(), vec![2]);

        platform.hold.store(true, Ordering::SeqCst);
        assert_eq!(
            coordinator.dispatch_one(noop(), 1, 100, Completion::Blocking),
            Err(MpError::Timeout { failed: vec![1] })
        );
    }

    #[test]
    fn test_async_completion() {
        let (_, _, coordinator) = setup(4);
        let signal = Arc::new(DispatchSignal::new());

        let result = coordinator.dispatch_all(
            noop(),
            DispatchMode::Parallel,
            0,
            Completion::Async(signal.clone()),
        );
        assert_eq!(result, Ok(None));
        assert!(signal.is_signaled());
        assert!(signal.finished());
        assert_eq!(
            signal.take_outcome(),
            Some(DispatchOutcome {
                timed_out: false,
                failed_units: None
            })
        );
    }

    #[test]
    fn test_async_timeout_delivers_ledger() {
        let (platform, _, coordinator) = setup(4);
        platform.hold.store(true, Ordering::SeqCst);
        let signal = Arc::new(DispatchSignal::new());

        coordinator
            .dispatch_all(
                noop(),
                DispatchMode::Parallel,
                100,
                Completion::Async(signal.clone()),
            )
            .unwrap();
        assert!(signal.is_signaled());
        assert!(!signal.finished());
        assert_eq!(
            signal.take_outcome(),
            Some(DispatchOutcome {
                timed_out: true,
                failed_units: Some(vec![1, 2, 3])
            })
        );

        let one = Arc::new(DispatchSignal::new());
        platform.held.lock().unwrap().clear();
        coordinator
            .dispatch_one(noop(), 1, 100, Completion::Async(one.clone()))
            .unwrap();
        assert!(one.is_signaled());
        assert!(!one.finished());
    }

    #[test]
    fn test_late_boot_locks_async_only() {
        let platform = ManualPlatform::new(3);
        let late_boot = Arc::new(LateBootSignal::new());
        let coordinator = Coordinator::builder(platform, Arc::new(FakeTimer::default()))
            .config(config())
            .late_boot(late_boot.clone())
            .build()
            .unwrap();

        late_boot.fire();
        assert!(coordinator.is_async_locked());

        let signal = Arc::new(DispatchSignal::new());
        assert!(matches!(
            coordinator.dispatch_all(
                noop(),
                DispatchMode::Parallel,
                0,
                Completion::Async(signal.clone())
            ),
            Err(MpError::Unsupported(_))
        ));
        assert!(matches!(
            coordinator.dispatch_one(noop(), 1, 0, Completion::Async(signal.clone())),
            Err(MpError::Unsupported(_))
        ));
        assert!(!signal.is_signaled());

        assert_eq!(
            coordinator.dispatch_all(noop(), DispatchMode::Parallel, 0, Completion::Blocking),
            Ok(None)
        );
    }

    #[test]
    fn test_controller_only_operations() {
        let (platform, _, coordinator) = setup(3);

        platform.run_as(2, || {
            assert_eq!(coordinator.identify_self(), Ok(2));
            assert_eq!(coordinator.get_unit_count(), Err(MpError::CallerNotController));
            assert_eq!(coordinator.describe_unit(1), Err(MpError::CallerNotController));
            assert_eq!(
                coordinator.set_enabled(1, false, None),
                Err(MpError::CallerNotController)
            );
            assert_eq!(
                coordinator.dispatch_all(noop(), DispatchMode::Parallel, 0, Completion::Blocking),
                Err(MpError::CallerNotController)
            );
            assert_eq!(
                coordinator.dispatch_one(noop(), 1, 0, Completion::Blocking),
                Err(MpError::CallerNotController)
            );
            // Snapshots are readable everywhere.
            assert_eq!(coordinator.snapshot().total, 3);
        });

        *platform.current.lock().unwrap() = Some(0x999);
        assert_eq!(
            coordinator.identify_self(),
            Err(MpError::UnknownIdentity(Some(0x999)))
        );
        assert_eq!(coordinator.get_unit_count(), Err(MpError::CallerNotController));
    }

    #[test]
    fn test_build_must_run_on_controller() {
        let platform = ManualPlatform::new(3);
        let result = platform.run_as(1, || {
            Coordinator::builder(platform.clone(), Arc::new(FakeTimer::default())).build()
        });
        assert!(matches!(result, Err(MpError::CallerNotController)));

        let zero = Coordinator::builder(platform, Arc::new(FakeTimer::default()))
            .config(CoordinatorConfig { poll_quantum_us: 0 })
            .build();
        assert!(matches!(zero, Err(MpError::InvalidArgument(_))));
    }

    #[test]
    fn test_switch_controller_is_unsupported() {
        let (_, _, coordinator) = setup(3);
        assert!(matches!(
            coordinator.switch_controller(1, true),
            Err(MpError::Unsupported(_))
        ));
        assert_eq!(coordinator.controller_index(), 0);
    }

    #[test]
    fn test_metrics_observer() {
        let platform = ManualPlatform::new(4);
        platform.refuse.lock().unwrap().push(3);
        let metrics = Arc::new(DispatchMetrics::new());
        let coordinator = Coordinator::builder(platform, Arc::new(FakeTimer::default()))
            .config(config())
            .observer(metrics.clone())
            .build()
            .unwrap();

        let result = coordinator.dispatch_all(noop(), DispatchMode::Parallel, 0, Completion::Blocking);
        assert_eq!(result, Ok(Some(vec![3])));

        let summary = metrics.summary();
        assert_eq!(summary.dispatches, 1);
        assert_eq!(summary.units_activated, 2);
        assert_eq!(summary.units_finished, 2);
        assert_eq!(summary.units_failed, 1);
        assert_eq!(summary.timeouts, 0);
        assert_eq!(metrics.get_failures_for(3), 1);
    }
}
