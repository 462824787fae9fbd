// MpDispatch - Multiprocessor Dispatch Coordinator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

type Subscriber = Box<dyn FnOnce() + Send>;

/// One-shot "late boot reached" event.
///
/// Subscribers run once, on the context that fires the event. Subscribing
/// after it fired runs the subscriber immediately.
#[derive(Default)]
pub struct LateBootSignal {
    fired: AtomicBool,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl LateBootSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.has_fired() {
            drop(subscribers);
            subscriber();
        } else {
            subscribers.push(Box::new(subscriber));
        }
    }

    pub fn fire(&self) {
        let pending = {
            let mut subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self.fired.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *subscribers)
        };
        debug!("Late boot milestone reached, {} subscriber(s)", pending.len());
        for subscriber in pending {
            subscriber();
        }
    }
}

impl fmt::Debug for LateBootSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LateBootSignal")
            .field("fired", &self.has_fired())
            .finish_non_exhaustive()
    }
}
