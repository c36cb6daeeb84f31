// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Fan-in rendezvous counter
//!
//! Participants call [`Rendezvous::arrive`] when their share of a tick is
//! done; the coordinator blocks in [`Rendezvous::wait`] until the expected
//! number of arrivals is reached or the timeout expires.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Arrival counter with a bounded blocking wait
#[derive(Debug, Default)]
pub struct Rendezvous {
    arrived: AtomicU32,
    lock: Mutex<()>,
    signal: Condvar,
}

impl Rendezvous {
    /// Create a counter with no arrivals
    pub fn new() -> Self {
        Rendezvous::default()
    }

    /// Record one arrival and wake the coordinator
    ///
    /// Returns the number of arrivals including this one.
    pub fn arrive(&self) -> u32 {
        let count = self.arrived.fetch_add(1, Ordering::AcqRel) + 1;
        // Take the lock so a waiter between its check and its wait cannot miss us
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.signal.notify_all();
        count
    }

    /// Block until at least `expected` arrivals or `timeout` elapses
    ///
    /// Returns `true` if the count was reached.
    pub fn wait(&self, expected: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.arrived.load(Ordering::Acquire) >= expected {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .signal
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Current number of arrivals
    pub fn count(&self) -> u32 {
        self.arrived.load(Ordering::Acquire)
    }

    /// Reset the counter for the next round
    pub fn reset(&self) {
        self.arrived.store(0, Ordering::Release);
    }
}
