// Copyright 2025 Scriptweb Authors
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

//! Invocation gate.
//!
//! Every call into the interpreter goes through [`InvocationGate::acquire`].
//! The returned guard holds the gate mutex for the whole invocation, so at
//! most one call is in flight per interpreter. The same mutex protects the
//! alive flag: once [`InvocationGate::mark_dead`] returns, no further guard
//! can be issued and no in-flight guard remains.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use scriptweb_common::{BridgeError, Result};

#[derive(Debug)]
struct GateState {
    alive: bool,
}

/// Point-in-time view of the gate counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateStats {
    /// Invocations currently holding the gate (0 or 1).
    pub active: usize,
    /// Highest `active` value ever observed.
    pub peak: usize,
    /// Invocations admitted since creation.
    pub total: u64,
}

#[derive(Debug)]
pub struct InvocationGate {
    state: Mutex<GateState>,
    active: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicU64,
}

impl Default for InvocationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl InvocationGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState { alive: true }),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            total: AtomicU64::new(0),
        }
    }

    /// Blocks until the gate is free, then admits the caller.
    ///
    /// Blocks the calling thread only. Callers on an async executor must
    /// move to a blocking thread first.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InterpreterShutDown`] once the gate has been marked
    /// dead.
    pub fn acquire(&self) -> Result<GateGuard<'_>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.alive {
            return Err(BridgeError::InterpreterShutDown);
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);

        Ok(GateGuard {
            gate: self,
            _state: state,
        })
    }

    /// Clears the alive flag. Waits for the in-flight invocation, if any.
    ///
    /// Returns `true` if this call performed the transition.
    pub fn mark_dead(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut state.alive, false)
    }

    pub fn is_alive(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .alive
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            active: self.active.load(Ordering::SeqCst),
            peak: self.peak.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
        }
    }
}

/// Exclusive admission to the interpreter. Released on drop.
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a InvocationGate,
    _state: MutexGuard<'a, GateState>,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        // Runs before `_state` is dropped, so the counter is back to zero
        // before the next caller can be admitted.
        self.gate.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_acquire_and_release() {
        let gate = InvocationGate::new();
        {
            let _guard = gate.acquire().unwrap();
            assert_eq!(gate.stats().active, 1);
        }
        let stats = gate.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.peak, 1);
        assert_eq!(stats.total, 1);
    }

    #[test]
    fn test_concurrent_callers_never_overlap() {
        let gate = Arc::new(InvocationGate::new());
        let inside = Arc::new(AtomicBool::new(false));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let inside = inside.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        let _guard = gate.acquire().unwrap();
                        assert!(!inside.swap(true, Ordering::SeqCst), "two callers inside the gate");
                        thread::yield_now();
                        inside.store(false, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        let stats = gate.stats();
        assert_eq!(stats.peak, 1);
        assert_eq!(stats.total, 200);
        assert_eq!(stats.active, 0);
    }

    #[test]
    fn test_acquire_after_mark_dead_fails() {
        let gate = InvocationGate::new();
        assert!(gate.mark_dead());
        assert!(!gate.mark_dead());
        assert!(!gate.is_alive());
        assert!(matches!(
            gate.acquire(),
            Err(BridgeError::InterpreterShutDown)
        ));
        assert_eq!(gate.stats().total, 0);
    }

    #[test]
    fn test_mark_dead_waits_for_in_flight_call() {
        let gate = Arc::new(InvocationGate::new());
        let finished = Arc::new(AtomicBool::new(false));

        let guard_holder = {
            let gate = gate.clone();
            let finished = finished.clone();
            let (started_tx, started_rx) = std::sync::mpsc::channel();
            let handle = thread::spawn(move || {
                let _guard = gate.acquire().unwrap();
                started_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(100));
                finished.store(true, Ordering::SeqCst);
            });
            started_rx.recv().unwrap();
            handle
        };

        gate.mark_dead();
        assert!(finished.load(Ordering::SeqCst));
        guard_holder.join().unwrap();
    }
}
