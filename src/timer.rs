// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present NORI Contributors

//! One-shot inactivity timers.
//!
//! A [`TimerWheel`] runs one worker thread per IPCP; [`Timer`] handles are
//! re-armed from the data path and fire their callback on the worker.
//! Cancellation is try-cancel only: a caller never waits for a running
//! callback, it just learns whether one was in flight. Callbacks take the
//! per-flow DTP lock themselves, so the data path must not hold that lock
//! while waiting on the worker (it never does: arming is a channel send).

use crossbeam_channel::{RecvTimeoutError, Sender, unbounded};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of [`Timer::try_cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryCancel {
    /// The timer was armed and has been disarmed.
    WasActive,
    /// The callback is executing right now; it has not been waited for.
    WasRunning,
    /// The timer was not armed.
    Idle,
}

struct TimerShared {
    cb: Box<dyn Fn() + Send + Sync>,
    generation: AtomicU64,
    armed: AtomicBool,
    running: AtomicBool,
}

enum Cmd {
    Arm {
        timer: Weak<TimerShared>,
        generation: u64,
        when: Instant,
    },
    Shutdown,
}

struct Pending {
    when: Instant,
    seq: u64,
    timer: Weak<TimerShared>,
    generation: u64,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest deadline.
        other
            .when
            .cmp(&self.when)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Shared timer worker for one IPCP.
pub struct TimerWheel {
    tx: Sender<Cmd>,
    worker: Option<thread::JoinHandle<()>>,
}

impl TimerWheel {
    /// Spawns the worker thread.
    pub fn new() -> Self {
        let (tx, rx) = unbounded::<Cmd>();
        let worker = thread::Builder::new()
            .name("nori-timers".into())
            .spawn(move || {
                let mut pending: BinaryHeap<Pending> = BinaryHeap::new();
                let mut seq = 0u64;
                loop {
                    let now = Instant::now();
                    while pending.peek().is_some_and(|p| p.when <= now) {
                        let p = pending.pop().unwrap();
                        let Some(timer) = p.timer.upgrade() else {
                            continue;
                        };
                        // A stale generation means the timer was cancelled
                        // or re-armed after this entry was queued.
                        if timer.generation.load(Ordering::SeqCst) != p.generation {
                            continue;
                        }
                        if timer.armed.swap(false, Ordering::SeqCst) {
                            timer.running.store(true, Ordering::SeqCst);
                            (timer.cb)();
                            timer.running.store(false, Ordering::SeqCst);
                        }
                    }

                    let cmd = match pending.peek() {
                        Some(p) => {
                            let wait = p.when.saturating_duration_since(Instant::now());
                            match rx.recv_timeout(wait) {
                                Ok(cmd) => cmd,
                                Err(RecvTimeoutError::Timeout) => continue,
                                Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                        None => match rx.recv() {
                            Ok(cmd) => cmd,
                            Err(_) => break,
                        },
                    };

                    match cmd {
                        Cmd::Arm {
                            timer,
                            generation,
                            when,
                        } => {
                            seq += 1;
                            pending.push(Pending {
                                when,
                                seq,
                                timer,
                                generation,
                            });
                        }
                        Cmd::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn timer worker");
        Self {
            tx,
            worker: Some(worker),
        }
    }

    /// Creates a one-shot timer whose callback runs on this wheel's worker.
    pub fn timer(&self, cb: impl Fn() + Send + Sync + 'static) -> Timer {
        Timer {
            shared: Arc::new(TimerShared {
                cb: Box::new(cb),
                generation: AtomicU64::new(0),
                armed: AtomicBool::new(false),
                running: AtomicBool::new(false),
            }),
            tx: self.tx.clone(),
        }
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerWheel {
    fn drop(&mut self) {
        let _ = self.tx.send(Cmd::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Handle to a one-shot timer. Re-arming replaces the previous deadline.
pub struct Timer {
    shared: Arc<TimerShared>,
    tx: Sender<Cmd>,
}

impl Timer {
    /// Arms (or re-arms) the timer to fire once after `after`.
    pub fn schedule(&self, after: Duration) {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.armed.store(true, Ordering::SeqCst);
        let _ = self.tx.send(Cmd::Arm {
            timer: Arc::downgrade(&self.shared),
            generation,
            when: Instant::now() + after,
        });
    }

    /// Disarms the timer without waiting for a callback already in flight.
    pub fn try_cancel(&self) -> TryCancel {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let was_armed = self.shared.armed.swap(false, Ordering::SeqCst);
        if self.shared.running.load(Ordering::SeqCst) {
            TryCancel::WasRunning
        } else if was_armed {
            TryCancel::WasActive
        } else {
            TryCancel::Idle
        }
    }
}
