//! Sleep/wake handshake between the producer and the worker.
//!
//! One signed atomic carries both the pending-work count and the
//! "producer is waiting for a drain" flag so a single CAS can acknowledge
//! work and observe the waiter at the same time. `-1` marks a worker that
//! has drained and gone idle, whether blocked on the wake semaphore or
//! looping through idle presents; any wake from that state leaves the count
//! strictly positive so the worker re-checks the ring instead of going
//! straight back to sleep.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Counting semaphore on top of `Mutex`/`Condvar`.
pub(crate) struct Semaphore {
    count: Mutex<u32>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, u32> {
        match self.count.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn post(&self) {
        let mut count = self.lock();
        *count += 1;
        self.cond.notify_one();
    }

    pub fn wait(&self) {
        let mut count = self.lock();
        while *count == 0 {
            count = match self.cond.wait(count) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        *count -= 1;
    }

    #[cfg(test)]
    pub fn available(&self) -> u32 {
        *self.lock()
    }
}

const CPU_THREAD_WAITING: i32 = 0x4000_0000;
const SLEEPING: i32 = -1;

fn work_count(state: i32) -> i32 {
    state & !CPU_THREAD_WAITING
}

pub(crate) struct WakeCoordinator {
    state: AtomicI32,
    wake_sem: Semaphore,
    done_sem: Semaphore,
    spin_window: Duration,
}

impl WakeCoordinator {
    pub fn new(spin_window: Duration) -> Self {
        Self {
            state: AtomicI32::new(0),
            wake_sem: Semaphore::new(),
            done_sem: Semaphore::new(),
            spin_window,
        }
    }

    /// Producer: note pending work, waking the worker if it was sleeping.
    pub fn wake_consumer(&self) {
        if self.state.fetch_add(2, Ordering::Release) < 0 {
            self.wake_sem.post();
        }
    }

    /// Producer: wait until the worker has drained everything committed so
    /// far. With `spin` set, polls for a bounded window before blocking.
    pub fn sync(&self, spin: bool) {
        if spin {
            let deadline = Instant::now() + self.spin_window;
            loop {
                if work_count(self.state.load(Ordering::Acquire)) < 0 {
                    return;
                }
                if Instant::now() >= deadline {
                    break;
                }
                std::hint::spin_loop();
            }
        }

        let mut value = self.state.load(Ordering::Acquire);
        loop {
            // The worker going to sleep implies it drained the ring.
            if work_count(value) < 0 {
                return;
            }
            match self.state.compare_exchange_weak(
                value,
                value | CPU_THREAD_WAITING,
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => value = current,
            }
        }
        self.done_sem.wait();
    }

    /// Worker: acknowledge queued work or go idle.
    ///
    /// Returns `true` if work was queued since the last check (the caller
    /// must re-scan the ring; this includes being woken from sleep), `false`
    /// if the worker should run an idle iteration instead of sleeping.
    pub fn try_sleep(&self, allow_sleep: bool) -> bool {
        loop {
            let mut old = self.state.load(Ordering::Relaxed);
            loop {
                // Work queued: absorb the count, keep the waiter flag (the
                // ring re-scan is not a drain). No work: publish the sleeping
                // state; whether we then actually block is up to the caller.
                let new = if work_count(old) > 0 {
                    old & CPU_THREAD_WAITING
                } else {
                    SLEEPING
                };
                match self.state.compare_exchange_weak(
                    old,
                    new,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(current) => old = current,
                }
            }

            if work_count(old) > 0 {
                return true;
            }

            // Drained: release a producer blocked in `sync`. The sleeping
            // sentinel is all ones; re-entering with it set (run-idle loop)
            // never carries a real waiter.
            if old != SLEEPING && old & CPU_THREAD_WAITING != 0 {
                self.done_sem.post();
            }

            if !allow_sleep {
                return false;
            }
            self.wake_sem.wait();
        }
    }

    #[cfg(test)]
    fn state(&self) -> i32 {
        self.state.load(Ordering::SeqCst)
    }
}
