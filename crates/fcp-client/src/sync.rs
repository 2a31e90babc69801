//! Poison-tolerant synchronisation helpers.
//!
//! Ticket state is written by the coordinator and read by arbitrary caller
//! threads. A panicking caller must not wedge the engine, so lock poisoning
//! is recovered rather than propagated: the protected values are plain
//! flags and result slots that stay consistent under any interleaving.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Locks a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A one-shot completion signal.
///
/// Starts unset; [`Signal::set`] is sticky. Waiters can block forever or
/// until a deadline.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    state: Mutex<bool>,
    condvar: Condvar,
}

impl Signal {
    /// Sets the signal and wakes every waiter.
    pub(crate) fn set(&self) {
        let mut state = lock_unpoisoned(&self.state);
        *state = true;
        drop(state);
        self.condvar.notify_all();
    }

    /// Non-blocking check.
    pub(crate) fn is_set(&self) -> bool {
        *lock_unpoisoned(&self.state)
    }

    /// Blocks until the signal is set.
    pub(crate) fn wait(&self) {
        let mut state = lock_unpoisoned(&self.state);
        while !*state {
            state = self
                .condvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until the signal is set or the deadline passes. Returns true
    /// when the signal was observed set.
    pub(crate) fn wait_deadline(&self, deadline: Instant) -> bool {
        let mut state = lock_unpoisoned(&self.state);
        while !*state {
            let now = Instant::now();
            let Some(remaining) = deadline.checked_duration_since(now).filter(|d| !d.is_zero())
            else {
                return false;
            };
            let (guard, _timeout) = self
                .condvar
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn set_is_sticky_and_wakes_waiters() {
        let signal = Arc::new(Signal::default());
        assert!(!signal.is_set());

        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait())
        };
        thread::sleep(Duration::from_millis(20));
        signal.set();
        waiter.join().expect("waiter joins");
        assert!(signal.is_set());
        // A late waiter returns immediately.
        signal.wait();
    }

    #[test]
    fn deadline_wait_times_out_when_unset() {
        let signal = Signal::default();
        let deadline = Instant::now() + Duration::from_millis(30);
        assert!(!signal.wait_deadline(deadline));
    }

    #[test]
    fn deadline_wait_observes_a_timely_set() {
        let signal = Arc::new(Signal::default());
        let setter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                signal.set();
            })
        };
        assert!(signal.wait_deadline(Instant::now() + Duration::from_secs(2)));
        setter.join().expect("setter joins");
    }
}
