//! One-shot notification awaited with a bounded wait.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A flag that flips once from unset to set and wakes every waiter.
pub struct Signal {
    fired: Mutex<bool>,
    changed: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self {
            fired: Mutex::new(false),
            changed: Condvar::new(),
        }
    }

    pub fn fire(&self) {
        let mut guard = self.fired.lock().expect("signal mutex poisoned");
        *guard = true;
        self.changed.notify_all();
    }

    #[allow(dead_code)]
    pub fn is_fired(&self) -> bool {
        *self.fired.lock().expect("signal mutex poisoned")
    }

    /// Wait until fired or `timeout` elapses; returns whether it fired.
    /// A timeout past the end of the clock waits without a deadline.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = self.fired.lock().expect("signal mutex poisoned");
        while !*guard {
            let Some(deadline) = deadline else {
                guard = self.changed.wait(guard).expect("condvar wait failed");
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            // Spurious wakeups loop back and re-check the deadline.
            let (next, _) = self
                .changed
                .wait_timeout(guard, deadline - now)
                .expect("condvar wait failed");
            guard = next;
        }
        true
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}
