//! Handoff from the delivery context and the notifier to the control loop.
//!
//! Commands and notify ticks share one FIFO, so a tick never overtakes a
//! command delivered before it.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::command::Request;

/// Unbounded; ingress and the notifier push, the control loop pops.
pub struct RequestQueue {
    inner: Mutex<RequestQueueState>,
    available: Condvar,
}

struct RequestQueueState {
    pending: VecDeque<Request>,
    /// Set once the station is shutting down; later requests are refused.
    closed: bool,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RequestQueueState {
                pending: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue behind everything already pending. A stopped station hands
    /// the request back so the caller can report it as ignored.
    pub fn push(&self, request: Request) -> Result<(), Request> {
        let mut guard = self.inner.lock().expect("request queue mutex poisoned");
        if guard.closed {
            return Err(request);
        }
        guard.pending.push_back(request);
        self.available.notify_one();
        Ok(())
    }

    /// Next pending request, if any.
    #[allow(dead_code)]
    pub fn try_pop(&self) -> Option<Request> {
        let mut guard = self.inner.lock().expect("request queue mutex poisoned");
        guard.pending.pop_front()
    }

    /// Next request for the control loop. `None` only once closed and
    /// every pending request has been handed out.
    pub fn pop_blocking_or_closed(&self) -> Option<Request> {
        let mut guard = self.inner.lock().expect("request queue mutex poisoned");
        loop {
            if let Some(request) = guard.pending.pop_front() {
                return Some(request);
            }
            if guard.closed {
                return None;
            }
            guard = self.available.wait(guard).expect("condvar wait failed");
        }
    }

    /// Refuse further requests and release a control loop waiting for one.
    pub fn close(&self) {
        let mut guard = self.inner.lock().expect("request queue mutex poisoned");
        guard.closed = true;
        self.available.notify_all();
    }

    #[allow(dead_code)]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("request queue mutex poisoned").closed
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        let guard = self.inner.lock().expect("request queue mutex poisoned");
        guard.pending.len()
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}
