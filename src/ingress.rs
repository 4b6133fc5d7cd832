//! Command ingress: decode, filter and enqueue inbound messages.
//!
//! Runs on the transport's delivery context. It never blocks beyond the
//! queue's short critical section and never touches hardware.

use std::collections::HashMap;
use std::collections::hash_map::{DefaultHasher, Entry};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::codec::Codec;
use crate::command::Request;
use crate::error::{CodecError, DecodeError, ProtocolError};
use crate::freshness::Freshness;
use crate::request_queue::RequestQueue;
use crate::signal::Signal;
use crate::transport::DeliveryHandler;
use crate::types::StationKind;

/// Invoked when a message arrives on a topic the station never subscribed to.
pub type FatalHook = Box<dyn Fn(&ProtocolError) + Send + Sync>;

/// What happened to one inbound message that was not fatal.
#[derive(Debug)]
pub enum RouteOutcome {
    Queued,
    Stale,
    Duplicate,
    /// Valid command on a shared topic, meant for another station kind.
    NotAddressed,
    Dropped(DecodeError),
    /// The control loop has shut down.
    Closed,
}

/// Remembers recently accepted messages to drop verbatim redeliveries.
struct ReplayGuard {
    window: Duration,
    seen: Mutex<HashMap<u64, Instant>>,
}

impl ReplayGuard {
    fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    fn first_sighting(&self, topic: &str, payload: &[u8]) -> bool {
        let mut hasher = DefaultHasher::new();
        topic.hash(&mut hasher);
        payload.hash(&mut hasher);
        let key = hasher.finish();

        let now = Instant::now();
        let mut seen = self.seen.lock().expect("replay guard mutex poisoned");
        seen.retain(|_, at| now.duration_since(*at) < self.window);
        match seen.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }
}

pub struct IngressRouter {
    kind: StationKind,
    codec: Codec,
    freshness: Freshness,
    queue: Arc<RequestQueue>,
    replay: ReplayGuard,
    subscribed: Arc<Signal>,
    on_fatal: FatalHook,
}

impl IngressRouter {
    pub fn new(kind: StationKind, codec: Codec, freshness: Freshness, queue: Arc<RequestQueue>) -> Self {
        let window = Duration::try_from_secs_f64(freshness.max_age_s.max(0.0)).unwrap_or(Duration::MAX);
        Self {
            kind,
            codec,
            freshness,
            queue,
            replay: ReplayGuard::new(window),
            subscribed: Arc::new(Signal::new()),
            on_fatal: Box::new(|_| std::process::exit(1)),
        }
    }

    /// Replace the default fatal action (exit with status 1).
    pub fn with_fatal_hook(mut self, hook: FatalHook) -> Self {
        self.on_fatal = hook;
        self
    }

    /// Fired on the first subscription acknowledgment.
    pub fn subscribed_signal(&self) -> Arc<Signal> {
        Arc::clone(&self.subscribed)
    }

    pub fn route(&self, topic: &str, payload: &[u8]) -> Result<RouteOutcome, ProtocolError> {
        if !self.kind.subscribes_to(topic) {
            return Err(ProtocolError {
                topic: topic.to_string(),
            });
        }
        let command = match self.codec.decode(topic, payload) {
            Ok(command) => command,
            Err(CodecError::Protocol(err)) => return Err(err),
            Err(CodecError::Decode(err)) => return Ok(RouteOutcome::Dropped(err)),
        };
        match self.freshness.check(&command.ts) {
            Ok(true) => {}
            Ok(false) => return Ok(RouteOutcome::Stale),
            Err(err) => return Ok(RouteOutcome::Dropped(err)),
        }
        if !command.kind.is_for(self.kind) {
            return Ok(RouteOutcome::NotAddressed);
        }
        if !self.replay.first_sighting(topic, payload) {
            return Ok(RouteOutcome::Duplicate);
        }
        match self.queue.push(Request::Command(command)) {
            Ok(()) => Ok(RouteOutcome::Queued),
            Err(_) => Ok(RouteOutcome::Closed),
        }
    }
}

impl DeliveryHandler for IngressRouter {
    fn deliver(&self, topic: &str, payload: &[u8]) {
        match self.route(topic, payload) {
            Ok(RouteOutcome::Queued) => debug!(station = %self.kind, topic, "queued"),
            Ok(RouteOutcome::Stale) => debug!(station = %self.kind, topic, "stale command dropped"),
            Ok(RouteOutcome::Duplicate) => debug!(station = %self.kind, topic, "duplicate dropped"),
            Ok(RouteOutcome::NotAddressed) => {
                debug!(station = %self.kind, topic, "command for another station ignored")
            }
            Ok(RouteOutcome::Dropped(err)) => warn!(station = %self.kind, topic, %err, "dropped message"),
            Ok(RouteOutcome::Closed) => debug!(station = %self.kind, topic, "station shut down, message ignored"),
            Err(err) => {
                error!(station = %self.kind, %err, "subscription mismatch, terminating");
                (self.on_fatal)(&err);
            }
        }
    }

    fn subscribed(&self) {
        self.subscribed.fire();
    }

    fn connection_lost(&self, cause: &str) {
        warn!(station = %self.kind, cause, "connection lost");
    }
}
