//! Publish/subscribe transport boundary and an in-process loopback bus.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::error::TransportError;

/// Callbacks invoked on the transport's delivery context.
pub trait DeliveryHandler: Send + Sync {
    fn deliver(&self, topic: &str, payload: &[u8]);

    /// A subscription request was acknowledged by the broker.
    fn subscribed(&self);

    fn connection_lost(&self, cause: &str);
}

pub trait Transport: Send + Sync {
    /// Connect and route inbound traffic to `handler`; bounded by `timeout`.
    fn connect(&self, handler: Arc<dyn DeliveryHandler>, timeout: Duration) -> Result<(), TransportError>;

    fn subscribe(&self, topics: &[&str]) -> Result<(), TransportError>;

    /// Fire-and-forget publish.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    fn disconnect(&self);
}

struct ClientSlot {
    name: String,
    handler: Option<Arc<dyn DeliveryHandler>>,
    topics: HashSet<String>,
}

#[derive(Default)]
struct BusState {
    clients: Vec<ClientSlot>,
    published: Vec<(String, Vec<u8>)>,
}

/// In-process broker connecting several stations in one process.
///
/// Delivery happens synchronously on the publishing thread, after the bus
/// lock has been released.
#[derive(Clone, Default)]
pub struct LoopbackBus {
    state: Arc<Mutex<BusState>>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self, name: impl Into<String>) -> LoopbackClient {
        let mut state = self.state.lock().expect("bus mutex poisoned");
        state.clients.push(ClientSlot {
            name: name.into(),
            handler: None,
            topics: HashSet::new(),
        });
        LoopbackClient {
            bus: self.clone(),
            index: state.clients.len() - 1,
            reachable: true,
            ack_subscriptions: true,
        }
    }

    /// Every message published so far, in order.
    #[allow(dead_code)]
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().expect("bus mutex poisoned").published.clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .expect("bus mutex poisoned")
            .published
            .iter()
            .filter(|(published, _)| published == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    fn route(&self, topic: &str, payload: &[u8]) {
        let targets: Vec<Arc<dyn DeliveryHandler>> = {
            let mut state = self.state.lock().expect("bus mutex poisoned");
            state.published.push((topic.to_string(), payload.to_vec()));
            state
                .clients
                .iter()
                .filter(|client| client.topics.contains(topic))
                .filter_map(|client| client.handler.clone())
                .collect()
        };
        for handler in targets {
            handler.deliver(topic, payload);
        }
    }

    fn handler_of(&self, index: usize) -> Option<Arc<dyn DeliveryHandler>> {
        self.state.lock().expect("bus mutex poisoned").clients[index].handler.clone()
    }
}

/// One station's connection to a `LoopbackBus`.
pub struct LoopbackClient {
    bus: LoopbackBus,
    index: usize,
    reachable: bool,
    ack_subscriptions: bool,
}

impl LoopbackClient {
    /// Fail every connect attempt, as if the broker were down.
    #[allow(dead_code)]
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Accept subscriptions without ever acknowledging them.
    #[allow(dead_code)]
    pub fn without_subscription_acks(mut self) -> Self {
        self.ack_subscriptions = false;
        self
    }

    /// Deliver a message straight to this client, bypassing subscriptions.
    pub fn inject(&self, topic: &str, payload: &[u8]) {
        if let Some(handler) = self.bus.handler_of(self.index) {
            handler.deliver(topic, payload);
        }
    }

    #[allow(dead_code)]
    pub fn drop_connection(&self, cause: &str) {
        if let Some(handler) = self.bus.handler_of(self.index) {
            handler.connection_lost(cause);
        }
    }
}

impl Transport for LoopbackClient {
    fn connect(&self, handler: Arc<dyn DeliveryHandler>, timeout: Duration) -> Result<(), TransportError> {
        if !self.reachable {
            return Err(TransportError::ConnectTimeout(timeout));
        }
        let mut state = self.bus.state.lock().expect("bus mutex poisoned");
        let slot = &mut state.clients[self.index];
        debug!(client = %slot.name, "loopback connect");
        slot.handler = Some(handler);
        Ok(())
    }

    fn subscribe(&self, topics: &[&str]) -> Result<(), TransportError> {
        let handler = {
            let mut state = self.bus.state.lock().expect("bus mutex poisoned");
            let slot = &mut state.clients[self.index];
            let Some(handler) = slot.handler.clone() else {
                return Err(TransportError::Closed);
            };
            slot.topics.extend(topics.iter().map(|topic| topic.to_string()));
            handler
        };
        if self.ack_subscriptions {
            handler.subscribed();
        }
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.bus.handler_of(self.index).is_none() {
            return Err(TransportError::Closed);
        }
        self.bus.route(topic, &payload);
        Ok(())
    }

    fn disconnect(&self) {
        let mut state = self.bus.state.lock().expect("bus mutex poisoned");
        let slot = &mut state.clients[self.index];
        slot.handler = None;
        slot.topics.clear();
    }
}

/// Handler for clients that only publish.
#[cfg(test)]
pub(crate) struct Discard;

#[cfg(test)]
impl DeliveryHandler for Discard {
    fn deliver(&self, _topic: &str, _payload: &[u8]) {}

    fn subscribed(&self) {}

    fn connection_lost(&self, _cause: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        delivered: Mutex<Vec<String>>,
        acks: AtomicUsize,
        lost: AtomicUsize,
    }

    impl DeliveryHandler for Recorder {
        fn deliver(&self, topic: &str, _payload: &[u8]) {
            self.delivered.lock().unwrap().push(topic.to_string());
        }

        fn subscribed(&self) {
            self.acks.fetch_add(1, Ordering::SeqCst);
        }

        fn connection_lost(&self, _cause: &str) {
            self.lost.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn only_subscribed_clients_receive() {
        let bus = LoopbackBus::new();
        let sender = bus.client("sender");
        let listener = bus.client("listener");
        let bystander = bus.client("bystander");
        let heard = Arc::new(Recorder::default());
        let ignored = Arc::new(Recorder::default());

        sender.connect(Arc::new(Recorder::default()), Duration::from_secs(1)).unwrap();
        listener.connect(heard.clone(), Duration::from_secs(1)).unwrap();
        bystander.connect(ignored.clone(), Duration::from_secs(1)).unwrap();
        listener.subscribe(&["a/b"]).unwrap();
        bystander.subscribe(&["c/d"]).unwrap();

        sender.publish("a/b", b"{}".to_vec()).unwrap();

        assert_eq!(*heard.delivered.lock().unwrap(), vec!["a/b".to_string()]);
        assert!(ignored.delivered.lock().unwrap().is_empty());
        assert_eq!(heard.acks.load(Ordering::SeqCst), 1);
        assert_eq!(bus.published_on("a/b").len(), 1);
    }

    #[test]
    fn unreachable_client_times_out() {
        let bus = LoopbackBus::new();
        let client = bus.client("offline").unreachable();
        let result = client.connect(Arc::new(Recorder::default()), Duration::from_millis(5));
        assert!(matches!(result, Err(TransportError::ConnectTimeout(_))));
        assert!(matches!(client.publish("a/b", Vec::new()), Err(TransportError::Closed)));
    }

    #[test]
    fn silent_client_never_acks_and_inject_bypasses_topics() {
        let bus = LoopbackBus::new();
        let client = bus.client("quiet").without_subscription_acks();
        let recorder = Arc::new(Recorder::default());
        client.connect(recorder.clone(), Duration::from_secs(1)).unwrap();
        client.subscribe(&["a/b"]).unwrap();
        client.inject("x/y", b"{}");
        client.drop_connection("cable pulled");

        assert_eq!(recorder.acks.load(Ordering::SeqCst), 0);
        assert_eq!(*recorder.delivered.lock().unwrap(), vec!["x/y".to_string()]);
        assert_eq!(recorder.lost.load(Ordering::SeqCst), 1);
    }
}
