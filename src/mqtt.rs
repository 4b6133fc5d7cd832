//! MQTT adapter for the transport boundary.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rumqttc::{Client, ConnAck, Connection, Event, MqttOptions, Outgoing, Packet, QoS};
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::signal::Signal;
use crate::transport::{DeliveryHandler, Transport};

const KEEP_ALIVE: Duration = Duration::from_secs(20);
const REQUEST_CAPACITY: usize = 64;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Broker address and credentials.
#[derive(Clone, Debug)]
pub struct MqttEndpoint {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

/// Topics this client asked for; replayed when the broker forgets them.
#[derive(Clone, Default)]
struct Subscriptions {
    topics: Arc<Mutex<Vec<String>>>,
}

impl Subscriptions {
    fn record(&self, topics: &[&str]) {
        let mut recorded = self.topics.lock().expect("subscription list mutex poisoned");
        for topic in topics {
            if !recorded.iter().any(|known| known == topic) {
                recorded.push(topic.to_string());
            }
        }
    }

    /// Topics to subscribe again after `ack`. A resumed session keeps them.
    fn to_restore(&self, ack: &ConnAck) -> Vec<String> {
        if ack.session_present {
            return Vec::new();
        }
        self.topics.lock().expect("subscription list mutex poisoned").clone()
    }
}

pub struct MqttTransport {
    endpoint: MqttEndpoint,
    client: Mutex<Option<Client>>,
    subscriptions: Subscriptions,
}

impl MqttTransport {
    pub fn new(endpoint: MqttEndpoint) -> Self {
        Self {
            endpoint,
            client: Mutex::new(None),
            subscriptions: Subscriptions::default(),
        }
    }

    fn with_client<T>(&self, f: impl FnOnce(&Client) -> Result<T, rumqttc::ClientError>) -> Result<T, TransportError> {
        let guard = self.client.lock().expect("mqtt client mutex poisoned");
        let client = guard.as_ref().ok_or(TransportError::Closed)?;
        f(client).map_err(|err| TransportError::Client(err.to_string()))
    }
}

/// The event-loop thread's side of the connection.
struct EventPump {
    client: Client,
    handler: Arc<dyn DeliveryHandler>,
    connected: Arc<Signal>,
    subscriptions: Subscriptions,
}

impl EventPump {
    /// Drive the event loop until this side requests a disconnect.
    fn run(self, mut connection: Connection) {
        for notification in connection.iter() {
            match notification {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    debug!(session_present = ack.session_present, "broker acknowledged connection");
                    self.restore(&ack);
                    self.connected.fire();
                }
                Ok(Event::Incoming(Packet::SubAck(_))) => self.handler.subscribed(),
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.handler.deliver(&publish.topic, &publish.payload);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    // The next poll reconnects.
                    self.handler.connection_lost("broker sent disconnect");
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("disconnect requested, event loop ends");
                    break;
                }
                Ok(other) => trace!(?other, "mqtt event"),
                Err(err) => {
                    self.handler.connection_lost(&err.to_string());
                    thread::sleep(RECONNECT_BACKOFF);
                }
            }
        }
    }

    fn restore(&self, ack: &ConnAck) {
        for topic in self.subscriptions.to_restore(ack) {
            // Never block here: this thread is the one draining the request channel.
            match self.client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                Ok(()) => debug!(%topic, "subscription restored"),
                Err(err) => warn!(%topic, %err, "could not restore subscription"),
            }
        }
    }
}

impl Transport for MqttTransport {
    fn connect(&self, handler: Arc<dyn DeliveryHandler>, timeout: Duration) -> Result<(), TransportError> {
        let endpoint = &self.endpoint;
        let mut options = MqttOptions::new(&endpoint.client_id, &endpoint.host, endpoint.port);
        options.set_credentials(&endpoint.user, &endpoint.password);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        let connected = Arc::new(Signal::new());
        let pump = EventPump {
            client: client.clone(),
            handler,
            connected: Arc::clone(&connected),
            subscriptions: self.subscriptions.clone(),
        };
        thread::Builder::new()
            .name("mqtt-events".to_string())
            .spawn(move || pump.run(connection))
            .map_err(|err| TransportError::Client(err.to_string()))?;

        if !connected.wait_timeout(timeout) {
            warn!(host = %endpoint.host, port = endpoint.port, "broker did not answer");
            return Err(TransportError::ConnectTimeout(timeout));
        }
        *self.client.lock().expect("mqtt client mutex poisoned") = Some(client);
        Ok(())
    }

    fn subscribe(&self, topics: &[&str]) -> Result<(), TransportError> {
        self.subscriptions.record(topics);
        self.with_client(|client| {
            for topic in topics {
                client.subscribe(*topic, QoS::AtLeastOnce)?;
            }
            Ok(())
        })
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.with_client(|client| client.try_publish(topic, QoS::AtLeastOnce, false, payload))
    }

    fn disconnect(&self) {
        if let Some(client) = self.client.lock().expect("mqtt client mutex poisoned").take() {
            if let Err(err) = client.disconnect() {
                debug!(%err, "disconnect request not delivered");
            }
        }
    }
}
