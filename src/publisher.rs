//! Outbound side: stamp, encode and send events.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::codec::Codec;
use crate::command::{Event, Outbox};
use crate::freshness::now_timestamp;
use crate::transport::Transport;

/// Fire-and-forget publisher shared by the control loop.
#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn Transport>,
    codec: Codec,
}

impl Publisher {
    pub fn new(transport: Arc<dyn Transport>, codec: Codec) -> Self {
        Self { transport, codec }
    }

    /// Publish one event stamped with the current time. Failures are logged only.
    pub fn publish(&self, event: &Event) {
        let ts = now_timestamp();
        let (topic, payload) = match self.codec.encode(event, &ts) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(%err, ?event, "failed to encode event");
                return;
            }
        };
        match self.transport.publish(topic, payload) {
            Ok(()) => trace!(topic, "published"),
            Err(err) => warn!(topic, %err, "publish failed"),
        }
    }

    /// Publish and empty the outbox, in push order.
    pub fn flush(&self, outbox: &mut Outbox) {
        for event in outbox.drain() {
            self.publish(&event);
        }
    }
}
