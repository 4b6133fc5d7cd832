//! Station lifecycle: connect, subscribe, run the control loop, shut down.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::codec::Codec;
use crate::command::Request;
use crate::config::CellConfig;
use crate::drive::Drive;
use crate::error::{RuntimeError, TransportError};
use crate::freshness::Freshness;
use crate::ingress::{FatalHook, IngressRouter};
use crate::publisher::Publisher;
use crate::request_queue::RequestQueue;
use crate::signal::Signal;
use crate::station::{LoopStats, Station, StationController};
use crate::transport::Transport;
use crate::types::StationKind;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RuntimeOptions {
    /// Bound on both the connect and the subscription acknowledgment wait.
    pub connect_timeout: Duration,
    pub notify_interval: Duration,
    pub freshness: Freshness,
    pub strict_workpiece: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self::from(&CellConfig::default())
    }
}

impl From<&CellConfig> for RuntimeOptions {
    fn from(config: &CellConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            notify_interval: config.notify_interval(),
            freshness: config.freshness(),
            strict_workpiece: config.strict_workpiece,
        }
    }
}

/// What a station did before it stopped.
#[derive(Debug)]
pub struct RunReport<S> {
    pub station: S,
    pub stats: LoopStats,
    /// Notify ticks enqueued by the notifier.
    pub ticks: usize,
}

pub struct StationRuntime {
    transport: Arc<dyn Transport>,
    options: RuntimeOptions,
    fatal_hook: Option<FatalHook>,
}

impl StationRuntime {
    pub fn new(transport: Arc<dyn Transport>, options: RuntimeOptions) -> Self {
        Self {
            transport,
            options,
            fatal_hook: None,
        }
    }

    /// Override what happens on a message for an unsubscribed topic.
    pub fn with_fatal_hook(mut self, hook: FatalHook) -> Self {
        self.fatal_hook = Some(hook);
        self
    }

    /// Run a station until it receives `Quit`.
    pub fn run<S: Station, D: Drive + 'static>(self, station: S, drive: D) -> Result<RunReport<S>, RuntimeError> {
        self.start(station, drive)?.join()
    }

    /// Connect and subscribe, then hand the station to its own threads.
    pub fn start<S: Station, D: Drive + 'static>(
        self,
        station: S,
        drive: D,
    ) -> Result<RunningStation<S>, RuntimeError> {
        let kind = station.kind();
        let options = self.options;
        let codec = Codec::new(options.strict_workpiece);
        let queue = Arc::new(RequestQueue::new());

        let mut router = IngressRouter::new(kind, codec, options.freshness, Arc::clone(&queue));
        if let Some(hook) = self.fatal_hook {
            router = router.with_fatal_hook(hook);
        }
        let subscribed = router.subscribed_signal();

        info!(station = %kind, "connecting");
        self.transport.connect(Arc::new(router), options.connect_timeout)?;
        self.transport.subscribe(kind.subscriptions())?;
        if !subscribed.wait_timeout(options.connect_timeout) {
            self.transport.disconnect();
            return Err(TransportError::SubscribeTimeout(options.connect_timeout).into());
        }
        info!(station = %kind, topics = kind.subscriptions().len(), "subscribed");

        let publisher = Publisher::new(Arc::clone(&self.transport), codec);
        let controller = StationController::new(station, drive, Arc::clone(&queue), publisher);
        let control_name = format!("station-{kind}");
        let control = thread::Builder::new()
            .name(control_name.clone())
            .spawn(move || controller.run())
            .map_err(|source| RuntimeError::Spawn {
                name: control_name,
                source,
            })?;

        let stop = Arc::new(Signal::new());
        let notifier = {
            let queue = Arc::clone(&queue);
            let stop = Arc::clone(&stop);
            let interval = options.notify_interval;
            thread::Builder::new()
                .name("notifier".to_string())
                .spawn(move || notify_loop(&queue, &stop, interval))
        };
        let notifier = match notifier {
            Ok(handle) => handle,
            Err(source) => {
                queue.close();
                let _ = control.join();
                self.transport.disconnect();
                return Err(RuntimeError::Spawn {
                    name: "notifier".to_string(),
                    source,
                });
            }
        };

        Ok(RunningStation {
            kind,
            control,
            notifier,
            stop,
            queue,
            transport: self.transport,
        })
    }
}

fn notify_loop(queue: &RequestQueue, stop: &Signal, interval: Duration) -> usize {
    let mut ticks = 0;
    while !stop.wait_timeout(interval) {
        if queue.push(Request::Notify).is_err() {
            break;
        }
        ticks += 1;
    }
    ticks
}

/// A started station; `join` waits for it to finish.
pub struct RunningStation<S> {
    kind: StationKind,
    control: JoinHandle<(S, LoopStats)>,
    notifier: JoinHandle<usize>,
    stop: Arc<Signal>,
    queue: Arc<RequestQueue>,
    transport: Arc<dyn Transport>,
}

impl<S> RunningStation<S> {
    #[allow(dead_code)]
    pub fn kind(&self) -> StationKind {
        self.kind
    }

    pub fn join(self) -> Result<RunReport<S>, RuntimeError> {
        let outcome = self.control.join();
        self.stop.fire();
        self.queue.close();
        let ticks = self.notifier.join().unwrap_or_else(|_| {
            warn!(station = %self.kind, "notifier thread panicked");
            0
        });
        self.transport.disconnect();

        let (station, stats) = outcome.map_err(|_| RuntimeError::ControlLoopPanicked)?;
        info!(station = %self.kind, commands = stats.commands, ticks, "station stopped");
        Ok(RunReport { station, stats, ticks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandKind, Event};
    use crate::drive::SimulatedDrive;
    use crate::freshness::now_timestamp;
    use crate::station::Warehouse;
    use crate::transport::{Discard, LoopbackBus};
    use crate::types::{Workpiece, WorkpieceState, WorkpieceType};

    fn options() -> RuntimeOptions {
        RuntimeOptions {
            connect_timeout: Duration::from_millis(200),
            notify_interval: Duration::from_secs(60),
            ..RuntimeOptions::default()
        }
    }

    fn send(client: &dyn Transport, command: CommandKind) {
        let (topic, payload) = Codec::default()
            .encode(&Event::Peer(command), &now_timestamp())
            .unwrap();
        client.publish(topic, payload).unwrap();
    }

    #[test]
    fn warehouse_serves_commands_until_quit() {
        let bus = LoopbackBus::new();
        let station_client = bus.client("hbw");
        let dashboard = bus.client("dashboard");
        dashboard.connect(Arc::new(Discard), Duration::from_secs(1)).unwrap();

        let running = StationRuntime::new(Arc::new(station_client), options())
            .start(Warehouse::new(), SimulatedDrive::new())
            .expect("station starts");
        assert_eq!(running.kind(), StationKind::Hbw);

        let white = Workpiece::new(WorkpieceType::White, WorkpieceState::Raw);
        send(&dashboard, CommandKind::StoreWorkpiece(Some(white)));
        send(&dashboard, CommandKind::Quit);
        let report = running.join().expect("station stops");

        assert!(report.stats.quit);
        assert_eq!(report.stats.commands, 1);
        assert_eq!(report.station.storage().occupied(), 1);
        assert_eq!(bus.published_on("local/hbw/ack").len(), 1);
    }

    #[test]
    fn calibration_navigation_ack_leaves_while_still_calibrating() {
        let bus = LoopbackBus::new();
        let station_client = bus.client("hbw");
        let dashboard = bus.client("dashboard");
        dashboard.connect(Arc::new(Discard), Duration::from_secs(1)).unwrap();

        let running = StationRuntime::new(Arc::new(station_client), options())
            .start(Warehouse::new(), SimulatedDrive::new())
            .unwrap();
        send(&dashboard, CommandKind::Calibrate);
        send(&dashboard, CommandKind::Quit);
        running.join().unwrap();

        let trace: Vec<String> = bus
            .published()
            .into_iter()
            .filter_map(|(topic, payload)| {
                let value: serde_json::Value = serde_json::from_slice(&payload).ok()?;
                match topic.as_str() {
                    "local/hbw/ack" => Some(format!("ack {}", value["code"])),
                    "input/state/hbw" => Some(value["state"].as_str()?.to_string()),
                    _ => None,
                }
            })
            .collect();
        assert_eq!(
            trace,
            ["idle", "calibrating", "ack 3", "idle", "ack 4", "shutting_down"]
        );
    }

    #[test]
    fn notifier_ticks_publish_state_and_stock() {
        let bus = LoopbackBus::new();
        let station_client = bus.client("hbw");
        let dashboard = bus.client("dashboard");
        dashboard.connect(Arc::new(Discard), Duration::from_secs(1)).unwrap();
        let options = RuntimeOptions {
            notify_interval: Duration::from_millis(10),
            ..options()
        };

        let running = StationRuntime::new(Arc::new(station_client), options)
            .start(Warehouse::new(), SimulatedDrive::new())
            .unwrap();
        thread::sleep(Duration::from_millis(150));
        send(&dashboard, CommandKind::Quit);
        let report = running.join().unwrap();

        assert!(report.ticks >= 1);
        assert!(report.stats.notifies >= 1);
        assert!(!bus.published_on("input/stock").is_empty());
    }

    #[test]
    fn unreachable_broker_fails_startup() {
        let bus = LoopbackBus::new();
        let client = bus.client("hbw").unreachable();
        let result = StationRuntime::new(Arc::new(client), options()).run(Warehouse::new(), SimulatedDrive::new());
        assert!(matches!(
            result,
            Err(RuntimeError::Transport(TransportError::ConnectTimeout(_)))
        ));
    }

    #[test]
    fn missing_subscription_ack_fails_startup() {
        let bus = LoopbackBus::new();
        let client = bus.client("hbw").without_subscription_acks();
        let result = StationRuntime::new(Arc::new(client), options()).run(Warehouse::new(), SimulatedDrive::new());
        assert!(matches!(
            result,
            Err(RuntimeError::Transport(TransportError::SubscribeTimeout(_)))
        ));
    }

    #[test]
    fn stray_topic_reaches_the_fatal_hook_and_connection_loss_is_survived() {
        let bus = LoopbackBus::new();
        let station_client = Arc::new(bus.client("hbw"));
        let (tx, rx) = std::sync::mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        let running = StationRuntime::new(station_client.clone(), options())
            .with_fatal_hook(Box::new(move |err| {
                let _ = tx.lock().unwrap().send(err.topic.clone());
            }))
            .start(Warehouse::new(), SimulatedDrive::new())
            .unwrap();

        station_client.drop_connection("broker restarted");
        station_client.inject("bogus/topic", b"{}");
        let topic = rx.recv_timeout(Duration::from_secs(1)).expect("fatal hook invoked");
        assert_eq!(topic, "bogus/topic");

        let dashboard = bus.client("dashboard");
        dashboard.connect(Arc::new(Discard), Duration::from_secs(1)).unwrap();
        send(&dashboard, CommandKind::Quit);
        assert!(running.join().unwrap().stats.quit);
    }
}
