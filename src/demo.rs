//! In-process demo: all four stations on a loopback bus with simulated drives,
//! driven by a small dashboard client.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::codec::Codec;
use crate::command::{CommandKind, Event};
use crate::drive::{Reading, Sensor, SimulatedDrive};
use crate::freshness::{format_timestamp, now_timestamp};
use crate::runtime::{RuntimeOptions, StationRuntime};
use crate::station::{Processing, Robot, Sorting, Warehouse};
use crate::topics;
use crate::transport::{DeliveryHandler, LoopbackBus, LoopbackClient, Transport};
use crate::types::{Workpiece, WorkpieceState, WorkpieceType};

// Demo timing knobs (small for quick CLI feedback).
const DEMO_NOTIFY_MS: u64 = 200;
const DEMO_CONNECT_TIMEOUT_MS: u64 = 1_000;
const DEMO_STEP_DELAY_MS: u64 = 1;
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);
/// Color sensor reading the sorter sees for the ordered workpiece.
const RED_READING: i32 = 1_200;
/// Age of the replayed store command; far past the freshness window.
const STALE_AGE_MIN: i64 = 31;

/// Collects what the dashboard hears, in arrival order.
struct Dashboard {
    inbox: Mutex<Sender<(String, Value)>>,
}

impl DeliveryHandler for Dashboard {
    fn deliver(&self, topic: &str, payload: &[u8]) {
        match serde_json::from_slice(payload) {
            Ok(value) => {
                let _ = self
                    .inbox
                    .lock()
                    .expect("dashboard mutex poisoned")
                    .send((topic.to_string(), value));
            }
            Err(err) => warn!(topic, %err, "dashboard got malformed payload"),
        }
    }

    fn subscribed(&self) {}

    fn connection_lost(&self, cause: &str) {
        warn!(cause, "dashboard lost connection");
    }
}

struct DashboardClient {
    client: LoopbackClient,
    inbox: Receiver<(String, Value)>,
    codec: Codec,
}

impl DashboardClient {
    fn connect(bus: &LoopbackBus) -> Result<Self> {
        let (tx, inbox) = mpsc::channel();
        let client = bus.client("dashboard");
        let handler = Arc::new(Dashboard { inbox: Mutex::new(tx) });
        client.connect(handler, Duration::from_millis(DEMO_CONNECT_TIMEOUT_MS))?;
        client.subscribe(&[topics::HBW_ACK, topics::SLD_ACK, topics::NFC_REPORT])?;
        Ok(Self {
            client,
            inbox,
            codec: Codec::default(),
        })
    }

    fn send_stamped(&self, command: CommandKind, ts: &str) -> Result<()> {
        let (topic, payload) = self.codec.encode(&Event::Peer(command), ts)?;
        self.client.publish(topic, payload)?;
        Ok(())
    }

    fn send(&self, command: CommandKind) -> Result<()> {
        self.send_stamped(command, &now_timestamp())
    }

    /// Skip messages until one on `topic` satisfies `matches`.
    fn expect(&self, topic: &str, what: &str, matches: impl Fn(&Value) -> bool) -> Result<Value> {
        let deadline = Instant::now() + REPLY_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let (heard, value) = self
                .inbox
                .recv_timeout(remaining)
                .map_err(|_| anyhow!("timed out waiting for {what} on {topic}"))?;
            if heard == topic && matches(&value) {
                return Ok(value);
            }
        }
    }
}

fn hbw_ack(code: i64, kind: Option<WorkpieceType>) -> impl Fn(&Value) -> bool {
    move |value: &Value| {
        value["code"] == code
            && kind.is_none_or(|kind| value["workpiece"]["type"] == kind.as_wire())
    }
}

fn raw(kind: WorkpieceType, tag: &str) -> Option<Workpiece> {
    Some(Workpiece::new(kind, WorkpieceState::Raw).with_tag(tag))
}

fn sim_drive() -> SimulatedDrive {
    SimulatedDrive::new().with_step_delay(Duration::from_millis(DEMO_STEP_DELAY_MS))
}

/// Observations printed at the end of the demo.
#[derive(Debug)]
pub struct DemoSummary {
    pub calibrated: bool,
    pub stored_slots: Vec<String>,
    pub stored_acks: usize,
    pub ordered: WorkpieceType,
    pub sorted: Vec<WorkpieceType>,
    pub delivered: Vec<WorkpieceType>,
    pub nfc_tag: Option<String>,
    pub fetch_not_found: bool,
    pub stock_left: usize,
    pub commands: [usize; 4],
    pub notify_ticks: usize,
}

impl DemoSummary {
    pub fn print(&self) {
        println!("DEMO SUMMARY");
        println!("calibrated={}", self.calibrated);
        println!("stored_slots={:?}", self.stored_slots);
        println!("stale_store_ignored={}", self.stored_acks == self.stored_slots.len());
        println!("ordered={}", self.ordered);
        println!("sorted={:?}", self.sorted);
        println!("delivered={:?}", self.delivered);
        println!("nfc_tag={}", self.nfc_tag.as_deref().unwrap_or("none"));
        println!("fetch_not_found={}", self.fetch_not_found);
        println!("stock_left={}", self.stock_left);
        let [hbw, vgr, mpo, sld] = self.commands;
        println!("commands hbw={hbw} vgr={vgr} mpo={mpo} sld={sld}");
        println!("notify_ticks={}", self.notify_ticks);
    }
}

/// Run the whole cell once. With `stray`, a message on an unknown topic is
/// delivered to the warehouse first, which terminates the process.
pub fn run_demo(stray: bool) -> Result<DemoSummary> {
    info!("demo start");
    let bus = LoopbackBus::new();
    let options = RuntimeOptions {
        connect_timeout: Duration::from_millis(DEMO_CONNECT_TIMEOUT_MS),
        notify_interval: Duration::from_millis(DEMO_NOTIFY_MS),
        ..RuntimeOptions::default()
    };

    let hbw_client = Arc::new(bus.client("hbw"));
    let hbw = StationRuntime::new(hbw_client.clone(), options)
        .start(Warehouse::new(), sim_drive())
        .context("starting warehouse")?;
    let vgr = StationRuntime::new(Arc::new(bus.client("vgr")), options)
        .start(Robot::new(), sim_drive())
        .context("starting robot")?;
    let mpo = StationRuntime::new(Arc::new(bus.client("mpo")), options)
        .start(Processing::new(), sim_drive())
        .context("starting processing")?;
    let mut sorter_drive = sim_drive();
    sorter_drive.script(Sensor::Color, Reading::Analog(RED_READING));
    let sld = StationRuntime::new(Arc::new(bus.client("sld")), options)
        .start(Sorting::new(), sorter_drive)
        .context("starting sorting")?;

    if stray {
        let payload = json!({"ts": now_timestamp()}).to_string();
        hbw_client.inject("bogus/topic", payload.as_bytes());
        bail!("stray message did not terminate the station");
    }

    let dashboard = DashboardClient::connect(&bus).context("connecting dashboard")?;

    dashboard.send(CommandKind::Calibrate)?;
    let calibration = dashboard.expect(topics::HBW_ACK, "calibration end", hbw_ack(4, None))?;
    let calibrated = calibration["error"].is_null();

    let mut stored_slots = Vec::new();
    for (kind, tag) in [
        (WorkpieceType::White, "04000001"),
        (WorkpieceType::Red, "04000002"),
        (WorkpieceType::Blue, "04000003"),
    ] {
        dashboard.send(CommandKind::StoreWorkpiece(raw(kind, tag)))?;
        let ack = dashboard.expect(topics::HBW_ACK, "store ack", hbw_ack(2, Some(kind)))?;
        let slot = ack["slot"]
            .as_str()
            .with_context(|| format!("store of {kind} failed: {}", ack["error"]))?;
        stored_slots.push(slot.to_string());
    }

    // A replayed store from half an hour ago must not touch the rack.
    let stale = format_timestamp(Utc::now() - ChronoDuration::minutes(STALE_AGE_MIN));
    dashboard.send_stamped(CommandKind::StoreWorkpiece(raw(WorkpieceType::Blue, "04000004")), &stale)?;

    dashboard.send(CommandKind::PlaceOrder(WorkpieceType::Red))?;
    dashboard.expect(topics::SLD_ACK, "sorted workpiece", |value| value["code"] == 2)?;

    dashboard.send(CommandKind::NfcRead)?;
    let tag = dashboard.expect(topics::NFC_REPORT, "nfc report", |_| true)?;
    let nfc_tag = tag["workpiece"]["id"].as_str().map(str::to_string);

    let white = || raw(WorkpieceType::White, "");
    dashboard.send(CommandKind::FetchWorkpiece(white()))?;
    dashboard.expect(topics::HBW_ACK, "first fetch", hbw_ack(1, Some(WorkpieceType::White)))?;
    dashboard.send(CommandKind::FetchWorkpiece(white()))?;
    let second = dashboard.expect(topics::HBW_ACK, "second fetch", hbw_ack(1, Some(WorkpieceType::White)))?;
    let fetch_not_found = second["error"].is_string();

    dashboard.send(CommandKind::Quit)?;
    let hbw = hbw.join().context("warehouse")?;
    let vgr = vgr.join().context("robot")?;
    let mpo = mpo.join().context("processing")?;
    let sld = sld.join().context("sorting")?;

    let stored_acks = bus
        .published_on(topics::HBW_ACK)
        .iter()
        .filter_map(|payload| serde_json::from_slice::<Value>(payload).ok())
        .filter(|value| value["code"] == 2 && value["error"].is_null())
        .count();

    info!("demo complete");
    Ok(DemoSummary {
        calibrated,
        stored_slots,
        stored_acks,
        ordered: WorkpieceType::Red,
        sorted: sld.station.sorted().to_vec(),
        delivered: vgr.station.delivered().to_vec(),
        nfc_tag,
        fetch_not_found,
        stock_left: hbw.station.storage().occupied(),
        commands: [
            hbw.stats.commands,
            vgr.stats.commands,
            mpo.stats.commands,
            sld.stats.commands,
        ],
        notify_ticks: hbw.ticks + vgr.ticks + mpo.ticks + sld.ticks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_delivers_the_order_and_reports_the_missing_fetch() {
        let summary = run_demo(false).expect("demo runs");
        assert!(summary.calibrated);
        assert_eq!(summary.stored_slots, ["A1", "A2", "A3"]);
        assert_eq!(summary.stored_acks, 3);
        assert_eq!(summary.sorted, [WorkpieceType::Red]);
        assert_eq!(summary.delivered, [WorkpieceType::Red]);
        assert!(summary.fetch_not_found);
        // Blue is the only workpiece left.
        assert_eq!(summary.stock_left, 1);
        assert_eq!(summary.nfc_tag.as_deref(), Some(crate::drive::SIMULATED_TAG_UID));
    }
}
