//! Wire schema of the cell bus and its mapping to domain commands.
//!
//! Decoding is topic-driven: the topic picks the schema, the payload is
//! parsed against it. Unknown topics are protocol errors; everything that
//! goes wrong inside a known topic is a decode error.

use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandKind, Event, WarehouseAck, WarehouseAckCode};
use crate::error::{CodecError, DecodeError, ProtocolError};
use crate::topics::Topic;
use crate::types::{JoystickSample, SlotId, Workpiece, WorkpieceState, WorkpieceType};

// Codes on the robot command channel.
const VGR_HBW_FETCH_CONTAINER: i64 = 1;
const VGR_HBW_STORE_WP: i64 = 2;
const VGR_HBW_FETCH_WP: i64 = 3;
const VGR_HBW_STORE_CONTAINER: i64 = 4;
const VGR_HBW_RESET_STORAGE: i64 = 5;
const VGR_HBW_CALIB: i64 = 6;
const VGR_MPO_PRODUCE: i64 = 7;
const VGR_SLD_START: i64 = 8;

const MPO_STARTED: i64 = 1;
const MPO_PRODUCED: i64 = 2;

const SLD_STARTED: i64 = 1;
const SLD_SORTED: i64 = 2;

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireWorkpiece {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

impl From<&Workpiece> for WireWorkpiece {
    fn from(workpiece: &Workpiece) -> Self {
        Self {
            id: Some(workpiece.tag_uid.clone().unwrap_or_default()),
            kind: Some(workpiece.kind.as_wire().to_string()),
            state: Some(workpiece.state.as_wire().to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CodedMessage {
    ts: String,
    code: i64,
    #[serde(default)]
    workpiece: Option<WireWorkpiece>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    slot: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct CodedOut<'a> {
    ts: &'a str,
    code: i64,
    workpiece: Option<WireWorkpiece>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    slot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl<'a> CodedOut<'a> {
    fn new(ts: &'a str, code: i64, workpiece: Option<&Workpiece>) -> Self {
        Self {
            ts,
            code,
            workpiece: workpiece.map(WireWorkpiece::from),
            kind: None,
            slot: None,
            error: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StampOnly<T> {
    ts: T,
}

#[derive(Debug, Serialize, Deserialize)]
struct JoystickMessage<T> {
    ts: T,
    #[serde(rename = "aX1", default)]
    ax1: i32,
    #[serde(rename = "aY1", default)]
    ay1: i32,
    #[serde(default)]
    b1: bool,
    #[serde(rename = "aX2", default)]
    ax2: i32,
    #[serde(rename = "aY2", default)]
    ay2: i32,
    #[serde(default)]
    b2: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OrderMessage<T> {
    ts: T,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct NfcMessage<T> {
    ts: T,
    #[serde(default)]
    cmd: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StockMessage<'a> {
    ts: &'a str,
    stock_items: Vec<StockItem>,
}

#[derive(Debug, Serialize)]
struct StockItem {
    location: String,
    workpiece: Option<WireWorkpiece>,
}

#[derive(Debug, Serialize)]
struct StateMessage<'a> {
    ts: &'a str,
    station: &'static str,
    state: &'static str,
}

#[derive(Debug, Serialize)]
struct NfcReportMessage<'a> {
    ts: &'a str,
    workpiece: Option<WireWorkpiece>,
}

/// JSON codec for the cell bus.
#[derive(Clone, Copy, Debug, Default)]
pub struct Codec {
    /// Reject unknown workpiece type/state strings instead of defaulting them.
    pub strict: bool,
}

impl Codec {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Decode one inbound message into a command.
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<Command, CodecError> {
        let parsed = Topic::parse(topic).ok_or_else(|| ProtocolError {
            topic: topic.to_string(),
        })?;
        let command = match parsed {
            Topic::StateAck => {
                let message: StampOnly<String> = parse(topic, payload)?;
                Command::new(message.ts, CommandKind::Quit)
            }
            Topic::Joystick => {
                let message: JoystickMessage<String> = parse(topic, payload)?;
                let sample = JoystickSample {
                    ax1: message.ax1,
                    ay1: message.ay1,
                    b1: message.b1,
                    ax2: message.ax2,
                    ay2: message.ay2,
                    b2: message.b2,
                };
                Command::new(message.ts, CommandKind::Joystick(sample))
            }
            Topic::Order => {
                let message: OrderMessage<String> = parse(topic, payload)?;
                let kind = self.workpiece_type(&message.kind)?;
                Command::new(message.ts, CommandKind::PlaceOrder(kind))
            }
            Topic::NfcDs => {
                let message: NfcMessage<String> = parse(topic, payload)?;
                let kind = match message.cmd.as_str() {
                    "read" => CommandKind::NfcRead,
                    "delete" => CommandKind::NfcDelete,
                    _ => {
                        return Err(DecodeError::UnknownCommand {
                            topic: topic.to_string(),
                            cmd: message.cmd,
                        }
                        .into());
                    }
                };
                Command::new(message.ts, kind)
            }
            Topic::VgrDo => {
                let message: CodedMessage = parse(topic, payload)?;
                let workpiece = self.workpiece(message.workpiece)?;
                let kind = match message.code {
                    VGR_HBW_FETCH_CONTAINER => CommandKind::FetchContainer(workpiece),
                    VGR_HBW_STORE_WP => CommandKind::StoreWorkpiece(workpiece),
                    VGR_HBW_FETCH_WP => CommandKind::FetchWorkpiece(workpiece),
                    VGR_HBW_STORE_CONTAINER => CommandKind::StoreContainer(workpiece),
                    VGR_HBW_RESET_STORAGE => CommandKind::ResetStorage,
                    VGR_HBW_CALIB => CommandKind::Calibrate,
                    VGR_MPO_PRODUCE => CommandKind::StartProduction(workpiece),
                    VGR_SLD_START => CommandKind::StartSorting,
                    code => return Err(unknown_code(topic, code)),
                };
                Command::new(message.ts, kind)
            }
            Topic::HbwAck => {
                let message: CodedMessage = parse(topic, payload)?;
                let code = WarehouseAckCode::from_code(message.code)
                    .ok_or_else(|| unknown_code(topic, message.code))?;
                let ack = WarehouseAck {
                    code,
                    workpiece: self.workpiece(message.workpiece)?,
                    slot: message.slot.and_then(|slot| slot.parse::<SlotId>().ok()),
                    fault: message.error,
                };
                Command::new(message.ts, CommandKind::WarehouseAck(ack))
            }
            Topic::MpoAck => {
                let message: CodedMessage = parse(topic, payload)?;
                let workpiece = self.workpiece(message.workpiece)?;
                let kind = match (message.code, message.error) {
                    (MPO_PRODUCED, Some(fault)) => CommandKind::ProductionFailed(fault),
                    (MPO_STARTED, _) => CommandKind::ProcessingStarted(workpiece),
                    (MPO_PRODUCED, None) => CommandKind::ProducedAck(workpiece),
                    (code, _) => return Err(unknown_code(topic, code)),
                };
                Command::new(message.ts, kind)
            }
            Topic::SldAck => {
                let message: CodedMessage = parse(topic, payload)?;
                let kind = match (message.code, message.error) {
                    (SLD_SORTED, Some(fault)) => CommandKind::SortingFailed(fault),
                    (SLD_STARTED, _) => CommandKind::SortingStarted,
                    (SLD_SORTED, None) => {
                        let kind = self.workpiece_type(message.kind.as_deref().unwrap_or_default())?;
                        CommandKind::SortedAck(kind)
                    }
                    (code, _) => return Err(unknown_code(topic, code)),
                };
                Command::new(message.ts, kind)
            }
            Topic::Stock | Topic::NfcReport | Topic::State(_) => {
                return Err(ProtocolError {
                    topic: topic.to_string(),
                }
                .into());
            }
        };
        Ok(command)
    }

    /// Encode an outbound event stamped with `ts`.
    pub fn encode(&self, event: &Event, ts: &str) -> Result<(&'static str, Vec<u8>), serde_json::Error> {
        match event {
            Event::Peer(command) => encode_command(command, ts),
            Event::Stock(slots) => {
                let message = StockMessage {
                    ts,
                    stock_items: slots
                        .iter()
                        .map(|(slot, workpiece)| StockItem {
                            location: slot.to_string(),
                            workpiece: workpiece.as_ref().map(WireWorkpiece::from),
                        })
                        .collect(),
                };
                Ok((Topic::Stock.name(), serde_json::to_vec(&message)?))
            }
            Event::State { station, state } => {
                let message = StateMessage {
                    ts,
                    station: station.name(),
                    state: *state,
                };
                Ok((Topic::State(*station).name(), serde_json::to_vec(&message)?))
            }
            Event::NfcTag(workpiece) => {
                let message = NfcReportMessage {
                    ts,
                    workpiece: workpiece.as_ref().map(WireWorkpiece::from),
                };
                Ok((Topic::NfcReport.name(), serde_json::to_vec(&message)?))
            }
        }
    }

    fn workpiece(&self, wire: Option<WireWorkpiece>) -> Result<Option<Workpiece>, DecodeError> {
        let Some(wire) = wire else {
            return Ok(None);
        };
        let kind = self.workpiece_type(wire.kind.as_deref().unwrap_or_default())?;
        let raw_state = wire.state.as_deref().unwrap_or_default();
        let state = match WorkpieceState::from_wire(raw_state) {
            Some(state) => state,
            None if self.strict => {
                return Err(DecodeError::UnknownVariant {
                    field: "state",
                    value: raw_state.to_string(),
                });
            }
            None => WorkpieceState::default(),
        };
        Ok(Some(Workpiece {
            tag_uid: wire.id.filter(|id| !id.is_empty()),
            kind,
            state,
        }))
    }

    fn workpiece_type(&self, raw: &str) -> Result<WorkpieceType, DecodeError> {
        match WorkpieceType::from_wire(raw) {
            Some(kind) => Ok(kind),
            None if self.strict => Err(DecodeError::UnknownVariant {
                field: "type",
                value: raw.to_string(),
            }),
            None => Ok(WorkpieceType::None),
        }
    }
}

fn parse<'de, T: Deserialize<'de>>(topic: &str, payload: &'de [u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(payload).map_err(|source| DecodeError::Payload {
        topic: topic.to_string(),
        source,
    })
}

fn unknown_code(topic: &str, code: i64) -> CodecError {
    DecodeError::UnknownCode {
        topic: topic.to_string(),
        code,
    }
    .into()
}

fn encode_command(command: &CommandKind, ts: &str) -> Result<(&'static str, Vec<u8>), serde_json::Error> {
    let coded = |topic: Topic, code: i64, workpiece: &Option<Workpiece>| {
        let message = CodedOut::new(ts, code, workpiece.as_ref());
        serde_json::to_vec(&message).map(|bytes| (topic.name(), bytes))
    };
    match command {
        CommandKind::Quit => Ok((Topic::StateAck.name(), serde_json::to_vec(&StampOnly { ts })?)),
        CommandKind::Joystick(sample) => {
            let message = JoystickMessage {
                ts,
                ax1: sample.ax1,
                ay1: sample.ay1,
                b1: sample.b1,
                ax2: sample.ax2,
                ay2: sample.ay2,
                b2: sample.b2,
            };
            Ok((Topic::Joystick.name(), serde_json::to_vec(&message)?))
        }
        CommandKind::PlaceOrder(kind) => {
            let message = OrderMessage {
                ts,
                kind: kind.as_wire().to_string(),
            };
            Ok((Topic::Order.name(), serde_json::to_vec(&message)?))
        }
        CommandKind::NfcRead | CommandKind::NfcDelete => {
            let cmd = if matches!(command, CommandKind::NfcRead) { "read" } else { "delete" };
            let message = NfcMessage {
                ts,
                cmd: cmd.to_string(),
            };
            Ok((Topic::NfcDs.name(), serde_json::to_vec(&message)?))
        }
        CommandKind::FetchContainer(wp) => coded(Topic::VgrDo, VGR_HBW_FETCH_CONTAINER, wp),
        CommandKind::StoreWorkpiece(wp) => coded(Topic::VgrDo, VGR_HBW_STORE_WP, wp),
        CommandKind::FetchWorkpiece(wp) => coded(Topic::VgrDo, VGR_HBW_FETCH_WP, wp),
        CommandKind::StoreContainer(wp) => coded(Topic::VgrDo, VGR_HBW_STORE_CONTAINER, wp),
        CommandKind::ResetStorage => coded(Topic::VgrDo, VGR_HBW_RESET_STORAGE, &None),
        CommandKind::Calibrate => coded(Topic::VgrDo, VGR_HBW_CALIB, &None),
        CommandKind::StartProduction(wp) => coded(Topic::VgrDo, VGR_MPO_PRODUCE, wp),
        CommandKind::StartSorting => coded(Topic::VgrDo, VGR_SLD_START, &None),
        CommandKind::WarehouseAck(ack) => {
            let mut message = CodedOut::new(ts, ack.code.code(), ack.workpiece.as_ref());
            message.slot = ack.slot.map(|slot| slot.to_string());
            message.error = ack.fault.as_deref();
            Ok((Topic::HbwAck.name(), serde_json::to_vec(&message)?))
        }
        CommandKind::ProcessingStarted(wp) => coded(Topic::MpoAck, MPO_STARTED, wp),
        CommandKind::ProducedAck(wp) => coded(Topic::MpoAck, MPO_PRODUCED, wp),
        CommandKind::SortingStarted => coded(Topic::SldAck, SLD_STARTED, &None),
        CommandKind::SortedAck(kind) => {
            let mut message = CodedOut::new(ts, SLD_SORTED, None);
            message.kind = Some(kind.as_wire());
            Ok((Topic::SldAck.name(), serde_json::to_vec(&message)?))
        }
        CommandKind::ProductionFailed(fault) => {
            let mut message = CodedOut::new(ts, MPO_PRODUCED, None);
            message.error = Some(fault);
            Ok((Topic::MpoAck.name(), serde_json::to_vec(&message)?))
        }
        CommandKind::SortingFailed(fault) => {
            let mut message = CodedOut::new(ts, SLD_SORTED, None);
            message.error = Some(fault);
            Ok((Topic::SldAck.name(), serde_json::to_vec(&message)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StationKind;
    use serde_json::{Value, json};

    const TS: &str = "2026-10-14T12:00:00.000Z";

    fn decode(topic: &str, payload: Value) -> Result<Command, CodecError> {
        Codec::default().decode(topic, payload.to_string().as_bytes())
    }

    #[test]
    fn store_command_carries_workpiece_and_timestamp() {
        let command = decode(
            "local/vgr/do",
            json!({"ts": TS, "code": 2, "workpiece": {"id": "04ab", "type": "RED", "state": "RAW"}}),
        )
        .expect("decodes");
        assert_eq!(command.ts, TS);
        let expected = Workpiece::new(WorkpieceType::Red, WorkpieceState::Raw).with_tag("04ab");
        assert_eq!(command.kind, CommandKind::StoreWorkpiece(Some(expected)));
    }

    #[test]
    fn null_or_missing_workpiece_is_absent() {
        let null = decode("local/vgr/do", json!({"ts": TS, "code": 3, "workpiece": null})).unwrap();
        assert_eq!(null.kind, CommandKind::FetchWorkpiece(None));
        let missing = decode("local/vgr/do", json!({"ts": TS, "code": 7})).unwrap();
        assert_eq!(missing.kind, CommandKind::StartProduction(None));
    }

    #[test]
    fn unknown_type_and_state_fall_back_in_lenient_mode() {
        let command = decode(
            "local/mpo/ack",
            json!({"ts": TS, "code": 2, "workpiece": {"id": "", "type": "GREEN", "state": "MOLTEN"}}),
        )
        .unwrap();
        let expected = Workpiece::new(WorkpieceType::None, WorkpieceState::Raw);
        assert_eq!(command.kind, CommandKind::ProducedAck(Some(expected)));
    }

    #[test]
    fn strict_mode_rejects_unknown_variants() {
        let payload = json!({"ts": TS, "code": 2, "workpiece": {"id": "", "type": "GREEN", "state": "RAW"}});
        let result = Codec::new(true).decode("local/vgr/do", payload.to_string().as_bytes());
        assert!(matches!(
            result,
            Err(CodecError::Decode(DecodeError::UnknownVariant { field: "type", .. }))
        ));
    }

    #[test]
    fn unknown_topic_is_a_protocol_error() {
        let result = decode("bogus/topic", json!({"ts": TS}));
        assert!(matches!(result, Err(CodecError::Protocol(_))));
        // Outbound-only topics are never valid input either.
        let result = decode("input/stock", json!({"ts": TS}));
        assert!(matches!(result, Err(CodecError::Protocol(_))));
    }

    #[test]
    fn malformed_payloads_are_decode_errors() {
        let garbage = Codec::default().decode("local/vgr/do", b"{not json");
        assert!(matches!(garbage, Err(CodecError::Decode(DecodeError::Payload { .. }))));
        let missing_code = decode("local/hbw/ack", json!({"ts": TS}));
        assert!(matches!(missing_code, Err(CodecError::Decode(DecodeError::Payload { .. }))));
        let bad_code = decode("local/vgr/do", json!({"ts": TS, "code": 42}));
        assert!(matches!(
            bad_code,
            Err(CodecError::Decode(DecodeError::UnknownCode { code: 42, .. }))
        ));
        let bad_cmd = decode("output/nfc/ds", json!({"ts": TS, "cmd": "format"}));
        assert!(matches!(bad_cmd, Err(CodecError::Decode(DecodeError::UnknownCommand { .. }))));
    }

    #[test]
    fn joystick_fields_default_when_missing() {
        let command = decode("local/ssc/joy", json!({"ts": TS, "aX1": -120, "b2": true})).unwrap();
        let expected = JoystickSample {
            ax1: -120,
            b2: true,
            ..JoystickSample::default()
        };
        assert_eq!(command.kind, CommandKind::Joystick(expected));
    }

    #[test]
    fn failed_warehouse_ack_decodes_fault_and_slot() {
        let encoded = Codec::default()
            .encode(
                &Event::Peer(CommandKind::WarehouseAck(WarehouseAck::failed(
                    WarehouseAckCode::Fetched,
                    Some(Workpiece::new(WorkpieceType::Red, WorkpieceState::Raw)),
                    "no stored workpiece of type RED",
                ))),
                TS,
            )
            .unwrap();
        assert_eq!(encoded.0, "local/hbw/ack");
        let command = Codec::default().decode(encoded.0, &encoded.1).unwrap();
        let CommandKind::WarehouseAck(ack) = command.kind else {
            panic!("expected warehouse ack");
        };
        assert_eq!(ack.code, WarehouseAckCode::Fetched);
        assert!(!ack.is_ok());
        assert_eq!(ack.slot, None);
    }

    #[test]
    fn line_faults_ride_the_ack_topics_with_an_error_field() {
        let (topic, payload) = Codec::default()
            .encode(&Event::Peer(CommandKind::ProductionFailed("saw jammed".into())), TS)
            .unwrap();
        assert_eq!(topic, "local/mpo/ack");
        let value: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["code"], 2);
        assert_eq!(value["error"], "saw jammed");

        let command = decode("local/sld/ack", json!({"ts": TS, "code": 2, "error": "belt stalled"})).unwrap();
        assert_eq!(command.kind, CommandKind::SortingFailed("belt stalled".into()));
        let command = decode("local/sld/ack", json!({"ts": TS, "code": 2, "type": "BLUE"})).unwrap();
        assert_eq!(command.kind, CommandKind::SortedAck(WorkpieceType::Blue));
    }

    #[test]
    fn encoded_commands_decode_to_the_same_command() {
        let codec = Codec::default();
        let wp = Some(Workpiece::new(WorkpieceType::Blue, WorkpieceState::Processed).with_tag("04ff"));
        let commands = [
            CommandKind::Quit,
            CommandKind::PlaceOrder(WorkpieceType::White),
            CommandKind::NfcDelete,
            CommandKind::StoreContainer(wp.clone()),
            CommandKind::Calibrate,
            CommandKind::StartSorting,
            CommandKind::WarehouseAck(WarehouseAck::ok(
                WarehouseAckCode::Stored,
                wp.clone(),
                Some(SlotId::new(2, 1)),
            )),
            CommandKind::ProcessingStarted(wp),
            CommandKind::SortedAck(WorkpieceType::Red),
        ];
        for kind in commands {
            let (topic, payload) = codec.encode(&Event::Peer(kind.clone()), TS).unwrap();
            let decoded = codec.decode(topic, &payload).unwrap();
            assert_eq!(decoded, Command::new(TS, kind));
        }
    }

    #[test]
    fn stock_snapshot_lists_every_slot() {
        let slots: Vec<_> = SlotId::scan_order()
            .map(|slot| {
                let wp = (slot == SlotId::new(0, 1))
                    .then(|| Workpiece::new(WorkpieceType::White, WorkpieceState::Raw));
                (slot, wp)
            })
            .collect();
        let (topic, payload) = Codec::default().encode(&Event::Stock(slots), TS).unwrap();
        assert_eq!(topic, "input/stock");
        let value: Value = serde_json::from_slice(&payload).unwrap();
        let items = value["stockItems"].as_array().unwrap();
        assert_eq!(items.len(), 9);
        assert_eq!(items[1]["location"], "A2");
        assert_eq!(items[1]["workpiece"]["type"], "WHITE");
        assert!(items[0]["workpiece"].is_null());
    }

    #[test]
    fn state_reports_go_to_the_station_topic() {
        let event = Event::State {
            station: StationKind::Sld,
            state: "sorting",
        };
        let (topic, payload) = Codec::default().encode(&event, TS).unwrap();
        assert_eq!(topic, "input/state/sld");
        let value: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["state"], "sorting");
    }
}
