//! Cross-station commands, queued requests, and outbound events.

use crate::publisher::Publisher;
use crate::types::{JoystickSample, SlotId, StationKind, Workpiece, WorkpieceType};

/// Result codes on the warehouse acknowledgment channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WarehouseAckCode {
    Fetched,
    Stored,
    CalibNav,
    CalibEnd,
    ContainerFetched,
    ContainerStored,
}

impl WarehouseAckCode {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Fetched),
            2 => Some(Self::Stored),
            3 => Some(Self::CalibNav),
            4 => Some(Self::CalibEnd),
            5 => Some(Self::ContainerFetched),
            6 => Some(Self::ContainerStored),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Fetched => 1,
            Self::Stored => 2,
            Self::CalibNav => 3,
            Self::CalibEnd => 4,
            Self::ContainerFetched => 5,
            Self::ContainerStored => 6,
        }
    }
}

/// Completion report of one warehouse operation. `fault` marks a failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WarehouseAck {
    pub code: WarehouseAckCode,
    pub workpiece: Option<Workpiece>,
    pub slot: Option<SlotId>,
    pub fault: Option<String>,
}

impl WarehouseAck {
    pub fn ok(code: WarehouseAckCode, workpiece: Option<Workpiece>, slot: Option<SlotId>) -> Self {
        Self {
            code,
            workpiece,
            slot,
            fault: None,
        }
    }

    pub fn failed(code: WarehouseAckCode, workpiece: Option<Workpiece>, fault: impl ToString) -> Self {
        Self {
            code,
            workpiece,
            slot: None,
            fault: Some(fault.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.fault.is_none()
    }
}

/// One action requested of a station, per directed station pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Quit,
    Joystick(JoystickSample),
    PlaceOrder(WorkpieceType),
    NfcRead,
    NfcDelete,
    FetchContainer(Option<Workpiece>),
    StoreWorkpiece(Option<Workpiece>),
    FetchWorkpiece(Option<Workpiece>),
    StoreContainer(Option<Workpiece>),
    ResetStorage,
    Calibrate,
    StartProduction(Option<Workpiece>),
    StartSorting,
    WarehouseAck(WarehouseAck),
    ProcessingStarted(Option<Workpiece>),
    ProducedAck(Option<Workpiece>),
    SortingStarted,
    SortedAck(WorkpieceType),
    /// Processing gave up on the workpiece; carries the fault text.
    ProductionFailed(String),
    /// Sorting gave up on the workpiece; carries the fault text.
    SortingFailed(String),
}

impl CommandKind {
    /// Whether a station of `kind` acts on this command at all.
    pub fn is_for(&self, kind: StationKind) -> bool {
        use CommandKind::*;
        match self {
            Quit => true,
            Joystick(_) => matches!(kind, StationKind::Hbw | StationKind::Vgr),
            FetchContainer(_) | StoreWorkpiece(_) | FetchWorkpiece(_) | StoreContainer(_)
            | ResetStorage | Calibrate => kind == StationKind::Hbw,
            PlaceOrder(_) | NfcRead | NfcDelete | WarehouseAck(_) | ProcessingStarted(_)
            | SortedAck(_) => kind == StationKind::Vgr,
            StartProduction(_) | SortingStarted => kind == StationKind::Mpo,
            StartSorting | ProducedAck(_) => kind == StationKind::Sld,
            ProductionFailed(_) => matches!(kind, StationKind::Vgr | StationKind::Sld),
            SortingFailed(_) => matches!(kind, StationKind::Vgr | StationKind::Mpo),
        }
    }
}

/// A decoded command together with the origin timestamp it carried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub ts: String,
    pub kind: CommandKind,
}

impl Command {
    pub fn new(ts: impl Into<String>, kind: CommandKind) -> Self {
        Self { ts: ts.into(), kind }
    }
}

/// Items handed from the ingress side to the control loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Command(Command),
    /// Periodic tick: publish state and snapshot.
    Notify,
}

/// Messages a station publishes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A command or acknowledgment for a peer station.
    Peer(CommandKind),
    /// Full rack contents in scan order.
    Stock(Vec<(SlotId, Option<Workpiece>)>),
    State {
        station: StationKind,
        state: &'static str,
    },
    /// Result of an NFC read or erase at the robot.
    NfcTag(Option<Workpiece>),
}

/// Events produced by one transition, published after it completes.
///
/// A live outbox also carries the publisher, so `progress` reports leave
/// while the transition is still running.
#[derive(Default)]
pub struct Outbox {
    events: Vec<Event>,
    live: Option<Publisher>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(publisher: Publisher) -> Self {
        Self {
            events: Vec::new(),
            live: Some(publisher),
        }
    }

    /// Mid-transition report. Buffered like any other event unless live.
    pub fn progress(&mut self, event: Event) {
        match &self.live {
            Some(publisher) => publisher.publish(&event),
            None => self.events.push(event),
        }
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn peer(&mut self, command: CommandKind) {
        self.events.push(Event::Peer(command));
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Event> + '_ {
        self.events.drain(..)
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
