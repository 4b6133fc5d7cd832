//! Vacuum-gripper robot: carries workpieces between the other stations and
//! runs the customer order workflow.

use tracing::{debug, info, warn};

use crate::command::{Command, CommandKind, Event, Outbox, WarehouseAck, WarehouseAckCode};
use crate::drive::{Actuation, Axis, Drive, Effector, Reading, Sensor};
use crate::error::{DriveError, PhysicalFault};
use crate::types::{JoystickSample, StationKind, Workpiece, WorkpieceState, WorkpieceType};

use super::{Station, StationState};

/// Arm pose: base rotation, horizontal reach, vertical height.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Pose {
    rotate: i32,
    reach: i32,
    height: i32,
}

const fn pose(rotate: i32, reach: i32, height: i32) -> Pose {
    Pose { rotate, reach, height }
}

const HOME: Pose = pose(0, 0, 0);
const WAREHOUSE: Pose = pose(90, 120, 80);
const OVEN: Pose = pose(180, 100, 60);
const NFC_READER: Pose = pose(45, 60, 40);
const OUTPUT: Pose = pose(300, 80, 50);
const SORTED_BAYS: [Pose; 3] = [pose(220, 140, 90), pose(240, 140, 90), pose(260, 140, 90)];

const ROTATE_MAX: i32 = 360;
const REACH_MAX: i32 = 200;
const HEIGHT_MAX: i32 = 120;
const JOG_DEADZONE: i32 = 100;
const JOG_DIVISOR: i32 = 100;

fn bay_for(kind: WorkpieceType) -> Option<Pose> {
    match kind {
        WorkpieceType::White => Some(SORTED_BAYS[0]),
        WorkpieceType::Red => Some(SORTED_BAYS[1]),
        WorkpieceType::Blue => Some(SORTED_BAYS[2]),
        WorkpieceType::None => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RobotState {
    Idle,
    Ordering,
    Transporting,
    Returning,
    Delivering,
    ReadingNfc,
    ErasingNfc,
    Jogging,
    ShuttingDown,
}

impl StationState for RobotState {
    const IDLE: Self = Self::Idle;
    const SHUTTING_DOWN: Self = Self::ShuttingDown;

    fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Ordering => "ordering",
            Self::Transporting => "transporting",
            Self::Returning => "returning",
            Self::Delivering => "delivering",
            Self::ReadingNfc => "reading_nfc",
            Self::ErasingNfc => "erasing_nfc",
            Self::Jogging => "jogging",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

#[derive(Default)]
pub struct Robot {
    order: Option<WorkpieceType>,
    arm: Option<Pose>,
    warehouse_calibrated: bool,
    delivered: Vec<WorkpieceType>,
}

impl Robot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Type of the order currently in progress.
    #[allow(dead_code)]
    pub fn open_order(&self) -> Option<WorkpieceType> {
        self.order
    }

    pub fn delivered(&self) -> &[WorkpieceType] {
        &self.delivered
    }

    #[allow(dead_code)]
    pub fn warehouse_calibrated(&self) -> bool {
        self.warehouse_calibrated
    }

    /// Lift clear, swing, then lower onto the target.
    fn goto(&mut self, drive: &mut dyn Drive, target: Pose) -> Result<(), DriveError> {
        drive.move_to(Axis::Z, 0)?;
        drive.move_to(Axis::Rotate, target.rotate)?;
        drive.move_to(Axis::Y, target.reach)?;
        drive.move_to(Axis::Z, target.height)?;
        self.arm = Some(target);
        Ok(())
    }

    fn pick(&mut self, drive: &mut dyn Drive, at: Pose) -> Result<(), DriveError> {
        self.goto(drive, at)?;
        drive.actuate(Effector::Compressor, Actuation::On)?;
        drive.actuate(Effector::Vacuum, Actuation::On)?;
        drive.move_to(Axis::Z, 0)
    }

    fn release(&mut self, drive: &mut dyn Drive, at: Pose) -> Result<(), DriveError> {
        self.goto(drive, at)?;
        drive.actuate(Effector::Vacuum, Actuation::Off)?;
        drive.actuate(Effector::Compressor, Actuation::Off)?;
        drive.move_to(Axis::Z, 0)
    }

    fn abandon(&mut self, reason: &dyn std::fmt::Display) {
        if let Some(kind) = self.order.take() {
            warn!(%kind, %reason, "order abandoned");
        }
    }

    fn place_order(&mut self, drive: &mut dyn Drive, kind: WorkpieceType, outbox: &mut Outbox) -> Result<(), PhysicalFault> {
        if self.order.is_some() {
            return Err(PhysicalFault::Busy("order in progress"));
        }
        if kind == WorkpieceType::None {
            return Err(PhysicalFault::MissingWorkpiece);
        }
        self.goto(drive, WAREHOUSE)?;
        self.order = Some(kind);
        info!(%kind, "order accepted");
        outbox.peer(CommandKind::FetchWorkpiece(Some(Workpiece::new(kind, WorkpieceState::Raw))));
        Ok(())
    }

    fn on_warehouse_ack(&mut self, drive: &mut dyn Drive, ack: WarehouseAck, outbox: &mut Outbox) {
        match ack.code {
            WarehouseAckCode::CalibNav => debug!("warehouse axes homed"),
            WarehouseAckCode::CalibEnd => {
                self.warehouse_calibrated = ack.is_ok();
                info!(ok = ack.is_ok(), "warehouse calibration finished");
            }
            WarehouseAckCode::Fetched => {
                if let Some(fault) = &ack.fault {
                    self.abandon(fault);
                    return;
                }
                if self.order.is_none() {
                    debug!("fetched workpiece without an open order");
                    return;
                }
                if let Err(err) = self.transport_to_oven(drive) {
                    warn!(%err, "transport to processing failed");
                    self.abandon(&err);
                    return;
                }
                outbox.peer(CommandKind::StartSorting);
                outbox.peer(CommandKind::StartProduction(ack.workpiece));
            }
            code => {
                if let Some(fault) = &ack.fault {
                    warn!(?code, %fault, "warehouse reported failure");
                } else {
                    debug!(?code, slot = ?ack.slot, "warehouse acknowledged");
                }
            }
        }
    }

    fn transport_to_oven(&mut self, drive: &mut dyn Drive) -> Result<(), DriveError> {
        self.pick(drive, WAREHOUSE)?;
        self.release(drive, OVEN)
    }

    fn deliver(&mut self, drive: &mut dyn Drive, kind: WorkpieceType) -> Result<(), PhysicalFault> {
        let bay = bay_for(kind).ok_or(PhysicalFault::MissingWorkpiece)?;
        self.pick(drive, bay)?;
        self.release(drive, OUTPUT)?;
        self.goto(drive, HOME)?;
        Ok(())
    }

    fn read_tag(&mut self, drive: &mut dyn Drive) -> Result<Option<String>, DriveError> {
        self.goto(drive, NFC_READER)?;
        match drive.sense(Sensor::NfcTag)? {
            Reading::Tag(uid) => Ok(uid),
            _ => Err(DriveError::Sensor {
                sensor: Sensor::NfcTag,
            }),
        }
    }

    fn erase_tag(&mut self, drive: &mut dyn Drive) -> Result<(), DriveError> {
        self.goto(drive, NFC_READER)?;
        drive.actuate(Effector::NfcEraser, Actuation::On)?;
        drive.actuate(Effector::NfcEraser, Actuation::Off)
    }

    fn jog(&mut self, drive: &mut dyn Drive, sample: JoystickSample) -> Result<(), DriveError> {
        let step = |deflection: i32| {
            if deflection.unsigned_abs() < JOG_DEADZONE.unsigned_abs() { 0 } else { deflection / JOG_DIVISOR }
        };
        let current = self.arm.unwrap_or(HOME);
        let target = Pose {
            rotate: current.rotate.saturating_add(step(sample.ax1)).clamp(0, ROTATE_MAX),
            reach: current.reach.saturating_add(step(sample.ay1)).clamp(0, REACH_MAX),
            height: current.height.saturating_add(step(sample.ay2)).clamp(0, HEIGHT_MAX),
        };
        drive.move_to(Axis::Rotate, target.rotate)?;
        drive.move_to(Axis::Y, target.reach)?;
        drive.move_to(Axis::Z, target.height)?;
        self.arm = Some(target);
        if sample.b1 {
            drive.actuate(Effector::Vacuum, Actuation::Off)?;
        }
        Ok(())
    }
}

impl Station for Robot {
    type State = RobotState;

    fn kind(&self) -> StationKind {
        StationKind::Vgr
    }

    fn state_for(&self, command: &CommandKind) -> RobotState {
        match command {
            CommandKind::PlaceOrder(_) => RobotState::Ordering,
            CommandKind::WarehouseAck(ack)
                if ack.code == WarehouseAckCode::Fetched && ack.is_ok() && self.order.is_some() =>
            {
                RobotState::Transporting
            }
            CommandKind::ProcessingStarted(_)
            | CommandKind::ProductionFailed(_)
            | CommandKind::SortingFailed(_) => RobotState::Returning,
            CommandKind::SortedAck(_) => RobotState::Delivering,
            CommandKind::NfcRead => RobotState::ReadingNfc,
            CommandKind::NfcDelete => RobotState::ErasingNfc,
            CommandKind::Joystick(_) => RobotState::Jogging,
            _ => RobotState::Idle,
        }
    }

    fn execute(&mut self, command: Command, drive: &mut dyn Drive, outbox: &mut Outbox) {
        match command.kind {
            CommandKind::PlaceOrder(kind) => {
                if let Err(fault) = self.place_order(drive, kind, outbox) {
                    warn!(%kind, %fault, "order rejected");
                }
            }
            CommandKind::WarehouseAck(ack) => self.on_warehouse_ack(drive, ack, outbox),
            CommandKind::ProcessingStarted(_) => {
                if let Err(err) = self.goto(drive, HOME) {
                    warn!(%err, "return to home failed");
                }
            }
            CommandKind::SortedAck(kind) => {
                let Some(ordered) = self.order else {
                    debug!(%kind, "sorted workpiece without an open order");
                    return;
                };
                if ordered != kind {
                    warn!(%ordered, sorted = %kind, "sorter reported a different type");
                }
                match self.deliver(drive, kind) {
                    Ok(()) => {
                        info!(%kind, "order delivered");
                        self.order = None;
                        self.delivered.push(kind);
                    }
                    Err(fault) => self.abandon(&fault),
                }
            }
            CommandKind::ProductionFailed(fault) | CommandKind::SortingFailed(fault) => {
                self.abandon(&fault);
                if let Err(err) = self.goto(drive, HOME) {
                    warn!(%err, "return to home failed");
                }
            }
            CommandKind::NfcRead => match self.read_tag(drive) {
                Ok(uid) => {
                    let kind = self.order.unwrap_or_default();
                    let workpiece =
                        uid.map(|uid| Workpiece::new(kind, WorkpieceState::Raw).with_tag(uid));
                    outbox.push(Event::NfcTag(workpiece));
                }
                Err(err) => warn!(%err, "nfc read failed"),
            },
            CommandKind::NfcDelete => match self.erase_tag(drive) {
                Ok(()) => outbox.push(Event::NfcTag(None)),
                Err(err) => warn!(%err, "nfc erase failed"),
            },
            CommandKind::Joystick(sample) => {
                if let Err(err) = self.jog(drive, sample) {
                    warn!(%err, "jog failed");
                }
            }
            other => warn!(command = ?other, "not a robot command"),
        }
    }
}
