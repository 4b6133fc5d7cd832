//! High-bay warehouse: a 3x3 rack served by a two-axis crane with a fork.

use tracing::{info, warn};

use crate::command::{Command, CommandKind, Event, Outbox, WarehouseAck, WarehouseAckCode};
use crate::drive::{Axis, Drive};
use crate::error::PhysicalFault;
use crate::types::{JoystickSample, SlotId, StationKind, Workpiece};

use super::{Station, StationState};

mod storage;

pub use storage::Storage;

/// Crane travel per rack column (x) or row (y). The conveyor hand-over
/// point sits at the origin, so slot `(r, c)` is one step further out.
const SLOT_STEP: i32 = 100;
/// Fork extension needed to reach into a slot or onto the conveyor.
const FORK_OUT: i32 = 40;
/// Fork lift that raises a container off its rest.
const LIFT: i32 = 10;
const TRAVEL_MAX: i32 = SLOT_STEP * 3;
/// Stick deflection ignored while jogging.
const JOG_DEADZONE: i32 = 100;
const JOG_DIVISOR: i32 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WarehouseState {
    Idle,
    Calibrating,
    Storing,
    Fetching,
    FetchingContainer,
    StoringContainer,
    ResettingStorage,
    Jogging,
    ShuttingDown,
}

impl StationState for WarehouseState {
    const IDLE: Self = Self::Idle;
    const SHUTTING_DOWN: Self = Self::ShuttingDown;

    fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Calibrating => "calibrating",
            Self::Storing => "storing",
            Self::Fetching => "fetching",
            Self::FetchingContainer => "fetching_container",
            Self::StoringContainer => "storing_container",
            Self::ResettingStorage => "resetting_storage",
            Self::Jogging => "jogging",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

fn slot_position(slot: SlotId) -> (i32, i32) {
    (
        (i32::from(slot.column) + 1) * SLOT_STEP,
        (i32::from(slot.row) + 1) * SLOT_STEP,
    )
}

pub struct Warehouse {
    storage: Storage,
    crane: (i32, i32),
}

impl Warehouse {
    pub fn new() -> Self {
        Self {
            storage: Storage::new(),
            crane: (0, 0),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn travel(&mut self, drive: &mut dyn Drive, (x, y): (i32, i32)) -> Result<(), PhysicalFault> {
        drive.move_to(Axis::X, x)?;
        drive.move_to(Axis::Y, y)?;
        self.crane = (x, y);
        Ok(())
    }

    /// Fork out, lift the container, fork back in.
    fn pick(&mut self, drive: &mut dyn Drive, at: (i32, i32)) -> Result<(), PhysicalFault> {
        self.travel(drive, at)?;
        drive.move_to(Axis::Z, FORK_OUT)?;
        self.travel(drive, (at.0, at.1 - LIFT))?;
        drive.move_to(Axis::Z, 0)?;
        Ok(())
    }

    /// Fork out above the rest, lower the container, fork back in.
    fn place(&mut self, drive: &mut dyn Drive, at: (i32, i32)) -> Result<(), PhysicalFault> {
        self.travel(drive, (at.0, at.1 - LIFT))?;
        drive.move_to(Axis::Z, FORK_OUT)?;
        self.travel(drive, at)?;
        drive.move_to(Axis::Z, 0)?;
        Ok(())
    }

    fn store(&mut self, drive: &mut dyn Drive, workpiece: Option<Workpiece>) -> Result<SlotId, PhysicalFault> {
        let workpiece = workpiece.ok_or(PhysicalFault::MissingWorkpiece)?;
        let slot = self.storage.first_free().ok_or(PhysicalFault::NoFreeSlot)?;
        self.pick(drive, (0, 0))?;
        self.place(drive, slot_position(slot))?;
        info!(%slot, kind = %workpiece.kind, "stored");
        self.storage.put(slot, workpiece);
        Ok(slot)
    }

    fn fetch(&mut self, drive: &mut dyn Drive, workpiece: Option<Workpiece>) -> Result<(SlotId, Workpiece), PhysicalFault> {
        let wanted = workpiece.ok_or(PhysicalFault::MissingWorkpiece)?.kind;
        let slot = self.storage.find(wanted).ok_or(PhysicalFault::NotFound(wanted))?;
        self.pick(drive, slot_position(slot))?;
        self.place(drive, (0, 0))?;
        let fetched = self.storage.take(slot).ok_or(PhysicalFault::NotFound(wanted))?;
        info!(%slot, kind = %fetched.kind, "fetched");
        Ok((slot, fetched))
    }

    /// Move the empty container of the first free slot to the conveyor, or back.
    fn shuttle_container(&mut self, drive: &mut dyn Drive, outward: bool) -> Result<SlotId, PhysicalFault> {
        let slot = self.storage.first_free().ok_or(PhysicalFault::NoFreeSlot)?;
        let (from, to) = if outward {
            (slot_position(slot), (0, 0))
        } else {
            ((0, 0), slot_position(slot))
        };
        self.pick(drive, from)?;
        self.place(drive, to)?;
        Ok(slot)
    }

    fn calibrate(&mut self, drive: &mut dyn Drive, outbox: &mut Outbox) -> Result<(), PhysicalFault> {
        drive.home(Axis::Z)?;
        drive.home(Axis::X)?;
        drive.home(Axis::Y)?;
        self.crane = (0, 0);
        outbox.progress(Event::Peer(CommandKind::WarehouseAck(WarehouseAck::ok(
            WarehouseAckCode::CalibNav,
            None,
            None,
        ))));
        // Visit the far corner so both axes run their full travel once.
        self.travel(drive, (TRAVEL_MAX, TRAVEL_MAX))?;
        self.travel(drive, (0, 0))?;
        Ok(())
    }

    fn jog(&mut self, drive: &mut dyn Drive, sample: JoystickSample) -> Result<(), PhysicalFault> {
        let step = |deflection: i32| {
            if deflection.unsigned_abs() < JOG_DEADZONE.unsigned_abs() { 0 } else { deflection / JOG_DIVISOR }
        };
        let x = self.crane.0.saturating_add(step(sample.ax1)).clamp(0, TRAVEL_MAX);
        let y = self.crane.1.saturating_add(step(sample.ay1)).clamp(0, TRAVEL_MAX);
        if (x, y) != self.crane {
            self.travel(drive, (x, y))?;
        }
        if sample.b1 {
            drive.home(Axis::Z)?;
        }
        Ok(())
    }

    fn stock(&self, outbox: &mut Outbox) {
        outbox.push(Event::Stock(self.storage.snapshot()));
    }
}

impl Default for Warehouse {
    fn default() -> Self {
        Self::new()
    }
}

fn acknowledge(
    outbox: &mut Outbox,
    code: WarehouseAckCode,
    requested: Option<Workpiece>,
    result: Result<(Option<Workpiece>, SlotId), PhysicalFault>,
) {
    let ack = match result {
        Ok((workpiece, slot)) => WarehouseAck::ok(code, workpiece, Some(slot)),
        Err(fault) => {
            warn!(?code, %fault, "warehouse operation failed");
            WarehouseAck::failed(code, requested, fault)
        }
    };
    outbox.peer(CommandKind::WarehouseAck(ack));
}

impl Station for Warehouse {
    type State = WarehouseState;

    fn kind(&self) -> StationKind {
        StationKind::Hbw
    }

    fn state_for(&self, command: &CommandKind) -> WarehouseState {
        match command {
            CommandKind::Calibrate => WarehouseState::Calibrating,
            CommandKind::StoreWorkpiece(_) => WarehouseState::Storing,
            CommandKind::FetchWorkpiece(_) => WarehouseState::Fetching,
            CommandKind::FetchContainer(_) => WarehouseState::FetchingContainer,
            CommandKind::StoreContainer(_) => WarehouseState::StoringContainer,
            CommandKind::ResetStorage => WarehouseState::ResettingStorage,
            CommandKind::Joystick(_) => WarehouseState::Jogging,
            _ => WarehouseState::Idle,
        }
    }

    fn execute(&mut self, command: Command, drive: &mut dyn Drive, outbox: &mut Outbox) {
        match command.kind {
            CommandKind::StoreWorkpiece(workpiece) => {
                let result = self.store(drive, workpiece.clone());
                let stored = result.is_ok();
                acknowledge(
                    outbox,
                    WarehouseAckCode::Stored,
                    workpiece.clone(),
                    result.map(|slot| (workpiece, slot)),
                );
                if stored {
                    self.stock(outbox);
                }
            }
            CommandKind::FetchWorkpiece(workpiece) => {
                let result = self.fetch(drive, workpiece.clone());
                let fetched = result.is_ok();
                acknowledge(
                    outbox,
                    WarehouseAckCode::Fetched,
                    workpiece,
                    result.map(|(slot, fetched)| (Some(fetched), slot)),
                );
                if fetched {
                    self.stock(outbox);
                }
            }
            CommandKind::FetchContainer(workpiece) => {
                let result = self.shuttle_container(drive, true);
                acknowledge(
                    outbox,
                    WarehouseAckCode::ContainerFetched,
                    workpiece.clone(),
                    result.map(|slot| (workpiece, slot)),
                );
            }
            CommandKind::StoreContainer(workpiece) => {
                let result = self.shuttle_container(drive, false);
                acknowledge(
                    outbox,
                    WarehouseAckCode::ContainerStored,
                    workpiece.clone(),
                    result.map(|slot| (workpiece, slot)),
                );
            }
            CommandKind::Calibrate => {
                let ack = match self.calibrate(drive, outbox) {
                    Ok(()) => WarehouseAck::ok(WarehouseAckCode::CalibEnd, None, None),
                    Err(fault) => {
                        warn!(%fault, "calibration failed");
                        WarehouseAck::failed(WarehouseAckCode::CalibEnd, None, fault)
                    }
                };
                outbox.peer(CommandKind::WarehouseAck(ack));
            }
            CommandKind::ResetStorage => {
                info!(cleared = self.storage.occupied(), "storage reset");
                self.storage.clear();
                self.stock(outbox);
            }
            CommandKind::Joystick(sample) => {
                if let Err(fault) = self.jog(drive, sample) {
                    warn!(%fault, "jog failed");
                }
            }
            other => warn!(command = ?other, "not a warehouse command"),
        }
    }

    fn snapshot(&self, outbox: &mut Outbox) {
        self.stock(outbox);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{DriveFault, SimulatedDrive};
    use crate::freshness::now_timestamp;
    use crate::types::{WorkpieceState, WorkpieceType};

    fn raw(kind: WorkpieceType) -> Option<Workpiece> {
        Some(Workpiece::new(kind, WorkpieceState::Raw))
    }

    fn run(warehouse: &mut Warehouse, drive: &mut SimulatedDrive, kind: CommandKind) -> Vec<Event> {
        let mut outbox = Outbox::new();
        warehouse.execute(Command::new(now_timestamp(), kind), drive, &mut outbox);
        outbox.drain().collect()
    }

    fn ack_of(events: &[Event]) -> &WarehouseAck {
        events
            .iter()
            .find_map(|event| match event {
                Event::Peer(CommandKind::WarehouseAck(ack)) => Some(ack),
                _ => None,
            })
            .expect("warehouse ack published")
    }

    #[test]
    fn nine_stores_fill_the_rack_and_the_tenth_fails() {
        let mut warehouse = Warehouse::new();
        let mut drive = SimulatedDrive::new();
        let mut slots = Vec::new();
        for _ in 0..9 {
            let events = run(&mut warehouse, &mut drive, CommandKind::StoreWorkpiece(raw(WorkpieceType::White)));
            let ack = ack_of(&events);
            assert!(ack.is_ok());
            slots.push(ack.slot.expect("slot reported").to_string());
        }
        assert_eq!(slots, ["A1", "A2", "A3", "B1", "B2", "B3", "C1", "C2", "C3"]);
        assert_eq!(warehouse.storage().occupied(), 9);

        let events = run(&mut warehouse, &mut drive, CommandKind::StoreWorkpiece(raw(WorkpieceType::White)));
        let ack = ack_of(&events);
        assert_eq!(ack.code, WarehouseAckCode::Stored);
        assert_eq!(ack.fault.as_deref(), Some("no free slot"));
        assert_eq!(warehouse.storage().occupied(), 9);
    }

    #[test]
    fn fetching_an_absent_type_reports_not_found() {
        let mut warehouse = Warehouse::new();
        let mut drive = SimulatedDrive::new();
        run(&mut warehouse, &mut drive, CommandKind::StoreWorkpiece(raw(WorkpieceType::White)));
        let before = warehouse.storage().clone();

        let events = run(&mut warehouse, &mut drive, CommandKind::FetchWorkpiece(raw(WorkpieceType::Red)));
        let ack = ack_of(&events);
        assert_eq!(ack.code, WarehouseAckCode::Fetched);
        assert!(!ack.is_ok());
        assert_eq!(ack.fault.as_deref(), Some("no stored workpiece of type RED"));
        assert_eq!(warehouse.storage(), &before);
        // No stock update for a failed fetch.
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn store_and_fetch_keep_occupancy_accounting() {
        let mut warehouse = Warehouse::new();
        let mut drive = SimulatedDrive::new();
        let tagged = Workpiece::new(WorkpieceType::Red, WorkpieceState::Raw).with_tag("04cafe");
        run(&mut warehouse, &mut drive, CommandKind::StoreWorkpiece(raw(WorkpieceType::Blue)));
        run(&mut warehouse, &mut drive, CommandKind::StoreWorkpiece(Some(tagged.clone())));
        run(&mut warehouse, &mut drive, CommandKind::StoreWorkpiece(raw(WorkpieceType::Red)));
        assert_eq!(warehouse.storage().occupied(), 3);

        let events = run(&mut warehouse, &mut drive, CommandKind::FetchWorkpiece(raw(WorkpieceType::Red)));
        let ack = ack_of(&events);
        assert_eq!(ack.slot, Some(SlotId::new(0, 1)));
        assert_eq!(ack.workpiece, Some(tagged));
        assert!(matches!(events.last(), Some(Event::Stock(_))));
        assert_eq!(warehouse.storage().occupied(), 2);

        // The freed slot is the first free one again.
        let events = run(&mut warehouse, &mut drive, CommandKind::StoreWorkpiece(raw(WorkpieceType::White)));
        assert_eq!(ack_of(&events).slot, Some(SlotId::new(0, 1)));
        assert_eq!(warehouse.storage().occupied(), 3);
    }

    #[test]
    fn reset_is_idempotent_and_publishes_stock() {
        let mut warehouse = Warehouse::new();
        let mut drive = SimulatedDrive::new();
        run(&mut warehouse, &mut drive, CommandKind::StoreWorkpiece(raw(WorkpieceType::Blue)));
        for _ in 0..2 {
            let events = run(&mut warehouse, &mut drive, CommandKind::ResetStorage);
            let [Event::Stock(slots)] = events.as_slice() else {
                panic!("expected a single stock snapshot, got {events:?}");
            };
            assert!(slots.iter().all(|(_, workpiece)| workpiece.is_none()));
            assert_eq!(warehouse.storage().occupied(), 0);
        }
    }

    #[test]
    fn store_without_workpiece_is_rejected() {
        let mut warehouse = Warehouse::new();
        let mut drive = SimulatedDrive::new();
        let log = drive.log();
        let events = run(&mut warehouse, &mut drive, CommandKind::StoreWorkpiece(None));
        assert_eq!(ack_of(&events).fault.as_deref(), Some("command carries no workpiece"));
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn drive_fault_becomes_failure_ack_without_occupying() {
        let mut warehouse = Warehouse::new();
        let mut drive = SimulatedDrive::new();
        drive.inject_fault(DriveFault::Axis(Axis::Z));
        let events = run(&mut warehouse, &mut drive, CommandKind::StoreWorkpiece(raw(WorkpieceType::White)));
        let ack = ack_of(&events);
        assert!(!ack.is_ok());
        assert_eq!(ack.workpiece, raw(WorkpieceType::White));
        assert_eq!(warehouse.storage().occupied(), 0);
    }

    #[test]
    fn calibration_acks_navigation_then_end() {
        let mut warehouse = Warehouse::new();
        let mut drive = SimulatedDrive::new();
        let events = run(&mut warehouse, &mut drive, CommandKind::Calibrate);
        let codes: Vec<WarehouseAckCode> = events
            .iter()
            .filter_map(|event| match event {
                Event::Peer(CommandKind::WarehouseAck(ack)) if ack.is_ok() => Some(ack.code),
                _ => None,
            })
            .collect();
        assert_eq!(codes, [WarehouseAckCode::CalibNav, WarehouseAckCode::CalibEnd]);
        assert_eq!(drive.position(Axis::X), 0);
    }

    #[test]
    fn container_shuttle_leaves_occupancy_alone() {
        let mut warehouse = Warehouse::new();
        let mut drive = SimulatedDrive::new();
        run(&mut warehouse, &mut drive, CommandKind::StoreWorkpiece(raw(WorkpieceType::Red)));
        let events = run(&mut warehouse, &mut drive, CommandKind::FetchContainer(None));
        let ack = ack_of(&events);
        assert_eq!(ack.code, WarehouseAckCode::ContainerFetched);
        assert_eq!(ack.slot, Some(SlotId::new(0, 1)));
        let events = run(&mut warehouse, &mut drive, CommandKind::StoreContainer(None));
        assert_eq!(ack_of(&events).code, WarehouseAckCode::ContainerStored);
        assert_eq!(warehouse.storage().occupied(), 1);
    }

    #[test]
    fn joystick_jogs_within_travel_limits() {
        let mut warehouse = Warehouse::new();
        let mut drive = SimulatedDrive::new();
        let sample = JoystickSample {
            ax1: 2000,
            ay1: 50,
            ..JoystickSample::default()
        };
        let events = run(&mut warehouse, &mut drive, CommandKind::Joystick(sample));
        assert!(events.is_empty());
        assert_eq!(drive.position(Axis::X), 40);
        assert_eq!(drive.position(Axis::Y), 0);

        let back = JoystickSample {
            ax1: -20_000,
            ..JoystickSample::default()
        };
        run(&mut warehouse, &mut drive, CommandKind::Joystick(back));
        assert_eq!(drive.position(Axis::X), 0);
    }

    #[test]
    fn extreme_joystick_samples_stay_on_the_rails() {
        let mut warehouse = Warehouse::new();
        let mut drive = SimulatedDrive::new();
        let low = JoystickSample {
            ax1: i32::MIN,
            ay1: i32::MIN,
            ..JoystickSample::default()
        };
        run(&mut warehouse, &mut drive, CommandKind::Joystick(low));
        assert_eq!(drive.position(Axis::X), 0);

        let high = JoystickSample {
            ax1: i32::MAX,
            ay1: i32::MAX,
            ..JoystickSample::default()
        };
        for _ in 0..3 {
            run(&mut warehouse, &mut drive, CommandKind::Joystick(high));
        }
        assert_eq!(drive.position(Axis::X), TRAVEL_MAX);
        assert_eq!(drive.position(Axis::Y), TRAVEL_MAX);
    }

    #[test]
    fn transient_states_follow_the_command() {
        let warehouse = Warehouse::new();
        assert_eq!(warehouse.state_for(&CommandKind::Calibrate), WarehouseState::Calibrating);
        assert_eq!(
            warehouse.state_for(&CommandKind::FetchWorkpiece(None)),
            WarehouseState::Fetching
        );
        assert_eq!(warehouse.state_for(&CommandKind::ResetStorage).name(), "resetting_storage");
    }
}
