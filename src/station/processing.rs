//! Multi-processing station: oven, turntable saw, and the conveyor to the
//! sorting line.

use tracing::{debug, info, warn};

use crate::command::{Command, CommandKind, Outbox};
use crate::drive::{Actuation, Axis, Drive, Effector, Sensor};
use crate::error::DriveError;
use crate::types::{StationKind, Workpiece, WorkpieceState};

use super::{Station, StationState};

/// Light barrier at the oven tray.
const OVEN_BARRIER: u8 = 1;
const BARRIER_ATTEMPTS: usize = 20;
/// Turntable positions.
const TABLE_SAW: i32 = 90;
const TABLE_CONVEYOR: i32 = 180;
/// Ejector pushing the workpiece from the turntable onto the conveyor.
const TABLE_EJECTOR: u8 = 0;
const CONVEYOR_SPEED: i32 = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingState {
    Idle,
    Producing,
    Releasing,
    ShuttingDown,
}

impl StationState for ProcessingState {
    const IDLE: Self = Self::Idle;
    const SHUTTING_DOWN: Self = Self::ShuttingDown;

    fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Producing => "producing",
            Self::Releasing => "releasing",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

#[derive(Default)]
pub struct Processing {
    awaiting_sorter: bool,
    produced: usize,
}

impl Processing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conveyor still running towards the sorter.
    #[allow(dead_code)]
    pub fn awaiting_sorter(&self) -> bool {
        self.awaiting_sorter
    }

    #[allow(dead_code)]
    pub fn produced(&self) -> usize {
        self.produced
    }

    fn stop_conveyor(&mut self, drive: &mut dyn Drive) {
        match drive.actuate(Effector::Conveyor, Actuation::Off) {
            Ok(()) => self.awaiting_sorter = false,
            Err(err) => warn!(%err, "conveyor did not stop"),
        }
    }

    fn produce(&mut self, drive: &mut dyn Drive) -> Result<(), DriveError> {
        drive.wait_for(Sensor::LightBarrier(OVEN_BARRIER), BARRIER_ATTEMPTS)?;
        drive.actuate(Effector::Oven, Actuation::On)?;
        drive.actuate(Effector::Oven, Actuation::Off)?;
        drive.move_to(Axis::Rotate, TABLE_SAW)?;
        drive.actuate(Effector::Saw, Actuation::On)?;
        drive.actuate(Effector::Saw, Actuation::Off)?;
        drive.move_to(Axis::Rotate, TABLE_CONVEYOR)?;
        drive.actuate(Effector::Conveyor, Actuation::Speed(CONVEYOR_SPEED))?;
        drive.actuate(Effector::Compressor, Actuation::On)?;
        drive.actuate(Effector::Ejector(TABLE_EJECTOR), Actuation::On)?;
        drive.actuate(Effector::Ejector(TABLE_EJECTOR), Actuation::Off)?;
        drive.actuate(Effector::Compressor, Actuation::Off)?;
        drive.home(Axis::Rotate)
    }
}

impl Station for Processing {
    type State = ProcessingState;

    fn kind(&self) -> StationKind {
        StationKind::Mpo
    }

    fn state_for(&self, command: &CommandKind) -> ProcessingState {
        match command {
            CommandKind::StartProduction(_) => ProcessingState::Producing,
            CommandKind::SortingStarted | CommandKind::SortingFailed(_) => ProcessingState::Releasing,
            _ => ProcessingState::Idle,
        }
    }

    fn execute(&mut self, command: Command, drive: &mut dyn Drive, outbox: &mut Outbox) {
        match command.kind {
            CommandKind::StartProduction(workpiece) => {
                outbox.peer(CommandKind::ProcessingStarted(workpiece.clone()));
                if let Err(err) = self.produce(drive) {
                    warn!(%err, "production failed");
                    self.stop_conveyor(drive);
                    outbox.peer(CommandKind::ProductionFailed(err.to_string()));
                    return;
                }
                let processed = workpiece.map(|wp| Workpiece {
                    state: WorkpieceState::Processed,
                    ..wp
                });
                self.produced += 1;
                self.awaiting_sorter = true;
                info!(produced = self.produced, "workpiece released to sorter");
                outbox.peer(CommandKind::ProducedAck(processed));
            }
            CommandKind::SortingStarted => {
                if !self.awaiting_sorter {
                    debug!("sorter started without a pending workpiece");
                }
                self.stop_conveyor(drive);
            }
            CommandKind::SortingFailed(fault) => {
                warn!(%fault, "sorter gave up on the workpiece");
                self.stop_conveyor(drive);
            }
            other => warn!(command = ?other, "not a processing command"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Event;
    use crate::drive::{DriveFault, DriveOp, Reading, SimulatedDrive};
    use crate::freshness::now_timestamp;
    use crate::types::WorkpieceType;

    fn run(station: &mut Processing, drive: &mut SimulatedDrive, kind: CommandKind) -> Vec<Event> {
        let mut outbox = Outbox::new();
        station.execute(Command::new(now_timestamp(), kind), drive, &mut outbox);
        outbox.drain().collect()
    }

    #[test]
    fn production_marks_processed_and_keeps_conveyor_running() {
        let mut station = Processing::new();
        let mut drive = SimulatedDrive::new();
        let log = drive.log();
        let raw = Workpiece::new(WorkpieceType::Blue, WorkpieceState::Raw).with_tag("04beef");

        let events = run(&mut station, &mut drive, CommandKind::StartProduction(Some(raw.clone())));
        let processed = Workpiece {
            state: WorkpieceState::Processed,
            ..raw.clone()
        };
        assert_eq!(
            events,
            [
                Event::Peer(CommandKind::ProcessingStarted(Some(raw))),
                Event::Peer(CommandKind::ProducedAck(Some(processed))),
            ]
        );
        assert!(station.awaiting_sorter());
        let conveyor_off = DriveOp::Actuate(Effector::Conveyor, Actuation::Off);
        assert!(!log.ops().contains(&conveyor_off));

        assert!(run(&mut station, &mut drive, CommandKind::SortingStarted).is_empty());
        assert!(!station.awaiting_sorter());
        assert_eq!(log.ops().last(), Some(&conveyor_off));
    }

    #[test]
    fn missing_workpiece_at_oven_aborts_without_produced_ack() {
        let mut station = Processing::new();
        let mut drive = SimulatedDrive::new();
        for _ in 0..BARRIER_ATTEMPTS {
            drive.script(Sensor::LightBarrier(OVEN_BARRIER), Reading::Switch(false));
        }
        let events = run(&mut station, &mut drive, CommandKind::StartProduction(None));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Event::Peer(CommandKind::ProcessingStarted(None)));
        assert!(matches!(&events[1], Event::Peer(CommandKind::ProductionFailed(_))));
        assert_eq!(station.produced(), 0);
        assert!(!station.awaiting_sorter());
    }

    #[test]
    fn saw_fault_stops_the_line() {
        let mut station = Processing::new();
        let mut drive = SimulatedDrive::new();
        let log = drive.log();
        drive.inject_fault(DriveFault::Effector(Effector::Saw));
        let events = run(&mut station, &mut drive, CommandKind::StartProduction(None));
        assert_eq!(
            log.ops().last(),
            Some(&DriveOp::Actuate(Effector::Conveyor, Actuation::Off))
        );
        let Some(Event::Peer(CommandKind::ProductionFailed(fault))) = events.last() else {
            panic!("expected a production failure, got {events:?}");
        };
        assert!(fault.contains("Saw"), "fault names the saw: {fault}");
    }

    #[test]
    fn sorter_failure_stops_the_waiting_conveyor() {
        let mut station = Processing::new();
        let mut drive = SimulatedDrive::new();
        let log = drive.log();
        run(&mut station, &mut drive, CommandKind::StartProduction(None));
        assert!(station.awaiting_sorter());

        let events = run(&mut station, &mut drive, CommandKind::SortingFailed("no workpiece".into()));
        assert!(events.is_empty());
        assert!(!station.awaiting_sorter());
        assert_eq!(
            log.ops().last(),
            Some(&DriveOp::Actuate(Effector::Conveyor, Actuation::Off))
        );
    }
}
