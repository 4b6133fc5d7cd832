//! Sorting line: color sensor on a conveyor and one ejector per bay.

use tracing::{info, warn};

use crate::command::{Command, CommandKind, Outbox};
use crate::drive::{Actuation, Drive, Effector, Reading, Sensor};
use crate::error::DriveError;
use crate::types::{StationKind, WorkpieceType};

use super::{Station, StationState};

/// Light barrier at the conveyor entry.
const ENTRY_BARRIER: u8 = 1;
const BARRIER_ATTEMPTS: usize = 50;
/// Readings below this are white.
const WHITE_BELOW: i32 = 1000;
/// Readings below this (and not white) are red; everything else is blue.
const RED_BELOW: i32 = 1500;

/// Map a color sensor reading to a workpiece type.
pub fn classify(value: i32) -> WorkpieceType {
    if value < WHITE_BELOW {
        WorkpieceType::White
    } else if value < RED_BELOW {
        WorkpieceType::Red
    } else {
        WorkpieceType::Blue
    }
}

fn ejector_for(kind: WorkpieceType) -> u8 {
    match kind {
        WorkpieceType::White | WorkpieceType::None => 0,
        WorkpieceType::Red => 1,
        WorkpieceType::Blue => 2,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortingState {
    Idle,
    Starting,
    Sorting,
    ShuttingDown,
}

impl StationState for SortingState {
    const IDLE: Self = Self::Idle;
    const SHUTTING_DOWN: Self = Self::ShuttingDown;

    fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Sorting => "sorting",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

#[derive(Default)]
pub struct Sorting {
    conveyor_running: bool,
    sorted: Vec<WorkpieceType>,
}

impl Sorting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sorted(&self) -> &[WorkpieceType] {
        &self.sorted
    }

    fn conveyor(&mut self, drive: &mut dyn Drive, on: bool) -> Result<(), DriveError> {
        let actuation = if on { Actuation::On } else { Actuation::Off };
        drive.actuate(Effector::Conveyor, actuation)?;
        self.conveyor_running = on;
        Ok(())
    }

    fn stop(&mut self, drive: &mut dyn Drive) {
        if let Err(err) = self.conveyor(drive, false) {
            warn!(%err, "conveyor did not stop");
        }
    }

    fn sort(&mut self, drive: &mut dyn Drive, outbox: &mut Outbox) -> Result<WorkpieceType, DriveError> {
        if !self.conveyor_running {
            self.conveyor(drive, true)?;
        }
        drive.wait_for(Sensor::LightBarrier(ENTRY_BARRIER), BARRIER_ATTEMPTS)?;
        outbox.peer(CommandKind::SortingStarted);

        let kind = match drive.sense(Sensor::Color)? {
            Reading::Analog(value) => classify(value),
            _ => return Err(DriveError::Sensor { sensor: Sensor::Color }),
        };
        let ejector = Effector::Ejector(ejector_for(kind));
        drive.actuate(Effector::Compressor, Actuation::On)?;
        drive.actuate(ejector, Actuation::On)?;
        drive.actuate(ejector, Actuation::Off)?;
        drive.actuate(Effector::Compressor, Actuation::Off)?;
        self.conveyor(drive, false)?;
        Ok(kind)
    }
}

impl Station for Sorting {
    type State = SortingState;

    fn kind(&self) -> StationKind {
        StationKind::Sld
    }

    fn state_for(&self, command: &CommandKind) -> SortingState {
        match command {
            CommandKind::StartSorting => SortingState::Starting,
            CommandKind::ProducedAck(_) => SortingState::Sorting,
            _ => SortingState::Idle,
        }
    }

    fn execute(&mut self, command: Command, drive: &mut dyn Drive, outbox: &mut Outbox) {
        match command.kind {
            CommandKind::StartSorting => {
                if let Err(err) = self.conveyor(drive, true) {
                    warn!(%err, "conveyor did not start");
                }
            }
            CommandKind::ProducedAck(_) => match self.sort(drive, outbox) {
                Ok(kind) => {
                    info!(%kind, "sorted");
                    self.sorted.push(kind);
                    outbox.peer(CommandKind::SortedAck(kind));
                }
                Err(err) => {
                    warn!(%err, "sorting failed");
                    self.stop(drive);
                    outbox.peer(CommandKind::SortingFailed(err.to_string()));
                }
            },
            CommandKind::ProductionFailed(fault) => {
                warn!(%fault, "processing gave up on the workpiece");
                self.stop(drive);
            }
            other => warn!(command = ?other, "not a sorting command"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Event;
    use crate::drive::{DriveOp, SimulatedDrive};
    use crate::freshness::now_timestamp;

    fn run(station: &mut Sorting, drive: &mut SimulatedDrive, kind: CommandKind) -> Vec<Event> {
        let mut outbox = Outbox::new();
        station.execute(Command::new(now_timestamp(), kind), drive, &mut outbox);
        outbox.drain().collect()
    }

    #[test]
    fn color_thresholds() {
        assert_eq!(classify(0), WorkpieceType::White);
        assert_eq!(classify(999), WorkpieceType::White);
        assert_eq!(classify(1000), WorkpieceType::Red);
        assert_eq!(classify(1499), WorkpieceType::Red);
        assert_eq!(classify(1500), WorkpieceType::Blue);
    }

    #[test]
    fn produced_workpiece_is_classified_and_ejected() {
        let mut station = Sorting::new();
        let mut drive = SimulatedDrive::new();
        let log = drive.log();
        drive.script(Sensor::Color, Reading::Analog(1200));

        assert!(run(&mut station, &mut drive, CommandKind::StartSorting).is_empty());
        let events = run(&mut station, &mut drive, CommandKind::ProducedAck(None));
        assert_eq!(
            events,
            [
                Event::Peer(CommandKind::SortingStarted),
                Event::Peer(CommandKind::SortedAck(WorkpieceType::Red)),
            ]
        );
        assert_eq!(station.sorted(), [WorkpieceType::Red]);
        assert!(log.ops().contains(&DriveOp::Actuate(Effector::Ejector(1), Actuation::On)));
        assert_eq!(
            log.ops().last(),
            Some(&DriveOp::Actuate(Effector::Conveyor, Actuation::Off))
        );
    }

    #[test]
    fn workpiece_that_never_arrives_is_not_reported_sorted() {
        let mut station = Sorting::new();
        let mut drive = SimulatedDrive::new();
        for _ in 0..BARRIER_ATTEMPTS {
            drive.script(Sensor::LightBarrier(ENTRY_BARRIER), Reading::Switch(false));
        }
        let events = run(&mut station, &mut drive, CommandKind::ProducedAck(None));
        let [Event::Peer(CommandKind::SortingFailed(fault))] = events.as_slice() else {
            panic!("expected a sorting failure, got {events:?}");
        };
        assert!(fault.contains("LightBarrier"), "fault names the barrier: {fault}");
        assert!(station.sorted().is_empty());
        assert_eq!(station.state_for(&CommandKind::ProducedAck(None)), SortingState::Sorting);
    }

    #[test]
    fn production_failure_stops_the_running_belt() {
        let mut station = Sorting::new();
        let mut drive = SimulatedDrive::new();
        let log = drive.log();
        run(&mut station, &mut drive, CommandKind::StartSorting);
        let events = run(&mut station, &mut drive, CommandKind::ProductionFailed("saw jammed".into()));
        assert!(events.is_empty());
        assert_eq!(
            log.ops().last(),
            Some(&DriveOp::Actuate(Effector::Conveyor, Actuation::Off))
        );
    }
}
