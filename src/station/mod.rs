//! Station state machine skeleton shared by all station kinds.
//!
//! A `StationController` is the only owner of the hardware drive. It takes
//! one request at a time from the queue and runs it to completion before
//! looking at the next one.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::command::{Command, CommandKind, Event, Outbox, Request};
use crate::drive::Drive;
use crate::publisher::Publisher;
use crate::request_queue::RequestQueue;
use crate::types::StationKind;

pub mod processing;
pub mod robot;
pub mod sorting;
pub mod warehouse;

pub use processing::Processing;
pub use robot::Robot;
pub use sorting::Sorting;
pub use warehouse::Warehouse;

/// Closed set of states of one station kind.
pub trait StationState: Copy + Eq + fmt::Debug + Send + 'static {
    const IDLE: Self;
    const SHUTTING_DOWN: Self;

    /// Name reported on `input/state/<station>`.
    fn name(self) -> &'static str;
}

/// Per-kind behavior plugged into the shared control loop.
pub trait Station: Send + 'static {
    type State: StationState;

    fn kind(&self) -> StationKind;

    /// Transient state entered while `command` executes.
    fn state_for(&self, command: &CommandKind) -> Self::State;

    /// Run one command to completion. Physical faults end up in `outbox` as
    /// failure acknowledgments; they never escape.
    fn execute(&mut self, command: Command, drive: &mut dyn Drive, outbox: &mut Outbox);

    /// Periodic status beyond the state report.
    fn snapshot(&self, _outbox: &mut Outbox) {}
}

/// Counters reported when the control loop ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub commands: usize,
    pub notifies: usize,
    /// Ended by `Quit` rather than by the queue closing.
    pub quit: bool,
}

pub struct StationController<S: Station, D: Drive> {
    station: S,
    drive: D,
    state: S::State,
    queue: Arc<RequestQueue>,
    publisher: Publisher,
}

impl<S: Station, D: Drive> StationController<S, D> {
    pub fn new(station: S, drive: D, queue: Arc<RequestQueue>, publisher: Publisher) -> Self {
        Self {
            station,
            drive,
            state: S::State::IDLE,
            queue,
            publisher,
        }
    }

    #[allow(dead_code)]
    pub fn state(&self) -> S::State {
        self.state
    }

    /// Consume requests until `Quit` or until the queue closes.
    pub fn run(mut self) -> (S, LoopStats) {
        let kind = self.station.kind();
        info!(station = %kind, "control loop started");
        self.publish_state();

        let mut stats = LoopStats::default();
        while let Some(request) = self.queue.pop_blocking_or_closed() {
            match request {
                Request::Notify => {
                    stats.notifies += 1;
                    self.publish_state();
                    let mut outbox = Outbox::new();
                    self.station.snapshot(&mut outbox);
                    self.publisher.flush(&mut outbox);
                }
                Request::Command(Command {
                    kind: CommandKind::Quit,
                    ..
                }) => {
                    stats.quit = true;
                    self.enter(S::State::SHUTTING_DOWN);
                    break;
                }
                Request::Command(command) => {
                    stats.commands += 1;
                    self.step(command);
                }
            }
        }
        info!(station = %kind, commands = stats.commands, "control loop stopped");
        (self.station, stats)
    }

    fn step(&mut self, command: Command) {
        let transient = self.station.state_for(&command.kind);
        debug!(station = %self.station.kind(), command = ?command.kind, "executing");
        self.enter(transient);

        let mut outbox = Outbox::live(self.publisher.clone());
        self.station.execute(command, &mut self.drive, &mut outbox);

        self.enter(S::State::IDLE);
        self.publisher.flush(&mut outbox);
    }

    fn enter(&mut self, next: S::State) {
        if next == self.state {
            return;
        }
        info!(
            station = %self.station.kind(),
            from = self.state.name(),
            to = next.name(),
            "transition"
        );
        self.state = next;
        self.publish_state();
    }

    fn publish_state(&self) {
        self.publisher.publish(&Event::State {
            station: self.station.kind(),
            state: self.state.name(),
        });
    }
}
