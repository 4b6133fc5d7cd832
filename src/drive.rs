//! Synchronous drive primitives for the hardware transfer area.
//!
//! Every call blocks until the physical action finished or failed. Only the
//! station control loop holds a `Drive`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::DriveError;

/// Motor axes. Stations map them onto their own mechanics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
    Rotate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Sensor {
    /// Reference switch at position zero of an axis.
    Reference(Axis),
    /// Light barrier by index; `true` while interrupted.
    LightBarrier(u8),
    /// Analog color sensor of the sorting line.
    Color,
    /// NFC reader of the robot.
    NfcTag,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Effector {
    Conveyor,
    Vacuum,
    Compressor,
    Oven,
    Saw,
    /// Pneumatic ejector in front of sorting bay `n`.
    Ejector(u8),
    NfcEraser,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Actuation {
    On,
    Off,
    Speed(i32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reading {
    Switch(bool),
    Analog(i32),
    Tag(Option<String>),
}

/// Blocking hardware API consumed by the station state machines.
pub trait Drive: Send {
    fn move_to(&mut self, axis: Axis, position: i32) -> Result<(), DriveError>;

    fn sense(&mut self, sensor: Sensor) -> Result<Reading, DriveError>;

    fn actuate(&mut self, effector: Effector, actuation: Actuation) -> Result<(), DriveError>;

    /// Drive an axis to zero and confirm its reference switch.
    fn home(&mut self, axis: Axis) -> Result<(), DriveError> {
        self.move_to(axis, 0)?;
        match self.sense(Sensor::Reference(axis))? {
            Reading::Switch(true) => Ok(()),
            _ => Err(DriveError::Motion { axis, position: 0 }),
        }
    }

    /// Poll a switch-type sensor until it reads `true`, at most `attempts` times.
    fn wait_for(&mut self, sensor: Sensor, attempts: usize) -> Result<(), DriveError> {
        for _ in 0..attempts {
            if let Reading::Switch(true) = self.sense(sensor)? {
                return Ok(());
            }
        }
        Err(DriveError::Sensor { sensor })
    }
}

/// One recorded drive primitive call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriveOp {
    Move(Axis, i32),
    Sense(Sensor),
    Actuate(Effector, Actuation),
}

/// Shared view of the calls a `SimulatedDrive` has performed.
#[derive(Clone, Default)]
pub struct DriveLog {
    ops: Arc<Mutex<Vec<DriveOp>>>,
}

impl DriveLog {
    fn record(&self, op: DriveOp) {
        self.ops.lock().expect("drive log mutex poisoned").push(op);
    }

    #[allow(dead_code)]
    pub fn ops(&self) -> Vec<DriveOp> {
        self.ops.lock().expect("drive log mutex poisoned").clone()
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.ops.lock().expect("drive log mutex poisoned").len()
    }
}

/// Target of an injected failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(dead_code)]
pub enum DriveFault {
    Axis(Axis),
    Sensor(Sensor),
    Effector(Effector),
}

/// In-memory stand-in for the transfer area.
///
/// Sensors answer from a per-sensor script first and fall back to a benign
/// default (switches closed, color reads white, a fixed NFC uid).
pub struct SimulatedDrive {
    positions: HashMap<Axis, i32>,
    scripted: HashMap<Sensor, VecDeque<Reading>>,
    faults: HashSet<DriveFault>,
    step_delay: Duration,
    log: DriveLog,
}

pub const SIMULATED_TAG_UID: &str = "04a1b2c3d4e5f6";

impl SimulatedDrive {
    pub fn new() -> Self {
        Self {
            positions: HashMap::new(),
            scripted: HashMap::new(),
            faults: HashSet::new(),
            step_delay: Duration::ZERO,
            log: DriveLog::default(),
        }
    }

    /// Sleep this long inside every primitive, to mimic motion time.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    #[allow(dead_code)]
    pub fn log(&self) -> DriveLog {
        self.log.clone()
    }

    /// Queue a reading returned by the next `sense` of that sensor.
    pub fn script(&mut self, sensor: Sensor, reading: Reading) {
        self.scripted.entry(sensor).or_default().push_back(reading);
    }

    #[allow(dead_code)]
    pub fn inject_fault(&mut self, fault: DriveFault) {
        self.faults.insert(fault);
    }

    #[allow(dead_code)]
    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    #[allow(dead_code)]
    pub fn position(&self, axis: Axis) -> i32 {
        self.positions.get(&axis).copied().unwrap_or(0)
    }

    fn step(&self) {
        if !self.step_delay.is_zero() {
            thread::sleep(self.step_delay);
        }
    }

    fn default_reading(sensor: Sensor) -> Reading {
        match sensor {
            Sensor::Reference(_) | Sensor::LightBarrier(_) => Reading::Switch(true),
            Sensor::Color => Reading::Analog(800),
            Sensor::NfcTag => Reading::Tag(Some(SIMULATED_TAG_UID.to_string())),
        }
    }
}

impl Default for SimulatedDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl Drive for SimulatedDrive {
    fn move_to(&mut self, axis: Axis, position: i32) -> Result<(), DriveError> {
        self.log.record(DriveOp::Move(axis, position));
        self.step();
        if self.faults.contains(&DriveFault::Axis(axis)) {
            return Err(DriveError::Motion { axis, position });
        }
        self.positions.insert(axis, position);
        Ok(())
    }

    fn sense(&mut self, sensor: Sensor) -> Result<Reading, DriveError> {
        self.log.record(DriveOp::Sense(sensor));
        self.step();
        if self.faults.contains(&DriveFault::Sensor(sensor)) {
            return Err(DriveError::Sensor { sensor });
        }
        let scripted = self
            .scripted
            .get_mut(&sensor)
            .and_then(|queue| queue.pop_front());
        Ok(scripted.unwrap_or_else(|| Self::default_reading(sensor)))
    }

    fn actuate(&mut self, effector: Effector, actuation: Actuation) -> Result<(), DriveError> {
        self.log.record(DriveOp::Actuate(effector, actuation));
        self.step();
        if self.faults.contains(&DriveFault::Effector(effector)) {
            return Err(DriveError::Effector { effector });
        }
        Ok(())
    }
}
