//! Error taxonomy for the station process.
//!
//! Decode and freshness failures stay at the ingress boundary, physical
//! faults become failure acknowledgments, and only configuration-class
//! errors (unknown topic, failed startup) end the process.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::drive::{Axis, Effector, Sensor};
use crate::types::WorkpieceType;

/// Malformed payload on a topic the station does know.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed payload on {topic}: {source}")]
    Payload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unparseable timestamp {ts:?}")]
    Timestamp { ts: String },

    #[error("unknown command code {code} on {topic}")]
    UnknownCode { topic: String, code: i64 },

    #[error("unknown command {cmd:?} on {topic}")]
    UnknownCommand { topic: String, cmd: String },

    #[error("unknown workpiece {field} {value:?}")]
    UnknownVariant { field: &'static str, value: String },
}

/// A message arrived on a topic this station never subscribed to.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("message on unexpected topic {topic:?}")]
pub struct ProtocolError {
    pub topic: String,
}

/// Outcome of a failed decode: either drop the message or stop the process.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Failure of one hardware drive primitive.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriveError {
    #[error("axis {axis:?} did not reach position {position}")]
    Motion { axis: Axis, position: i32 },

    #[error("sensor {sensor:?} did not respond")]
    Sensor { sensor: Sensor },

    #[error("effector {effector:?} failed")]
    Effector { effector: Effector },
}

/// Failure of a requested physical operation; reported back to the requester.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PhysicalFault {
    #[error("no free slot")]
    NoFreeSlot,

    #[error("no stored workpiece of type {0}")]
    NotFound(WorkpieceType),

    #[error("command carries no workpiece")]
    MissingWorkpiece,

    #[error("station busy: {0}")]
    Busy(&'static str),

    #[error(transparent)]
    Drive(#[from] DriveError),
}

/// Connection-level failures of the pub/sub transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out after {0:?} connecting to broker")]
    ConnectTimeout(Duration),

    #[error("timed out after {0:?} waiting for subscription ack")]
    SubscribeTimeout(Duration),

    #[error("transport is not connected")]
    Closed,

    #[error("transport client error: {0}")]
    Client(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {field} in {path}: {reason}")]
    Invalid {
        path: PathBuf,
        field: &'static str,
        reason: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("control loop thread panicked")]
    ControlLoopPanicked,
}
