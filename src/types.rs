//! Shared identifiers and the workpiece model used across the cell.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Color of a workpiece as reported by the sorting line or the dashboard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum WorkpieceType {
    #[default]
    None,
    White,
    Red,
    Blue,
}

impl WorkpieceType {
    /// Map a wire string to a type; `None` for anything unrecognized.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "WHITE" => Some(Self::White),
            "RED" => Some(Self::Red),
            "BLUE" => Some(Self::Blue),
            "NONE" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::White => "WHITE",
            Self::Red => "RED",
            Self::Blue => "BLUE",
        }
    }
}

impl fmt::Display for WorkpieceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Processing state of a workpiece.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum WorkpieceState {
    #[default]
    Raw,
    Processed,
    Rejected,
}

impl WorkpieceState {
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "RAW" => Some(Self::Raw),
            "PROCESSED" => Some(Self::Processed),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Raw => "RAW",
            Self::Processed => "PROCESSED",
            Self::Rejected => "REJECTED",
        }
    }
}

/// A physical unit moving through the cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workpiece {
    /// NFC tag uid, when the tag has been read.
    pub tag_uid: Option<String>,
    pub kind: WorkpieceType,
    pub state: WorkpieceState,
}

impl Workpiece {
    pub fn new(kind: WorkpieceType, state: WorkpieceState) -> Self {
        Self {
            tag_uid: None,
            kind,
            state,
        }
    }

    pub fn with_tag(mut self, tag_uid: impl Into<String>) -> Self {
        self.tag_uid = Some(tag_uid.into());
        self
    }
}

/// Two analog sticks with one button each, as sent by the local joystick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct JoystickSample {
    pub ax1: i32,
    pub ay1: i32,
    pub b1: bool,
    pub ax2: i32,
    pub ay2: i32,
    pub b2: bool,
}

/// Number of rows in the warehouse rack.
pub const GRID_ROWS: u8 = 3;
/// Number of columns in the warehouse rack.
pub const GRID_COLUMNS: u8 = 3;

/// Address of one rack slot; rows are lettered from `A`, columns start at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId {
    pub row: u8,
    pub column: u8,
}

impl SlotId {
    /// Zero-based row and column; panics in debug builds when out of range.
    pub fn new(row: u8, column: u8) -> Self {
        debug_assert!(row < GRID_ROWS && column < GRID_COLUMNS, "slot out of range");
        Self { row, column }
    }

    /// All slots in the fixed scan order: row by row, left to right.
    pub fn scan_order() -> impl Iterator<Item = SlotId> {
        (0..GRID_ROWS).flat_map(|row| (0..GRID_COLUMNS).map(move |column| SlotId { row, column }))
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'A' + self.row) as char, self.column + 1)
    }
}

impl FromStr for SlotId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let row = chars.next().ok_or(())?;
        let column: u8 = chars.as_str().parse().map_err(|_| ())?;
        if !row.is_ascii_uppercase() || column == 0 {
            return Err(());
        }
        let row = row as u8 - b'A';
        let column = column - 1;
        if row >= GRID_ROWS || column >= GRID_COLUMNS {
            return Err(());
        }
        Ok(SlotId { row, column })
    }
}

/// The four station kinds of the cell. Chosen per deployment via config.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StationKind {
    /// High-bay warehouse.
    #[default]
    Hbw,
    /// Vacuum-gripper robot.
    Vgr,
    /// Multi-processing station.
    Mpo,
    /// Sorting line.
    Sld,
}

impl StationKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Hbw => "hbw",
            Self::Vgr => "vgr",
            Self::Mpo => "mpo",
            Self::Sld => "sld",
        }
    }
}

impl fmt::Display for StationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
