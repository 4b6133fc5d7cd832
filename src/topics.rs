//! Topic names of the cell bus and the per-station subscription tables.

use crate::types::StationKind;

pub const STATE_ACK: &str = "output/state/ack";
pub const ORDER: &str = "output/order";
pub const NFC_DS: &str = "output/nfc/ds";
pub const JOYSTICK: &str = "local/ssc/joy";
pub const VGR_DO: &str = "local/vgr/do";
pub const HBW_ACK: &str = "local/hbw/ack";
pub const MPO_ACK: &str = "local/mpo/ack";
pub const SLD_ACK: &str = "local/sld/ack";
pub const STOCK: &str = "input/stock";
pub const NFC_REPORT: &str = "input/nfc/ds";

/// Every topic the cell uses, inbound and outbound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    StateAck,
    Order,
    NfcDs,
    Joystick,
    VgrDo,
    HbwAck,
    MpoAck,
    SldAck,
    Stock,
    NfcReport,
    State(StationKind),
}

impl Topic {
    pub fn parse(name: &str) -> Option<Self> {
        let topic = match name {
            STATE_ACK => Self::StateAck,
            ORDER => Self::Order,
            NFC_DS => Self::NfcDs,
            JOYSTICK => Self::Joystick,
            VGR_DO => Self::VgrDo,
            HBW_ACK => Self::HbwAck,
            MPO_ACK => Self::MpoAck,
            SLD_ACK => Self::SldAck,
            STOCK => Self::Stock,
            NFC_REPORT => Self::NfcReport,
            "input/state/hbw" => Self::State(StationKind::Hbw),
            "input/state/vgr" => Self::State(StationKind::Vgr),
            "input/state/mpo" => Self::State(StationKind::Mpo),
            "input/state/sld" => Self::State(StationKind::Sld),
            _ => return None,
        };
        Some(topic)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::StateAck => STATE_ACK,
            Self::Order => ORDER,
            Self::NfcDs => NFC_DS,
            Self::Joystick => JOYSTICK,
            Self::VgrDo => VGR_DO,
            Self::HbwAck => HBW_ACK,
            Self::MpoAck => MPO_ACK,
            Self::SldAck => SLD_ACK,
            Self::Stock => STOCK,
            Self::NfcReport => NFC_REPORT,
            Self::State(StationKind::Hbw) => "input/state/hbw",
            Self::State(StationKind::Vgr) => "input/state/vgr",
            Self::State(StationKind::Mpo) => "input/state/mpo",
            Self::State(StationKind::Sld) => "input/state/sld",
        }
    }
}

impl StationKind {
    /// Inbound topics of this station. Anything else arriving is fatal.
    pub fn subscriptions(self) -> &'static [&'static str] {
        match self {
            Self::Hbw => &[STATE_ACK, JOYSTICK, VGR_DO],
            Self::Vgr => &[STATE_ACK, ORDER, NFC_DS, JOYSTICK, MPO_ACK, HBW_ACK, SLD_ACK],
            Self::Mpo => &[STATE_ACK, VGR_DO, SLD_ACK],
            Self::Sld => &[STATE_ACK, MPO_ACK, VGR_DO],
        }
    }

    pub fn subscribes_to(self, topic: &str) -> bool {
        self.subscriptions().contains(&topic)
    }
}
