//! Interrupt decoding.
//!
//! The chip reports one interrupt/status word. It is decoded once, per
//! operating mode, into a list of events; nothing downstream looks at raw
//! bits again.

use heapless::Vec;

use crate::config::PP_BUF_LEN;

/// Canonical interrupt and status bit layout.
pub mod bits {
    pub const OVER_CURRENT: u16 = 1 << 0;
    pub const OVER_VOLTAGE: u16 = 1 << 1;
    pub const OVER_TEMP: u16 = 1 << 2;
    pub const UNDER_VOLTAGE: u16 = 1 << 3;
    pub const CC_SEND_BUSY: u16 = 1 << 4;
    pub const MODE_CHANGED: u16 = 1 << 5;
    pub const VRECT: u16 = 1 << 6;
    // vout present in the status word, vout changed in the interrupt word
    pub const VOUT: u16 = 1 << 7;
    pub const TX_CONFLICT: u16 = 1 << 8;
    pub const RX_CONNECTED: u16 = 1 << 9;
    pub const CSP: u16 = 1 << 10;
    pub const CC_ERROR: u16 = 1 << 11;
    pub const CC_RESET: u16 = 1 << 12;
    pub const PP_RECEIVED: u16 = 1 << 14;
    pub const CC_DATA_RECEIVED: u16 = 1 << 15;

    pub const LIMIT_MASK: u16 = OVER_CURRENT | OVER_VOLTAGE | OVER_TEMP | UNDER_VOLTAGE;
    pub const CC_MASK: u16 = CC_SEND_BUSY | CC_ERROR | CC_RESET | PP_RECEIVED | CC_DATA_RECEIVED;

    pub const RX_MASK: u16 = LIMIT_MASK | CC_MASK | MODE_CHANGED | VRECT | VOUT;
    pub const RTX_MASK: u16 = MODE_CHANGED | TX_CONFLICT | RX_CONNECTED | CSP;
}

pub const MAX_EVENTS: usize = 8;

/// Which handler set owns the interrupt line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IrqMode {
    Receive,
    Transmit,
}

impl IrqMode {
    pub fn mask(self) -> u16 {
        match self {
            IrqMode::Receive => bits::RX_MASK,
            IrqMode::Transmit => bits::RTX_MASK,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LimitFlags {
    pub over_current: bool,
    pub over_voltage: bool,
    pub over_temp: bool,
    pub under_voltage: bool,
}

impl LimitFlags {
    pub fn from_bits(raw: u16) -> Self {
        Self {
            over_current: raw & bits::OVER_CURRENT != 0,
            over_voltage: raw & bits::OVER_VOLTAGE != 0,
            over_temp: raw & bits::OVER_TEMP != 0,
            under_voltage: raw & bits::UNDER_VOLTAGE != 0,
        }
    }

    pub fn any(&self) -> bool {
        self.over_current || self.over_voltage || self.over_temp || self.under_voltage
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxEvent {
    ModeChanged,
    VoutChanged,
    PowerDetected,
    Limit(LimitFlags),
    DataReceived,
    SendComplete,
    ProprietaryPacket,
    CommReset,
    CommError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RtxEvent {
    ModeChanged,
    TxConflict,
    RxConnectionChanged,
    ChargeStatus,
}

/// Decodes receive mode interrupt bits in handling order.
pub fn decode_rx(raw: u16) -> Vec<RxEvent, MAX_EVENTS> {
    let mut events = Vec::new();

    // capacity covers every variant, pushes can't fail
    let mut push = |cond: bool, ev: RxEvent| {
        if cond {
            let _ = events.push(ev);
        }
    };

    let limit = LimitFlags::from_bits(raw);
    push(raw & bits::MODE_CHANGED != 0, RxEvent::ModeChanged);
    push(raw & bits::VOUT != 0, RxEvent::VoutChanged);
    push(raw & bits::VRECT != 0, RxEvent::PowerDetected);
    push(limit.any(), RxEvent::Limit(limit));
    push(raw & bits::CC_DATA_RECEIVED != 0, RxEvent::DataReceived);
    push(raw & bits::CC_SEND_BUSY != 0, RxEvent::SendComplete);
    push(raw & bits::PP_RECEIVED != 0, RxEvent::ProprietaryPacket);
    push(raw & bits::CC_RESET != 0, RxEvent::CommReset);
    push(raw & bits::CC_ERROR != 0, RxEvent::CommError);

    events
}

/// Decodes transmit mode interrupt bits in handling order.
pub fn decode_rtx(raw: u16) -> Vec<RtxEvent, MAX_EVENTS> {
    let mut events = Vec::new();

    let mut push = |cond: bool, ev: RtxEvent| {
        if cond {
            let _ = events.push(ev);
        }
    };

    push(raw & bits::MODE_CHANGED != 0, RtxEvent::ModeChanged);
    push(raw & bits::TX_CONFLICT != 0, RtxEvent::TxConflict);
    push(raw & bits::RX_CONNECTED != 0, RtxEvent::RxConnectionChanged);
    push(raw & bits::CSP != 0, RtxEvent::ChargeStatus);

    events
}

/////////////////////////////
//  proprietary packets    //
/////////////////////////////

pub const FAST_SERIAL_ID_HEADER: u8 = 0x4F;
pub const FAST_SERIAL_ID_SIZE: usize = 4;
pub const ACCESSORY_TYPE_OFFSET: usize = FAST_SERIAL_ID_SIZE;
pub const ACCESSORY_TYPE_MASK: u8 = 0x07;
pub const ACCESSORY_TYPE_PHONE: u8 = 1 << 2;
pub const AICL_ENABLED: u8 = 1 << 7;
pub const TX_ACCESSORY_TYPE: u8 = ACCESSORY_TYPE_PHONE | AICL_ENABLED;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessoryType {
    Phone,
    Other(u8),
}

/// Fast serial id packet sent by a transmitter that knows us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProprietaryPacket {
    pub serial: [u8; FAST_SERIAL_ID_SIZE - 1],
    pub accessory: AccessoryType,
}

impl ProprietaryPacket {
    /// `None` unless the buffer carries a fast serial id header.
    pub fn parse(buf: &[u8; PP_BUF_LEN]) -> Option<Self> {
        if buf[0] != FAST_SERIAL_ID_HEADER {
            return None;
        }

        let accessory = match buf[ACCESSORY_TYPE_OFFSET] & ACCESSORY_TYPE_MASK {
            t if t == ACCESSORY_TYPE_PHONE => AccessoryType::Phone,
            t => AccessoryType::Other(t),
        };

        Some(Self {
            serial: [buf[1], buf[2], buf[3]],
            accessory,
        })
    }

    /// Packet we broadcast to a receiver while in reverse power mode.
    pub fn encode_tx_id(device_id: u32) -> [u8; FAST_SERIAL_ID_SIZE + 1] {
        let id = device_id.to_be_bytes();
        [FAST_SERIAL_ID_HEADER, id[1], id[2], id[3], TX_ACCESSORY_TYPE]
    }
}
