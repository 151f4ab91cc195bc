//! Chip access.
//!
//! [`Chip`] is the capability interface one charger IC variant implements on
//! top of its register map. The controller only ever talks to a chip through
//! [`ChipBus`], which serializes access so multi-step register sequences
//! can't interleave.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// the chip did not answer, treat as device absent
    NotConnected,
    Bus,
    InvalidLength,
}

pub type ChipResult<T> = Result<T, TransportError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChipVariant {
    P9221,
    P9382,
    P9412,
}

impl ChipVariant {
    /// older parts need the negotiated power polled until it settles
    pub fn needs_neg_power_check(self) -> bool {
        self == ChipVariant::P9221
    }

    /// parts that report negotiated power with the EPP transmitter
    pub fn reports_neg_power(self) -> bool {
        self != ChipVariant::P9221
    }

    pub fn supports_rtx(self) -> bool {
        self != ChipVariant::P9221
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SysMode {
    /// WPC basic power profile
    Basic,
    /// WPC extended power profile
    Extended,
    /// vendor extension, handled as extended
    Proprietary,
    /// reverse power, the chip is transmitting
    Transmit,
    Unknown(u8),
}

impl SysMode {
    pub fn is_extended(self) -> bool {
        matches!(self, SysMode::Extended | SysMode::Proprietary)
    }

    pub fn is_receive(self) -> bool {
        matches!(self, SysMode::Basic | SysMode::Extended | SysMode::Proprietary)
    }
}

/// WPC end of power transfer reason codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum EopReason {
    ChargeComplete = 0x01,
    InternalFault = 0x02,
    OverTemp = 0x03,
    OverVoltage = 0x04,
    OverCurrent = 0x05,
}

/// One charger IC variant. Interrupt and status words use the canonical
/// layout in [`crate::irq::bits`], the implementation translates from its
/// own register layout.
pub trait Chip {
    fn variant(&self) -> ChipVariant;

    fn read_register(&mut self, addr: u16, buf: &mut [u8]) -> ChipResult<()>;
    fn write_register(&mut self, addr: u16, data: &[u8]) -> ChipResult<()>;

    fn interrupt_status(&mut self) -> ChipResult<u16>;
    /// clear and acknowledge the given interrupt bits
    fn clear_interrupts(&mut self, mask: u16) -> ChipResult<()>;
    fn enable_interrupts(&mut self, mask: u16) -> ChipResult<()>;
    fn status(&mut self) -> ChipResult<u16>;

    fn vout_mv(&mut self) -> ChipResult<u32>;
    fn vout_max_mv(&mut self) -> ChipResult<u32>;
    fn set_vout_max_mv(&mut self, mv: u32) -> ChipResult<()>;
    fn iout_ma(&mut self) -> ChipResult<u32>;
    fn op_freq_khz(&mut self) -> ChipResult<u32>;
    fn die_temp_c(&mut self) -> ChipResult<i32>;

    fn set_rx_ilim_ma(&mut self, ma: u32) -> ChipResult<()>;
    fn set_tx_ilim_ma(&mut self, ma: u32) -> ChipResult<()>;

    fn sys_mode(&mut self) -> ChipResult<SysMode>;
    fn set_tx_mode(&mut self, enable: bool) -> ChipResult<()>;

    /// reads `buf.len()` FOD coefficients
    fn fod(&mut self, buf: &mut [u8]) -> ChipResult<()>;
    fn set_fod(&mut self, fod: &[u8]) -> ChipResult<()>;

    fn tx_mfg_code(&mut self) -> ChipResult<u16>;
    fn tx_id(&mut self) -> ChipResult<u32>;
    fn customer_id(&mut self) -> ChipResult<u8>;
    /// in half watts
    fn negotiated_power(&mut self) -> ChipResult<u8>;
    fn set_q_factor(&mut self, q: u8) -> ChipResult<()>;
    /// in half watts
    fn renegotiate_power(&mut self, power: u8) -> ChipResult<()>;

    fn send_eop(&mut self, reason: EopReason) -> ChipResult<()>;
    fn send_csp(&mut self, level: u8) -> ChipResult<()>;

    fn rx_data_len(&mut self) -> ChipResult<usize>;
    fn read_data(&mut self, buf: &mut [u8]) -> ChipResult<()>;
    fn send_data(&mut self, data: &[u8]) -> ChipResult<()>;
    fn read_proprietary_packet(&mut self, buf: &mut [u8]) -> ChipResult<()>;
    fn send_proprietary_packet(&mut self, packet: &[u8]) -> ChipResult<()>;
    fn send_cc_reset(&mut self) -> ChipResult<()>;

    /// charge status last reported by the receiver while we transmit
    fn rtx_csp_level(&mut self) -> ChipResult<u8>;
}

/// Exclusive access to the chip, shared by reference.
pub struct ChipBus<M: RawMutex, C: Chip> {
    chip: Mutex<M, RefCell<C>>,
}

impl<M: RawMutex, C: Chip> ChipBus<M, C> {
    pub const fn new(chip: C) -> Self {
        Self {
            chip: Mutex::new(RefCell::new(chip)),
        }
    }

    /// Runs `f` with the bus held. Everything `f` does is one atomic
    /// sequence with respect to other users of the bus.
    pub fn lock<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        self.chip.lock(|cell| f(&mut cell.borrow_mut()))
    }

    pub fn variant(&self) -> ChipVariant {
        self.lock(|c| c.variant())
    }
}
