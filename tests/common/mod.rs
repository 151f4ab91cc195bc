#![allow(dead_code)]

use std::collections::VecDeque;
use std::string::String;
use std::sync::Mutex;
use std::vec::Vec;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant};

use wlc_charger::board::{Board, BoardError, Notification};
use wlc_charger::charger::WlcCharger;
use wlc_charger::config::ChargerConfig;
use wlc_charger::event::{ChargerEvent, VotableId};
use wlc_charger::irq::bits;
use wlc_charger::transport::{Chip, ChipBus, ChipResult, ChipVariant, EopReason, SysMode, TransportError};
use wlc_charger::votable::{VoteListener, VoteRegistry, VoteRule, DC_ICL, DC_SUSPEND, TX_ICL};

pub type Raw = CriticalSectionRawMutex;
pub type Bus = ChipBus<Raw, MockChip>;
pub type Charger<'a> = WlcCharger<'a, Raw, MockChip, MockBoard<'a>>;

pub fn ms(t: u64) -> Instant {
    Instant::from_millis(t)
}

pub fn after(t: Instant, ms: u64) -> Instant {
    t + Duration::from_millis(ms)
}

/// Ordered record of board actions and effective vote changes.
#[derive(Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    pub fn push(&self, entry: String) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl VoteListener for Journal {
    fn effective_changed(&self, votable: &'static str, effective: Option<i32>) {
        self.push(format!("{} {:?}", votable, effective));
    }
}

pub fn registry(journal: &Journal) -> VoteRegistry<'_, Raw> {
    let mut votes = VoteRegistry::new();
    votes.create(DC_ICL, VoteRule::Min, Some(journal)).unwrap();
    votes.create(TX_ICL, VoteRule::Min, Some(journal)).unwrap();
    votes.create(DC_SUSPEND, VoteRule::Max, Some(journal)).unwrap();
    votes
}

pub struct MockChip {
    pub variant: ChipVariant,
    pub absent: bool,

    pub irq: u16,
    pub enabled_irqs: u16,
    pub status: u16,
    pub status_fails: bool,
    pub sys_mode: SysMode,

    pub vout_mv: u32,
    pub vout_max_mv: u32,
    /// vout max writes ignored before one sticks
    pub vout_max_lag: usize,
    pub iout_ma: u32,
    pub iout_script: VecDeque<u32>,
    /// iout reads that fail before they work again
    pub iout_fails: usize,
    pub op_freq_khz: u32,
    pub die_temp_c: i32,
    pub rx_ilim_ma: Option<u32>,
    pub tx_ilim_ma: Option<u32>,

    pub fod: Vec<u8>,
    pub fod_corrupt: bool,
    pub fod_writes: usize,

    pub mfg_code: u16,
    pub tx_id: u32,
    pub customer_id: u8,
    pub negotiated_power: u8,
    pub q_factor: Option<u8>,

    pub tx_mode: bool,
    pub tx_mode_fails: bool,
    pub rtx_csp_level: u8,

    pub eops: Vec<EopReason>,
    pub csp: Vec<u8>,
    pub sent_data: Vec<Vec<u8>>,
    pub rx_data: Vec<u8>,
    pub pp: [u8; 16],
    pub sent_pp: Vec<Vec<u8>>,
    pub cc_resets: usize,
    pub registers: Vec<(u16, Vec<u8>)>,
}

impl MockChip {
    pub fn new(variant: ChipVariant) -> Self {
        Self {
            variant,
            absent: false,
            irq: 0,
            enabled_irqs: 0,
            status: 0,
            status_fails: false,
            sys_mode: SysMode::Extended,
            vout_mv: 9000,
            vout_max_mv: 9000,
            vout_max_lag: 0,
            iout_ma: 500,
            iout_script: VecDeque::new(),
            iout_fails: 0,
            op_freq_khz: 128,
            die_temp_c: 35,
            rx_ilim_ma: None,
            tx_ilim_ma: None,
            fod: Vec::new(),
            fod_corrupt: false,
            fod_writes: 0,
            mfg_code: 0x72,
            tx_id: 0x1234_5678,
            customer_id: 0,
            negotiated_power: 30,
            q_factor: None,
            tx_mode: false,
            tx_mode_fails: false,
            rtx_csp_level: 0,
            eops: Vec::new(),
            csp: Vec::new(),
            sent_data: Vec::new(),
            rx_data: Vec::new(),
            pp: [0; 16],
            sent_pp: Vec::new(),
            cc_resets: 0,
            registers: Vec::new(),
        }
    }

    /// Basic power profile transmitter at 5V.
    pub fn basic(mut self) -> Self {
        self.sys_mode = SysMode::Basic;
        self.vout_mv = 5000;
        self.vout_max_mv = 5000;
        self.mfg_code = 0x10;
        self
    }

    fn present(&self) -> ChipResult<()> {
        if self.absent {
            Err(TransportError::NotConnected)
        } else {
            Ok(())
        }
    }
}

impl Chip for MockChip {
    fn variant(&self) -> ChipVariant {
        self.variant
    }

    fn read_register(&mut self, addr: u16, buf: &mut [u8]) -> ChipResult<()> {
        self.present()?;
        buf.fill(0);
        if let Some((_, data)) = self.registers.iter().rev().find(|(a, _)| *a == addr) {
            let n = buf.len().min(data.len());
            buf[..n].copy_from_slice(&data[..n]);
        }
        Ok(())
    }

    fn write_register(&mut self, addr: u16, data: &[u8]) -> ChipResult<()> {
        self.present()?;
        self.registers.push((addr, data.to_vec()));
        Ok(())
    }

    fn interrupt_status(&mut self) -> ChipResult<u16> {
        self.present()?;
        Ok(self.irq)
    }

    fn clear_interrupts(&mut self, mask: u16) -> ChipResult<()> {
        self.present()?;
        self.irq &= !mask;
        Ok(())
    }

    fn enable_interrupts(&mut self, mask: u16) -> ChipResult<()> {
        self.present()?;
        self.enabled_irqs = mask;
        Ok(())
    }

    fn status(&mut self) -> ChipResult<u16> {
        self.present()?;
        if self.status_fails {
            return Err(TransportError::Bus);
        }
        Ok(self.status)
    }

    fn vout_mv(&mut self) -> ChipResult<u32> {
        self.present()?;
        Ok(self.vout_mv)
    }

    fn vout_max_mv(&mut self) -> ChipResult<u32> {
        self.present()?;
        Ok(self.vout_max_mv)
    }

    fn set_vout_max_mv(&mut self, mv: u32) -> ChipResult<()> {
        self.present()?;
        if self.vout_max_lag > 0 {
            self.vout_max_lag -= 1;
        } else {
            self.vout_max_mv = mv;
        }
        Ok(())
    }

    fn iout_ma(&mut self) -> ChipResult<u32> {
        self.present()?;
        if self.iout_fails > 0 {
            self.iout_fails -= 1;
            return Err(TransportError::Bus);
        }
        Ok(self.iout_script.pop_front().unwrap_or(self.iout_ma))
    }

    fn op_freq_khz(&mut self) -> ChipResult<u32> {
        self.present()?;
        Ok(self.op_freq_khz)
    }

    fn die_temp_c(&mut self) -> ChipResult<i32> {
        self.present()?;
        Ok(self.die_temp_c)
    }

    fn set_rx_ilim_ma(&mut self, ma: u32) -> ChipResult<()> {
        self.present()?;
        self.rx_ilim_ma = Some(ma);
        Ok(())
    }

    fn set_tx_ilim_ma(&mut self, ma: u32) -> ChipResult<()> {
        self.present()?;
        self.tx_ilim_ma = Some(ma);
        Ok(())
    }

    fn sys_mode(&mut self) -> ChipResult<SysMode> {
        self.present()?;
        Ok(if self.tx_mode { SysMode::Transmit } else { self.sys_mode })
    }

    fn set_tx_mode(&mut self, enable: bool) -> ChipResult<()> {
        self.present()?;
        if enable && self.tx_mode_fails {
            return Err(TransportError::Bus);
        }
        self.tx_mode = enable;
        Ok(())
    }

    fn fod(&mut self, buf: &mut [u8]) -> ChipResult<()> {
        self.present()?;
        if buf.len() != self.fod.len() {
            return Err(TransportError::InvalidLength);
        }
        buf.copy_from_slice(&self.fod);
        if self.fod_corrupt {
            buf[0] ^= 0xFF;
        }
        Ok(())
    }

    fn set_fod(&mut self, fod: &[u8]) -> ChipResult<()> {
        self.present()?;
        self.fod = fod.to_vec();
        self.fod_writes += 1;
        Ok(())
    }

    fn tx_mfg_code(&mut self) -> ChipResult<u16> {
        self.present()?;
        Ok(self.mfg_code)
    }

    fn tx_id(&mut self) -> ChipResult<u32> {
        self.present()?;
        Ok(self.tx_id)
    }

    fn customer_id(&mut self) -> ChipResult<u8> {
        self.present()?;
        Ok(self.customer_id)
    }

    fn negotiated_power(&mut self) -> ChipResult<u8> {
        self.present()?;
        Ok(self.negotiated_power)
    }

    fn set_q_factor(&mut self, q: u8) -> ChipResult<()> {
        self.present()?;
        self.q_factor = Some(q);
        Ok(())
    }

    fn renegotiate_power(&mut self, power: u8) -> ChipResult<()> {
        self.present()?;
        self.negotiated_power = power;
        Ok(())
    }

    fn send_eop(&mut self, reason: EopReason) -> ChipResult<()> {
        self.present()?;
        self.eops.push(reason);
        Ok(())
    }

    fn send_csp(&mut self, level: u8) -> ChipResult<()> {
        self.present()?;
        self.csp.push(level);
        Ok(())
    }

    fn rx_data_len(&mut self) -> ChipResult<usize> {
        self.present()?;
        Ok(self.rx_data.len())
    }

    fn read_data(&mut self, buf: &mut [u8]) -> ChipResult<()> {
        self.present()?;
        buf.copy_from_slice(&self.rx_data[..buf.len()]);
        Ok(())
    }

    fn send_data(&mut self, data: &[u8]) -> ChipResult<()> {
        self.present()?;
        self.sent_data.push(data.to_vec());
        Ok(())
    }

    fn read_proprietary_packet(&mut self, buf: &mut [u8]) -> ChipResult<()> {
        self.present()?;
        buf.copy_from_slice(&self.pp[..buf.len()]);
        Ok(())
    }

    fn send_proprietary_packet(&mut self, packet: &[u8]) -> ChipResult<()> {
        self.present()?;
        self.sent_pp.push(packet.to_vec());
        Ok(())
    }

    fn send_cc_reset(&mut self) -> ChipResult<()> {
        self.present()?;
        self.cc_resets += 1;
        Ok(())
    }

    fn rtx_csp_level(&mut self) -> ChipResult<u8> {
        self.present()?;
        Ok(self.rtx_csp_level)
    }
}

pub struct MockBoard<'a> {
    journal: &'a Journal,
    pub dc_present: bool,
    pub enable_line: Option<bool>,
    pub rtx_outputs: bool,
    pub rtx_outputs_fail: bool,
    pub dc_resets: usize,
    pub notifications: Vec<Notification>,
}

impl<'a> MockBoard<'a> {
    pub fn new(journal: &'a Journal) -> Self {
        Self {
            journal,
            dc_present: false,
            enable_line: None,
            rtx_outputs: false,
            rtx_outputs_fail: false,
            dc_resets: 0,
            notifications: Vec::new(),
        }
    }

    pub fn alignment_scores(&self) -> Vec<i32> {
        self.notifications
            .iter()
            .filter_map(|n| match n {
                Notification::Alignment(score) => Some(*score),
                _ => None,
            })
            .collect()
    }
}

impl Board for MockBoard<'_> {
    fn set_enable_line(&mut self, enable: bool) {
        self.enable_line = Some(enable);
    }

    fn set_rtx_outputs(&mut self, enable: bool) -> Result<(), BoardError> {
        if enable && self.rtx_outputs_fail {
            return Err(BoardError::Io);
        }
        self.journal.push(format!("rtx_outputs {}", enable));
        self.rtx_outputs = enable;
        Ok(())
    }

    fn dc_present(&mut self) -> Result<bool, BoardError> {
        Ok(self.dc_present)
    }

    fn request_dc_reset(&mut self) -> Result<(), BoardError> {
        self.dc_resets += 1;
        Ok(())
    }

    fn notify(&mut self, change: Notification) {
        self.notifications.push(change);
    }
}

pub fn charger<'a>(bus: &'a Bus, votes: &'a VoteRegistry<'a, Raw>, journal: &'a Journal, config: ChargerConfig, now: Instant) -> Charger<'a> {
    let mut charger = WlcCharger::new(bus, votes, MockBoard::new(journal), config).unwrap();
    charger.start(now).unwrap();
    charger
}

/// Raises the given interrupt bits and lets the charger handle them.
pub fn raise(charger: &mut Charger<'_>, bus: &Bus, irq: u16, now: Instant) {
    bus.lock(|c| c.irq |= irq);
    charger.handle_event(ChargerEvent::Interrupt, now);
}

/// Places a transmitter on the pad and runs the detect debounce. Returns
/// the time the session came online.
pub fn bring_online(charger: &mut Charger<'_>, bus: &Bus, now: Instant) -> Instant {
    bus.lock(|c| c.status |= bits::VRECT | bits::VOUT);
    raise(charger, bus, bits::VRECT, now);

    let online = after(now, 100);
    charger.poll(online);
    online
}

/// DC presence shows up at the power path and the notifier settles it.
pub fn confirm_dc(charger: &mut Charger<'_>, now: Instant) -> Instant {
    charger.board_mut().dc_present = true;
    charger.handle_event(ChargerEvent::DcPresenceChanged, now);

    let settled = after(now, 100);
    charger.poll(settled);
    settled
}

pub fn vote_changed(charger: &mut Charger<'_>, votable: VotableId, effective: Option<i32>, now: Instant) {
    charger.handle_event(ChargerEvent::VoteChanged { votable, effective }, now);
}
