//! Reverse power: the phone transmits to another device.
//!
//! Enable order is DC input suspend vote, boost/switch outputs, chip
//! transmit mode. Teardown runs the other way round and never stops early.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Instant;

use super::{tolerate, ChargerPhase, WlcCharger};
use crate::board::{Board, BoardError, Notification};
use crate::config::{RTX_ICL_MAX_MA, TXID_SEND_DELAY};
use crate::irq::{bits, ProprietaryPacket, RtxEvent};
use crate::schedule::{Task, TaskKind};
use crate::transport::{Chip, ChipResult, SysMode, TransportError};
use crate::votable::{VoteError, DC_SUSPEND, RTX_VOTER, THERMAL_DAEMON_VOTER, TX_ICL, WLC_VOTER};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BenState {
    #[default]
    Disabled,
    EnableRequested,
    On,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RtxFault {
    #[default]
    None,
    OverTemp,
    TxConflict,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RtxState {
    Disabled,
    EnableRequested,
    /// outputs up, chip not yet transmitting
    On,
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RtxError {
    NotSupported,
    /// a receive session is up
    ReceiveSessionOnline,
    /// TX_ICL resolves to zero
    AdministrativelyDisabled,
    DcInput(VoteError),
    Outputs(BoardError),
    TransmitMode(TransportError),
    Vote(VoteError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RtxSession {
    pub ben_state: BenState,
    pub tx_mode: bool,
    pub rx_connected: bool,
    pub fault: RtxFault,
    pub reported_capacity: u8,
}

impl RtxSession {
    pub fn active(&self) -> bool {
        self.ben_state != BenState::Disabled
    }

    pub fn state(&self) -> RtxState {
        match self.ben_state {
            BenState::Disabled => RtxState::Disabled,
            BenState::EnableRequested => RtxState::EnableRequested,
            BenState::On if self.tx_mode => RtxState::Active,
            BenState::On => RtxState::On,
        }
    }
}

impl<'a, M: RawMutex, C: Chip, B: Board> WlcCharger<'a, M, C, B> {
    pub(super) fn rtx_vote_defaults(&mut self) -> Result<(), VoteError> {
        self.votes.vote(TX_ICL, RTX_VOTER, true, RTX_ICL_MAX_MA)?;
        Ok(())
    }

    pub fn set_rtx(&mut self, enable: bool, now: Instant) -> Result<(), RtxError> {
        if enable {
            self.enable_rtx(now)
        } else {
            self.disable_rtx(now);
            Ok(())
        }
    }

    fn enable_rtx(&mut self, now: Instant) -> Result<(), RtxError> {
        if !self.rtx_supported() {
            return Err(RtxError::NotSupported);
        }

        if self.rtx.active() {
            return Ok(());
        }

        let tx_icl = self.votes.effective(TX_ICL).map_err(RtxError::Vote)?;
        if tx_icl == Some(0) {
            info!("RTX - disabled by TX_ICL");
            return Err(RtxError::AdministrativelyDisabled);
        }

        if self.phase == ChargerPhase::Online {
            info!("RTX - refused, receive session online");
            return Err(RtxError::ReceiveSessionOnline);
        }

        info!("RTX - enabling");
        self.rtx = RtxSession {
            ben_state: BenState::EnableRequested,
            ..RtxSession::default()
        };

        // DC input has to be ours before boost comes up
        if let Err(e) = self.votes.vote(DC_SUSPEND, WLC_VOTER, true, 1) {
            error!("RTX - could not suspend DC input {}", e);
            self.rtx.ben_state = BenState::Disabled;
            return Err(RtxError::DcInput(e));
        }

        if let Err(e) = self.board.set_rtx_outputs(true) {
            error!("RTX - could not enable boost {}", e);
            self.release_dc_input();
            self.rtx.ben_state = BenState::Disabled;
            return Err(RtxError::Outputs(e));
        }
        self.rtx.ben_state = BenState::On;

        if let Err(e) = self.chip.lock(|c| c.set_tx_mode(true)) {
            error!("RTX - chip refused transmit mode {}", e);
            if let Err(e) = self.board.set_rtx_outputs(false) {
                error!("RTX - could not disable boost {}", e);
            }
            self.release_dc_input();
            self.rtx.ben_state = BenState::Disabled;
            return Err(RtxError::TransmitMode(e));
        }
        self.rtx.tx_mode = true;

        // a half finished detect must not bring the receive side up under us
        self.abandon_detect();

        self.chip.lock(|c| -> ChipResult<()> {
            c.enable_interrupts(bits::RTX_MASK)?;
            match tx_icl {
                Some(ma) if ma > 0 && ma != RTX_ICL_MAX_MA => c.set_tx_ilim_ma(ma as u32),
                _ => Ok(()),
            }
        }).unwrap_or_else(|e| error!("RTX - setup after enable failed {}", e));

        debug!("RTX - active at {} ms", now.as_millis());
        self.board.notify(Notification::RtxStatus);
        Ok(())
    }

    /// Best effort teardown, every step runs even if an earlier one failed.
    pub(super) fn disable_rtx(&mut self, _now: Instant) {
        if !self.rtx.active() && !self.rtx.tx_mode {
            return;
        }

        info!("RTX - disabling, fault {}", self.rtx.fault);

        // on a conflict the chip already left transmit mode
        if self.rtx.fault != RtxFault::TxConflict {
            if let Err(e) = self.chip.lock(|c| c.set_tx_mode(false)) {
                error!("RTX - could not leave transmit mode {}", e);
            }
        }
        self.rtx.tx_mode = false;

        if let Err(e) = self.board.set_rtx_outputs(false) {
            error!("RTX - could not disable boost {}", e);
        }
        self.rtx.ben_state = BenState::Disabled;

        self.release_dc_input();

        self.rtx.rx_connected = false;
        self.rtx.reported_capacity = 0;
        self.tasks.cancel(TaskKind::TxIdBroadcast);
        self.board.notify(Notification::RtxStatus);
    }

    fn release_dc_input(&mut self) {
        if let Err(e) = self.votes.vote(DC_SUSPEND, WLC_VOTER, false, 0) {
            error!("RTX - could not release DC input {}", e);
        }
    }

    pub(super) fn rtx_event(&mut self, event: RtxEvent, now: Instant) {
        match event {
            RtxEvent::ModeChanged => match self.chip.lock(|c| c.sys_mode()) {
                Ok(SysMode::Transmit) => debug!("RTX - in transmit mode"),
                Ok(mode) => warn!("RTX - mode changed to {}", mode),
                Err(e) => error!("RTX - cannot read mode {}", e),
            },
            RtxEvent::TxConflict => {
                warn!("RTX - conflicting transmitter");
                self.rtx.fault = RtxFault::TxConflict;
                self.disable_rtx(now);
            },
            RtxEvent::RxConnectionChanged => {
                let connected = match self.chip.lock(|c| c.status()) {
                    Ok(status) => status & bits::RX_CONNECTED != 0,
                    Err(e) => {
                        error!("RTX - cannot read status {}", e);
                        return;
                    },
                };

                info!("RTX - receiver {}", if connected { "connected" } else { "disconnected" });
                self.rtx.rx_connected = connected;
                if connected {
                    // debounced, a bounce restarts the delay
                    self.tasks.schedule(Task::TxIdBroadcast, now + TXID_SEND_DELAY);
                } else {
                    self.rtx.reported_capacity = 0;
                    self.tasks.cancel(TaskKind::TxIdBroadcast);
                }
                self.board.notify(Notification::RtxStatus);
            },
            RtxEvent::ChargeStatus => match self.chip.lock(|c| c.rtx_csp_level()) {
                Ok(level) => {
                    debug!("RTX - receiver at {}%", level);
                    self.rtx.reported_capacity = level;
                    self.board.notify(Notification::RtxStatus);
                },
                Err(e) => error!("RTX - cannot read CSP {}", e),
            },
        }
    }

    pub(super) fn rtx_send_tx_id(&mut self) -> ChipResult<()> {
        if !self.rtx.active() || !self.rtx.rx_connected {
            return Ok(());
        }

        let packet = ProprietaryPacket::encode_tx_id(self.config.rtx_device_id);
        info!("RTX - sending tx id {=u32:x}", self.config.rtx_device_id & 0x00FF_FFFF);
        if tolerate(self.chip.lock(|c| c.send_proprietary_packet(&packet)))?.is_none() {
            error!("RTX - tx id not sent");
        }

        Ok(())
    }

    /// TX_ICL changed. Zero while transmitting shuts reverse power down.
    pub(super) fn on_tx_icl_changed(&mut self, effective: Option<i32>, now: Instant) {
        if !self.rtx.active() {
            return;
        }

        match effective {
            Some(0) => {
                let thermal = self.votes.client_vote(TX_ICL, THERMAL_DAEMON_VOTER);
                if thermal == Ok(Some(0)) {
                    self.rtx.fault = RtxFault::OverTemp;
                }
                info!("RTX - TX_ICL at zero, disabling");
                self.disable_rtx(now);
            },
            Some(ma) => {
                if let Err(e) = self.chip.lock(|c| c.set_tx_ilim_ma(ma as u32)) {
                    error!("RTX - cannot set tx current limit {}", e);
                }
            },
            None => {},
        }
    }

    pub fn rtx_session(&self) -> &RtxSession {
        &self.rtx
    }

    pub fn rtx_state(&self) -> RtxState {
        self.rtx.state()
    }
}
