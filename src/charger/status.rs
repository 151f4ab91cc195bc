//! Read and write properties exposed to the rest of the system.

use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Instant};
use heapless::String;

use super::{ChargerPhase, ChargerState, FodStatus, Profile, RtxFault, WlcCharger};
use crate::board::{Board, Notification};
use crate::error::ChargerError;
use crate::transport::{Chip, EopReason};
use crate::votable::{DC_ICL, DC_SUSPEND, USER_VOTER};

pub const TX_ID_STR_LEN: usize = 16;

impl<'a, M: RawMutex, C: Chip, B: Board> WlcCharger<'a, M, C, B> {
    pub fn phase(&self) -> ChargerPhase {
        self.phase
    }

    pub fn session(&self) -> &ChargerState {
        &self.session
    }

    /// Online as the rest of the system should see it: enabled, a session
    /// is up and nobody is holding the DC input suspended.
    pub fn online_status(&self) -> bool {
        let suspended = matches!(self.votes.effective(DC_SUSPEND), Ok(Some(v)) if v > 0);
        self.enabled && self.phase == ChargerPhase::Online && !suspended
    }

    /// Something is on the pad, whether or not power is flowing yet.
    pub fn present(&self) -> bool {
        self.phase != ChargerPhase::Idle
    }

    /// Re-evaluated on every query, the session keeps the last answer.
    pub fn profile(&mut self) -> Result<Profile, ChargerError> {
        if self.phase != ChargerPhase::Online {
            return Ok(Profile::Unknown);
        }

        self.session.profile = if self.is_extended()? {
            Profile::Extended
        } else {
            Profile::Basic
        };

        Ok(self.session.profile)
    }

    pub fn current_now_ua(&self) -> Result<u32, ChargerError> {
        self.require_online()?;
        let ma = self.chip.lock(|c| c.iout_ma())?;
        Ok(ma.saturating_mul(1000))
    }

    pub fn voltage_now_uv(&self) -> Result<u32, ChargerError> {
        self.require_online()?;
        let mv = self.chip.lock(|c| c.vout_mv())?;
        Ok(mv.saturating_mul(1000))
    }

    pub fn voltage_max_uv(&self) -> Result<u32, ChargerError> {
        self.require_online()?;
        let mv = self.chip.lock(|c| c.vout_max_mv())?;
        Ok(mv.saturating_mul(1000))
    }

    pub fn set_voltage_max_uv(&mut self, uv: u32) -> Result<(), ChargerError> {
        self.require_online()?;
        if uv == 0 {
            return Err(ChargerError::InvalidArgument);
        }

        info!("WLC - set vout max {} uV", uv);
        self.chip.lock(|c| c.set_vout_max_mv(uv / 1000))?;
        Ok(())
    }

    pub fn op_freq_hz(&self) -> Result<u32, ChargerError> {
        self.require_online()?;
        let khz = self.chip.lock(|c| c.op_freq_khz())?;
        Ok(khz.saturating_mul(1000))
    }

    pub fn die_temp(&self) -> Result<i32, ChargerError> {
        self.require_online()?;
        Ok(self.chip.lock(|c| c.die_temp_c())?)
    }

    /// Effective DC input current limit.
    pub fn current_max_ua(&self) -> Result<Option<i32>, ChargerError> {
        Ok(self.votes.effective(DC_ICL)?)
    }

    /// Last published score, -1 when unknown.
    pub fn alignment(&self) -> i32 {
        self.align.sample().last_score
    }

    pub fn alignment_str(&self) -> String<8> {
        self.align.status_str()
    }

    /// Transmitter identifier: the chip's tx id on EPP, the fast serial id
    /// from the proprietary packet on BPP.
    pub fn tx_id_str(&mut self) -> Result<String<TX_ID_STR_LEN>, ChargerError> {
        self.require_online()?;

        let mut s = String::new();
        if self.is_extended()? {
            let id = self.chip.lock(|c| c.tx_id())?;
            write!(s, "{:08x}", id).map_err(|_| ChargerError::InvalidArgument)?;
        } else if let Some(serial) = self.session.transfer_id {
            for b in serial {
                write!(s, "{:02x}", b).map_err(|_| ChargerError::InvalidArgument)?;
            }
        }

        Ok(s)
    }

    pub fn rtx_rx_connected(&self) -> bool {
        self.rtx.rx_connected
    }

    /// Charge level reported by the receiver we are powering.
    pub fn rtx_level(&self) -> u8 {
        self.rtx.reported_capacity
    }

    pub fn rtx_fault(&self) -> RtxFault {
        self.rtx.fault
    }

    pub fn fod_status(&self) -> FodStatus {
        self.fod
    }

    pub fn last_eop(&self) -> Option<EopReason> {
        self.last_eop
    }

    /// Administrative enable. Disabling drops any session and holds the
    /// enable line low.
    pub fn set_enabled(&mut self, enable: bool, now: Instant) {
        if self.enabled == enable {
            return;
        }

        info!("WLC - {}", if enable { "enabled" } else { "disabled" });
        self.enabled = enable;
        if !enable && self.phase != ChargerPhase::Idle {
            self.set_offline(now);
        }

        self.board.set_enable_line(enable);
        self.board.notify(Notification::Online(self.online_status()));
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// A negative limit withdraws the user's vote.
    pub fn set_user_current_limit(&mut self, ua: i32) -> Result<(), ChargerError> {
        let active = ua >= 0;
        self.votes.vote(DC_ICL, USER_VOTER, active, ua.max(0))?;
        Ok(())
    }

    /// Forwards the battery level to the transmitter, once per change.
    pub fn set_capacity(&mut self, level: u8) -> Result<(), ChargerError> {
        if level > 100 {
            return Err(ChargerError::InvalidArgument);
        }

        if self.phase != ChargerPhase::Online || self.session.last_reported_capacity == Some(level) {
            return Ok(());
        }

        self.chip.lock(|c| c.send_csp(level))?;
        debug!("WLC - sent capacity {}%", level);
        self.session.last_reported_capacity = Some(level);
        self.board.notify(Notification::Capacity(level));
        Ok(())
    }

    /// `None` disables the ramp.
    pub fn set_icl_ramp(&mut self, delay: Option<Duration>, target_ua: i32) -> Result<(), ChargerError> {
        if target_ua < 0 {
            return Err(ChargerError::InvalidArgument);
        }

        self.config.icl_ramp_delay = delay;
        self.config.icl_ramp_ua = target_ua;
        if delay.is_none() {
            self.icl_ramp_reset();
        }
        Ok(())
    }

    /// Zero clears the override.
    pub fn set_dc_icl_bpp(&mut self, ua: i32) -> Result<(), ChargerError> {
        if ua < 0 {
            return Err(ChargerError::InvalidArgument);
        }

        self.overrides.dc_icl_bpp = ua;
        self.reapply_icl()
    }

    /// Zero clears the override.
    pub fn set_dc_icl_epp(&mut self, ua: i32) -> Result<(), ChargerError> {
        if ua < 0 {
            return Err(ChargerError::InvalidArgument);
        }

        self.overrides.dc_icl_epp = ua;
        self.reapply_icl()
    }

    pub fn set_force_epp(&mut self, force: bool) -> Result<(), ChargerError> {
        self.overrides.force_epp = force;
        self.reapply_icl()
    }

    fn reapply_icl(&mut self) -> Result<(), ChargerError> {
        if self.phase == ChargerPhase::Online {
            self.set_dc_icl()?;
        }
        Ok(())
    }

    /// Raw register read for diagnostics.
    pub fn peek(&self, addr: u16, buf: &mut [u8]) -> Result<(), ChargerError> {
        self.require_online()?;
        self.chip.lock(|c| c.read_register(addr, buf))?;
        Ok(())
    }

    /// Raw register write for diagnostics.
    pub fn poke(&self, addr: u16, data: &[u8]) -> Result<(), ChargerError> {
        self.require_online()?;
        warn!("WLC - poke {=u16:x} len {}", addr, data.len());
        self.chip.lock(|c| c.write_register(addr, data))?;
        Ok(())
    }

    fn require_online(&self) -> Result<(), ChargerError> {
        if self.phase == ChargerPhase::Online {
            Ok(())
        } else {
            Err(ChargerError::NotOnline)
        }
    }
}
