//! Receive side power transfer: detect, online, profile, input current and
//! offline.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Instant;
use heapless::Vec;

use super::{tolerate, ChargerPhase, ChargerState, FodStatus, Profile, WlcCharger};
use crate::alignment::MfgCheck;
use crate::board::{Board, Notification};
use crate::config::*;
use crate::irq::{bits, AccessoryType, ProprietaryPacket, RxEvent};
use crate::schedule::{Task, TaskKind};
use crate::transport::{Chip, ChipResult, TransportError};
use crate::votable::{DCIN_AICL_VOTER, DC_ICL, OCP_VOTER, WLC_VOTER};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum DcResetCause {
    Spurious,
    ModeChanged,
    VoutChanged,
}

/// Outcome of one negotiated power read on parts that need it polled.
enum NegPower {
    Pending,
    Settled,
}

impl<'a, M: RawMutex, C: Chip, B: Board> WlcCharger<'a, M, C, B> {
    pub(super) fn rx_event(&mut self, event: RxEvent, now: Instant) -> ChipResult<()> {
        match event {
            RxEvent::ModeChanged => self.check_dc_reset(DcResetCause::ModeChanged),
            RxEvent::VoutChanged => self.check_dc_reset(DcResetCause::VoutChanged),
            RxEvent::PowerDetected => {
                self.on_power_detected(now);
                Ok(())
            },
            RxEvent::Limit(flags) => self.over_handle(flags, now),
            RxEvent::DataReceived => self.comm_receive(),
            RxEvent::SendComplete => {
                self.comm_send_complete();
                Ok(())
            },
            RxEvent::ProprietaryPacket => self.read_proprietary_packet(),
            RxEvent::CommReset => {
                info!("WLC - comm reset by transmitter");
                self.comm.abort();
                self.tasks.cancel(TaskKind::TxTimeout);
                Ok(())
            },
            RxEvent::CommError => {
                warn!("WLC - comm error");
                Ok(())
            },
        }
    }

    /// The chip dropping out of receive mode (or losing vout) without us
    /// being told otherwise leaves the DC path wedged.
    /// Drops a detect or DC check that has not settled yet.
    pub(super) fn abandon_detect(&mut self) {
        self.check_det = false;
        self.check_dc = false;
        self.tasks.cancel(TaskKind::NotifierCheck);
        self.tasks.cancel(TaskKind::DcPresencePoll);
        self.tasks.cancel(TaskKind::VrectTimeout);
        self.tasks.cancel(TaskKind::AlignTimeout);

        if self.phase == ChargerPhase::Detecting {
            info!("WLC - detect abandoned");
            self.phase = ChargerPhase::Idle;
        }
    }

    pub(super) fn check_dc_reset(&mut self, cause: DcResetCause) -> ChipResult<()> {
        let wedged = match (self.config.dc_reset, cause) {
            (DcResetPolicy::OnModeChanged, DcResetCause::ModeChanged | DcResetCause::Spurious) => {
                let mode = self.chip.lock(|c| c.sys_mode())?;
                !mode.is_receive()
            },
            (DcResetPolicy::OnVoutChanged, DcResetCause::VoutChanged) => {
                let status = self.chip.lock(|c| c.status())?;
                status & bits::VOUT == 0
            },
            _ => false,
        };

        if wedged {
            info!("WLC - dc reset check failed ({})", cause);
            self.request_dc_reset();
        }

        Ok(())
    }

    /// Rectified voltage came up: something is on the pad.
    fn on_power_detected(&mut self, now: Instant) {
        if self.phase != ChargerPhase::Idle || self.rtx.active() {
            return;
        }

        info!("WLC - vrect on, detecting");
        self.phase = ChargerPhase::Detecting;
        self.check_det = true;
        self.tasks.cancel(TaskKind::VrectTimeout);
        self.tasks.cancel(TaskKind::AlignTimeout);
        self.tasks.schedule(Task::NotifierCheck, now + NOTIFIER_DELAY);
    }

    /// Detect line interrupt, only meaningful while nothing is charging.
    pub(super) fn handle_detect(&mut self, now: Instant) {
        if self.phase == ChargerPhase::Online || self.rtx.active() {
            return;
        }

        self.align.on_detect();
        self.tasks.schedule(Task::VrectTimeout, now + VRECT_TIMEOUT);
    }

    pub(super) fn on_dc_presence_changed(&mut self, now: Instant) {
        // the DC input belongs to reverse power while it runs
        if self.rtx.ben_state != super::BenState::Disabled {
            return;
        }

        self.check_dc = true;
        self.tasks.schedule(Task::NotifierCheck, now + NOTIFIER_DELAY);
    }

    pub(super) fn notifier_check(&mut self, now: Instant) -> ChipResult<()> {
        if self.check_det {
            self.apply_detect_tuning()?;
            self.check_det(now)?;
        }

        if self.check_dc {
            self.check_dc(now)?;
        }

        Ok(())
    }

    /// Optional Q factor and EPP power, written before the session settles.
    fn apply_detect_tuning(&mut self) -> ChipResult<()> {
        if let Some(q) = self.config.q_value {
            if tolerate(self.chip.lock(|c| c.set_q_factor(q)))?.is_none() {
                error!("WLC - cannot write Q factor {}", q);
            }
        }

        if let Some(power) = self.config.epp_rp_value {
            if tolerate(self.chip.lock(|c| c.renegotiate_power(power)))?.is_none() {
                error!("WLC - cannot renegotiate power {}", power);
            }
        }

        Ok(())
    }

    fn check_det(&mut self, now: Instant) -> ChipResult<()> {
        self.check_det = false;
        if self.phase == ChargerPhase::Online {
            return Ok(());
        }

        if self.rtx.active() {
            self.phase = ChargerPhase::Idle;
            return Ok(());
        }

        let status = self.chip.lock(|c| c.status())?;
        if status & (bits::VRECT | bits::VOUT) == 0 {
            info!("WLC - detect went away");
            self.phase = ChargerPhase::Idle;
            return Ok(());
        }

        self.set_online(now)?;
        self.session.neg_power_pending = true;
        self.tasks.schedule(Task::DcPresencePoll, now + DCIN_POLL_PERIOD);
        Ok(())
    }

    fn check_dc(&mut self, now: Instant) -> ChipResult<()> {
        self.check_dc = false;

        if self.variant.needs_neg_power_check() && self.session.neg_power_pending && self.phase == ChargerPhase::Online {
            return self.neg_power_poll(0, now);
        }

        self.finish_check_dc(now)
    }

    pub(super) fn neg_power_poll(&mut self, attempt: u8, now: Instant) -> ChipResult<()> {
        if self.phase != ChargerPhase::Online {
            return Ok(());
        }

        match self.check_neg_power(now) {
            Ok(NegPower::Pending) if attempt + 1 < NEG_POWER_POLL_RETRIES => {
                self.tasks.schedule(Task::NegPowerPoll { attempt: attempt + 1 }, now + NEG_POWER_POLL_DELAY);
                return Ok(());
            },
            Ok(NegPower::Pending) => warn!("WLC - negotiated power never settled"),
            Ok(NegPower::Settled) => {},
            Err(TransportError::NotConnected) => return Err(TransportError::NotConnected),
            Err(e) => error!("WLC - negotiated power check failed {}", e),
        }

        self.session.neg_power_pending = false;
        self.finish_check_dc(now)
    }

    /// Older parts report VOUT for BPP well before the EPP negotiation is
    /// done, so wait for either a 10W contract or VOUT.
    fn check_neg_power(&mut self, now: Instant) -> ChipResult<NegPower> {
        let np = self.chip.lock(|c| c.negotiated_power())?;

        if np >= NEG_POWER_10W {
            let mfg = self.chip.lock(|c| c.tx_mfg_code())?;
            // EPP unless it's the 1912 transmitter
            self.session.force_basic_profile = mfg == PTMC_EPP_TX_1912;
            info!("WLC - np={=u8:x} mfg={=u16:x} force bpp={}", np, mfg, self.session.force_basic_profile);
        } else {
            let status = self.chip.lock(|c| c.status())?;
            if status & bits::VOUT == 0 {
                return Ok(NegPower::Pending);
            }

            // normal BPP or EPP under 10W
            self.session.force_basic_profile = true;
            info!("WLC - np={=u8:x} basic or under 10W", np);
        }

        if self.session.force_basic_profile {
            self.tasks.schedule(Task::BppVout { attempt: 0 }, now);
        }

        Ok(NegPower::Settled)
    }

    /// Pulls VOUT down to the BPP rail and waits for it to stick.
    pub(super) fn bpp_vout(&mut self, attempt: u8, now: Instant) -> ChipResult<()> {
        let res = self.chip.lock(|c| -> ChipResult<u32> {
            c.set_vout_max_mv(BPP_VOUT_MV)?;
            c.vout_max_mv()
        });

        match res {
            Ok(mv) if mv == BPP_VOUT_MV => {
                debug!("WLC - vout at {} mV", mv);
                Ok(())
            },
            Ok(mv) if attempt + 1 < BPP_VOUT_RETRIES => {
                trace!("WLC - vout still {} mV", mv);
                self.tasks.schedule(Task::BppVout { attempt: attempt + 1 }, now + BPP_VOUT_RETRY_DELAY);
                Ok(())
            },
            Ok(mv) => {
                error!("WLC - cannot change vout, stuck at {} mV", mv);
                Ok(())
            },
            Err(e) => {
                error!("WLC - cannot set vout {}", e);
                Err(e)
            },
        }
    }

    /// EPP input current from the negotiated contract on parts that report it.
    fn check_epp_neg_power(&mut self) -> ChipResult<()> {
        self.session.dc_icl_epp_neg = DC_ICL_EPP_UA;

        if !self.variant.reports_neg_power() || !self.is_extended()? {
            return Ok(());
        }

        if self.session.mfg_code == MFG_GOOGLE {
            self.session.dc_icl_epp_neg = DC_ICL_EPP_1000_UA;
            info!("WLC - google transmitter, dc_icl {} uA", DC_ICL_EPP_1000_UA);
            return Ok(());
        }

        match tolerate(self.chip.lock(|c| c.negotiated_power()))? {
            // 5V vout under 10W, treat as BPP
            Some(np) if np < NEG_POWER_10W => {
                self.session.dc_icl_epp_neg = DC_ICL_BPP_UA;
                info!("WLC - EPP under 10W, np={=u8:x}", np);
            },
            Some(np) if np < NEG_POWER_11W => {
                self.session.dc_icl_epp_neg = DC_ICL_EPP_1000_UA;
                info!("WLC - EPP 10W, np={=u8:x}", np);
            },
            Some(_) => {},
            None => error!("WLC - cannot read negotiated power"),
        }

        Ok(())
    }

    fn finish_check_dc(&mut self, now: Instant) -> ChipResult<()> {
        if self.rtx.ben_state != super::BenState::Disabled {
            debug!("WLC - dc check skipped, reverse power owns the input");
            return Ok(());
        }

        let dc_in = match self.board.dc_present() {
            Ok(present) => present,
            Err(e) => {
                error!("WLC - cannot read dc presence {}", e);
                return Ok(());
            },
        };

        info!("WLC - dc present {} online {}", dc_in, self.phase == ChargerPhase::Online);

        // DC presence confirmed or lost, the poll is no longer needed
        self.tasks.cancel(TaskKind::DcPresencePoll);
        self.tasks.cancel(TaskKind::VrectTimeout);

        if dc_in {
            if self.phase != ChargerPhase::Online {
                self.set_online(now)?;
            }

            self.check_epp_neg_power()?;
            self.session.profile = if self.is_extended()? {
                Profile::Extended
            } else {
                Profile::Basic
            };
            self.set_dc_icl()?;
            self.write_fod(0, now)?;
            if self.overrides.dc_icl_bpp == 0 {
                self.icl_ramp_start(now)?;
            }
        } else if self.phase != ChargerPhase::Idle {
            self.set_offline(now);
        }

        self.board.notify(Notification::Online(self.phase == ChargerPhase::Online));
        Ok(())
    }

    /// One failed status read while waiting for DC presence ends the session.
    pub(super) fn dc_presence_poll(&mut self, now: Instant) -> ChipResult<()> {
        match self.chip.lock(|c| c.status()) {
            Ok(status) => {
                trace!("WLC - dc_in check status {=u16:x}", status);
                self.tasks.schedule(Task::DcPresencePoll, now + DCIN_POLL_PERIOD);
            },
            Err(e) => {
                info!("WLC - timeout waiting for dc-in ({})", e);
                if self.phase != ChargerPhase::Idle {
                    self.set_offline(now);
                }
            },
        }

        Ok(())
    }

    pub(super) fn set_online(&mut self, now: Instant) -> ChipResult<()> {
        if self.rtx.active() {
            warn!("WLC - not going online while transmitting");
            return Ok(());
        }

        info!("WLC - set online");

        self.phase = ChargerPhase::Online;
        self.session = ChargerState {
            online: true,
            ..ChargerState::default()
        };
        self.comm.reset();

        if let Some(cid) = tolerate(self.chip.lock(|c| c.customer_id()))? {
            self.session.customer_id = cid;
        }
        info!("WLC - customer id {=u8:x}", self.session.customer_id);

        if tolerate(self.chip.lock(|c| c.enable_interrupts(bits::RX_MASK)))?.is_none() {
            error!("WLC - could not enable interrupts");
        }

        // profile is still unknown here, written again once DC is confirmed
        self.write_fod(0, now)?;

        self.tasks.cancel(TaskKind::EnableCooldown);
        self.tasks.cancel(TaskKind::VrectTimeout);
        self.tasks.cancel(TaskKind::AlignTimeout);

        self.align.arm();
        if self.align.enabled() {
            self.tasks.schedule(Task::AlignPoll, now + ALIGN_POLL_PERIOD);
        }

        self.board.notify(Notification::Online(true));
        Ok(())
    }

    pub(super) fn set_offline(&mut self, now: Instant) {
        info!("WLC - set offline");

        self.phase = ChargerPhase::Idle;
        self.session = ChargerState::default();
        self.comm.abort();
        self.ocp = None;
        self.fod = FodStatus::Unwritten;

        // nothing from this session may run past this point
        self.tasks.end_session();
        self.tasks.cancel(TaskKind::VrectTimeout);
        self.icl_ramp = false;
        self.align.end_session();

        self.vote_defaults();

        if self.enabled {
            self.board.set_enable_line(false);
            self.tasks.schedule(Task::EnableCooldown, now + DCIN_PON_DELAY);
        }

        self.board.notify(Notification::Online(false));
    }

    /// BPP floor on the WLC voter and the OCP floor, ramp vote withdrawn.
    pub(super) fn vote_defaults(&mut self) {
        if let Err(e) = self.votes.vote(DC_ICL, DCIN_AICL_VOTER, false, 0) {
            error!("WLC - could not withdraw ramp vote {}", e);
        }

        if let Err(e) = self.votes.vote(DC_ICL, WLC_VOTER, true, DC_ICL_BPP_UA) {
            error!("WLC - could not vote DC_ICL {}", e);
        }

        let ocp_icl = if self.overrides.dc_icl_epp > 0 {
            self.overrides.dc_icl_epp
        } else {
            DC_ICL_EPP_UA
        };

        if let Err(e) = self.votes.vote(DC_ICL, OCP_VOTER, true, ocp_icl) {
            error!("WLC - could not reset OCP vote {}", e);
        }
    }

    /// Extended power profile check, re-evaluated on every call.
    pub(super) fn is_extended(&mut self) -> ChipResult<bool> {
        if self.overrides.force_epp {
            return Ok(true);
        }

        if self.session.force_basic_profile {
            return Ok(false);
        }

        // the code may still read zero right after bringup
        if self.session.mfg_code == 0 {
            if let Some(mfg) = tolerate(self.chip.lock(|c| c.tx_mfg_code()))? {
                self.session.mfg_code = mfg;
            }
        }

        match self.chip.lock(|c| c.sys_mode()) {
            Ok(mode) => return Ok(mode.is_extended()),
            Err(TransportError::NotConnected) => return Err(TransportError::NotConnected),
            Err(e) => error!("WLC - could not read mode {}", e),
        }

        match tolerate(self.chip.lock(|c| c.vout_mv()))? {
            Some(mv) => Ok(mv.saturating_mul(1000) > EPP_VOUT_THRESHOLD_UV),
            None => Ok(false),
        }
    }

    pub(super) fn set_dc_icl(&mut self) -> ChipResult<()> {
        let mut icl = DC_ICL_BPP_UA;

        if self.icl_ramp {
            icl = self.config.icl_ramp_ua;
        }

        if self.overrides.dc_icl_bpp > 0 {
            icl = self.overrides.dc_icl_bpp;
        }

        let extended = self.is_extended()?;
        if extended {
            icl = self.session.dc_icl_epp_neg;
        }

        if extended && self.overrides.dc_icl_epp > 0 {
            icl = self.overrides.dc_icl_epp;
        }

        info!("WLC - setting ICL {} uA ramp={}", icl, self.icl_ramp);

        if self.icl_ramp {
            if let Err(e) = self.votes.vote(DC_ICL, DCIN_AICL_VOTER, true, icl) {
                error!("WLC - could not vote ramp ICL {}", e);
            }
        }

        if let Err(e) = self.votes.vote(DC_ICL, WLC_VOTER, true, icl) {
            error!("WLC - could not vote DC_ICL {}", e);
        }

        if tolerate(self.chip.lock(|c| c.set_rx_ilim_ma(RX_ILIM_MAX_UA / 1000)))?.is_none() {
            error!("WLC - could not set rx current limit");
        }

        Ok(())
    }

    /// Arms the single BPP ramp step.
    pub(super) fn icl_ramp_start(&mut self, now: Instant) -> ChipResult<()> {
        let Some(delay) = self.config.icl_ramp_delay else {
            return Ok(());
        };

        if self.config.icl_ramp_ua == 0 || self.is_extended()? {
            return Ok(());
        }

        self.icl_ramp_reset();
        info!("WLC - ICL ramp in {} ms to {} uA", delay.as_millis(), self.config.icl_ramp_ua);
        self.tasks.schedule(Task::IclRamp, now + delay);
        Ok(())
    }

    pub(super) fn icl_ramp_reset(&mut self) {
        self.icl_ramp = false;
        self.tasks.cancel(TaskKind::IclRamp);
    }

    pub(super) fn icl_ramp_step(&mut self) {
        // don't pull more from a phone that is sharing its battery
        if self.session.chg_on_rtx {
            info!("WLC - ICL ramp skipped, charging from a phone");
            return;
        }

        self.icl_ramp = true;
        if let Err(e) = self.set_dc_icl() {
            error!("WLC - ICL ramp failed {}", e);
        }
    }

    /// Writes the FOD table for the current profile and verifies it, retried
    /// from the task queue on mismatch.
    pub(super) fn write_fod(&mut self, attempt: u8, now: Instant) -> ChipResult<()> {
        let extended = self.is_extended()?;
        let table = match (extended, &self.config.fod_epp, &self.config.fod_bpp) {
            (true, Some(epp), _) => epp.clone(),
            (_, _, Some(bpp)) => bpp.clone(),
            _ => {
                debug!("WLC - no FOD table");
                self.fod = FodStatus::NotConfigured;
                self.tasks.cancel(TaskKind::FodWrite);
                return Ok(());
            },
        };

        let res = self.chip.lock(|c| -> ChipResult<bool> {
            c.set_fod(&table)?;

            let mut readback: Vec<u8, FOD_MAX_LEN> = Vec::new();
            readback.resize(table.len(), 0).map_err(|_| TransportError::InvalidLength)?;
            c.fod(&mut readback)?;

            Ok(readback == table)
        });

        match res {
            Ok(true) => {
                info!("WLC - FOD written, epp={}", extended);
                self.fod = FodStatus::Verified;
                self.tasks.cancel(TaskKind::FodWrite);
            },
            Ok(false) if attempt + 1 < FOD_WRITE_RETRIES => {
                warn!("WLC - FOD verify mismatch, attempt {}", attempt + 1);
                self.fod = FodStatus::Pending;
                self.tasks.schedule(Task::FodWrite { attempt: attempt + 1 }, now + FOD_VERIFY_DELAY);
            },
            Ok(false) => {
                error!("WLC - FOD not set after {} attempts", FOD_WRITE_RETRIES);
                self.fod = FodStatus::Failed;
            },
            Err(e) => {
                error!("WLC - FOD write failed {}", e);
                self.fod = FodStatus::Failed;
                return Err(e);
            },
        }

        Ok(())
    }

    pub(super) fn align_poll(&mut self, now: Instant) -> ChipResult<()> {
        self.align.begin_cycle();
        if self.phase != ChargerPhase::Online || !self.align.wants_reschedule() {
            return Ok(());
        }

        self.tasks.schedule(Task::AlignPoll, now + ALIGN_POLL_PERIOD);

        if self.align.mfg_check_state() == MfgCheck::Checking {
            let Some(mfg) = tolerate(self.chip.lock(|c| c.tx_mfg_code()))? else {
                return Ok(());
            };

            if mfg != 0 {
                self.session.mfg_code = mfg;
            }

            let extended = mfg == MFG_GOOGLE && self.is_extended()?;
            match self.align.check_mfg(mfg, extended) {
                MfgCheck::Checking => return Ok(()),
                MfgCheck::Failed => {
                    info!("WLC - transmitter {=u16:x} not alignment capable", mfg);
                    self.tasks.cancel(TaskKind::AlignPoll);
                    return Ok(());
                },
                MfgCheck::Passed => {},
            }
        }

        let iout_ma = if self.align.compensates() {
            tolerate(self.chip.lock(|c| c.iout_ma()))?.unwrap_or(0)
        } else {
            0
        };
        let compensation = self.align.current_compensation(iout_ma);

        let Some(freq_khz) = tolerate(self.chip.lock(|c| c.op_freq_khz()))? else {
            return Ok(());
        };

        if let Some(score) = self.align.evaluate(freq_khz.saturating_mul(1000), compensation) {
            self.board.notify(Notification::Alignment(score));
        }

        Ok(())
    }

    fn read_proprietary_packet(&mut self) -> ChipResult<()> {
        let mut buf = [0u8; PP_BUF_LEN];
        self.chip.lock(|c| c.read_proprietary_packet(&mut buf))?;

        let Some(packet) = ProprietaryPacket::parse(&buf) else {
            debug!("WLC - proprietary packet without serial header");
            return Ok(());
        };

        self.session.transfer_id = Some(packet.serial);
        if packet.accessory == AccessoryType::Phone {
            info!("WLC - transmitter is a phone");
            self.session.chg_on_rtx = true;
        }

        Ok(())
    }
}
