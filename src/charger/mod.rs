//! The wireless charger controller.
//!
//! [`WlcCharger`] owns every piece of per-device state and is driven from a
//! single task: events (interrupts, DC presence changes, vote changes) go in
//! through [`WlcCharger::handle_event`], delayed work comes due through
//! [`WlcCharger::poll`]. Nothing in here blocks or reads a clock, the caller
//! passes `now` in.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Instant;

use crate::alignment::AlignmentEngine;
use crate::board::{Board, Notification};
use crate::config::{ChargerConfig, DC_ICL_EPP_UA};
use crate::error::ChargerError;
use crate::event::{ChargerEvent, VotableId};
use crate::irq::{decode_rtx, decode_rx, IrqMode};
use crate::protection::OverCurrentCheck;
use crate::schedule::{Task, TaskQueue};
use crate::transport::{Chip, ChipBus, ChipResult, ChipVariant, EopReason, TransportError};
use crate::votable::{VoteRegistry, DC_ICL, DC_SUSPEND, TX_ICL};

mod comm;
mod protect;
mod rtx;
mod session;
mod status;

pub use comm::CommChannel;
pub use rtx::{RtxError, RtxFault, RtxSession, BenState, RtxState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargerPhase {
    Idle,
    Detecting,
    Online,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Profile {
    Unknown,
    Basic,
    Extended,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FodStatus {
    Unwritten,
    /// verify mismatch, retry scheduled
    Pending,
    Verified,
    Failed,
    NotConfigured,
}

/// Receive session, created at detect and dropped at offline.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChargerState {
    pub online: bool,
    pub profile: Profile,
    pub customer_id: u8,
    /// serial from the transmitter's fast serial id packet
    pub transfer_id: Option<[u8; 3]>,
    pub force_basic_profile: bool,
    pub last_reported_capacity: Option<u8>,
    /// the transmitter is another phone in reverse power mode
    pub chg_on_rtx: bool,
    pub mfg_code: u16,
    pub neg_power_pending: bool,
    pub dc_icl_epp_neg: i32,
}

impl Default for ChargerState {
    fn default() -> Self {
        Self {
            online: false,
            profile: Profile::Unknown,
            customer_id: 0,
            transfer_id: None,
            force_basic_profile: false,
            last_reported_capacity: None,
            chg_on_rtx: false,
            mfg_code: 0,
            neg_power_pending: false,
            dc_icl_epp_neg: DC_ICL_EPP_UA,
        }
    }
}

/// Runtime overrides of the input current selection. Zero means unset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IclOverrides {
    pub dc_icl_bpp: i32,
    pub dc_icl_epp: i32,
    pub force_epp: bool,
}

pub struct WlcCharger<'a, M: RawMutex, C: Chip, B: Board> {
    chip: &'a ChipBus<M, C>,
    votes: &'a VoteRegistry<'a, M>,
    board: B,
    config: ChargerConfig,
    variant: ChipVariant,

    tasks: TaskQueue,
    phase: ChargerPhase,
    session: ChargerState,
    enabled: bool,
    check_det: bool,
    check_dc: bool,
    icl_ramp: bool,
    overrides: IclOverrides,

    align: AlignmentEngine,
    ocp: Option<OverCurrentCheck>,
    fod: FodStatus,
    last_eop: Option<EopReason>,
    comm: CommChannel,
    rtx: RtxSession,
}

impl<'a, M: RawMutex, C: Chip, B: Board> WlcCharger<'a, M, C, B> {
    pub fn new(chip: &'a ChipBus<M, C>, votes: &'a VoteRegistry<'a, M>, board: B, config: ChargerConfig) -> Result<Self, ChargerError> {
        config.validate()?;

        votes.find(DC_ICL)?;
        if config.rtx_supported {
            votes.find(TX_ICL)?;
            votes.find(DC_SUSPEND)?;
        }

        let variant = chip.variant();
        let align = AlignmentEngine::new(&config);

        Ok(Self {
            chip,
            votes,
            board,
            config,
            variant,
            tasks: TaskQueue::new(),
            phase: ChargerPhase::Idle,
            session: ChargerState::default(),
            enabled: true,
            check_det: false,
            check_dc: false,
            icl_ramp: false,
            overrides: IclOverrides::default(),
            align,
            ocp: None,
            fod: FodStatus::Unwritten,
            last_eop: None,
            comm: CommChannel::new(),
            rtx: RtxSession::default(),
        })
    }

    /// Casts the default votes, arms the chip and picks up a transmitter
    /// that was already there at boot.
    pub fn start(&mut self, now: Instant) -> Result<(), ChargerError> {
        info!("WLC - starting, variant {}", self.variant);

        self.vote_defaults();
        if self.rtx_supported() {
            self.rtx_vote_defaults()?;
        }

        self.board.set_enable_line(self.enabled);

        match self.board.dc_present() {
            Ok(true) => {
                self.check_det = true;
                self.check_dc = true;
                self.tasks.schedule(Task::NotifierCheck, now);
            },
            Ok(false) => {},
            Err(e) => warn!("WLC - dc presence unavailable at start {}", e),
        }

        Ok(())
    }

    pub fn handle_event(&mut self, event: ChargerEvent, now: Instant) {
        match event {
            ChargerEvent::Interrupt => self.handle_interrupt(now),
            ChargerEvent::DetectInterrupt => self.handle_detect(now),
            ChargerEvent::DcPresenceChanged => self.on_dc_presence_changed(now),
            ChargerEvent::VoteChanged { votable, effective } => self.on_vote_changed(votable, effective, now),
        }
    }

    /// Runs every task due at `now`.
    pub fn poll(&mut self, now: Instant) {
        while let Some(task) = self.tasks.pop_due(now) {
            trace!("WLC - running {}", task);
            let res = self.run_task(task, now);
            self.absorb(res, now);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.next_deadline()
    }

    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn config(&self) -> &ChargerConfig {
        &self.config
    }

    fn run_task(&mut self, task: Task, now: Instant) -> ChipResult<()> {
        match task {
            Task::NotifierCheck => self.notifier_check(now),
            Task::DcPresencePoll => self.dc_presence_poll(now),
            Task::NegPowerPoll { attempt } => self.neg_power_poll(attempt, now),
            Task::BppVout { attempt } => self.bpp_vout(attempt, now),
            Task::FodWrite { attempt } => self.write_fod(attempt, now),
            Task::OverCurrentPoll => self.over_current_poll(now),
            Task::AlignPoll => self.align_poll(now),
            Task::IclRamp => {
                self.icl_ramp_step();
                Ok(())
            },
            Task::TxTimeout => {
                self.comm_tx_timeout();
                Ok(())
            },
            Task::EnableCooldown => {
                if self.enabled {
                    debug!("WLC - re-arming enable line");
                    self.board.set_enable_line(true);
                }
                Ok(())
            },
            Task::VrectTimeout => {
                if self.phase != ChargerPhase::Online && self.align.on_vrect_timeout() {
                    info!("WLC - no vrect after detect");
                    self.tasks.schedule(Task::AlignTimeout, now + crate::config::ALIGN_TIMEOUT);
                }
                Ok(())
            },
            Task::AlignTimeout => {
                self.align.on_align_timeout();
                Ok(())
            },
            Task::TxIdBroadcast => self.rtx_send_tx_id(),
        }
    }

    /// Dispatches one assertion of the interrupt line.
    fn handle_interrupt(&mut self, now: Instant) {
        let mode = if self.rtx.active() {
            IrqMode::Transmit
        } else {
            IrqMode::Receive
        };

        // read and acknowledge as one sequence, only the bits we handle
        let res = self.chip.lock(|c| -> ChipResult<(u16, u16)> {
            let raw = c.interrupt_status()?;
            let handled = raw & mode.mask();
            if handled != 0 {
                c.clear_interrupts(handled)?;
            }
            Ok((raw, handled))
        });

        let (raw, handled) = match res {
            Ok(v) => v,
            Err(e) => {
                error!("WLC - failed to read interrupt status {}", e);
                self.absorb(Err(e), now);
                return;
            },
        };

        trace!("WLC - irq {=u16:x} mode {}", raw, mode);
        if raw == 0 {
            let res = self.check_dc_reset(session::DcResetCause::Spurious);
            self.absorb(res, now);
            return;
        }

        if raw & !handled != 0 {
            debug!("WLC - ignoring irq bits {=u16:x}", raw & !handled);
        }

        match mode {
            IrqMode::Transmit => {
                for event in decode_rtx(handled) {
                    self.rtx_event(event, now);
                }
            },
            IrqMode::Receive => {
                for event in decode_rx(handled) {
                    let res = self.rx_event(event, now);
                    let absent = res == Err(TransportError::NotConnected);
                    self.absorb(res, now);
                    if absent {
                        break;
                    }
                }
            },
        }
    }

    fn on_vote_changed(&mut self, votable: VotableId, effective: Option<i32>, now: Instant) {
        match votable {
            VotableId::DcIcl => {
                debug!("WLC - DC_ICL now {}", effective);
                self.board.notify(Notification::InputCurrentLimit(effective));
            },
            VotableId::TxIcl => self.on_tx_icl_changed(effective, now),
            VotableId::DcSuspend => {
                let online = self.online_status();
                self.board.notify(Notification::Online(online));
            },
            VotableId::Other => {},
        }
    }

    /// Bus errors were already logged at the failing step, a missing device
    /// ends whatever session is up.
    fn absorb(&mut self, res: ChipResult<()>, now: Instant) {
        match res {
            Ok(()) => {},
            Err(TransportError::NotConnected) => self.device_absent(now),
            Err(e) => warn!("WLC - transport error {}", e),
        }
    }

    fn device_absent(&mut self, now: Instant) {
        if self.rtx.ben_state != BenState::Disabled {
            warn!("WLC - chip gone while transmitting");
            self.disable_rtx(now);
            return;
        }

        if self.phase == ChargerPhase::Idle {
            return;
        }

        warn!("WLC - chip not responding, going offline");
        self.set_offline(now);
        if self.config.dc_reset != crate::config::DcResetPolicy::None {
            self.request_dc_reset();
        }
    }

    fn request_dc_reset(&mut self) {
        info!("WLC - requesting DC path reset");
        if let Err(e) = self.board.request_dc_reset() {
            error!("WLC - DC reset failed {}", e);
        }
    }

    fn rtx_supported(&self) -> bool {
        self.config.rtx_supported && self.variant.supports_rtx()
    }
}

/// Bus errors are logged and swallowed, a missing device is passed up.
fn tolerate<T>(res: ChipResult<T>) -> ChipResult<Option<T>> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(TransportError::NotConnected) => Err(TransportError::NotConnected),
        Err(e) => {
            warn!("WLC - transport error {}", e);
            Ok(None)
        },
    }
}
