use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Instant;

use super::WlcCharger;
use crate::board::Board;
use crate::config::{OVC_BACKOFF_AMOUNT_UA, OVC_BACKOFF_LIMIT_UA, OVER_CHECK_DELAY};
use crate::irq::{bits, LimitFlags};
use crate::protection::{OverCurrentCheck, OverCurrentVerdict, ProtectionEvent};
use crate::schedule::Task;
use crate::transport::{Chip, ChipResult, EopReason, TransportError};
use crate::votable::{DC_ICL, OCP_VOTER};

impl<'a, M: RawMutex, C: Chip, B: Board> WlcCharger<'a, M, C, B> {
    /// Limit interrupt. Over voltage and over temperature end the transfer
    /// right away, over current backs the input limit off and polls.
    pub(super) fn over_handle(&mut self, flags: LimitFlags, now: Instant) -> ChipResult<()> {
        let Some(event) = ProtectionEvent::classify(flags) else {
            debug!("WLC - under voltage, ignored");
            return Ok(());
        };

        if let Some(reason) = event.immediate_eop() {
            error!("WLC - {}, ending power transfer", event.kind);
            return self.send_eop(reason);
        }

        // one investigation at a time, repeats while it runs change nothing
        if self.ocp.is_some() {
            debug!("WLC - over current already being checked");
            return Ok(());
        }

        warn!("WLC - over current, {} checks", event.retries_remaining);
        self.ocp_backoff();

        let mut check = OverCurrentCheck::new();
        if self.clear_limit_irqs()?.is_none() {
            check.clear_failed();
        }
        self.ocp = Some(check);
        self.tasks.schedule(Task::OverCurrentPoll, now + OVER_CHECK_DELAY);

        Ok(())
    }

    fn ocp_backoff(&mut self) {
        match self.votes.effective(DC_ICL) {
            Ok(Some(icl)) if icl > OVC_BACKOFF_LIMIT_UA => {
                let icl = icl - OVC_BACKOFF_AMOUNT_UA;
                info!("WLC - over current backoff to {} uA", icl);
                if let Err(e) = self.votes.vote(DC_ICL, OCP_VOTER, true, icl) {
                    error!("WLC - could not vote OCP backoff {}", e);
                }
            },
            Ok(_) => {},
            Err(e) => error!("WLC - no DC_ICL for backoff {}", e),
        }
    }

    pub(super) fn over_current_poll(&mut self, now: Instant) -> ChipResult<()> {
        let Some(mut check) = self.ocp.take() else {
            return Ok(());
        };

        let iout_ua = if check.take_skip() {
            None
        } else {
            match self.chip.lock(|c| c.iout_ma()) {
                Ok(ma) => Some(ma.saturating_mul(1000)),
                Err(TransportError::NotConnected) => return Err(TransportError::NotConnected),
                Err(e) => {
                    error!("WLC - failed to read iout {}", e);
                    None
                },
            }
        };

        // no sample this round, the status bit isn't consulted either
        let still_over = match iout_ua {
            None => true,
            Some(_) => match self.chip.lock(|c| c.status()) {
                Ok(status) => status & bits::OVER_CURRENT != 0,
                Err(TransportError::NotConnected) => return Err(TransportError::NotConnected),
                Err(_) => true,
            },
        };

        match check.record(iout_ua, still_over) {
            OverCurrentVerdict::Pending => {
                if self.clear_limit_irqs()?.is_none() {
                    check.clear_failed();
                }
                self.ocp = Some(check);
                self.tasks.schedule(Task::OverCurrentPoll, now + OVER_CHECK_DELAY);
            },
            OverCurrentVerdict::Cleared => {
                info!("WLC - over current cleared after {} checks, samples {}", check.attempts(), check.samples());
            },
            OverCurrentVerdict::Transient => {
                info!("WLC - over current transient, {} of {} over threshold", check.over_count(), check.samples().len());
            },
            OverCurrentVerdict::Escalate => {
                error!("WLC - over current persisted, samples {}", check.samples());
                self.send_eop(EopReason::OverCurrent)?;
            },
        }

        Ok(())
    }

    fn clear_limit_irqs(&mut self) -> ChipResult<Option<()>> {
        super::tolerate(self.chip.lock(|c| c.clear_interrupts(bits::LIMIT_MASK)))
    }

    pub(super) fn send_eop(&mut self, reason: EopReason) -> ChipResult<()> {
        info!("WLC - sending EOP {}", reason);
        self.last_eop = Some(reason);
        self.chip.lock(|c| c.send_eop(reason))
    }
}
