//! In-band data channel to the transmitter.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Instant;

use super::{ChargerPhase, WlcCharger};
use crate::board::{Board, Notification};
use crate::config::{DATA_BUF_LEN, TX_TIMEOUT};
use crate::error::ChargerError;
use crate::schedule::{Task, TaskKind};
use crate::transport::{Chip, ChipResult, TransportError};

/// One outstanding send and the last received payload.
pub struct CommChannel {
    tx_busy: bool,
    tx_done: bool,
    rx_done: bool,
    rx_len: usize,
    rx_buf: [u8; DATA_BUF_LEN],
}

impl Default for CommChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl CommChannel {
    pub const fn new() -> Self {
        Self {
            tx_busy: false,
            tx_done: true,
            rx_done: false,
            rx_len: 0,
            rx_buf: [0; DATA_BUF_LEN],
        }
    }

    /// New session, nothing in flight.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Session or link went away under a pending send.
    pub fn abort(&mut self) {
        self.tx_busy = false;
        self.tx_done = true;
        self.rx_done = false;
        self.rx_len = 0;
    }

    pub fn tx_busy(&self) -> bool {
        self.tx_busy
    }

    pub fn tx_done(&self) -> bool {
        self.tx_done
    }

    pub fn received(&self) -> Option<&[u8]> {
        self.rx_done.then(|| &self.rx_buf[..self.rx_len])
    }
}

impl<'a, M: RawMutex, C: Chip, B: Board> WlcCharger<'a, M, C, B> {
    pub fn send_data(&mut self, data: &[u8], now: Instant) -> Result<(), ChargerError> {
        if self.phase != ChargerPhase::Online {
            return Err(ChargerError::NotOnline);
        }

        if data.is_empty() || data.len() > DATA_BUF_LEN {
            return Err(ChargerError::InvalidArgument);
        }

        if self.comm.tx_busy {
            return Err(ChargerError::Busy);
        }

        self.chip.lock(|c| c.send_data(data))?;

        debug!("WLC - sending {} bytes", data.len());
        self.comm.tx_busy = true;
        self.comm.tx_done = false;
        self.tasks.schedule(Task::TxTimeout, now + TX_TIMEOUT);
        Ok(())
    }

    pub fn received_data(&self) -> Option<&[u8]> {
        self.comm.received()
    }

    pub fn comm(&self) -> &CommChannel {
        &self.comm
    }

    /// Asks the transmitter to reset the comm channel.
    pub fn cc_reset(&mut self) -> Result<(), ChargerError> {
        if self.phase != ChargerPhase::Online {
            return Err(ChargerError::NotOnline);
        }

        self.chip.lock(|c| c.send_cc_reset())?;
        self.comm.abort();
        self.tasks.cancel(TaskKind::TxTimeout);
        Ok(())
    }

    pub(super) fn comm_receive(&mut self) -> ChipResult<()> {
        let buf = &mut self.comm.rx_buf;
        let res = self.chip.lock(|c| -> ChipResult<usize> {
            let len = c.rx_data_len()?;
            if len == 0 || len > DATA_BUF_LEN {
                return Err(TransportError::InvalidLength);
            }
            c.read_data(&mut buf[..len])?;
            Ok(len)
        });

        match res {
            Ok(len) => {
                debug!("WLC - received {} bytes", len);
                self.comm.rx_len = len;
                self.comm.rx_done = true;
                self.board.notify(Notification::DataReceived);
                Ok(())
            },
            Err(TransportError::NotConnected) => Err(TransportError::NotConnected),
            Err(e) => {
                error!("WLC - failed to read received data {}", e);
                self.comm.rx_done = false;
                self.comm.rx_len = 0;
                Ok(())
            },
        }
    }

    pub(super) fn comm_send_complete(&mut self) {
        if !self.comm.tx_busy {
            return;
        }

        self.tasks.cancel(TaskKind::TxTimeout);
        self.comm.tx_busy = false;
        self.comm.tx_done = true;
        self.board.notify(Notification::DataSent);
    }

    pub(super) fn comm_tx_timeout(&mut self) {
        if !self.comm.tx_busy {
            return;
        }

        warn!("WLC - send timed out");
        self.comm.tx_busy = false;
        self.comm.tx_done = true;
        self.board.notify(Notification::DataSent);
    }
}
