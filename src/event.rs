//! Events fed into the charger from interrupt tasks and vote listeners.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_futures::select::{select, select3, Either, Either3};
use embassy_sync::channel::{Channel, TrySendError};
use embassy_sync::signal::Signal;

use crate::votable::{VoteListener, DC_ICL, DC_SUSPEND, TX_ICL};

pub const EVENT_QUEUE_DEPTH: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VotableId {
    DcIcl,
    TxIcl,
    DcSuspend,
    Other,
}

impl VotableId {
    pub fn from_name(name: &str) -> Self {
        match name {
            DC_ICL => VotableId::DcIcl,
            TX_ICL => VotableId::TxIcl,
            DC_SUSPEND => VotableId::DcSuspend,
            _ => VotableId::Other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargerEvent {
    /// the chip's interrupt line asserted
    Interrupt,
    /// the detect line asserted
    DetectInterrupt,
    DcPresenceChanged,
    VoteChanged {
        votable: VotableId,
        effective: Option<i32>,
    },
}

/// Hardware events go through a bounded channel. Vote changes never take a
/// channel slot: each watched votable has a signal that only keeps the latest
/// effective value, so a burst of interrupts can't push one out.
pub struct EventQueue<M: RawMutex, const N: usize = EVENT_QUEUE_DEPTH> {
    channel: Channel<M, ChargerEvent, N>,
    dc_icl: Signal<M, Option<i32>>,
    tx_icl: Signal<M, Option<i32>>,
    dc_suspend: Signal<M, Option<i32>>,
}

impl<M: RawMutex, const N: usize> Default for EventQueue<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const N: usize> EventQueue<M, N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            dc_icl: Signal::new(),
            tx_icl: Signal::new(),
            dc_suspend: Signal::new(),
        }
    }

    /// Never blocks, safe from interrupt context. A full queue drops the
    /// event and reports it back.
    pub fn try_send(&self, event: ChargerEvent) -> Result<(), ChargerEvent> {
        if let ChargerEvent::VoteChanged { votable, effective } = event {
            self.signal_vote(votable, effective);
            return Ok(());
        }

        self.channel.try_send(event).map_err(|TrySendError::Full(event)| {
            warn!("WLC - event queue full, dropping {}", event);
            event
        })
    }

    fn signal_vote(&self, votable: VotableId, effective: Option<i32>) {
        match votable {
            VotableId::DcIcl => self.dc_icl.signal(effective),
            VotableId::TxIcl => self.tx_icl.signal(effective),
            VotableId::DcSuspend => self.dc_suspend.signal(effective),
            VotableId::Other => {},
        }
    }

    /// Waits for the next event, pending vote changes first.
    pub async fn receive(&self) -> ChargerEvent {
        if let Some(event) = self.take_vote() {
            return event;
        }

        let votes = select3(self.dc_icl.wait(), self.tx_icl.wait(), self.dc_suspend.wait());
        match select(self.channel.receive(), votes).await {
            Either::First(event) => event,
            Either::Second(Either3::First(effective)) => ChargerEvent::VoteChanged { votable: VotableId::DcIcl, effective },
            Either::Second(Either3::Second(effective)) => ChargerEvent::VoteChanged { votable: VotableId::TxIcl, effective },
            Either::Second(Either3::Third(effective)) => ChargerEvent::VoteChanged { votable: VotableId::DcSuspend, effective },
        }
    }

    pub fn try_receive(&self) -> Option<ChargerEvent> {
        self.take_vote().or_else(|| self.channel.try_receive().ok())
    }

    fn take_vote(&self) -> Option<ChargerEvent> {
        let slots = [
            (VotableId::TxIcl, &self.tx_icl),
            (VotableId::DcSuspend, &self.dc_suspend),
            (VotableId::DcIcl, &self.dc_icl),
        ];

        slots.into_iter().find_map(|(votable, signal)| {
            signal.try_take().map(|effective| ChargerEvent::VoteChanged { votable, effective })
        })
    }
}

impl<M: RawMutex + Sync, const N: usize> VoteListener for EventQueue<M, N> {
    fn effective_changed(&self, votable: &'static str, effective: Option<i32>) {
        self.signal_vote(VotableId::from_name(votable), effective);
    }
}
