use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Instant, Timer};

use crate::board::Board;
use crate::charger::WlcCharger;
use crate::event::EventQueue;
use crate::transport::Chip;

/// Drives the charger forever: queued events as they arrive, delayed work
/// when its deadline passes.
pub async fn run<'a, M: RawMutex, C: Chip, B: Board, const N: usize>(
    charger: &mut WlcCharger<'a, M, C, B>,
    queue: &EventQueue<M, N>,
) {
    info!("WLC - runner started");

    loop {
        let deadline = charger.next_deadline().unwrap_or(Instant::MAX);

        match select(queue.receive(), Timer::at(deadline)).await {
            Either::First(event) => {
                trace!("WLC - event {}", event);
                charger.handle_event(event, Instant::now());
            },
            Either::Second(()) => {},
        }

        // drain whatever else is already queued before running tasks
        while let Some(event) = queue.try_receive() {
            charger.handle_event(event, Instant::now());
        }

        charger.poll(Instant::now());
    }
}
