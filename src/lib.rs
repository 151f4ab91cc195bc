#![no_std]

// logging macros, declared before every other module
#[macro_use]
mod fmt;

pub mod alignment;
pub mod board;
pub mod charger;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod irq;
pub mod math;
pub mod protection;
pub mod runner;
pub mod schedule;
pub mod transport;
pub mod votable;

pub use board::{Board, BoardError, Notification};
pub use charger::{ChargerPhase, FodStatus, Profile, WlcCharger};
pub use config::ChargerConfig;
pub use error::ChargerError;
pub use event::{ChargerEvent, EventQueue};
pub use transport::{Chip, ChipBus, ChipVariant};
pub use votable::{VoteRegistry, VoteRule};
