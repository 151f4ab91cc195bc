//! Named multi-writer arbitration ("votables").
//!
//! Every policy source casts a vote under its own client name. A votable
//! combines the active votes with its rule and reports the winner, or `None`
//! when nobody has an active vote. Each votable serializes itself behind an
//! embassy blocking mutex so it can be shared by reference across tasks.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};
use heapless::{String, Vec};

pub const MAX_VOTABLES: usize = 8;
pub const MAX_VOTERS: usize = 8;
pub const CLIENT_NAME_LEN: usize = 24;

pub type ClientName = String<CLIENT_NAME_LEN>;

// votables the charger depends on
pub const DC_ICL: &str = "DC_ICL";
pub const TX_ICL: &str = "TX_ICL";
pub const DC_SUSPEND: &str = "DC_SUSPEND";

// voters
pub const WLC_VOTER: &str = "WLC_VOTER";
pub const OCP_VOTER: &str = "OCP_VOTER";
pub const DCIN_AICL_VOTER: &str = "DCIN_AICL_VOTER";
pub const USER_VOTER: &str = "USER_VOTER";
pub const RTX_VOTER: &str = "RTX_VOTER";
pub const THERMAL_DAEMON_VOTER: &str = "THERMAL_DAEMON_VOTER";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VoteRule {
    Min,
    Max,
}

impl VoteRule {
    fn prefers(self, candidate: i32, current: i32) -> bool {
        match self {
            VoteRule::Min => candidate < current,
            VoteRule::Max => candidate > current,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VoteError {
    /// the votable was never created, this is a wiring problem
    NoSuchVotable,
    DuplicateVotable,
    RegistryFull,
    TooManyVoters,
    ClientNameTooLong,
    NegativeValue,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vote {
    pub client: ClientName,
    pub value: i32,
    pub active: bool,
}

/// Notified with the new effective value whenever a cast changes it.
///
/// Runs inside the votable's critical section, implementations should hand
/// the value off (e.g. into a channel) rather than do work.
pub trait VoteListener: Sync {
    fn effective_changed(&self, votable: &'static str, effective: Option<i32>);
}

struct VotableState {
    votes: Vec<Vote, MAX_VOTERS>,
    effective: Option<i32>,
    effective_client: Option<usize>,
}

impl VotableState {
    const fn new() -> Self {
        Self {
            votes: Vec::new(),
            effective: None,
            effective_client: None,
        }
    }

    fn resolve(&self, rule: VoteRule) -> Option<(i32, usize)> {
        let mut winner: Option<(i32, usize)> = None;
        for (ind, vote) in self.votes.iter().enumerate().filter(|(_, v)| v.active) {
            winner = match winner {
                Some((value, _)) if !rule.prefers(vote.value, value) => winner,
                _ => Some((vote.value, ind)),
            };
        }

        winner
    }
}

pub struct Votable<'a, M: RawMutex> {
    name: &'static str,
    rule: VoteRule,
    state: Mutex<M, RefCell<VotableState>>,
    listener: Option<&'a dyn VoteListener>,
}

impl<'a, M: RawMutex> Votable<'a, M> {
    pub fn new(name: &'static str, rule: VoteRule, listener: Option<&'a dyn VoteListener>) -> Self {
        Self {
            name,
            rule,
            state: Mutex::new(RefCell::new(VotableState::new())),
            listener,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn rule(&self) -> VoteRule {
        self.rule
    }

    /// Registers, replaces or withdraws `client`'s vote. Returns whether the
    /// effective value changed.
    pub fn vote(&self, client: &str, active: bool, value: i32) -> Result<bool, VoteError> {
        if active && value < 0 {
            return Err(VoteError::NegativeValue);
        }

        self.state.lock(|cell| {
            let changed = {
                let mut state = cell.borrow_mut();
                match state.votes.iter().position(|v| v.client.as_str() == client) {
                    Some(ind) => {
                        state.votes[ind].active = active;
                        state.votes[ind].value = value;
                    },
                    None if !active => {
                        // withdrawing a vote that was never cast
                        return Ok(false);
                    },
                    None => {
                        let mut name = ClientName::new();
                        name.push_str(client).map_err(|_| VoteError::ClientNameTooLong)?;
                        state.votes.push(Vote { client: name, value, active }).map_err(|_| VoteError::TooManyVoters)?;
                    },
                }

                let winner = state.resolve(self.rule);
                state.effective_client = winner.map(|(_, ind)| ind);

                let effective = winner.map(|(value, _)| value);
                if effective != state.effective {
                    state.effective = effective;
                    Some(effective)
                } else {
                    None
                }
            };

            match changed {
                Some(effective) => {
                    trace!("Votable - {} effective {} ({} from {})", self.name, effective, value, client);
                    if let Some(listener) = self.listener {
                        listener.effective_changed(self.name, effective);
                    }
                    Ok(true)
                },
                None => Ok(false),
            }
        })
    }

    pub fn effective(&self) -> Option<i32> {
        self.state.lock(|cell| cell.borrow().effective)
    }

    pub fn effective_client(&self) -> Option<ClientName> {
        self.state.lock(|cell| {
            let state = cell.borrow();
            state.effective_client.and_then(|ind| state.votes.get(ind)).map(|v| v.client.clone())
        })
    }

    /// The client's active vote, if any.
    pub fn client_vote(&self, client: &str) -> Option<i32> {
        self.state.lock(|cell| {
            cell.borrow()
                .votes
                .iter()
                .find(|v| v.active && v.client.as_str() == client)
                .map(|v| v.value)
        })
    }

    pub fn active_votes(&self) -> usize {
        self.state.lock(|cell| cell.borrow().votes.iter().filter(|v| v.active).count())
    }
}

/// Explicit registry of votables, built up at init and shared by reference
/// afterwards.
pub struct VoteRegistry<'a, M: RawMutex> {
    votables: Vec<Votable<'a, M>, MAX_VOTABLES>,
}

impl<'a, M: RawMutex> Default for VoteRegistry<'a, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, M: RawMutex> VoteRegistry<'a, M> {
    pub const fn new() -> Self {
        Self {
            votables: Vec::new(),
        }
    }

    pub fn create(&mut self, name: &'static str, rule: VoteRule, listener: Option<&'a dyn VoteListener>) -> Result<(), VoteError> {
        if self.votables.iter().any(|v| v.name == name) {
            return Err(VoteError::DuplicateVotable);
        }

        self.votables
            .push(Votable::new(name, rule, listener))
            .map_err(|_| VoteError::RegistryFull)
    }

    pub fn find(&self, name: &str) -> Result<&Votable<'a, M>, VoteError> {
        self.votables
            .iter()
            .find(|v| v.name == name)
            .ok_or(VoteError::NoSuchVotable)
    }

    pub fn vote(&self, votable: &str, client: &str, active: bool, value: i32) -> Result<bool, VoteError> {
        self.find(votable)?.vote(client, active, value)
    }

    pub fn effective(&self, votable: &str) -> Result<Option<i32>, VoteError> {
        Ok(self.find(votable)?.effective())
    }

    pub fn client_vote(&self, votable: &str, client: &str) -> Result<Option<i32>, VoteError> {
        Ok(self.find(votable)?.client_vote(client))
    }
}
