//! Deadline queue for the charger's delayed and periodic work.
//!
//! Each task kind owns at most one slot, so scheduling a kind that is
//! already pending moves its deadline instead of queueing a second copy.
//! Session tasks are stamped with the session epoch; ending a session drops
//! them and bumps the epoch so nothing stamped earlier can ever run.

use embassy_time::Instant;
use heapless::Vec;

pub const MAX_TASKS: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Task {
    /// debounced DC presence / detect evaluation
    NotifierCheck,
    DcPresencePoll,
    NegPowerPoll { attempt: u8 },
    BppVout { attempt: u8 },
    FodWrite { attempt: u8 },
    OverCurrentPoll,
    AlignPoll,
    IclRamp,
    TxTimeout,
    /// re-arm the enable line after a session dropped
    EnableCooldown,
    VrectTimeout,
    AlignTimeout,
    TxIdBroadcast,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskKind {
    NotifierCheck,
    DcPresencePoll,
    NegPowerPoll,
    BppVout,
    FodWrite,
    OverCurrentPoll,
    AlignPoll,
    IclRamp,
    TxTimeout,
    EnableCooldown,
    VrectTimeout,
    AlignTimeout,
    TxIdBroadcast,
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::NotifierCheck => TaskKind::NotifierCheck,
            Task::DcPresencePoll => TaskKind::DcPresencePoll,
            Task::NegPowerPoll { .. } => TaskKind::NegPowerPoll,
            Task::BppVout { .. } => TaskKind::BppVout,
            Task::FodWrite { .. } => TaskKind::FodWrite,
            Task::OverCurrentPoll => TaskKind::OverCurrentPoll,
            Task::AlignPoll => TaskKind::AlignPoll,
            Task::IclRamp => TaskKind::IclRamp,
            Task::TxTimeout => TaskKind::TxTimeout,
            Task::EnableCooldown => TaskKind::EnableCooldown,
            Task::VrectTimeout => TaskKind::VrectTimeout,
            Task::AlignTimeout => TaskKind::AlignTimeout,
            Task::TxIdBroadcast => TaskKind::TxIdBroadcast,
        }
    }
}

impl TaskKind {
    /// work that belongs to one online receive session
    pub fn session_bound(self) -> bool {
        matches!(self,
            TaskKind::DcPresencePoll
            | TaskKind::NegPowerPoll
            | TaskKind::BppVout
            | TaskKind::FodWrite
            | TaskKind::OverCurrentPoll
            | TaskKind::AlignPoll
            | TaskKind::IclRamp
            | TaskKind::TxTimeout)
    }
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    at: Instant,
    seq: u32,
    task: Task,
    epoch: Option<u32>,
}

pub struct TaskQueue {
    entries: Vec<Entry, MAX_TASKS>,
    epoch: u32,
    seq: u32,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            epoch: 0,
            seq: 0,
        }
    }

    pub fn schedule(&mut self, task: Task, at: Instant) {
        let kind = task.kind();
        let entry = Entry {
            at,
            seq: self.seq,
            task,
            epoch: kind.session_bound().then_some(self.epoch),
        };
        self.seq = self.seq.wrapping_add(1);

        if let Some(slot) = self.entries.iter_mut().find(|e| e.task.kind() == kind) {
            *slot = entry;
            return;
        }

        if self.entries.push(entry).is_err() {
            error!("Scheduler - queue full, dropping {}", kind);
        }
    }

    pub fn cancel(&mut self, kind: TaskKind) {
        self.entries.retain(|e| e.task.kind() != kind);
    }

    /// Drops every session task and starts a new epoch.
    pub fn end_session(&mut self) {
        self.entries.retain(|e| !e.task.kind().session_bound());
        self.epoch = self.epoch.wrapping_add(1);
    }

    pub fn is_pending(&self, kind: TaskKind) -> bool {
        self.entries.iter().any(|e| e.task.kind() == kind)
    }

    pub fn deadline(&self, kind: TaskKind) -> Option<Instant> {
        self.entries.iter().find(|e| e.task.kind() == kind).map(|e| e.at)
    }

    pub fn pending_session_tasks(&self) -> usize {
        self.entries.iter().filter(|e| e.epoch == Some(self.epoch)).count()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.at).min()
    }

    /// Takes the earliest task due at `now`, oldest first on equal deadlines.
    pub fn pop_due(&mut self, now: Instant) -> Option<Task> {
        loop {
            let ind = self.entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.at <= now)
                .min_by_key(|(_, e)| (e.at, e.seq))
                .map(|(ind, _)| ind)?;

            let entry = self.entries.swap_remove(ind);
            match entry.epoch {
                Some(epoch) if epoch != self.epoch => {
                    debug!("Scheduler - dropping stale {}", entry.task.kind());
                },
                _ => return Some(entry.task),
            }
        }
    }
}
