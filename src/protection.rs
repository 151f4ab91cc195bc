use heapless::Vec;

use crate::config::{OVC_LIMIT, OVC_THRESHOLD_UA, OVER_CHECK_NUM};
use crate::irq::LimitFlags;
use crate::transport::EopReason;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtectionKind {
    OverVoltage,
    OverTemp,
    OverCurrent,
    UnderVoltage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProtectionEvent {
    pub kind: ProtectionKind,
    pub retries_remaining: u8,
}

impl ProtectionEvent {
    /// Picks the condition to act on. Under voltage on its own is expected
    /// while the field settles and maps to nothing.
    pub fn classify(flags: LimitFlags) -> Option<Self> {
        let (kind, retries_remaining) = if flags.over_voltage {
            (ProtectionKind::OverVoltage, 0)
        } else if flags.over_temp {
            (ProtectionKind::OverTemp, 0)
        } else if flags.over_current {
            (ProtectionKind::OverCurrent, OVER_CHECK_NUM)
        } else {
            return None;
        };

        Some(Self { kind, retries_remaining })
    }

    /// Reason to end power transfer with straight away, if any.
    pub fn immediate_eop(&self) -> Option<EopReason> {
        match self.kind {
            ProtectionKind::OverVoltage => Some(EopReason::OverVoltage),
            ProtectionKind::OverTemp => Some(EopReason::OverTemp),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OverCurrentVerdict {
    /// keep polling
    Pending,
    /// condition went away inside the retry budget
    Cleared,
    /// persisted, but too few samples over the hard threshold
    Transient,
    Escalate,
}

/// One over-current investigation, from the first interrupt until a verdict.
#[derive(Clone, Debug)]
pub struct OverCurrentCheck {
    samples: Vec<u32, { OVER_CHECK_NUM as usize }>,
    over_count: u8,
    attempts: u8,
    // a failed interrupt clear invalidates the next reading
    skip_next: bool,
}

impl Default for OverCurrentCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl OverCurrentCheck {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            over_count: 0,
            attempts: 0,
            skip_next: false,
        }
    }

    pub fn samples(&self) -> &[u32] {
        &self.samples
    }

    pub fn over_count(&self) -> u8 {
        self.over_count
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    pub fn clear_failed(&mut self) {
        self.skip_next = true;
    }

    pub fn take_skip(&mut self) -> bool {
        core::mem::replace(&mut self.skip_next, false)
    }

    /// Records one poll. `iout_ua` is `None` when the reading was skipped or
    /// failed, `still_over` is the over-current status bit after the poll.
    /// A poll without a sample uses up a retry but can't clear the check.
    pub fn record(&mut self, iout_ua: Option<u32>, still_over: bool) -> OverCurrentVerdict {
        self.attempts += 1;

        if let Some(iout) = iout_ua {
            let _ = self.samples.push(iout);
            if iout > OVC_THRESHOLD_UA {
                self.over_count += 1;
            }

            if !still_over {
                return OverCurrentVerdict::Cleared;
            }
        }

        if self.attempts < OVER_CHECK_NUM {
            return OverCurrentVerdict::Pending;
        }

        if self.over_count < OVC_LIMIT {
            OverCurrentVerdict::Transient
        } else {
            OverCurrentVerdict::Escalate
        }
    }
}
