//! Coil alignment estimation.
//!
//! The operating frequency drifts up as the coils line up, and down with
//! load. Compensating the frequency with a filtered output current and
//! bucketing it against calibrated breakpoints gives a 0..=100 score.

use heapless::{String, Vec};
use core::fmt::Write;

use crate::config::{
    ChargerConfig, ALIGNMENT_MAX, ALIGN_CURRENT_FILTER_LENGTH, ALIGN_DET_IRQ_THRESHOLD,
    ALIGN_MAX_BREAKPOINTS, ALIGN_MFG_CHECKS, MFG_GOOGLE,
};
use crate::filter::{Filter, WindowAveragingFilter};
use crate::math::range::Range;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MfgCheck {
    Checking,
    Passed,
    Failed,
}

/// Coarse placement feedback derived from the detect line, shown before a
/// score is available.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlignStatus {
    Checking,
    MoveToCenter,
    Centered,
    Error,
}

/// Rolling alignment state, reset with the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlignmentSample {
    pub last_score: i32,
    pub filtered_current: u32,
    pub sample_count: usize,
    pub mfg_check_state: MfgCheck,
    pub mfg_code: u16,
}

impl Default for AlignmentSample {
    fn default() -> Self {
        Self {
            last_score: -1,
            filtered_current: 0,
            sample_count: 0,
            mfg_check_state: MfgCheck::Checking,
            mfg_code: 0,
        }
    }
}

pub struct AlignmentEngine {
    freqs: Vec<u32, ALIGN_MAX_BREAKPOINTS>,
    scalar: u32,
    hysteresis_hz: u32,
    filter: WindowAveragingFilter<ALIGN_CURRENT_FILTER_LENGTH, true, u32>,
    mfg_checks: u8,
    sample: AlignmentSample,
    score: i32,
    status: AlignStatus,
    det_count: u8,
}

impl AlignmentEngine {
    /// A breakpoint table that is too short or not ascending disables the
    /// engine instead of producing nonsense scores.
    pub fn new(config: &ChargerConfig) -> Self {
        let freqs = if config.validate().is_ok() && config.alignment_freqs.len() >= 2 {
            config.alignment_freqs.clone()
        } else {
            if !config.alignment_freqs.is_empty() {
                warn!("Align - bad frequency table, alignment disabled");
            }
            Vec::new()
        };

        Self {
            freqs,
            scalar: config.alignment_scalar,
            hysteresis_hz: config.alignment_hysteresis_hz,
            filter: WindowAveragingFilter::new(),
            mfg_checks: 0,
            sample: AlignmentSample::default(),
            score: -1,
            status: AlignStatus::Checking,
            det_count: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.freqs.len() >= 2
    }

    pub fn sample(&self) -> &AlignmentSample {
        &self.sample
    }

    /// Score from the latest cycle, -1 when unknown.
    pub fn score(&self) -> i32 {
        self.score
    }

    pub fn status(&self) -> AlignStatus {
        self.status
    }

    /// Back to a fresh session.
    pub fn reset(&mut self) {
        self.filter.reset();
        self.mfg_checks = 0;
        self.sample = AlignmentSample::default();
        self.score = -1;
        self.status = AlignStatus::Checking;
        self.det_count = 0;
    }

    /// Session came up, start scoring from scratch.
    pub fn arm(&mut self) {
        self.reset();
        self.status = AlignStatus::Centered;
    }

    /// Session went away.
    pub fn end_session(&mut self) {
        self.reset();
        self.sample.mfg_check_state = MfgCheck::Failed;
        self.status = AlignStatus::Error;
    }

    /// Whether the poll should keep running after this cycle. A transmitter
    /// that never reports a manufacturer code gets a bounded number of polls.
    pub fn wants_reschedule(&self) -> bool {
        match self.sample.mfg_check_state {
            _ if !self.enabled() => false,
            MfgCheck::Passed => true,
            MfgCheck::Checking => self.mfg_checks < ALIGN_MFG_CHECKS,
            MfgCheck::Failed => false,
        }
    }

    pub fn compensates(&self) -> bool {
        self.scalar != 0
    }

    /// Start of an evaluation cycle. The score is unknown until this cycle
    /// produces one.
    pub fn begin_cycle(&mut self) {
        self.score = -1;
    }

    pub fn mfg_check_state(&self) -> MfgCheck {
        self.sample.mfg_check_state
    }

    /// Feeds one manufacturer code reading. A code of zero means the
    /// transmitter hasn't told us yet and doesn't count against it.
    pub fn check_mfg(&mut self, mfg_code: u16, extended: bool) -> MfgCheck {
        if self.sample.mfg_check_state != MfgCheck::Checking {
            return self.sample.mfg_check_state;
        }

        self.mfg_checks += 1;
        self.sample.mfg_code = mfg_code;
        if mfg_code == 0 {
            return MfgCheck::Checking;
        }

        self.sample.mfg_check_state = if mfg_code == MFG_GOOGLE && extended {
            MfgCheck::Passed
        } else {
            MfgCheck::Failed
        };

        self.sample.mfg_check_state
    }

    /// Frequency offset for the given output current reading.
    pub fn current_compensation(&mut self, iout_ma: u32) -> u32 {
        if !self.compensates() {
            return 0;
        }

        self.filter.add_sample(iout_ma);
        self.filter.update();

        let avg = self.filter.filtered_value().unwrap_or(0);
        self.sample.filtered_current = avg;
        self.sample.sample_count = self.filter.sample_count();

        self.scalar.saturating_mul(avg)
    }

    /// Bucket the adjusted frequency falls in and its score.
    fn bucket(&self, adjusted_hz: u32) -> Option<(usize, i32)> {
        let buckets = self.freqs.len() - 1;
        let ind = self.freqs
            .windows(2)
            // lower edge exclusive, upper edge inclusive
            .position(|w| adjusted_hz > w[0] && adjusted_hz <= w[1])?;

        let score = Range::new(0, buckets as i32 - 1)
            .map_value_to_range(ind as i32, &Range::new(0, ALIGNMENT_MAX));

        Some((ind, score))
    }

    /// Scores one frequency reading. Returns the score when it should be
    /// published: it dropped, or the frequency cleared the bucket's lower
    /// edge by the hysteresis margin.
    pub fn evaluate(&mut self, freq_hz: u32, compensation: u32) -> Option<i32> {
        if !self.enabled() {
            return None;
        }

        let adjusted = freq_hz.saturating_add(compensation);
        let Some((ind, score)) = self.bucket(adjusted) else {
            trace!("Align - {} Hz out of range", adjusted);
            self.score = -1;
            return None;
        };

        self.score = score;
        if score == self.sample.last_score {
            return None;
        }

        let lower_edge = self.freqs[ind];
        if score < self.sample.last_score || adjusted >= lower_edge.saturating_add(self.hysteresis_hz) {
            self.sample.last_score = score;
            debug!("Align - score {} at {} Hz", score, adjusted);
            return Some(score);
        }

        None
    }

    /// Detect interrupt while no session is up. Too many of them means the
    /// phone keeps bouncing off the pad.
    pub fn on_detect(&mut self) {
        self.det_count = self.det_count.saturating_add(1);
        if self.det_count > ALIGN_DET_IRQ_THRESHOLD {
            self.status = AlignStatus::MoveToCenter;
        } else if self.status != AlignStatus::MoveToCenter {
            self.status = AlignStatus::Checking;
        }
    }

    /// No rectified voltage came up after a detect.
    pub fn on_vrect_timeout(&mut self) -> bool {
        if self.status == AlignStatus::Checking {
            self.status = AlignStatus::MoveToCenter;
            return true;
        }
        false
    }

    pub fn on_align_timeout(&mut self) {
        if self.status != AlignStatus::Centered {
            self.status = AlignStatus::Error;
        }
    }

    /// Status text: the score while centered, otherwise a placement hint.
    pub fn status_str(&self) -> String<8> {
        let mut s = String::new();
        let _ = match self.status {
            AlignStatus::Checking => s.push_str("..."),
            AlignStatus::MoveToCenter => s.push_str("M2C"),
            AlignStatus::Error => s.push_str("-1"),
            AlignStatus::Centered if self.score < 0 => s.push_str("OK"),
            AlignStatus::Centered => write!(s, "{}", self.score).map_err(|_| ()),
        };
        s
    }
}
