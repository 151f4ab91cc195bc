// Naming scheme
// currents are uA unless suffixed _MA, voltages are uV unless suffixed _MV
// timeouts and poll periods are embassy Durations

use embassy_time::Duration;
use heapless::Vec;

use crate::error::ConfigError;

/////////////////////////
//  input current (ICL) //
/////////////////////////

// floor used for a basic power profile session
pub const DC_ICL_BPP_UA: i32 = 700_000;
// single step the BPP ramp raises the floor to
pub const DC_ICL_BPP_RAMP_DEFAULT_UA: i32 = 900_000;
pub const DC_ICL_BPP_RAMP_DELAY_DEFAULT: Duration = Duration::from_secs(7 * 60);
// over-current protection floor for an extended power profile session
pub const DC_ICL_EPP_UA: i32 = 1_100_000;
// negotiated ICL for EPP transmitters granting 10W or more
pub const DC_ICL_EPP_1000_UA: i32 = 1_000_000;
pub const RX_ILIM_MAX_UA: u32 = 1_600_000;

// output above this means the transmitter let us past the 5V BPP rail
pub const EPP_VOUT_THRESHOLD_UV: u32 = 7_000_000;
pub const BPP_VOUT_MV: u32 = 5000;
pub const BPP_VOUT_RETRIES: u8 = 10;
pub const BPP_VOUT_RETRY_DELAY: Duration = Duration::from_millis(10);

// negotiated power is reported in half watts
pub const NEG_POWER_10W: u8 = 10 * 2;
pub const NEG_POWER_11W: u8 = 11 * 2;
pub const NEG_POWER_POLL_DELAY: Duration = Duration::from_millis(50);
pub const NEG_POWER_POLL_RETRIES: u8 = 20;

/////////////////////////
//  transmitter codes   //
/////////////////////////

pub const MFG_GOOGLE: u16 = 0x72;
pub const PTMC_EPP_TX_1912: u16 = 0x32;

/////////////////////////
//  timings             //
/////////////////////////

pub const VRECT_TIMEOUT: Duration = Duration::from_millis(2000);
pub const ALIGN_TIMEOUT: Duration = Duration::from_millis(2000);
pub const NOTIFIER_DELAY: Duration = Duration::from_millis(100);
pub const DCIN_POLL_PERIOD: Duration = Duration::from_millis(1000);
// enable line is re-armed this long after the session drops
pub const DCIN_PON_DELAY: Duration = Duration::from_millis(250);
pub const TX_TIMEOUT: Duration = Duration::from_millis(1000);
pub const FOD_VERIFY_DELAY: Duration = Duration::from_millis(100);
pub const FOD_WRITE_RETRIES: u8 = 3;

/////////////////////////
//  over current        //
/////////////////////////

pub const OVER_CHECK_NUM: u8 = 3;
pub const OVER_CHECK_DELAY: Duration = Duration::from_millis(50);
// samples above the threshold needed before we cut power
pub const OVC_LIMIT: u8 = 1;
pub const OVC_THRESHOLD_UA: u32 = 1_400_000;
// backoff is only applied while the effective ICL is above this
pub const OVC_BACKOFF_LIMIT_UA: i32 = 900_000;
pub const OVC_BACKOFF_AMOUNT_UA: i32 = 100_000;

/////////////////////////
//  alignment           //
/////////////////////////

pub const ALIGNMENT_MAX: i32 = 100;
pub const ALIGN_CURRENT_FILTER_LENGTH: usize = 10;
pub const ALIGN_DEFAULT_SCALAR: u32 = 4;
pub const ALIGN_DEFAULT_HYSTERESIS_HZ: u32 = 5000;
pub const ALIGN_MFG_CHECKS: u8 = 10;
// detect interrupts while offline before we tell the user to move the phone
pub const ALIGN_DET_IRQ_THRESHOLD: u8 = 10;
pub const ALIGN_POLL_PERIOD: Duration = Duration::from_millis(100);
pub const ALIGN_MAX_BREAKPOINTS: usize = 16;

/////////////////////////
//  reverse power (RTX) //
/////////////////////////

pub const RTX_ICL_MAX_MA: i32 = 1350;
pub const TXID_SEND_DELAY: Duration = Duration::from_millis(1000);

/////////////////////////
//  buffers             //
/////////////////////////

pub const FOD_MAX_LEN: usize = 16;
pub const DATA_BUF_LEN: usize = 128;
pub const PP_BUF_LEN: usize = 16;

/// What the charger does to the DC path when the chip falls out of receive
/// mode behind our back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DcResetPolicy {
    None,
    OnModeChanged,
    OnVoutChanged,
}

/// Board specific configuration.
#[derive(Clone, Debug)]
pub struct ChargerConfig {
    pub fod_bpp: Option<Vec<u8, FOD_MAX_LEN>>,
    pub fod_epp: Option<Vec<u8, FOD_MAX_LEN>>,

    /// Ascending operating frequency breakpoints in Hz. Empty disables
    /// alignment reporting.
    pub alignment_freqs: Vec<u32, ALIGN_MAX_BREAKPOINTS>,
    pub alignment_scalar: u32,
    pub alignment_hysteresis_hz: u32,

    /// `None` leaves BPP sessions at the conservative floor.
    pub icl_ramp_delay: Option<Duration>,
    pub icl_ramp_ua: i32,

    pub q_value: Option<u8>,
    /// EPP power (half watts) to renegotiate to at detect.
    pub epp_rp_value: Option<u8>,

    pub dc_reset: DcResetPolicy,
    pub rtx_supported: bool,
    /// Lower 24 bits are broadcast to receivers in RTX mode.
    pub rtx_device_id: u32,
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            fod_bpp: None,
            fod_epp: None,
            alignment_freqs: Vec::new(),
            alignment_scalar: ALIGN_DEFAULT_SCALAR,
            alignment_hysteresis_hz: ALIGN_DEFAULT_HYSTERESIS_HZ,
            icl_ramp_delay: Some(DC_ICL_BPP_RAMP_DELAY_DEFAULT),
            icl_ramp_ua: DC_ICL_BPP_RAMP_DEFAULT_UA,
            q_value: None,
            epp_rp_value: None,
            dc_reset: DcResetPolicy::None,
            rtx_supported: false,
            rtx_device_id: 0x12_1212,
        }
    }
}

impl ChargerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.alignment_freqs.is_empty() {
            if self.alignment_freqs.len() < 2 {
                return Err(ConfigError::AlignmentTable);
            }

            if self.alignment_freqs.windows(2).any(|w| w[0] >= w[1]) {
                return Err(ConfigError::AlignmentTable);
            }
        }

        for table in [&self.fod_bpp, &self.fod_epp].into_iter().flatten() {
            if table.is_empty() {
                return Err(ConfigError::FodTable);
            }
        }

        Ok(())
    }
}
