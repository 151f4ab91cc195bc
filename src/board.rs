/// Errors from board level IO.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BoardError {
    /// the board has no such line
    Unsupported,
    Io,
}

/// Property changes the charger reports to the rest of the system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Notification {
    Online(bool),
    InputCurrentLimit(Option<i32>),
    Capacity(u8),
    Alignment(i32),
    RtxStatus,
    DataReceived,
    DataSent,
}

/// Lines and power-path hooks around the charger IC.
pub trait Board {
    /// wireless charging enable (the chip's EN pin, polarity handled here)
    fn set_enable_line(&mut self, enable: bool);

    /// boost enable and the mode switch for reverse power
    fn set_rtx_outputs(&mut self, enable: bool) -> Result<(), BoardError>;

    /// DC input presence as seen by the power-delivery path
    fn dc_present(&mut self) -> Result<bool, BoardError>;

    /// hard reset of the DC path
    fn request_dc_reset(&mut self) -> Result<(), BoardError>;

    fn notify(&mut self, change: Notification);
}
