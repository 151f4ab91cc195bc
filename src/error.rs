use crate::board::BoardError;
use crate::transport::TransportError;
use crate::votable::VoteError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// alignment breakpoints must be ascending with at least two entries
    AlignmentTable,
    FodTable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargerError {
    Transport(TransportError),
    Vote(VoteError),
    Board(BoardError),
    Config(ConfigError),
    NotOnline,
    Busy,
    InvalidArgument,
}

impl From<TransportError> for ChargerError {
    fn from(err: TransportError) -> Self {
        ChargerError::Transport(err)
    }
}

impl From<VoteError> for ChargerError {
    fn from(err: VoteError) -> Self {
        ChargerError::Vote(err)
    }
}

impl From<BoardError> for ChargerError {
    fn from(err: BoardError) -> Self {
        ChargerError::Board(err)
    }
}

impl From<ConfigError> for ChargerError {
    fn from(err: ConfigError) -> Self {
        ChargerError::Config(err)
    }
}
