//! One-byte message tags used at the start of every tagged payload.
//!
//! Acknowledgements are the only untagged message on the wire; every other
//! payload starts with one of these values.

/// Message tag carried in the first byte of a tagged payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Legacy single-bet submission.
    SingleBet,
    /// Batch of bets from one agency.
    Batch,
    /// Agency finished submitting.
    Done,
    /// Winners query for one agency.
    GetWinners,
    /// Winning DNIs for the querying agency.
    WinnersList,
    /// Draw has not happened yet.
    NotReady,
    /// Any tag this client does not understand.
    Other(u8),
}

impl MessageType {
    /// Returns `true` for the two-byte `[tag][agency]` control messages.
    #[must_use]
    pub const fn is_control(self) -> bool { matches!(self, Self::Done | Self::GetWinners) }
}

impl From<u8> for MessageType {
    fn from(v: u8) -> Self {
        match v {
            0x01 => Self::SingleBet,
            0x02 => Self::Batch,
            0x03 => Self::Done,
            0x04 => Self::GetWinners,
            0x05 => Self::WinnersList,
            0x06 => Self::NotReady,
            other => Self::Other(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> Self {
        match t {
            MessageType::SingleBet => 0x01,
            MessageType::Batch => 0x02,
            MessageType::Done => 0x03,
            MessageType::GetWinners => 0x04,
            MessageType::WinnersList => 0x05,
            MessageType::NotReady => 0x06,
            MessageType::Other(v) => v,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SingleBet => f.write_str("SINGLE_BET"),
            Self::Batch => f.write_str("BATCH"),
            Self::Done => f.write_str("DONE"),
            Self::GetWinners => f.write_str("GET_WINNERS"),
            Self::WinnersList => f.write_str("WINNERS"),
            Self::NotReady => f.write_str("NOT_READY"),
            Self::Other(v) => write!(f, "Other({v:#04x})"),
        }
    }
}
