//! Status codes and the state snapshot exchanged between client and service.

use thiserror::Error;

/// Size in bytes of one command buffer entry.
pub const ENTRY_SIZE: usize = 4;

/// Command buffer status code.
///
/// `Waiting` and `Throttle` are scheduling sentinels rather than faults: the
/// former means a command is blocked on an inter-context latch and must be
/// retried, the latter asks the scheduler to yield after the command.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Error)]
pub enum CbError {
    #[default]
    #[error("no error")]
    NoError = 0,
    #[error("invalid command size")]
    InvalidSize = 1,
    #[error("out of bounds")]
    OutOfBounds = 2,
    #[error("unknown command")]
    UnknownCommand = 3,
    #[error("invalid arguments")]
    InvalidArguments = 4,
    #[error("context lost")]
    LostContext = 5,
    #[error("generic error")]
    GenericError = 6,
    #[error("waiting on a latch")]
    Waiting = 7,
    #[error("throttled")]
    Throttle = 8,
}

impl CbError {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::NoError),
            1 => Some(Self::InvalidSize),
            2 => Some(Self::OutOfBounds),
            3 => Some(Self::UnknownCommand),
            4 => Some(Self::InvalidArguments),
            5 => Some(Self::LostContext),
            6 => Some(Self::GenericError),
            7 => Some(Self::Waiting),
            8 => Some(Self::Throttle),
            _ => None,
        }
    }

    /// Whether this code is a fault (as opposed to success or a scheduling
    /// sentinel).
    pub const fn is_error(self) -> bool {
        !matches!(self, Self::NoError | Self::Waiting | Self::Throttle)
    }
}

/// Snapshot of a command buffer as seen by the service.
///
/// Offsets are in entries, `size` is the ring capacity in entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct State {
    pub size: i32,
    pub get_offset: i32,
    pub put_offset: i32,
    pub token: i32,
    pub error: CbError,
}

impl State {
    pub fn lost() -> Self {
        Self {
            error: CbError::LostContext,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_not_errors() {
        assert!(!CbError::NoError.is_error());
        assert!(!CbError::Waiting.is_error());
        assert!(!CbError::Throttle.is_error());
        assert!(CbError::LostContext.is_error());
        assert!(CbError::InvalidSize.is_error());
    }

    #[test]
    fn from_u32_rejects_unknown_codes() {
        for code in 0..=8 {
            let err = CbError::from_u32(code).unwrap();
            assert_eq!(err as u32, code);
        }
        assert_eq!(CbError::from_u32(9), None);
    }
}
