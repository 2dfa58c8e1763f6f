//! Commands understood by every decoder regardless of API.
//!
//! Ids `0..=LAST_COMMON_COMMAND` are reserved for these; API-specific command
//! sets start above it.

use crate::header::CommandInfo;

/// Highest id reserved for common commands.
pub const LAST_COMMON_COMMAND: u32 = 255;

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommonCommand {
    /// Skipped. Any number of trailing entries; used to pad to the ring end.
    Noop = 0,
    SetToken = 1,
    SetBucketSize = 2,
    SetBucketData = 3,
    SetBucketDataImmediate = 4,
    GetBucketSize = 5,
    GetBucketData = 6,
}

impl CommonCommand {
    pub const ALL: [CommonCommand; 7] = [
        Self::Noop,
        Self::SetToken,
        Self::SetBucketSize,
        Self::SetBucketData,
        Self::SetBucketDataImmediate,
        Self::GetBucketSize,
        Self::GetBucketData,
    ];

    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Noop),
            1 => Some(Self::SetToken),
            2 => Some(Self::SetBucketSize),
            3 => Some(Self::SetBucketData),
            4 => Some(Self::SetBucketDataImmediate),
            5 => Some(Self::GetBucketSize),
            6 => Some(Self::GetBucketData),
            _ => None,
        }
    }

    pub const fn info(self) -> CommandInfo {
        match self {
            // args: (none) + padding
            Self::Noop => CommandInfo::at_least(0),
            // args: token
            Self::SetToken => CommandInfo::fixed(1),
            // args: bucket_id, size
            Self::SetBucketSize => CommandInfo::fixed(2),
            // args: bucket_id, offset, size, shm_id, shm_offset
            Self::SetBucketData => CommandInfo::fixed(5),
            // args: bucket_id, offset, size + payload
            Self::SetBucketDataImmediate => CommandInfo::at_least(3),
            // args: bucket_id, shm_id, shm_offset
            Self::GetBucketSize => CommandInfo::fixed(3),
            // args: bucket_id, offset, size, shm_id, shm_offset
            Self::GetBucketData => CommandInfo::fixed(5),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Noop => "Noop",
            Self::SetToken => "SetToken",
            Self::SetBucketSize => "SetBucketSize",
            Self::SetBucketData => "SetBucketData",
            Self::SetBucketDataImmediate => "SetBucketDataImmediate",
            Self::GetBucketSize => "GetBucketSize",
            Self::GetBucketData => "GetBucketData",
        }
    }
}
