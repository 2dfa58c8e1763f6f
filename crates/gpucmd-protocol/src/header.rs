//! Command entry header and per-command argument rules.

/// Number of bits used for the command size in a header word.
pub const SIZE_BITS: u32 = 21;

/// Largest command size (in entries, header included) a header can encode.
pub const MAX_COMMAND_SIZE: u32 = (1 << SIZE_BITS) - 1;

/// Largest command id a header can encode.
pub const MAX_COMMAND_ID: u32 = (1 << (32 - SIZE_BITS)) - 1;

/// First word of every command.
///
/// `size` counts entries including the header itself; `command` is the
/// opcode. Layout: `size` in the low 21 bits, `command` in the high 11 bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandHeader {
    pub size: u32,
    pub command: u32,
}

impl CommandHeader {
    pub const fn new(command: u32, size: u32) -> Self {
        Self { size, command }
    }

    pub const fn from_word(word: u32) -> Self {
        Self {
            size: word & MAX_COMMAND_SIZE,
            command: word >> SIZE_BITS,
        }
    }

    pub const fn to_word(self) -> u32 {
        (self.size & MAX_COMMAND_SIZE) | (self.command << SIZE_BITS)
    }

    /// Number of argument entries following the header.
    pub const fn arg_count(self) -> u32 {
        self.size.saturating_sub(1)
    }
}

/// How a command's declared argument count is matched against the entries
/// actually present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgFlags {
    /// Exactly `arg_count` entries.
    Fixed,
    /// `arg_count` entries followed by a variable-length immediate payload.
    AtLeastN,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandInfo {
    pub arg_flags: ArgFlags,
    pub arg_count: u32,
}

impl CommandInfo {
    pub const fn fixed(arg_count: u32) -> Self {
        Self {
            arg_flags: ArgFlags::Fixed,
            arg_count,
        }
    }

    pub const fn at_least(arg_count: u32) -> Self {
        Self {
            arg_flags: ArgFlags::AtLeastN,
            arg_count,
        }
    }

    /// Returns the immediate payload size in bytes if `available` argument
    /// entries satisfy this command's rule, `None` otherwise.
    pub const fn immediate_data_size(self, available: u32) -> Option<u32> {
        let ok = match self.arg_flags {
            ArgFlags::Fixed => available == self.arg_count,
            ArgFlags::AtLeastN => available >= self.arg_count,
        };
        if ok {
            Some((available - self.arg_count) * crate::ENTRY_SIZE as u32)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_word_layout() {
        let hdr = CommandHeader::new(0x123, 7);
        let word = hdr.to_word();
        assert_eq!(word & MAX_COMMAND_SIZE, 7);
        assert_eq!(word >> SIZE_BITS, 0x123);
        assert_eq!(CommandHeader::from_word(word), hdr);
        assert_eq!(hdr.arg_count(), 6);
    }

    #[test]
    fn immediate_size_rules() {
        let fixed = CommandInfo::fixed(2);
        assert_eq!(fixed.immediate_data_size(2), Some(0));
        assert_eq!(fixed.immediate_data_size(3), None);
        assert_eq!(fixed.immediate_data_size(1), None);

        let at_least = CommandInfo::at_least(2);
        assert_eq!(at_least.immediate_data_size(1), None);
        assert_eq!(at_least.immediate_data_size(2), Some(0));
        assert_eq!(at_least.immediate_data_size(5), Some(12));
    }
}
