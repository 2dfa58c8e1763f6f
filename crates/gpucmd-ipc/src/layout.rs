//! Byte layout shared by every frame ring.

/// All ring records are aligned to this many bytes.
pub const RECORD_ALIGN: usize = 4;

/// Stored in a record's length field to send the reader back to offset 0.
///
/// `0xFFFF_FFFF` keeps zero-length frames legal.
pub const WRAP_MARKER: u32 = 0xFFFF_FFFF;

/// Default capacity of one transport direction.
pub const DEFAULT_RING_BYTES: usize = 256 * 1024;

/// Bytes a frame of `payload_len` bytes consumes in a ring, excluding any
/// wrap padding.
pub const fn record_size(payload_len: usize) -> usize {
    align_up(4 + payload_len, RECORD_ALIGN)
}

pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + (align - 1)) & !(align - 1)
}
