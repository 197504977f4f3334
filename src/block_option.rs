use std::fmt::{Debug, Formatter};

/// Smallest frame size the szx encoding can express.
pub const MIN_FRAME_SIZE: usize = 16;
/// Largest frame size the szx encoding can express (szx 6).
pub const MAX_FRAME_SIZE: usize = 1024;

/// The descriptor for a single frame of a block-wise transfer, carried in the outer message as
///  a single integer option.
///
/// The wire value is `(sequence_number << 4) | (has_more << 3) | szx` with
///  `szx = log2(frame_size) - 4`. A frame size that is not a power of two in
///  `[16, 1024]` has no szx representation; such a descriptor encodes to the sentinel `0`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlockOption {
    pub sequence_number: u32,
    pub has_more: bool,
    pub frame_size: usize,
}

impl BlockOption {
    pub fn new(sequence_number: u32, has_more: bool, frame_size: usize) -> BlockOption {
        BlockOption {
            sequence_number,
            has_more,
            frame_size,
        }
    }

    /// The szx exponent for a frame size, or `None` if the size is not representable.
    pub fn szx_for_frame_size(frame_size: usize) -> Option<u32> {
        if !frame_size.is_power_of_two() || !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&frame_size) {
            return None;
        }
        Some(frame_size.trailing_zeros() - 4)
    }

    pub fn frame_size_for_szx(szx: u32) -> usize {
        1usize << (szx + 4)
    }

    pub fn encode(&self) -> u32 {
        match Self::szx_for_frame_size(self.frame_size) {
            Some(szx) => (self.sequence_number << 4) | ((self.has_more as u32) << 3) | szx,
            None => 0,
        }
    }

    /// Decoding always succeeds - every bit pattern maps to *some* descriptor.
    pub fn decode(value: u32) -> BlockOption {
        BlockOption {
            sequence_number: value >> 4,
            has_more: value & 0x8 != 0,
            frame_size: Self::frame_size_for_szx(value & 0x7),
        }
    }
}

impl Debug for BlockOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{}/{}/{}",
            self.sequence_number,
            if self.has_more { "M" } else { "-" },
            self.frame_size,
        )
    }
}
