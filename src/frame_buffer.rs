use crate::error::BlockwiseError;
use crate::safe_converter::{PrecheckedCast, SafeCast};
use crate::sliding_window::SlidingWindow;
use bytes::{Bytes, BytesMut};
use std::cmp::min;

/// One frame of a transfer: a bounded chunk of the payload, identified by its sequence number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub sequence_number: u32,
    pub has_more: bool,
    pub bytes: Bytes,
}

/// Send-side view of a transfer's payload: splits it into sequential fixed-size frames.
///
/// Frames are produced lazily through [`FragmentQueue::pop_block`], gated by a sliding window,
///  and can be looked up again by index for retransmission - frame bytes are zero-copy slices
///  of the payload.
pub struct FragmentQueue {
    payload: Bytes,
    block_size: usize,
    num_frames: u32,
    window: SlidingWindow<u32>,
    /// the next frame index that has not been placed into the window yet
    cursor: u32,
}

impl FragmentQueue {
    pub fn new(payload: Bytes, block_size: usize, configured_window: usize) -> FragmentQueue {
        // an empty payload still produces one (empty) frame so the transfer round-trips
        let num_frames: u32 = payload.len().div_ceil(block_size).max(1).prechecked_cast();

        let window_size = min(configured_window, num_frames.safe_cast());

        FragmentQueue {
            payload,
            block_size,
            num_frames,
            window: SlidingWindow::new(window_size),
            cursor: 0,
        }
    }

    pub fn num_frames(&self) -> u32 {
        self.num_frames
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// The frame for a given index, or `None` past the end of the payload.
    pub fn frame(&self, index: u32) -> Option<Frame> {
        if index >= self.num_frames {
            return None;
        }

        let start = index.safe_cast() * self.block_size;
        let end = min(start + self.block_size, self.payload.len());

        Some(Frame {
            sequence_number: index,
            has_more: index + 1 < self.num_frames,
            bytes: self.payload.slice(start..end),
        })
    }

    /// Produce the next frame, keeping at most `window_size` frame indices buffered ahead of
    ///  the window offset. Returns `None` once the payload is consumed.
    pub fn pop_block(&mut self, window_size: u32) -> Option<Frame> {
        let limit = min(self.window.get_size().prechecked_cast(), window_size);

        while self.cursor < self.num_frames && self.cursor - self.window.get_offset() < limit {
            self.window.set(self.cursor, self.cursor);
            self.cursor += 1;
        }

        let index = self.window.advance()?;
        self.frame(index)
    }
}

/// Receive-side view of a transfer: accepts frames (possibly out of order within the window
///  bound) and drains the contiguous prefix into an accumulator.
pub struct ReassemblyBuffer {
    window: SlidingWindow<Bytes>,
    assembled: BytesMut,
    /// set once a frame arrives with the 'more' flag cleared
    terminal_index: Option<u32>,
}

impl ReassemblyBuffer {
    pub fn new(window_size: usize) -> ReassemblyBuffer {
        ReassemblyBuffer {
            window: SlidingWindow::new(window_size),
            assembled: BytesMut::new(),
            terminal_index: None,
        }
    }

    /// Accept one frame. Frames below the window were drained before and signal `StaleFrame`,
    ///  frames above the window signal `InvalidFrameIndex`; neither mutates any state. On
    ///  success the contiguous populated prefix is drained into the accumulator.
    pub fn accept(&mut self, sequence_number: u32, has_more: bool, bytes: Bytes) -> Result<(), BlockwiseError> {
        let window_offset = self.window.get_offset();
        let window_end = window_offset.saturating_add(self.window.get_size().prechecked_cast());

        if sequence_number < window_offset {
            return Err(BlockwiseError::StaleFrame { sequence_number, window_offset });
        }
        if sequence_number >= window_end {
            return Err(BlockwiseError::InvalidFrameIndex { sequence_number, window_offset, window_end });
        }

        if !has_more {
            self.terminal_index = Some(sequence_number);
        }
        self.window.set(sequence_number, bytes);

        while let Some(drained) = self.window.advance() {
            self.assembled.extend_from_slice(&drained);
        }
        Ok(())
    }

    /// True exactly when the frame at the terminal index has been drained, i.e. the count of
    ///  drained frames equals `terminal_index + 1`.
    pub fn is_completed(&self) -> bool {
        match self.terminal_index {
            Some(terminal_index) => self.window.get_offset() == terminal_index + 1,
            None => false,
        }
    }

    pub fn window_offset(&self) -> u32 {
        self.window.get_offset()
    }

    pub fn assembled_len(&self) -> usize {
        self.assembled.len()
    }

    /// Hand out the accumulated payload, leaving the accumulator empty.
    pub fn take_payload(&mut self) -> Bytes {
        std::mem::take(&mut self.assembled).freeze()
    }
}
