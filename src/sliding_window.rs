use crate::safe_converter::SafeCast;

/// A fixed-capacity buffer of optional slots, anchored at a moving offset.
///
/// Slot 0 represents sequence number `offset`, slot `size-1` represents `offset + size - 1`.
///  The offset is monotonically non-decreasing: it moves only through [`SlidingWindow::advance`],
///  which pops slot 0 if (and only if) it is populated. Repeated calls therefore drain exactly
///  the contiguous populated prefix.
pub struct SlidingWindow<T> {
    offset: u32,
    slots: Vec<Option<T>>,
}

impl<T> SlidingWindow<T> {
    pub fn new(size: usize) -> SlidingWindow<T> {
        assert!(size > 0, "sliding window must have at least one slot");

        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, || None);

        SlidingWindow { offset: 0, slots }
    }

    /// Store a value for a sequence number. Sequence numbers outside the current window are
    ///  silently ignored - they are stale duplicates or premature frames, and it is the caller's
    ///  job to decide whether that warrants a response.
    pub fn set(&mut self, sequence_number: u32, value: T) {
        if sequence_number < self.offset {
            return;
        }
        let index = (sequence_number - self.offset).safe_cast();
        if index >= self.slots.len() {
            return;
        }
        self.slots[index] = Some(value);
    }

    /// Pop slot 0 if it is populated: all other slots shift down by one, the new trailing slot
    ///  is empty, and the offset increments. A no-op returning `None` if slot 0 is empty.
    pub fn advance(&mut self) -> Option<T> {
        let value = self.slots[0].take()?;
        self.slots.rotate_left(1);
        self.offset += 1;
        Some(value)
    }

    pub fn get_value(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(|slot| slot.as_ref())
    }

    pub fn get_offset(&self) -> u32 {
        self.offset
    }

    pub fn get_size(&self) -> usize {
        self.slots.len()
    }
}
