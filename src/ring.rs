//! Slot-based staging buffer for block plaintext.
//!
//! The frame codec keeps exactly two slots of `block_size` bytes each: the
//! block currently being filled or decoded lives in one slot while the
//! previous block stays intact in the other, because linked-block mode
//! needs it as the decompression dictionary. The minimal codec uses the
//! same buffer with a configurable slot count and variable-length advances.

/// A contiguous byte region divided into equal slots, with a cursor that
/// wraps whenever a full slot no longer fits behind it.
#[derive(Debug)]
pub(crate) struct RingBuffer {
    buf: Vec<u8>,
    slot_size: usize,
    offset: usize,
}

impl RingBuffer {
    pub fn new(slot_size: usize, slots: usize) -> Self {
        RingBuffer {
            buf: vec![0u8; slot_size * slots],
            slot_size,
            offset: 0,
        }
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Move the cursor past `used` bytes, wrapping to the start once a full
    /// slot no longer fits. With two slots and full-slot advances this
    /// flips between `0` and `slot_size`.
    pub fn advance(&mut self, used: usize) {
        self.offset += used;
        if self.offset > self.buf.len() - self.slot_size {
            self.offset = 0;
        }
    }

    pub fn range(&self, start: usize, len: usize) -> &[u8] {
        &self.buf[start..start + len]
    }

    pub fn range_mut(&mut self, start: usize, len: usize) -> &mut [u8] {
        &mut self.buf[start..start + len]
    }

}

#[cfg(test)]
mod tests {
    use super::RingBuffer;

    #[test]
    fn two_slot_flip() {
        let mut ring = RingBuffer::new(8, 2);
        assert_eq!(ring.offset(), 0);
        ring.advance(8);
        assert_eq!(ring.offset(), 8);
        ring.advance(8);
        assert_eq!(ring.offset(), 0);
    }

    #[test]
    fn variable_advance_wraps_when_slot_no_longer_fits() {
        // four slots of 4 bytes, advancing by chunk lengths
        let mut ring = RingBuffer::new(4, 4);
        ring.advance(3);
        assert_eq!(ring.offset(), 3);
        ring.advance(4);
        assert_eq!(ring.offset(), 7);
        ring.advance(4);
        assert_eq!(ring.offset(), 11);
        ring.advance(4);
        // 15 > 16 - 4, so the cursor wraps
        assert_eq!(ring.offset(), 0);
    }

    #[test]
    fn single_slot_always_wraps() {
        let mut ring = RingBuffer::new(4, 1);
        ring.advance(1);
        assert_eq!(ring.offset(), 0);
        ring.advance(4);
        assert_eq!(ring.offset(), 0);
    }
}
