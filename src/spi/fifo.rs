//! Byte buffers to and from the 32 bit FIFO registers
//!
//! The controller shifts each FIFO word out lane 0 first in little endian mode and lane 3 first
//! in big endian mode. Packing follows the same rule, so the order of bytes in a buffer is the
//! order they appear on the wire in both modes, including the 1 to 3 byte tail of a buffer.

use super::{Endianness, Inner, Registers, FIFO_DEPTH};

/// Pack up to 4 bytes into a FIFO word. Unused lanes are zero.
#[inline]
pub fn pack_word(bytes: &[u8], endianness: Endianness) -> u32 {
    debug_assert!(bytes.len() <= 4);
    bytes
        .iter()
        .take(4)
        .enumerate()
        .fold(0u32, |word, (i, &byte)| {
            word | (byte as u32) << lane_shift(i, endianness)
        })
}

/// Unpack the first `out.len()` bytes (up to 4) of a FIFO word.
#[inline]
pub fn unpack_word(word: u32, out: &mut [u8], endianness: Endianness) {
    debug_assert!(out.len() <= 4);
    for (i, byte) in out.iter_mut().take(4).enumerate() {
        *byte = (word >> lane_shift(i, endianness)) as u8;
    }
}

#[inline(always)]
fn lane_shift(i: usize, endianness: Endianness) -> u32 {
    match endianness {
        Endianness::LittleEndian => i as u32 * 8,
        Endianness::BigEndian => (3 - i as u32) * 8,
    }
}

impl<R: Registers> Inner<R> {
    /// Push as much of `bytes` as fits into the transmit FIFO. Returns the number of bytes
    /// queued.
    pub(super) fn fill_tx_fifo(&self, bytes: &[u8], endianness: Endianness) -> usize {
        let free = FIFO_DEPTH.saturating_sub(self.status_tx_level() as usize);
        let count = bytes.len().min(free);

        for word in bytes[..count].chunks(4) {
            self.write_tx_word(pack_word(word, endianness));
        }
        count
    }

    /// Pull the bytes waiting in the receive FIFO into `out`, at most `out.len()`. Returns the
    /// number of bytes stored.
    pub(super) fn drain_rx_fifo(&self, out: &mut [u8], endianness: Endianness) -> usize {
        let level = self.status_rx_level() as usize;
        let count = level.min(out.len());

        for word in out[..count].chunks_mut(4) {
            unpack_word(self.read_rx_word(), word, endianness);
        }
        count
    }
}
