//! Command / address / dummy framing
//!
//! A [`Header`] is clocked out ahead of the payload of the next transfer. Its bytes are
//! discarded on the receive side through the `rx_invalid_bit` field, so the caller's receive
//! buffer only ever sees payload.

use super::{Endianness, Error, FIFO_DEPTH};

/// Largest command length in bytes
pub const MAX_CMD_LEN: u8 = 2;
/// Largest address length in bytes
pub const MAX_ADDR_LEN: u8 = 4;
/// Largest number of bits the receiver can be told to discard
pub const MAX_INVALID_BITS: u32 = 0xFF;

/// Command, address and dummy cycles sent before the payload of the next transfer
///
/// The header is consumed by exactly one transfer.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Header {
    pub cmd: u16,
    /// Command length in bytes, 0 to 2
    pub cmd_len: u8,
    pub addr: u32,
    /// Address length in bytes, 0 to 4
    pub addr_len: u8,
    /// Dummy clock cycles after the address
    pub dummy_bits: u8,
}

impl Header {
    pub const fn new() -> Self {
        Header {
            cmd: 0,
            cmd_len: 0,
            addr: 0,
            addr_len: 0,
            dummy_bits: 0,
        }
    }

    #[must_use]
    pub const fn command(mut self, cmd: u16, len: u8) -> Self {
        self.cmd = cmd;
        self.cmd_len = len;
        self
    }

    #[must_use]
    pub const fn address(mut self, addr: u32, len: u8) -> Self {
        self.addr = addr;
        self.addr_len = len;
        self
    }

    #[must_use]
    pub const fn dummy_bits(mut self, bits: u8) -> Self {
        self.dummy_bits = bits;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.cmd_len == 0 && self.addr_len == 0 && self.dummy_bits == 0
    }

    /// Bits the receiver discards: the whole command and address plus the dummy cycles
    pub fn invalid_bits(&self) -> u32 {
        self.cmd_len as u32 * 8 + self.addr_len as u32 * 8 + self.dummy_bits as u32
    }

    /// Check the lengths against the controller's limits.
    pub fn validate(&self) -> Result<(), Error> {
        if self.cmd_len > MAX_CMD_LEN
            || self.addr_len > MAX_ADDR_LEN
            || self.invalid_bits() > MAX_INVALID_BITS
        {
            return Err(Error::InvalidParam);
        }
        Ok(())
    }

    /// Serialize into the byte image pushed into the transmit FIFO.
    pub fn build(&self, endianness: Endianness) -> Result<HeaderFrame, Error> {
        self.validate()?;

        let cmd_len = self.cmd_len as usize;
        let addr_len = self.addr_len as usize;
        let len = cmd_len + addr_len + (self.dummy_bits as usize).div_ceil(8);

        let mut bytes = [0xFF; FIFO_DEPTH];
        bytes[..cmd_len].copy_from_slice(&self.cmd.to_le_bytes()[..cmd_len]);
        bytes[cmd_len..cmd_len + addr_len]
            .copy_from_slice(&self.addr.to_le_bytes()[..addr_len]);

        let padded = len.div_ceil(4) * 4;
        if endianness == Endianness::BigEndian {
            if len < 4 {
                bytes[..len].reverse();
            } else {
                bytes[..padded].chunks_exact_mut(4).for_each(|group| group.reverse());
            }
        }

        Ok(HeaderFrame {
            bytes,
            len,
            padded,
            invalid_bits: self.invalid_bits() as u8,
        })
    }
}

/// A serialized header, ready for the transmit FIFO
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HeaderFrame {
    bytes: [u8; FIFO_DEPTH],
    len: usize,
    padded: usize,
    invalid_bits: u8,
}

impl HeaderFrame {
    /// Header bytes without padding
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Header bytes padded with `0xFF` to a multiple of 4
    pub fn padded(&self) -> &[u8] {
        &self.bytes[..self.padded]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Value for the `rx_invalid_bit` field
    pub fn invalid_bits(&self) -> u8 {
        self.invalid_bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flash_read_header() {
        let header = Header::new().command(0x03, 1).address(0x10, 3).dummy_bits(8);
        let frame = header.build(Endianness::LittleEndian).unwrap();

        assert_eq!(frame.invalid_bits(), 40);
        assert_eq!(frame.bytes(), &[0x03, 0x10, 0x00, 0x00, 0xFF]);
        assert_eq!(frame.padded(), &[0x03, 0x10, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_partial_dummy_byte() {
        let frame = Header::new()
            .command(0xEB, 1)
            .dummy_bits(4)
            .build(Endianness::LittleEndian)
            .unwrap();
        assert_eq!(frame.invalid_bits(), 12);
        assert_eq!(frame.bytes(), &[0xEB, 0xFF]);
        assert_eq!(frame.padded().len(), 4);
    }

    #[test]
    fn test_big_endian_short_header() {
        let frame = Header::new()
            .command(0x9F05, 2)
            .address(0xAB, 1)
            .build(Endianness::BigEndian)
            .unwrap();
        assert_eq!(frame.bytes(), &[0xAB, 0x9F, 0x05]);
        assert_eq!(frame.padded(), &[0xAB, 0x9F, 0x05, 0xFF]);
    }

    #[test]
    fn test_big_endian_groups() {
        let frame = Header::new()
            .command(0x0B, 1)
            .address(0x0012_3456, 3)
            .dummy_bits(8)
            .build(Endianness::BigEndian)
            .unwrap();
        assert_eq!(
            frame.padded(),
            &[0x12, 0x34, 0x56, 0x0B, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_limits() {
        assert_eq!(
            Header::new().command(0, 3).validate(),
            Err(Error::InvalidParam)
        );
        assert_eq!(
            Header::new().address(0, 5).validate(),
            Err(Error::InvalidParam)
        );
        // 2 + 4 bytes is 48 bits, 208 dummy bits pushes past the field
        assert_eq!(
            Header::new()
                .command(0, 2)
                .address(0, 4)
                .dummy_bits(208)
                .validate(),
            Err(Error::InvalidParam)
        );
        assert_eq!(
            Header::new()
                .command(0, 2)
                .address(0, 4)
                .dummy_bits(207)
                .build(Endianness::LittleEndian)
                .map(|frame| frame.padded().len()),
            Ok(32)
        );
        assert!(Header::new().is_empty());
    }
}
