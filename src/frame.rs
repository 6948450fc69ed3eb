//! Fixed-capacity RTU frame buffer and telegram field offsets.
//!
//! A telegram occupies a contiguous byte sequence
//! `[Addr][Func][Data...][CRC-lo][CRC-hi]` of at most [`MAX_FRAME_SIZE`]
//! bytes. The buffer is an inline stack array so the engine allocates
//! nothing on the frame path.

use crate::error::{ModbusError, ModbusResult};

/// Maximum size of the communication buffer in bytes.
pub const MAX_FRAME_SIZE: usize = 64;

/// Size of the CRC trailer.
pub const CHECKSUM_SIZE: usize = 2;

/// Length of an exception reply before the CRC is appended.
pub const EXCEPTION_SIZE: usize = 3;

/// Echo-style replies (FC 5/6/8/15/16) copy the first six request bytes.
pub const ECHO_SIZE: usize = 6;

/// Smallest complete frame a master can consume: an exception reply,
/// `[id][func|0x80][code][crc][crc]`.
pub const MIN_ANSWER_SIZE: usize = 5;

/// Smallest complete request frame, `[id][func][addr:2][qty:2][crc:2]`.
pub const MIN_REQUEST_SIZE: usize = 8;

/// Byte offsets of the RTU telegram header fields.
pub mod offset {
    /// Slave address.
    pub const ID: usize = 0;
    /// Function code.
    pub const FUNC: usize = 1;
    /// Starting address, high byte.
    pub const ADD_HI: usize = 2;
    /// Starting address, low byte.
    pub const ADD_LO: usize = 3;
    /// Quantity (or single-write value), high byte.
    pub const NB_HI: usize = 4;
    /// Quantity (or single-write value), low byte.
    pub const NB_LO: usize = 5;
    /// Byte count for multi-write requests.
    pub const BYTE_CNT: usize = 6;
}

/// Frame buffer backed by an inline stack array.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    data: [u8; MAX_FRAME_SIZE],
    len: usize,
}

impl FrameBuffer {
    /// Create an empty buffer.
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_FRAME_SIZE],
            len: 0,
        }
    }

    /// Create a buffer holding a copy of `data`.
    pub fn from_slice(data: &[u8]) -> ModbusResult<Self> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(ModbusError::BufferOverflow {
                capacity: MAX_FRAME_SIZE,
            });
        }
        let mut buf = Self::new();
        buf.data[..data.len()].copy_from_slice(data);
        buf.len = data.len();
        Ok(buf)
    }

    /// Append a single byte.
    #[inline]
    pub fn push(&mut self, byte: u8) -> ModbusResult<()> {
        if self.len >= MAX_FRAME_SIZE {
            return Err(ModbusError::BufferOverflow {
                capacity: MAX_FRAME_SIZE,
            });
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Append a 16-bit value in big-endian order.
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> ModbusResult<()> {
        self.push((value >> 8) as u8)?;
        self.push(value as u8)
    }

    /// Append a byte slice.
    pub fn extend(&mut self, data: &[u8]) -> ModbusResult<()> {
        if self.len + data.len() > MAX_FRAME_SIZE {
            return Err(ModbusError::BufferOverflow {
                capacity: MAX_FRAME_SIZE,
            });
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    /// Get immutable frame contents.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Get current length.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Discard the contents.
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Full backing storage, independent of the current length.
    #[inline]
    pub(crate) fn raw(&self) -> &[u8; MAX_FRAME_SIZE] {
        &self.data
    }

    /// Mutable backing storage, for byte-at-a-time accumulation.
    #[inline]
    pub(crate) fn raw_mut(&mut self) -> &mut [u8; MAX_FRAME_SIZE] {
        &mut self.data
    }

    /// Set the logical length over already-written storage.
    ///
    /// Used when a reply is rewritten in place over the request bytes.
    #[inline]
    pub(crate) fn set_len(&mut self, len: usize) {
        debug_assert!(len <= MAX_FRAME_SIZE);
        self.len = len;
    }

    /// Slave address byte.
    #[inline]
    pub fn slave_id(&self) -> u8 {
        debug_assert!(self.len > offset::ID);
        self.data[offset::ID]
    }

    /// Function code byte.
    #[inline]
    pub fn function_code(&self) -> u8 {
        debug_assert!(self.len > offset::FUNC);
        self.data[offset::FUNC]
    }

    /// Starting address (or diagnostic sub-function), big-endian.
    #[inline]
    pub fn address(&self) -> u16 {
        self.word_at(offset::ADD_HI)
    }

    /// Quantity of coils/registers (or single-write value), big-endian.
    #[inline]
    pub fn quantity(&self) -> u16 {
        self.word_at(offset::NB_HI)
    }

    /// Byte-count field of a multi-write request.
    #[inline]
    pub fn byte_count(&self) -> u8 {
        debug_assert!(self.len > offset::BYTE_CNT);
        self.data[offset::BYTE_CNT]
    }

    /// Big-endian 16-bit field starting at `hi`.
    #[inline]
    pub fn word_at(&self, hi: usize) -> u16 {
        debug_assert!(self.len > hi + 1);
        u16::from_be_bytes([self.data[hi], self.data[hi + 1]])
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let mut buf = FrameBuffer::new();
        assert_eq!(buf.len(), 0);
        assert!(buf.is_empty());

        buf.push(0x11).unwrap();
        buf.push(0x03).unwrap();
        buf.push_u16(0x006B).unwrap();
        buf.push_u16(0x0003).unwrap();

        assert_eq!(buf.as_slice(), &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]);
        assert_eq!(buf.slave_id(), 0x11);
        assert_eq!(buf.function_code(), 0x03);
        assert_eq!(buf.address(), 0x006B);
        assert_eq!(buf.quantity(), 0x0003);
    }

    #[test]
    fn test_from_slice_roundtrip() {
        let frame = [0x11, 0x10, 0x01, 0x2C, 0x00, 0x02, 0x04];
        let buf = FrameBuffer::from_slice(&frame).unwrap();
        assert_eq!(buf.as_slice(), &frame);
        assert_eq!(buf.address(), 0x012C);
        assert_eq!(buf.byte_count(), 0x04);
    }

    #[test]
    fn test_capacity_enforced() {
        let mut buf = FrameBuffer::new();
        for i in 0..MAX_FRAME_SIZE {
            buf.push(i as u8).unwrap();
        }
        assert!(matches!(
            buf.push(0xAA),
            Err(ModbusError::BufferOverflow { capacity: 64 })
        ));
        assert!(FrameBuffer::from_slice(&[0u8; 65]).is_err());
        assert!(buf.extend(&[1, 2]).is_err());
    }

    #[test]
    fn test_in_place_rewrite() {
        let mut buf =
            FrameBuffer::from_slice(&[0x11, 0x05, 0x00, 0xAC, 0xFF, 0x00, 0x4E, 0x8B]).unwrap();
        buf.set_len(ECHO_SIZE);
        assert_eq!(buf.as_slice(), &[0x11, 0x05, 0x00, 0xAC, 0xFF, 0x00]);
    }
}
