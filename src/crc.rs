//! CRC-16/Modbus with the swapped on-wire byte order.
//!
//! The checksum uses polynomial 0xA001 (reflected 0x8005), initial value
//! 0xFFFF, no final XOR, processed low-bit-first. On the wire the trailer
//! is transmitted low byte first, high byte second.

use crc::{Crc, CRC_16_MODBUS};

use crate::error::{ModbusError, ModbusResult};
use crate::frame::{FrameBuffer, CHECKSUM_SIZE};

/// CRC calculator for RTU frames.
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Compute the CRC over `data`.
pub fn checksum(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Append the CRC trailer to a frame, low byte first.
pub fn append(buf: &mut FrameBuffer) -> ModbusResult<()> {
    let [lo, hi] = checksum(buf.as_slice()).to_le_bytes();
    buf.push(lo)?;
    buf.push(hi)
}

/// Verify the CRC trailer of a complete frame.
pub fn verify(frame: &[u8]) -> ModbusResult<()> {
    if frame.len() <= CHECKSUM_SIZE {
        return Err(ModbusError::frame("frame too short for a CRC trailer"));
    }
    let split = frame.len() - CHECKSUM_SIZE;
    let computed = checksum(&frame[..split]);
    let received = u16::from_le_bytes([frame[split], frame[split + 1]]);
    if computed != received {
        return Err(ModbusError::crc_mismatch(computed, received));
    }
    Ok(())
}
