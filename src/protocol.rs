//! Modbus protocol definitions: function codes, addressing constants.
//!
//! The engine implements the fixed function set {1, 2, 3, 4, 5, 6, 8, 15,
//! 16}. Anything else is answered with exception code 1 on the slave side
//! and surfaced as [`ModbusError::UnsupportedFunction`] on the master side.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ModbusError, ModbusResult};

/// Modbus slave/unit identifier (1-247; 0 is broadcast).
pub type SlaveId = u8;

/// Broadcast address: every slave acts, none replies.
pub const BROADCAST: SlaveId = 0;

/// Highest assignable unicast slave address; 248..=255 are reserved.
pub const MAX_SLAVE_ID: SlaveId = 247;

/// Diagnostic (function 8) sub-function: restart communications.
pub const DIAG_RESTART_COMMUNICATIONS: u16 = 0x0001;

/// Modbus function codes supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Diagnostic (0x08)
    Diagnostic = 0x08,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl ModbusFunction {
    /// Convert from u8 to ModbusFunction.
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(ModbusFunction::ReadCoils),
            0x02 => Ok(ModbusFunction::ReadDiscreteInputs),
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunction::ReadInputRegisters),
            0x05 => Ok(ModbusFunction::WriteSingleCoil),
            0x06 => Ok(ModbusFunction::WriteSingleRegister),
            0x08 => Ok(ModbusFunction::Diagnostic),
            0x0F => Ok(ModbusFunction::WriteMultipleCoils),
            0x10 => Ok(ModbusFunction::WriteMultipleRegisters),
            _ => Err(ModbusError::UnsupportedFunction { code: value }),
        }
    }

    /// Convert to u8.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a read function.
    pub fn is_read_function(self) -> bool {
        matches!(
            self,
            ModbusFunction::ReadCoils
                | ModbusFunction::ReadDiscreteInputs
                | ModbusFunction::ReadHoldingRegisters
                | ModbusFunction::ReadInputRegisters
        )
    }

    /// Check if this is a write function.
    pub fn is_write_function(self) -> bool {
        matches!(
            self,
            ModbusFunction::WriteSingleCoil
                | ModbusFunction::WriteSingleRegister
                | ModbusFunction::WriteMultipleCoils
                | ModbusFunction::WriteMultipleRegisters
        )
    }

    /// Frames for these functions carry a byte-count field and a variable
    /// payload after the fixed header.
    pub(crate) fn has_trailing_payload(raw: u8) -> bool {
        raw == ModbusFunction::WriteMultipleCoils as u8
            || raw == ModbusFunction::WriteMultipleRegisters as u8
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::Diagnostic => "Diagnostic",
            ModbusFunction::WriteMultipleCoils => "Write Multiple Coils",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_conversion() {
        assert_eq!(
            ModbusFunction::from_u8(0x03).unwrap(),
            ModbusFunction::ReadHoldingRegisters
        );
        assert_eq!(ModbusFunction::ReadHoldingRegisters.to_u8(), 0x03);
        assert_eq!(
            ModbusFunction::from_u8(0x08).unwrap(),
            ModbusFunction::Diagnostic
        );

        assert!(matches!(
            ModbusFunction::from_u8(0x07),
            Err(ModbusError::UnsupportedFunction { code: 0x07 })
        ));
        assert!(ModbusFunction::from_u8(0xFF).is_err());
    }

    #[test]
    fn test_function_classification() {
        assert!(ModbusFunction::ReadCoils.is_read_function());
        assert!(!ModbusFunction::ReadCoils.is_write_function());
        assert!(ModbusFunction::WriteMultipleRegisters.is_write_function());
        assert!(!ModbusFunction::Diagnostic.is_read_function());
        assert!(!ModbusFunction::Diagnostic.is_write_function());
    }

    #[test]
    fn test_trailing_payload() {
        assert!(ModbusFunction::has_trailing_payload(0x0F));
        assert!(ModbusFunction::has_trailing_payload(0x10));
        assert!(!ModbusFunction::has_trailing_payload(0x03));
    }
}
