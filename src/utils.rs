//! Utility helpers: validation, formatting, and logging setup.

use crate::error::{ModbusError, ModbusResult};

/// Data validation utilities.
pub mod validation {
    use super::*;
    use crate::protocol::{SlaveId, MAX_SLAVE_ID};

    /// Validate a unicast slave ID (1-247).
    pub fn validate_slave_id(slave_id: SlaveId) -> ModbusResult<()> {
        if slave_id == 0 || slave_id > MAX_SLAVE_ID {
            return Err(ModbusError::InvalidSlaveId { id: slave_id });
        }
        Ok(())
    }
}

/// Formatting and display utilities.
pub mod format {
    /// Format a byte array as a spaced hex string.
    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format register values as hex words.
    pub fn registers_to_hex(registers: &[u16]) -> String {
        registers
            .iter()
            .map(|r| format!("{:04X}", r))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Logging utilities.
pub mod logging {
    /// Initialize a simple logger for testing.
    pub fn init_test_logger() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(validation::validate_slave_id(1).is_ok());
        assert!(validation::validate_slave_id(247).is_ok());
        assert!(validation::validate_slave_id(0).is_err());
        assert!(validation::validate_slave_id(248).is_err());
    }

    #[test]
    fn test_formatting() {
        let bytes = [0x01, 0x03, 0x10, 0xFF];
        assert_eq!(format::bytes_to_hex(&bytes), "01 03 10 FF");

        let registers = [0x1234, 0x5678];
        assert_eq!(format::registers_to_hex(&registers), "1234 5678");
    }
}
