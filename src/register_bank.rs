//! Borrowed register banks for slave-side data exchange.
//!
//! The application owns the four Modbus data tables and lends them to the
//! slave engine for the duration of a single `poll`. Address-range
//! validation reduces to slice-bounds checks against the lent lengths.

use crate::protocol::ModbusFunction;

/// Borrowed view over the application's Modbus data tables.
///
/// Coils and holding registers are writable through functions 5/6/15/16;
/// discrete inputs and input registers are read-only by protocol.
#[derive(Debug)]
pub struct RegisterBanks<'a> {
    /// Discrete outputs (coils), function codes 1, 5, 15.
    pub coils: &'a mut [bool],
    /// Discrete inputs, function code 2.
    pub discrete_inputs: &'a [bool],
    /// Input registers, function code 4.
    pub input_registers: &'a [u16],
    /// Holding registers, function codes 3, 6, 16.
    pub holding_registers: &'a mut [u16],
}

impl<'a> RegisterBanks<'a> {
    pub fn new(
        coils: &'a mut [bool],
        discrete_inputs: &'a [bool],
        input_registers: &'a [u16],
        holding_registers: &'a mut [u16],
    ) -> Self {
        Self {
            coils,
            discrete_inputs,
            input_registers,
            holding_registers,
        }
    }

    /// Length of the bank a function code operates on.
    pub(crate) fn bank_len(&self, function: ModbusFunction) -> usize {
        match function {
            ModbusFunction::ReadDiscreteInputs => self.discrete_inputs.len(),
            ModbusFunction::ReadInputRegisters => self.input_registers.len(),
            ModbusFunction::ReadCoils
            | ModbusFunction::WriteSingleCoil
            | ModbusFunction::WriteMultipleCoils => self.coils.len(),
            ModbusFunction::ReadHoldingRegisters
            | ModbusFunction::WriteSingleRegister
            | ModbusFunction::WriteMultipleRegisters => self.holding_registers.len(),
            // diagnostic requests bypass the address check entirely
            ModbusFunction::Diagnostic => 0,
        }
    }
}
