//! # Voltage RTU - Serial Modbus RTU Protocol Engine
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **License:** MIT
//!
//! A serial Modbus RTU master/slave protocol engine in pure Rust, designed
//! for fieldbus devices on RS-485/RS-232 multi-drop lines: frame codec with
//! CRC-16/Modbus, T3.5 inter-character-gap framing, and the role state
//! machines for both ends of the wire.
//!
//! ## Features
//!
//! - **Driver-agnostic**: byte-level [`Transport`] and [`Clock`] traits;
//!   bring your own UART
//! - **Static buffers**: a single 64-byte inline frame buffer, no heap on
//!   the frame path
//! - **Both roles**: master query/response and slave request/response as
//!   distinct types
//! - **Two framer modes**: polled main-loop operation, or byte-per-interrupt
//!   accumulation on the slave
//! - **RS-485 aware**: direction-line sequencing with configurable
//!   turnaround overtime
//! - **Built-in diagnostics**: frame counters, last error, communication
//!   watchdog
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Master | Slave |
//! |------|----------|--------|-------|
//! | 0x01 | Read Coils | ✅ | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ | ✅ |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x05 | Write Single Coil | ✅ | ✅ |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//! | 0x08 | Diagnostic (restart sub-function) | ✅ | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//!
//! ## Master Example
//!
//! ```rust,no_run
//! use voltage_rtu::{ModbusFunction, ModbusQuery, ModbusRtuMaster, MasterEvent, SystemClock};
//! # use voltage_rtu::Transport;
//! # struct Uart;
//! # impl Transport for Uart {
//! #     fn available(&self) -> usize { 0 }
//! #     fn read(&mut self) -> Option<u8> { None }
//! #     fn write_all(&mut self, _bytes: &[u8]) {}
//! #     fn flush(&mut self) {}
//! # }
//! # fn uart() -> Uart { Uart }
//!
//! let mut master = ModbusRtuMaster::new(uart(), SystemClock::new());
//! master.start();
//!
//! // read 3 holding registers from slave 0x11, starting at 0x6B
//! let mut image = [0u16; 3];
//! master.query(
//!     &ModbusQuery {
//!         slave_id: 0x11,
//!         function: ModbusFunction::ReadHoldingRegisters,
//!         address: 0x006B,
//!         quantity: 3,
//!     },
//!     &mut image,
//! ).unwrap();
//!
//! loop {
//!     match master.poll(&mut image) {
//!         Ok(MasterEvent::Waiting) => continue,
//!         Ok(MasterEvent::Reply(_)) => {
//!             println!("registers: {:04X?}", image);
//!             break;
//!         }
//!         Err(e) => {
//!             eprintln!("query failed: {}", e);
//!             break;
//!         }
//!     }
//! }
//! ```
//!
//! ## Slave Example
//!
//! ```rust,no_run
//! use voltage_rtu::{ModbusRtuSlave, RegisterBanks, SystemClock};
//! # use voltage_rtu::Transport;
//! # struct Uart;
//! # impl Transport for Uart {
//! #     fn available(&self) -> usize { 0 }
//! #     fn read(&mut self) -> Option<u8> { None }
//! #     fn write_all(&mut self, _bytes: &[u8]) {}
//! #     fn flush(&mut self) {}
//! # }
//! # fn uart() -> Uart { Uart }
//!
//! let mut coils = [false; 128];
//! let discrete_inputs = [false; 128];
//! let input_registers = [0u16; 64];
//! let mut holding_registers = [0u16; 64];
//!
//! let mut slave = ModbusRtuSlave::new(0x11, uart(), SystemClock::new()).unwrap();
//! slave.start();
//!
//! loop {
//!     let mut banks = RegisterBanks::new(
//!         &mut coils,
//!         &discrete_inputs,
//!         &input_registers,
//!         &mut holding_registers,
//!     );
//!     if let Err(e) = slave.poll(&mut banks) {
//!         log::warn!("dropped request: {}", e);
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐        ┌──────────────────┐
//! │    Application   │        │    Application   │
//! │   (data image)   │        │ (register banks) │
//! └──────────────────┘        └──────────────────┘
//!          │                           │
//! ┌──────────────────┐        ┌──────────────────┐
//! │  ModbusRtuMaster │        │  ModbusRtuSlave  │
//! └──────────────────┘        └──────────────────┘
//!          │                           │
//! ┌──────────────────┐        ┌──────────────────┐
//! │ Framer + Codec   │        │ Framer + Codec   │
//! │  (T3.5, CRC-16)  │        │  (T3.5, CRC-16)  │
//! └──────────────────┘        └──────────────────┘
//!          │                           │
//!          └────────── RS-485 ─────────┘
//! ```

/// Core error types and result handling
pub mod error;

/// Modbus protocol definitions: function codes and addressing
pub mod protocol;

/// Fixed-capacity frame buffer and telegram field offsets
pub mod frame;

/// CRC-16/Modbus with the swapped on-wire byte order
pub mod crc;

/// Transport and clock seams toward the serial driver
pub mod transport;

/// Inter-character-gap frame delimitation
mod framer;

/// Borrowed register banks for slave-side data exchange
pub mod register_bank;

/// Shared engine core: configuration, counters, transmit path
pub mod engine;

/// Modbus RTU master engine
pub mod master;

/// Modbus RTU slave engine
pub mod slave;

/// Utility functions: validation, formatting, logging setup
pub mod utils;

// Re-export main types for convenience
pub use engine::{EngineStats, RtuConfig};
pub use error::{ExceptionCode, ModbusError, ModbusResult};
pub use frame::{FrameBuffer, MAX_FRAME_SIZE};
pub use master::{MasterEvent, MasterState, ModbusQuery, ModbusRtuMaster};
pub use protocol::{ModbusFunction, SlaveId, BROADCAST, MAX_SLAVE_ID};
pub use register_bank::RegisterBanks;
pub use slave::{ModbusRtuSlave, RestartHook, SlaveEvent};
pub use transport::{Clock, Direction, SystemClock, Transport};

/// Default master reply timeout / communication watchdog, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u32 = 1000;

/// Default inter-frame silence threshold approximating T3.5, in
/// milliseconds.
pub const DEFAULT_T35_MS: u32 = 5;

/// Default RS-485 driver release delay, in tight-loop iterations.
pub const DEFAULT_TXEN_OVERTIME: u32 = 500;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information.
pub fn info() -> String {
    format!(
        "Voltage RTU v{} - Serial Modbus RTU protocol engine by Evan Liu",
        VERSION
    )
}
