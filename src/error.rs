//! # Voltage RTU Error Handling
//!
//! Error types for the RTU protocol engine, covering frame validation,
//! role state machine violations, and Modbus exception replies.
//!
//! ## Dispositions
//!
//! Errors fall into three dispositions on the wire:
//!
//! - **Silent**: garbled frames (CRC mismatch, buffer overflow) are dropped
//!   without any bus traffic, per Modbus convention. The peer is expected to
//!   time out and retry at its own cadence.
//! - **Answered**: a slave that validates CRC but rejects the request emits
//!   an exception reply carrying an [`ExceptionCode`].
//! - **Surfaced**: caller mistakes (query while busy, invalid slave id) and
//!   master-side outcomes (timeout, received exception) are returned from
//!   `query`/`poll`.
//!
//! Retry policy is the caller's responsibility; the engine performs no
//! automatic retransmission.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for engine operations.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Modbus exception codes carried in exception replies.
///
/// Codes 3 and 4 are defined for completeness but are not emitted by this
/// engine; address-range violations map to `IllegalDataAddress` and
/// unsupported functions to `IllegalFunction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
}

impl ExceptionCode {
    /// Convert from the wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ExceptionCode::IllegalFunction),
            0x02 => Some(ExceptionCode::IllegalDataAddress),
            0x03 => Some(ExceptionCode::IllegalDataValue),
            0x04 => Some(ExceptionCode::ServerDeviceFailure),
            _ => None,
        }
    }

    /// Convert to the wire byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Illegal Function",
            ExceptionCode::IllegalDataAddress => "Illegal Data Address",
            ExceptionCode::IllegalDataValue => "Illegal Data Value",
            ExceptionCode::ServerDeviceFailure => "Server Device Failure",
        }
    }

    fn describe_raw(code: u8) -> &'static str {
        Self::from_u8(code).map_or("Unknown Exception", Self::description)
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X} ({})", self.to_u8(), self.description())
    }
}

/// Errors produced by the RTU engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModbusError {
    /// The master's reply timeout expired with no complete frame.
    #[error("no reply within {timeout_ms}ms")]
    NoReply { timeout_ms: u32 },

    /// CRC trailer does not match the frame contents.
    ///
    /// The frame is treated as if it had never arrived: no reply is sent,
    /// no state advances, only the error counter moves.
    #[error("CRC mismatch: computed {computed:04X}, received {received:04X}")]
    CrcMismatch { computed: u16, received: u16 },

    /// The master received an exception reply from a slave.
    #[error("modbus exception: function=0x{function:02X}, code=0x{code:02X} ({})", ExceptionCode::describe_raw(*.code))]
    Exception { function: u8, code: u8 },

    /// Function code outside the supported set {1,2,3,4,5,6,8,15,16}.
    #[error("unsupported function code: 0x{code:02X}")]
    UnsupportedFunction { code: u8 },

    /// Slave address outside 1..=247, or broadcast where it is not allowed.
    #[error("invalid slave id: {id} (must be 1-247)")]
    InvalidSlaveId { id: u8 },

    /// `query` was called while a previous query is still awaiting its reply.
    #[error("master is busy awaiting a reply")]
    Busy,

    /// A frame exceeded the fixed buffer and was aborted.
    #[error("frame exceeds the {capacity}-byte buffer")]
    BufferOverflow { capacity: usize },

    /// Malformed frame: too short, inconsistent lengths, undersized image.
    #[error("frame error: {message}")]
    Frame { message: String },
}

impl ModbusError {
    /// Create a master timeout error.
    pub fn no_reply(timeout_ms: u32) -> Self {
        Self::NoReply { timeout_ms }
    }

    /// Create a CRC mismatch error.
    pub fn crc_mismatch(computed: u16, received: u16) -> Self {
        Self::CrcMismatch { computed, received }
    }

    /// Create an exception error from a received exception reply.
    pub fn exception(function: u8, code: u8) -> Self {
        Self::Exception { function, code }
    }

    /// Create a frame error.
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    /// Check whether the error is dropped silently (no bus traffic).
    ///
    /// Garbled frames never provoke a reply; the master recovers via its
    /// own timeout.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            Self::CrcMismatch { .. } | Self::BufferOverflow { .. } | Self::Frame { .. }
        )
    }

    /// Check whether the error reflects a received exception reply.
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception { .. })
    }

    /// The exception code, when this error carries one.
    pub fn exception_code(&self) -> Option<ExceptionCode> {
        match self {
            Self::Exception { code, .. } => ExceptionCode::from_u8(*code),
            _ => None,
        }
    }
}
