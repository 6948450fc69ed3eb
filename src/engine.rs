//! Shared engine core: configuration, counters, and the transmit path.
//!
//! Both roles embed an [`EngineCore`] that owns the transport, the clock,
//! the single frame buffer, and the diagnostic counters. The transmit path
//! implements the RS-485 turnaround sequence: assert the direction line,
//! write, wait for the shift register to empty, spin the configured
//! overtime, release the line.

use log::{debug, trace};

use crate::crc;
use crate::error::{ModbusError, ModbusResult};
use crate::frame::FrameBuffer;
use crate::framer::GapFramer;
use crate::transport::{Clock, Direction, Transport};
use crate::utils::format::bytes_to_hex;
use crate::{DEFAULT_T35_MS, DEFAULT_TIMEOUT_MS, DEFAULT_TXEN_OVERTIME};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct RtuConfig {
    /// Master reply timeout and communication watchdog period, in ms.
    pub timeout_ms: u32,
    /// Inter-frame silence threshold approximating 3.5 character times.
    pub t35_ms: u32,
    /// 0 or 1: no direction control (USB/RS-232 mode); > 1: drive the
    /// RS-485 transceiver through [`Transport::set_direction`].
    pub txen_pin: u8,
    /// Tight-loop iterations after TX-empty before releasing the driver.
    pub txen_overtime: u32,
}

impl Default for RtuConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            t35_ms: DEFAULT_T35_MS,
            txen_pin: 0,
            txen_overtime: DEFAULT_TXEN_OVERTIME,
        }
    }
}

/// Frame counters for communication diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Frames captured from the wire (including malformed ones).
    pub frames_in: u64,
    /// Frames transmitted.
    pub frames_out: u64,
    /// Garbled frames, timeouts, and rejected function codes.
    pub errors: u64,
}

/// State shared by the master and slave engines.
pub(crate) struct EngineCore<T, C> {
    pub transport: T,
    pub clock: C,
    pub config: RtuConfig,
    pub buf: FrameBuffer,
    pub gap: GapFramer,
    pub stats: EngineStats,
    pub last_error: Option<ModbusError>,
    /// Timestamp of the last send completion or last valid request.
    watchdog_ms: u32,
}

impl<T: Transport, C: Clock> EngineCore<T, C> {
    pub fn new(transport: T, clock: C, config: RtuConfig) -> Self {
        let watchdog_ms = clock.now_ms();
        Self {
            transport,
            clock,
            config,
            buf: FrameBuffer::new(),
            gap: GapFramer::default(),
            stats: EngineStats::default(),
            last_error: None,
            watchdog_ms,
        }
    }

    /// Drain stale RX bytes and reset counters, as on engine start-up.
    pub fn start(&mut self) {
        while self.transport.read().is_some() {}
        self.buf.clear();
        self.gap.reset();
        self.stats = EngineStats::default();
        self.last_error = None;
        self.watchdog_ms = self.clock.now_ms();
    }

    /// Append the CRC trailer and push the frame buffer onto the wire.
    ///
    /// Returns the number of bytes transmitted, CRC included.
    pub fn send_frame(&mut self) -> ModbusResult<usize> {
        crc::append(&mut self.buf)?;
        let len = self.buf.len();
        debug!("TX {:>2} bytes: {}", len, bytes_to_hex(self.buf.as_slice()));

        let txen = self.config.txen_pin > 1;
        if txen {
            self.transport.set_direction(Direction::Transmit);
        }
        self.transport.write_all(self.buf.as_slice());
        self.transport.flush();
        if txen {
            // keep the driver asserted until the last stop bit clears the wire
            let mut countdown = self.config.txen_overtime;
            while countdown > 0 {
                std::hint::spin_loop();
                countdown -= 1;
            }
            self.transport.set_direction(Direction::Receive);
        }
        // discard anything the transceiver looped back during transmission
        while self.transport.read().is_some() {}

        self.buf.clear();
        self.watchdog_ms = self.clock.now_ms();
        self.stats.frames_out += 1;
        Ok(len)
    }

    /// Drain a gap-delimited frame into the buffer.
    pub fn capture_frame(&mut self) -> ModbusResult<usize> {
        self.stats.frames_in += 1;
        let (transport, buf) = (&mut self.transport, &mut self.buf);
        match self.gap.drain(transport, buf) {
            Ok(len) => {
                trace!("RX {:>2} bytes: {}", len, bytes_to_hex(self.buf.as_slice()));
                Ok(len)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Record a communication error: bump the counter, remember the cause.
    pub fn fail(&mut self, error: ModbusError) -> ModbusError {
        self.stats.errors += 1;
        self.last_error = Some(error.clone());
        error
    }

    /// Remember a cause without touching the error counter.
    pub fn set_last_error(&mut self, error: ModbusError) -> ModbusError {
        self.last_error = Some(error.clone());
        error
    }

    /// Whether the communication watchdog has fired.
    pub fn watchdog_expired(&self) -> bool {
        self.clock.now_ms().wrapping_sub(self.watchdog_ms) > self.config.timeout_ms
    }

    /// Re-arm the communication watchdog.
    pub fn touch_watchdog(&mut self) {
        self.watchdog_ms = self.clock.now_ms();
    }
}
