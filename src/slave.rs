//! Modbus RTU slave (server) engine.
//!
//! Purely reactive: each `poll` (or `poll_irq`) either finds nothing to
//! do, drops a frame addressed elsewhere, answers an invalid request with
//! an exception reply, or executes the request against the borrowed
//! register banks and echoes the appropriate reply.
//!
//! Broadcast requests (address 0) execute their writes but are never
//! answered, so the bus stays free for the master's next frame.

use log::{debug, trace, warn};

use crate::crc;
use crate::engine::{EngineCore, EngineStats, RtuConfig};
use crate::error::{ExceptionCode, ModbusError, ModbusResult};
use crate::frame::{offset, ECHO_SIZE, MIN_REQUEST_SIZE};
use crate::framer::{ByteFramer, FramerEvent};
use crate::protocol::{ModbusFunction, SlaveId, BROADCAST, DIAG_RESTART_COMMUNICATIONS};
use crate::register_bank::RegisterBanks;
use crate::transport::{Clock, Transport};
use crate::utils::validation::validate_slave_id;

/// Outcome of a slave poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveEvent {
    /// No complete frame on the wire.
    Idle,
    /// A frame addressed to another node (or too short to be a request)
    /// was discarded.
    Ignored,
    /// A request was executed and answered; carries the reply length
    /// including the CRC trailer.
    Replied(usize),
    /// A broadcast write was executed; no reply is ever sent.
    Broadcast,
}

/// Restart hook invoked by Diagnostic sub-function 1.
///
/// On embedded targets this typically resets the device and never
/// returns; in hosted environments it may re-initialize the application
/// and return, after which the request is acknowledged normally.
pub type RestartHook = fn();

/// Modbus RTU slave engine.
pub struct ModbusRtuSlave<T, C> {
    core: EngineCore<T, C>,
    id: SlaveId,
    byte_framer: ByteFramer,
    restart_hook: Option<RestartHook>,
}

impl<T: Transport, C: Clock> ModbusRtuSlave<T, C> {
    /// Create a slave with default configuration.
    ///
    /// The id must be a unicast address (1..=247).
    pub fn new(id: SlaveId, transport: T, clock: C) -> ModbusResult<Self> {
        Self::with_config(id, transport, clock, RtuConfig::default())
    }

    /// Create a slave with custom configuration.
    pub fn with_config(
        id: SlaveId,
        transport: T,
        clock: C,
        config: RtuConfig,
    ) -> ModbusResult<Self> {
        validate_slave_id(id)?;
        Ok(Self {
            core: EngineCore::new(transport, clock, config),
            id,
            byte_framer: ByteFramer::default(),
            restart_hook: None,
        })
    }

    /// Drain pending RX bytes and reset counters.
    pub fn start(&mut self) {
        self.core.start();
        self.byte_framer.reset();
    }

    /// Current slave address.
    pub fn id(&self) -> SlaveId {
        self.id
    }

    /// Assign a new slave address (1..=247).
    pub fn set_id(&mut self, id: SlaveId) -> ModbusResult<()> {
        validate_slave_id(id)?;
        self.id = id;
        Ok(())
    }

    /// Install the Diagnostic restart hook.
    pub fn set_restart_hook(&mut self, hook: RestartHook) {
        self.restart_hook = Some(hook);
    }

    /// Last communication error, cleared by a successfully served request.
    pub fn last_error(&self) -> Option<&ModbusError> {
        self.core.last_error.as_ref()
    }

    /// Frame counters.
    pub fn stats(&self) -> EngineStats {
        self.core.stats
    }

    /// Whether the communication watchdog fired: no valid request has been
    /// served within the timeout. Useful to fail outputs safe.
    pub fn timeout_expired(&self) -> bool {
        self.core.watchdog_expired()
    }

    /// Set the communication watchdog period in milliseconds.
    pub fn set_timeout(&mut self, timeout_ms: u32) {
        self.core.config.timeout_ms = timeout_ms;
    }

    /// Get the communication watchdog period in milliseconds.
    pub fn timeout(&self) -> u32 {
        self.core.config.timeout_ms
    }

    /// Set the RS-485 driver release delay (tight-loop iterations).
    pub fn set_txen_overtime(&mut self, overtime: u32) {
        self.core.config.txen_overtime = overtime;
    }

    pub fn transport(&self) -> &T {
        &self.core.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.core.transport
    }

    /// Finish communication and release the serial transport.
    pub fn release(self) -> T {
        self.core.transport
    }

    /// Check for an incoming request in polled mode.
    ///
    /// Non-blocking; call cyclically from the main loop, avoiding any
    /// delays between calls. The banks are borrowed only for this call.
    ///
    /// Do not mix `poll` and [`poll_irq`] on the same engine instance.
    pub fn poll(&mut self, banks: &mut RegisterBanks<'_>) -> ModbusResult<SlaveEvent> {
        let t35_ms = self.core.config.t35_ms;
        let (gap, transport, clock) = (&mut self.core.gap, &self.core.transport, &self.core.clock);
        if gap.poll(transport, clock, t35_ms) == FramerEvent::Pending {
            return Ok(SlaveEvent::Idle);
        }

        let len = self.core.capture_frame()?;
        if len < MIN_REQUEST_SIZE {
            // a fragment or another slave's short reply: not ours to judge
            trace!("ignoring {}-byte fragment", len);
            return Ok(SlaveEvent::Ignored);
        }
        let dst = self.core.buf.slave_id();
        if dst != self.id && dst != BROADCAST {
            trace!("ignoring frame addressed to {}", dst);
            return Ok(SlaveEvent::Ignored);
        }

        self.dispatch_request(banks)
    }

    /// Consume one received byte in interrupt-driven mode.
    ///
    /// Call once per byte from the UART RX interrupt. Frames addressed to
    /// other nodes are rejected a byte at a time without buffering.
    ///
    /// Do not mix [`poll`] and `poll_irq` on the same engine instance.
    pub fn poll_irq(&mut self, banks: &mut RegisterBanks<'_>) -> ModbusResult<SlaveEvent> {
        let byte = match self.core.transport.read() {
            Some(byte) => byte,
            None => return Ok(SlaveEvent::Idle),
        };
        let now_ms = self.core.clock.now_ms();
        let t35_ms = self.core.config.t35_ms;

        match self
            .byte_framer
            .accept(byte, now_ms, self.id, t35_ms, &mut self.core.buf)
        {
            Ok(FramerEvent::Pending) => Ok(SlaveEvent::Idle),
            Ok(FramerEvent::Complete) => {
                self.core.stats.frames_in += 1;
                self.dispatch_request(banks)
            }
            Err(e) => Err(self.core.fail(e)),
        }
    }

    /// Validate the captured request and run the matching handler.
    fn dispatch_request(&mut self, banks: &mut RegisterBanks<'_>) -> ModbusResult<SlaveEvent> {
        let broadcast = self.core.buf.slave_id() == BROADCAST;

        if let Err(e) = crc::verify(self.core.buf.as_slice()) {
            // garbled on the wire: stay silent, let the master time out
            warn!("{}", e);
            return Err(self.core.fail(e));
        }

        let raw_function = self.core.buf.function_code();
        let function = match ModbusFunction::from_u8(raw_function) {
            Ok(function) => function,
            Err(e) => {
                debug!("rejecting unsupported function 0x{:02X}", raw_function);
                if !broadcast {
                    self.send_exception(ExceptionCode::IllegalFunction)?;
                }
                return Err(self.core.fail(e));
            }
        };

        if let Err(code) = validate_range(&self.core.buf, banks, function) {
            debug!(
                "address range rejected: {} start={} quantity={}",
                function,
                self.core.buf.address(),
                self.core.buf.quantity()
            );
            if !broadcast {
                self.send_exception(code)?;
            }
            let e = ModbusError::exception(raw_function, code.to_u8());
            return Err(self.core.set_last_error(e));
        }

        self.core.touch_watchdog();
        self.core.last_error = None;

        let result = match function {
            ModbusFunction::ReadCoils => Self::read_bits(&mut self.core, banks.coils),
            ModbusFunction::ReadDiscreteInputs => {
                Self::read_bits(&mut self.core, banks.discrete_inputs)
            }
            ModbusFunction::ReadHoldingRegisters => {
                Self::read_words(&mut self.core, banks.holding_registers)
            }
            ModbusFunction::ReadInputRegisters => {
                Self::read_words(&mut self.core, banks.input_registers)
            }
            ModbusFunction::WriteSingleCoil => Self::write_single_coil(&mut self.core, banks.coils),
            ModbusFunction::WriteSingleRegister => {
                Self::write_single_register(&mut self.core, banks.holding_registers)
            }
            ModbusFunction::Diagnostic => self.diagnostic(),
            ModbusFunction::WriteMultipleCoils => {
                Self::write_multiple_coils(&mut self.core, banks.coils)
            }
            ModbusFunction::WriteMultipleRegisters => {
                Self::write_multiple_registers(&mut self.core, banks.holding_registers)
            }
        };
        if let Err(e) = result {
            // an oversized reply aborts the frame instead of overrunning
            warn!("aborting reply to {}: {}", function, e);
            return Err(self.core.fail(e));
        }

        if broadcast {
            trace!("broadcast {} executed, no reply", function);
            self.core.buf.clear();
            return Ok(SlaveEvent::Broadcast);
        }
        let sent = self.core.send_frame()?;
        Ok(SlaveEvent::Replied(sent))
    }

    /// Rewrite the frame buffer as an exception reply and send it.
    fn send_exception(&mut self, code: ExceptionCode) -> ModbusResult<()> {
        let function = self.core.buf.function_code();
        let buf = &mut self.core.buf;
        buf.clear();
        buf.push(self.id)?;
        buf.push(function | 0x80)?;
        buf.push(code.to_u8())?;
        self.core.send_frame()?;
        Ok(())
    }

    /// Functions 1 and 2: read a bit window into a packed reply.
    fn read_bits(core: &mut EngineCore<T, C>, bank: &[bool]) -> ModbusResult<()> {
        let buf = &mut core.buf;
        let start = buf.address() as usize;
        let count = buf.quantity() as usize;

        buf.set_len(2);
        buf.push(count.div_ceil(8) as u8)?;
        let mut current = 0u8;
        for (i, &bit) in bank[start..start + count].iter().enumerate() {
            if bit {
                current |= 1 << (i % 8);
            }
            if i % 8 == 7 {
                buf.push(current)?;
                current = 0;
            }
        }
        if count % 8 != 0 {
            buf.push(current)?;
        }
        Ok(())
    }

    /// Functions 3 and 4: read a word window into a big-endian reply.
    fn read_words(core: &mut EngineCore<T, C>, bank: &[u16]) -> ModbusResult<()> {
        let buf = &mut core.buf;
        let start = buf.address() as usize;
        let count = buf.quantity() as usize;

        buf.set_len(2);
        buf.push((count * 2) as u8)?;
        for &word in &bank[start..start + count] {
            buf.push_u16(word)?;
        }
        Ok(())
    }

    /// Function 5: write a single coil, echo the request header.
    fn write_single_coil(core: &mut EngineCore<T, C>, bank: &mut [bool]) -> ModbusResult<()> {
        let buf = &mut core.buf;
        let address = buf.address() as usize;
        // only 0xFF00 switches the coil on; anything else clears it
        bank[address] = buf.as_slice()[offset::NB_HI] == 0xFF;
        buf.set_len(ECHO_SIZE);
        Ok(())
    }

    /// Function 6: write a single register, echo the request header.
    fn write_single_register(core: &mut EngineCore<T, C>, bank: &mut [u16]) -> ModbusResult<()> {
        let buf = &mut core.buf;
        let address = buf.address() as usize;
        bank[address] = buf.quantity();
        buf.set_len(ECHO_SIZE);
        Ok(())
    }

    /// Function 8: diagnostic. Sub-function 1 restarts communications.
    fn diagnostic(&mut self) -> ModbusResult<()> {
        let sub_function = self.core.buf.address();
        if sub_function == DIAG_RESTART_COMMUNICATIONS {
            if let Some(hook) = self.restart_hook {
                debug!("diagnostic restart requested");
                hook();
            }
        }
        self.core.buf.set_len(ECHO_SIZE);
        Ok(())
    }

    /// Function 15: write a bit window from the packed payload.
    fn write_multiple_coils(core: &mut EngineCore<T, C>, bank: &mut [bool]) -> ModbusResult<()> {
        let buf = &mut core.buf;
        let start = buf.address() as usize;
        let count = buf.quantity() as usize;
        check_payload(buf.as_slice(), buf.byte_count() as usize, count.div_ceil(8))?;

        let payload = &buf.as_slice()[offset::BYTE_CNT + 1..];
        for i in 0..count {
            bank[start + i] = (payload[i / 8] >> (i % 8)) & 1 != 0;
        }
        buf.set_len(ECHO_SIZE);
        Ok(())
    }

    /// Function 16: write a word window from big-endian pairs.
    fn write_multiple_registers(core: &mut EngineCore<T, C>, bank: &mut [u16]) -> ModbusResult<()> {
        let buf = &mut core.buf;
        let start = buf.address() as usize;
        let count = buf.quantity() as usize;
        check_payload(buf.as_slice(), buf.byte_count() as usize, count * 2)?;

        for i in 0..count {
            bank[start + i] = buf.word_at(offset::BYTE_CNT + 1 + 2 * i);
        }
        // acknowledge with the starting address and the register count
        buf.set_len(ECHO_SIZE);
        let count_field = count as u8;
        buf.raw_mut()[offset::NB_HI] = 0x00;
        buf.raw_mut()[offset::NB_LO] = count_field;
        Ok(())
    }
}

/// Check a multi-write frame against its declared and required payload.
fn check_payload(frame: &[u8], declared: usize, required: usize) -> ModbusResult<()> {
    if declared < required {
        return Err(ModbusError::frame("payload shorter than the quantity"));
    }
    if frame.len() < offset::BYTE_CNT + 1 + declared + 2 {
        return Err(ModbusError::frame("frame shorter than its byte count"));
    }
    Ok(())
}

/// Address-range validation: the highest accessed index must fit the bank
/// the function operates on. Diagnostic requests bypass the check.
fn validate_range(
    buf: &crate::frame::FrameBuffer,
    banks: &RegisterBanks<'_>,
    function: ModbusFunction,
) -> Result<(), ExceptionCode> {
    let bank_len = banks.bank_len(function);
    match function {
        ModbusFunction::Diagnostic => Ok(()),
        ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => {
            if buf.address() as usize >= bank_len {
                Err(ExceptionCode::IllegalDataAddress)
            } else {
                Ok(())
            }
        }
        _ => {
            let span = buf.address() as usize + buf.quantity() as usize;
            if span > bank_len {
                Err(ExceptionCode::IllegalDataAddress)
            } else {
                Ok(())
            }
        }
    }
}
