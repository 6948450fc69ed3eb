//! Modbus RTU master (client) engine.
//!
//! The master is a two-state machine: `Idle -query()-> WaitingReply`,
//! back to `Idle` when `poll()` consumes a validated reply or the timeout
//! expires. Only one query can be outstanding at a time.
//!
//! Read results and write payloads travel through a caller-owned data
//! image (`&mut [u16]`) passed to both `query` and `poll`, so the engine
//! never retains a reference into application memory between calls.

use log::{debug, warn};

use crate::crc;
use crate::engine::{EngineCore, EngineStats, RtuConfig};
use crate::error::{ModbusError, ModbusResult};
use crate::frame::{offset, MIN_ANSWER_SIZE};
use crate::framer::FramerEvent;
use crate::protocol::{ModbusFunction, SlaveId, BROADCAST, MAX_SLAVE_ID};
use crate::transport::{Clock, Transport};

/// Master query descriptor.
///
/// For the write functions the payload comes from the data image handed to
/// [`ModbusRtuMaster::query`]: functions 5 and 6 take the value from
/// `image[0]`, functions 15 and 16 consume as many image words as the
/// quantity requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModbusQuery {
    /// Target slave: 1..=247, or 0 to broadcast a write.
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    /// Starting address; diagnostic sub-function for function 8.
    pub address: u16,
    /// Number of coils or registers to access. Ignored for functions
    /// 5, 6 and 8.
    pub quantity: u16,
}

/// Master communication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Idle,
    WaitingReply,
}

/// Outcome of a master poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterEvent {
    /// Nothing outstanding, or no complete frame on the wire yet.
    Waiting,
    /// A validated reply was consumed; carries the frame length including
    /// the CRC trailer. Read results are already unpacked into the image.
    ///
    /// For functions 1/2 the image keeps the packed layout of the reply:
    /// image word `i` holds response byte `2i` in its low half and byte
    /// `2i + 1` in its high half; callers re-extract individual bits.
    Reply(usize),
}

/// Modbus RTU master engine.
pub struct ModbusRtuMaster<T, C> {
    core: EngineCore<T, C>,
    state: MasterState,
}

impl<T: Transport, C: Clock> ModbusRtuMaster<T, C> {
    /// Create a master with default configuration.
    pub fn new(transport: T, clock: C) -> Self {
        Self::with_config(transport, clock, RtuConfig::default())
    }

    /// Create a master with custom configuration.
    pub fn with_config(transport: T, clock: C, config: RtuConfig) -> Self {
        Self {
            core: EngineCore::new(transport, clock, config),
            state: MasterState::Idle,
        }
    }

    /// Drain pending RX bytes and reset counters.
    pub fn start(&mut self) {
        self.core.start();
        self.state = MasterState::Idle;
    }

    /// Current state of the query/reply machine.
    pub fn state(&self) -> MasterState {
        self.state
    }

    /// Last communication error, cleared by a successful round trip.
    pub fn last_error(&self) -> Option<&ModbusError> {
        self.core.last_error.as_ref()
    }

    /// Frame counters.
    pub fn stats(&self) -> EngineStats {
        self.core.stats
    }

    /// Whether the communication watchdog has fired since the last
    /// completed exchange.
    pub fn timeout_expired(&self) -> bool {
        self.core.watchdog_expired()
    }

    /// Set the reply timeout in milliseconds.
    pub fn set_timeout(&mut self, timeout_ms: u32) {
        self.core.config.timeout_ms = timeout_ms;
    }

    /// Get the reply timeout in milliseconds.
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

    /// Generate a query to a slave.
    ///
    /// Requires the `Idle` state. On success the master transitions to
    /// `WaitingReply`, except for broadcasts (`slave_id == 0`, write
    /// functions only), which produce no reply and leave the master idle.
    pub fn query(&mut self, query: &ModbusQuery, image: &mut [u16]) -> ModbusResult<()> {
        if self.state != MasterState::Idle {
            return Err(ModbusError::Busy);
        }
        if query.slave_id > MAX_SLAVE_ID {
            return Err(ModbusError::InvalidSlaveId { id: query.slave_id });
        }
        if query.slave_id == BROADCAST && !query.function.is_write_function() {
            // only writes may be broadcast: nobody is allowed to answer
            return Err(ModbusError::InvalidSlaveId { id: BROADCAST });
        }
        let needed = required_image_words(query);
        if image.len() < needed {
            return Err(ModbusError::frame(format!(
                "data image holds {} words, query needs {}",
                image.len(),
                needed
            )));
        }

        self.build_request(query, image)?;
        self.core.send_frame()?;
        self.core.last_error = None;

        if query.slave_id == BROADCAST {
            debug!("broadcast {}: skipping the reply wait", query.function);
        } else {
            self.state = MasterState::WaitingReply;
        }
        Ok(())
    }

    /// Check for an incoming reply; expire the query on timeout.
    ///
    /// Non-blocking. Call cyclically from the main loop, avoiding any
    /// delays between calls.
    pub fn poll(&mut self, image: &mut [u16]) -> ModbusResult<MasterEvent> {
        if self.state != MasterState::WaitingReply {
            return Ok(MasterEvent::Waiting);
        }
        if self.core.watchdog_expired() {
            self.state = MasterState::Idle;
            let timeout_ms = self.core.config.timeout_ms;
            warn!("reply timeout after {}ms", timeout_ms);
            return Err(self.core.fail(ModbusError::no_reply(timeout_ms)));
        }

        let t35_ms = self.core.config.t35_ms;
        let (gap, transport, clock) = (&mut self.core.gap, &self.core.transport, &self.core.clock);
        if gap.poll(transport, clock, t35_ms) == FramerEvent::Pending {
            return Ok(MasterEvent::Waiting);
        }

        let len = match self.core.capture_frame() {
            Ok(len) => len,
            Err(e) => {
                self.state = MasterState::Idle;
                return Err(e);
            }
        };
        if len < MIN_ANSWER_SIZE {
            self.state = MasterState::Idle;
            return Err(self.core.fail(ModbusError::frame("reply frame too short")));
        }

        if let Err(e) = self.validate_answer(len) {
            self.state = MasterState::Idle;
            return Err(e);
        }
        if let Err(e) = self.unpack_answer(image) {
            self.state = MasterState::Idle;
            return Err(self.core.fail(e));
        }

        self.state = MasterState::Idle;
        self.core.last_error = None;
        Ok(MasterEvent::Reply(len))
    }

    /// Serialize the request PDU into the frame buffer.
    fn build_request(&mut self, query: &ModbusQuery, image: &[u16]) -> ModbusResult<()> {
        let buf = &mut self.core.buf;
        buf.clear();
        buf.push(query.slave_id)?;
        buf.push(query.function.to_u8())?;
        buf.push_u16(query.address)?;

        match query.function {
            ModbusFunction::ReadCoils
            | ModbusFunction::ReadDiscreteInputs
            | ModbusFunction::ReadHoldingRegisters
            | ModbusFunction::ReadInputRegisters => {
                buf.push_u16(query.quantity)?;
            }
            ModbusFunction::Diagnostic => {
                buf.push_u16(0)?;
            }
            ModbusFunction::WriteSingleCoil => {
                buf.push(if image[0] > 0 { 0xFF } else { 0x00 })?;
                buf.push(0x00)?;
            }
            ModbusFunction::WriteSingleRegister => {
                buf.push_u16(image[0])?;
            }
            ModbusFunction::WriteMultipleCoils => {
                let byte_count = (query.quantity as usize).div_ceil(8);
                buf.push_u16(query.quantity)?;
                buf.push(byte_count as u8)?;
                for i in 0..byte_count {
                    let word = image[i / 2];
                    buf.push(if i % 2 == 0 { (word >> 8) as u8 } else { word as u8 })?;
                }
            }
            ModbusFunction::WriteMultipleRegisters => {
                let count = query.quantity as usize;
                buf.push_u16(query.quantity)?;
                buf.push((count * 2) as u8)?;
                for &word in &image[..count] {
                    buf.push_u16(word)?;
                }
            }
        }
        Ok(())
    }

    /// Validate an inbound reply: CRC, exception bit, function code.
    fn validate_answer(&mut self, len: usize) -> ModbusResult<()> {
        if let Err(e) = crc::verify(self.core.buf.as_slice()) {
            // garbled reply: treat as if nothing arrived
            warn!("{}", e);
            return Err(self.core.fail(e));
        }
        let function = self.core.buf.function_code();
        if function & 0x80 != 0 {
            let code = self.core.buf.as_slice()[2];
            return Err(self
                .core
                .fail(ModbusError::exception(function & 0x7F, code)));
        }
        if len < MIN_ANSWER_SIZE + 1 {
            // only exception replies are allowed to be this short
            return Err(self.core.fail(ModbusError::frame("reply frame too short")));
        }
        if ModbusFunction::from_u8(function).is_err() {
            return Err(self
                .core
                .fail(ModbusError::UnsupportedFunction { code: function }));
        }
        Ok(())
    }

    /// Copy the reply payload into the caller's data image.
    fn unpack_answer(&mut self, image: &mut [u16]) -> ModbusResult<()> {
        let frame = self.core.buf.as_slice();
        match frame[offset::FUNC] {
            0x01 | 0x02 => {
                let byte_count = frame[2] as usize;
                if frame.len() < 3 + byte_count + 2 {
                    return Err(ModbusError::frame("bit reply shorter than its byte count"));
                }
                if image.len() * 2 < byte_count {
                    return Err(ModbusError::frame("data image too small for the reply"));
                }
                // two response bytes per image word, low byte first
                for i in 0..byte_count {
                    let byte = frame[3 + i] as u16;
                    if i % 2 == 0 {
                        image[i / 2] = byte;
                    } else {
                        image[i / 2] |= byte << 8;
                    }
                }
            }
            0x03 | 0x04 => {
                let byte_count = frame[2] as usize;
                if frame.len() < 3 + byte_count + 2 {
                    return Err(ModbusError::frame(
                        "register reply shorter than its byte count",
                    ));
                }
                let words = byte_count / 2;
                if image.len() < words {
                    return Err(ModbusError::frame("data image too small for the reply"));
                }
                for (i, slot) in image[..words].iter_mut().enumerate() {
                    *slot = u16::from_be_bytes([frame[3 + 2 * i], frame[4 + 2 * i]]);
                }
            }
            0x05 | 0x06 => {
                if frame.len() < 8 {
                    return Err(ModbusError::frame("echo reply too short"));
                }
                if image.is_empty() {
                    return Err(ModbusError::frame("data image too small for the reply"));
                }
                image[0] = self.core.buf.word_at(offset::NB_HI);
            }
            // multi-write acknowledgements carry no data
            _ => {}
        }
        Ok(())
    }
}

/// Image words a query consumes at send time.
fn required_image_words(query: &ModbusQuery) -> usize {
    match query.function {
        ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => 1,
        ModbusFunction::WriteMultipleCoils => (query.quantity as usize).div_ceil(16),
        ModbusFunction::WriteMultipleRegisters => query.quantity as usize,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{ManualClock, MockTransport};
    use crate::DEFAULT_TIMEOUT_MS;

    fn master() -> (ModbusRtuMaster<MockTransport, ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let master = ModbusRtuMaster::new(MockTransport::new(), clock.clone());
        (master, clock)
    }

    fn feed_reply(master: &mut ModbusRtuMaster<MockTransport, ManualClock>, frame: &[u8]) {
        master.transport_mut().feed(frame);
    }

    /// Let the gap framer see the bytes and observe the T3.5 silence.
    fn settle(
        master: &mut ModbusRtuMaster<MockTransport, ManualClock>,
        clock: &ManualClock,
        image: &mut [u16],
    ) -> ModbusResult<MasterEvent> {
        let event = master.poll(image)?;
        assert_eq!(event, MasterEvent::Waiting);
        clock.advance(5);
        master.poll(image)
    }

    #[test]
    fn test_read_registers_request_wire_format() {
        let (mut master, _clock) = master();
        let mut image = [0u16; 4];
        master
            .query(
                &ModbusQuery {
                    slave_id: 0x11,
                    function: ModbusFunction::ReadHoldingRegisters,
                    address: 0x006B,
                    quantity: 3,
                },
                &mut image,
            )
            .unwrap();

        assert_eq!(
            master.transport().tx,
            vec![0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87]
        );
        assert_eq!(master.state(), MasterState::WaitingReply);
    }

    #[test]
    fn test_read_registers_round_trip() {
        let (mut master, clock) = master();
        let mut image = [0u16; 4];
        master
            .query(
                &ModbusQuery {
                    slave_id: 0x11,
                    function: ModbusFunction::ReadHoldingRegisters,
                    address: 0x006B,
                    quantity: 3,
                },
                &mut image,
            )
            .unwrap();

        feed_reply(
            &mut master,
            &[0x11, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40, 0x49, 0xAD],
        );
        let event = settle(&mut master, &clock, &mut image).unwrap();

        assert_eq!(event, MasterEvent::Reply(11));
        assert_eq!(&image[..3], &[0xAE41, 0x5652, 0x4340]);
        assert_eq!(master.state(), MasterState::Idle);
        assert!(master.last_error().is_none());
    }

    #[test]
    fn test_read_bits_packed_image_layout() {
        let (mut master, clock) = master();
        let mut image = [0u16; 3];
        master
            .query(
                &ModbusQuery {
                    slave_id: 0x11,
                    function: ModbusFunction::ReadCoils,
                    address: 0x0013,
                    quantity: 0x0025,
                },
                &mut image,
            )
            .unwrap();

        // 37 coils: 5 payload bytes
        let reply = FrameVec::new(&[0x11, 0x01, 0x05, 0xCD, 0x6B, 0xB2, 0x0E, 0x1B]);
        feed_reply(&mut master, &reply.with_crc());
        settle(&mut master, &clock, &mut image).unwrap();

        // byte 2i lands in the low half, byte 2i+1 in the high half
        assert_eq!(image[0], 0x6BCD);
        assert_eq!(image[1], 0x0EB2);
        assert_eq!(image[2], 0x001B);
    }

    #[test]
    fn test_write_single_register_echo() {
        let (mut master, clock) = master();
        let mut image = [0x0003u16];
        master
            .query(
                &ModbusQuery {
                    slave_id: 0x11,
                    function: ModbusFunction::WriteSingleRegister,
                    address: 0x0001,
                    quantity: 1,
                },
                &mut image,
            )
            .unwrap();

        let sent = master.transport().tx.clone();
        assert_eq!(&sent[..6], &[0x11, 0x06, 0x00, 0x01, 0x00, 0x03]);

        feed_reply(&mut master, &sent);
        let event = settle(&mut master, &clock, &mut image).unwrap();
        assert_eq!(event, MasterEvent::Reply(8));
        assert_eq!(image[0], 0x0003);
    }

    #[test]
    fn test_write_multiple_registers_above_address_255() {
        let (mut master, _clock) = master();
        let mut image = [0x000A, 0x0102];
        master
            .query(
                &ModbusQuery {
                    slave_id: 0x11,
                    function: ModbusFunction::WriteMultipleRegisters,
                    address: 0x012C,
                    quantity: 2,
                },
                &mut image,
            )
            .unwrap();

        assert_eq!(
            &master.transport().tx[..11],
            &[0x11, 0x10, 0x01, 0x2C, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn test_exception_reply_surfaced() {
        let (mut master, clock) = master();
        let mut image = [0u16; 1];
        master
            .query(
                &ModbusQuery {
                    slave_id: 0x11,
                    function: ModbusFunction::ReadHoldingRegisters,
                    address: 0,
                    quantity: 1,
                },
                &mut image,
            )
            .unwrap();

        let reply = FrameVec::new(&[0x11, 0x83, 0x02]);
        feed_reply(&mut master, &reply.with_crc());
        let err = settle(&mut master, &clock, &mut image).unwrap_err();

        assert_eq!(
            err,
            ModbusError::Exception {
                function: 0x03,
                code: 0x02
            }
        );
        assert_eq!(master.state(), MasterState::Idle);
        assert_eq!(master.stats().errors, 1);
    }

    #[test]
    fn test_timeout_expires_query() {
        let (mut master, clock) = master();
        let mut image = [0u16; 1];
        master
            .query(
                &ModbusQuery {
                    slave_id: 0x20,
                    function: ModbusFunction::ReadHoldingRegisters,
                    address: 0,
                    quantity: 1,
                },
                &mut image,
            )
            .unwrap();

        clock.advance(DEFAULT_TIMEOUT_MS + 1);
        let err = master.poll(&mut image).unwrap_err();
        assert_eq!(err, ModbusError::no_reply(DEFAULT_TIMEOUT_MS));
        assert_eq!(master.state(), MasterState::Idle);
        assert_eq!(master.stats().errors, 1);
        assert_eq!(master.last_error(), Some(&err));

        // expired query does not keep erroring on subsequent polls
        assert_eq!(master.poll(&mut image).unwrap(), MasterEvent::Waiting);
        assert_eq!(master.stats().errors, 1);
    }

    #[test]
    fn test_crc_mismatch_drops_reply() {
        let (mut master, clock) = master();
        let mut image = [0u16; 4];
        master
            .query(
                &ModbusQuery {
                    slave_id: 0x11,
                    function: ModbusFunction::ReadHoldingRegisters,
                    address: 0x006B,
                    quantity: 3,
                },
                &mut image,
            )
            .unwrap();

        feed_reply(&mut master, &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x00, 0x00]);
        let err = settle(&mut master, &clock, &mut image).unwrap_err();
        assert!(matches!(err, ModbusError::CrcMismatch { .. }));
        assert_eq!(master.stats().errors, 1);
    }

    #[test]
    fn test_query_role_and_state_guards() {
        let (mut master, _clock) = master();
        let mut image = [0u16; 1];
        let read = ModbusQuery {
            slave_id: 0x11,
            function: ModbusFunction::ReadCoils,
            address: 0,
            quantity: 1,
        };

        master.query(&read, &mut image).unwrap();
        assert_eq!(master.query(&read, &mut image), Err(ModbusError::Busy));

        master.start();
        assert_eq!(
            master.query(
                &ModbusQuery {
                    slave_id: 248,
                    ..read
                },
                &mut image
            ),
            Err(ModbusError::InvalidSlaveId { id: 248 })
        );
        // a broadcast read is meaningless: nobody may answer
        assert_eq!(
            master.query(&ModbusQuery { slave_id: 0, ..read }, &mut image),
            Err(ModbusError::InvalidSlaveId { id: 0 })
        );
    }

    #[test]
    fn test_broadcast_write_skips_reply_wait() {
        let (mut master, _clock) = master();
        let mut image = [0x000A, 0x0102];
        master
            .query(
                &ModbusQuery {
                    slave_id: BROADCAST,
                    function: ModbusFunction::WriteMultipleRegisters,
                    address: 0,
                    quantity: 2,
                },
                &mut image,
            )
            .unwrap();

        assert_eq!(master.state(), MasterState::Idle);
        assert_eq!(master.transport().tx[0], 0x00);
        assert_eq!(master.stats().frames_out, 1);
    }

    #[test]
    fn test_undersized_image_rejected() {
        let (mut master, _clock) = master();
        let mut image = [0u16; 1];
        let err = master
            .query(
                &ModbusQuery {
                    slave_id: 0x11,
                    function: ModbusFunction::WriteMultipleRegisters,
                    address: 0,
                    quantity: 4,
                },
                &mut image,
            )
            .unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));
    }

    /// Small helper to append a valid CRC to literal reply bytes.
    struct FrameVec(Vec<u8>);

    impl FrameVec {
        fn new(bytes: &[u8]) -> Self {
            Self(bytes.to_vec())
        }

        fn with_crc(&self) -> Vec<u8> {
            let mut frame = self.0.clone();
            frame.extend_from_slice(&crate::crc::checksum(&self.0).to_le_bytes());
            frame
        }
    }
}
