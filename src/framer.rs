//! Inter-character-gap frame delimitation.
//!
//! Modbus RTU delimits frames by idle time: a frame ends when the line has
//! been silent for at least 3.5 character times, approximated here by a
//! fixed millisecond threshold (`t35_ms`, default 5).
//!
//! Two framers cover the two driver models:
//!
//! - [`GapFramer`] for polled operation: samples the receive FIFO fill
//!   level from a main loop and drains the whole frame once the gap is
//!   observed.
//! - [`ByteFramer`] for interrupt-driven slaves: accepts one byte per
//!   invocation, filters foreign traffic by address before buffering, and
//!   recognizes frame completion from the function code and byte-count
//!   field alone.

use log::trace;

use crate::error::{ModbusError, ModbusResult};
use crate::frame::{offset, FrameBuffer, MAX_FRAME_SIZE, MIN_REQUEST_SIZE};
use crate::protocol::{ModbusFunction, BROADCAST};
use crate::transport::{Clock, Transport};

/// Outcome of a single framer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FramerEvent {
    /// No complete frame yet.
    Pending,
    /// A complete frame is ready.
    Complete,
}

/// Polled-mode framer.
///
/// On each poll the FIFO fill level is compared with the previous sample.
/// A change restarts the silence timer; an unchanged, non-zero level that
/// has been stable for at least `t35_ms` declares the frame complete.
#[derive(Debug, Default)]
pub(crate) struct GapFramer {
    last_available: usize,
    last_byte_ms: u32,
}

impl GapFramer {
    pub fn reset(&mut self) {
        self.last_available = 0;
    }

    /// Sample the FIFO level and check the inter-frame gap.
    pub fn poll<T: Transport, C: Clock>(
        &mut self,
        transport: &T,
        clock: &C,
        t35_ms: u32,
    ) -> FramerEvent {
        let available = transport.available();
        if available == 0 {
            return FramerEvent::Pending;
        }
        if available != self.last_available {
            self.last_available = available;
            self.last_byte_ms = clock.now_ms();
            return FramerEvent::Pending;
        }
        if clock.now_ms().wrapping_sub(self.last_byte_ms) < t35_ms {
            return FramerEvent::Pending;
        }
        self.last_available = 0;
        FramerEvent::Complete
    }

    /// Drain the entire receive FIFO into the frame buffer, in order.
    ///
    /// Bytes past the buffer capacity are consumed and discarded; the
    /// aborted frame surfaces as a buffer overflow.
    pub fn drain<T: Transport>(
        &mut self,
        transport: &mut T,
        buf: &mut FrameBuffer,
    ) -> ModbusResult<usize> {
        buf.clear();
        let mut overflow = false;
        while let Some(byte) = transport.read() {
            if buf.push(byte).is_err() {
                overflow = true;
            }
        }
        if overflow {
            buf.clear();
            return Err(ModbusError::BufferOverflow {
                capacity: MAX_FRAME_SIZE,
            });
        }
        Ok(buf.len())
    }
}

/// Byte-at-a-time framer for interrupt-driven slaves.
///
/// Foreign frames are cheaper to reject a byte at a time than to buffer:
/// while the accumulator is empty, any byte that is neither the local
/// address nor broadcast is dropped without advancing.
#[derive(Debug, Default)]
pub(crate) struct ByteFramer {
    index: usize,
    last_byte_ms: u32,
}

impl ByteFramer {
    pub fn reset(&mut self) {
        self.index = 0;
    }

    /// Accept one received byte.
    ///
    /// A silence longer than `t35_ms` since the previous byte starts a new
    /// frame. Completion requires at least [`MIN_REQUEST_SIZE`] bytes, and
    /// for multi-write functions the full declared payload
    /// (`byte_count + 9` bytes in total).
    pub fn accept(
        &mut self,
        byte: u8,
        now_ms: u32,
        local_id: u8,
        t35_ms: u32,
        buf: &mut FrameBuffer,
    ) -> ModbusResult<FramerEvent> {
        if now_ms.wrapping_sub(self.last_byte_ms) > t35_ms {
            self.index = 0;
        }
        self.last_byte_ms = now_ms;

        if self.index == 0 && byte != local_id && byte != BROADCAST {
            trace!("dropping byte 0x{:02X} addressed elsewhere", byte);
            return Ok(FramerEvent::Pending);
        }

        buf.raw_mut()[self.index] = byte;
        self.index += 1;

        if self.index >= MAX_FRAME_SIZE {
            self.index = 0;
            return Err(ModbusError::BufferOverflow {
                capacity: MAX_FRAME_SIZE,
            });
        }
        if self.index < MIN_REQUEST_SIZE {
            return Ok(FramerEvent::Pending);
        }

        let function = buf.raw()[offset::FUNC];
        if ModbusFunction::has_trailing_payload(function)
            && self.index < buf.raw()[offset::BYTE_CNT] as usize + 9
        {
            return Ok(FramerEvent::Pending);
        }

        buf.set_len(self.index);
        self.index = 0;
        Ok(FramerEvent::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{ManualClock, MockTransport};

    const T35: u32 = 5;

    #[test]
    fn test_gap_framer_waits_for_silence() {
        let mut framer = GapFramer::default();
        let mut transport = MockTransport::new();
        let clock = ManualClock::new();

        assert_eq!(framer.poll(&transport, &clock, T35), FramerEvent::Pending);

        transport.feed(&[0x11, 0x03]);
        // level changed: silence timer restarts
        assert_eq!(framer.poll(&transport, &clock, T35), FramerEvent::Pending);
        clock.advance(T35);
        assert_eq!(framer.poll(&transport, &clock, T35), FramerEvent::Complete);

        let mut buf = FrameBuffer::new();
        let len = framer.drain(&mut transport, &mut buf).unwrap();
        assert_eq!(len, 2);
        assert_eq!(buf.as_slice(), &[0x11, 0x03]);
        assert_eq!(transport.available(), 0);
    }

    #[test]
    fn test_gap_framer_restarts_on_new_bytes() {
        let mut framer = GapFramer::default();
        let mut transport = MockTransport::new();
        let clock = ManualClock::new();

        transport.feed(&[0x11]);
        framer.poll(&transport, &clock, T35);
        clock.advance(3);
        // more bytes arrive before the gap elapses
        transport.feed(&[0x03]);
        assert_eq!(framer.poll(&transport, &clock, T35), FramerEvent::Pending);
        clock.advance(4);
        assert_eq!(framer.poll(&transport, &clock, T35), FramerEvent::Pending);
        clock.advance(1);
        assert_eq!(framer.poll(&transport, &clock, T35), FramerEvent::Complete);
    }

    #[test]
    fn test_gap_framer_overflow_aborts() {
        let mut framer = GapFramer::default();
        let mut transport = MockTransport::new();
        transport.feed(&[0xAA; MAX_FRAME_SIZE + 4]);

        let mut buf = FrameBuffer::new();
        assert!(matches!(
            framer.drain(&mut transport, &mut buf),
            Err(ModbusError::BufferOverflow { .. })
        ));
        // the malformed frame is consumed, not left in the FIFO
        assert_eq!(transport.available(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_byte_framer_filters_foreign_address() {
        let mut framer = ByteFramer::default();
        let mut buf = FrameBuffer::new();

        // first byte not our address and not broadcast: dropped
        assert_eq!(
            framer.accept(0x22, 0, 0x11, T35, &mut buf).unwrap(),
            FramerEvent::Pending
        );
        assert_eq!(framer.index, 0);

        assert_eq!(
            framer.accept(0x11, 1, 0x11, T35, &mut buf).unwrap(),
            FramerEvent::Pending
        );
        assert_eq!(framer.index, 1);
    }

    #[test]
    fn test_byte_framer_fixed_length_frame() {
        let mut framer = ByteFramer::default();
        let mut buf = FrameBuffer::new();
        let frame = [0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87];

        let mut now = 0;
        for (i, &byte) in frame.iter().enumerate() {
            now += 1;
            let event = framer.accept(byte, now, 0x11, T35, &mut buf).unwrap();
            if i < frame.len() - 1 {
                assert_eq!(event, FramerEvent::Pending);
            } else {
                assert_eq!(event, FramerEvent::Complete);
            }
        }
        assert_eq!(buf.as_slice(), &frame);
    }

    #[test]
    fn test_byte_framer_waits_for_multi_write_payload() {
        let mut framer = ByteFramer::default();
        let mut buf = FrameBuffer::new();
        // FC16, 2 registers, byte count 4: full frame is 4 + 9 = 13 bytes
        let frame = [
            0x11, 0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02, 0xC6, 0xF0,
        ];

        for (i, &byte) in frame.iter().enumerate() {
            let event = framer.accept(byte, 0, 0x11, T35, &mut buf).unwrap();
            if i < frame.len() - 1 {
                assert_eq!(event, FramerEvent::Pending, "completed early at byte {}", i);
            } else {
                assert_eq!(event, FramerEvent::Complete);
            }
        }
        assert_eq!(buf.len(), frame.len());
    }

    #[test]
    fn test_byte_framer_gap_resets_accumulator() {
        let mut framer = ByteFramer::default();
        let mut buf = FrameBuffer::new();

        framer.accept(0x11, 0, 0x11, T35, &mut buf).unwrap();
        framer.accept(0x03, 1, 0x11, T35, &mut buf).unwrap();
        assert_eq!(framer.index, 2);

        // silence longer than T3.5: the partial frame is abandoned
        framer.accept(0x11, 100, 0x11, T35, &mut buf).unwrap();
        assert_eq!(framer.index, 1);
    }

    #[test]
    fn test_byte_framer_overflow() {
        let mut framer = ByteFramer::default();
        let mut buf = FrameBuffer::new();

        // a "frame" that never satisfies the FC16 length rule
        framer.accept(0x11, 0, 0x11, T35, &mut buf).unwrap();
        framer.accept(0x10, 0, 0x11, T35, &mut buf).unwrap();
        let mut result = Ok(FramerEvent::Pending);
        for _ in 2..MAX_FRAME_SIZE {
            result = framer.accept(0xFF, 0, 0x11, T35, &mut buf);
        }
        assert!(matches!(result, Err(ModbusError::BufferOverflow { .. })));
        assert_eq!(framer.index, 0);
    }
}
