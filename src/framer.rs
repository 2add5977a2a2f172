//! Stream framing: reconstructs [`Packet`]s from a growing per-connection
//! byte buffer, preserving residue across reads (§4.1).
//!
//! [`Framer`] is a plain, synchronous, allocation-light struct so the
//! stream-splitting invariant (§8 invariant 1) can be unit-tested without an
//! async runtime. [`FrameCodec`] is a thin [`tokio_util::codec`] adapter
//! around it: a synchronous decode helper reused by the `Decoder` impl.

use bytes::{Buf, BytesMut};

use crate::crc::crc16_ibm;
use crate::error::FramingError;
use crate::packet::{HeaderKind, Packet};

/// One outcome of draining the connection buffer: either a fully validated
/// frame, or a recoverable framing error (the buffer has already been
/// resynchronized by one byte when this variant is returned).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Frame(Packet),
    Error(FramingError),
}

/// Extracts complete, CRC-validated frames from a connection's byte stream.
pub struct Framer {
    buf: BytesMut,
    max_packet_size: usize,
    /// When false, the trailing CRC is never checked (§6
    /// `framer.validateChecksum` — useful only for fuzz testing).
    validate_checksum: bool,
}

impl Framer {
    pub fn new(max_packet_size: usize) -> Self {
        Self::with_checksum_validation(max_packet_size, true)
    }

    pub fn with_checksum_validation(max_packet_size: usize, validate_checksum: bool) -> Self {
        Self {
            buf: BytesMut::new(),
            max_packet_size,
            validate_checksum,
        }
    }

    /// Appends newly-read socket bytes to the residual buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes currently buffered but not yet yielded as a frame.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Attempts to extract a single frame or framing error from the buffer.
    ///
    /// Returns `Ok(None)` when there aren't yet enough bytes to make
    /// progress (§4.1 steps 1 and 4); the caller should read more from the
    /// socket and call again. On a `CrcMismatch` or `Oversize` error the
    /// buffer has already been advanced by one byte so a subsequent call
    /// resumes the resync scan (§4.1 steps 3 and 6).
    pub fn next_frame(&mut self) -> Option<FrameOutcome> {
        if self.buf.len() < 3 {
            return None;
        }

        let header_byte = self.buf[0];
        let raw_len = u16::from_le_bytes([self.buf[1], self.buf[2]]);
        let has_unsent_data = raw_len & 0x8000 != 0;
        let payload_len = (raw_len & 0x7FFF) as usize;

        if payload_len > self.max_packet_size {
            self.buf.advance(1);
            return Some(FrameOutcome::Error(FramingError::Oversize(
                payload_len,
                self.max_packet_size,
            )));
        }

        let wire_len = 3 + payload_len + 2;
        if self.buf.len() < wire_len {
            return None;
        }

        let computed = crc16_ibm(&self.buf[..3 + payload_len]);
        let expected = u16::from_le_bytes([self.buf[3 + payload_len], self.buf[4 + payload_len]]);

        if self.validate_checksum && computed != expected {
            self.buf.advance(1);
            return Some(FrameOutcome::Error(FramingError::CrcMismatch {
                expected,
                computed,
            }));
        }

        let raw_frame = self.buf[..wire_len].to_vec();
        let payload = self.buf[3..3 + payload_len].to_vec();
        self.buf.advance(wire_len);

        Some(FrameOutcome::Frame(Packet {
            header: HeaderKind::from_byte(header_byte),
            payload_len,
            payload,
            has_unsent_data,
            raw_frame,
        }))
    }

    /// Drains every frame currently extractable from the buffer, in order.
    /// Used on connection close to flush whatever remains (§4.5).
    pub fn drain(&mut self) -> Vec<FrameOutcome> {
        let mut out = Vec::new();
        while let Some(outcome) = self.next_frame() {
            out.push(outcome);
        }
        out
    }
}

/// [`tokio_util::codec::Decoder`] adapter over [`Framer`], used by the
/// Connection Pipeline to drive a socket through `tokio_util::codec::Framed`.
pub struct FrameCodec {
    framer: Framer,
}

impl FrameCodec {
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            framer: Framer::new(max_packet_size),
        }
    }
}

impl tokio_util::codec::Decoder for FrameCodec {
    type Item = FrameOutcome;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // `Framer` owns its own residual buffer so framing state survives
        // across calls even when `src` is drained completely; mirror that
        // into `src` so `Framed` doesn't think data was left unconsumed.
        self.framer.feed(src);
        src.clear();
        Ok(self.framer.next_frame())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    fn build_frame(header: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(3 + payload.len() + 2);
        frame.push(header);
        frame.extend_from_slice(&((payload.len() as u16).to_le_bytes()));
        frame.extend_from_slice(payload);
        let crc = crc16_ibm(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    #[test]
    fn waits_for_more_bytes() {
        let mut framer = Framer::new(65_535);
        framer.feed(&[0x01, 0x02]);
        assert_eq!(framer.next_frame(), None);
    }

    #[test]
    fn single_frame_roundtrip() {
        let frame = build_frame(0x15, b"hello");
        let mut framer = Framer::new(65_535);
        framer.feed(&frame);
        match framer.next_frame() {
            Some(FrameOutcome::Frame(packet)) => {
                assert_eq!(packet.header, HeaderKind::Ignorable);
                assert_eq!(packet.payload, b"hello");
                assert!(!packet.has_unsent_data);
                assert_eq!(packet.raw_frame, frame);
            }
            other => panic!("expected a frame, got {other:?}"),
        }
        assert_eq!(framer.next_frame(), None);
    }

    #[test]
    fn has_unsent_data_bit_is_surfaced() {
        let mut frame = build_frame(0x01, &[0u8; 16]);
        // set bit 15 of the length field and recompute CRC
        let payload_len = 16u16;
        let raw_len = payload_len | 0x8000;
        frame[1..3].copy_from_slice(&raw_len.to_le_bytes());
        let crc = crc16_ibm(&frame[..3 + 16]);
        frame[19..21].copy_from_slice(&crc.to_le_bytes());

        let mut framer = Framer::new(65_535);
        framer.feed(&frame);
        match framer.next_frame() {
            Some(FrameOutcome::Frame(packet)) => assert!(packet.has_unsent_data),
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn crc_mismatch_advances_one_byte_and_resyncs() {
        let mut frame = build_frame(0x15, b"payload-data");
        frame[5] ^= 0xFF; // corrupt one payload byte, CRC no longer matches

        let mut framer = Framer::new(65_535);
        framer.feed(&frame);
        match framer.next_frame() {
            Some(FrameOutcome::Error(FramingError::CrcMismatch { .. })) => {}
            other => panic!("expected a CRC mismatch, got {other:?}"),
        }
        // buffer advanced by exactly one byte, not the whole declared length
        assert_eq!(framer.buffered_len(), frame.len() - 1);
    }

    #[test]
    fn scenario_b_resync_then_valid_frame() {
        let valid = build_frame(0x15, b"ok");
        let mut stream = vec![0xFF, 0xFF, 0xFF];
        stream.extend_from_slice(&valid);

        let mut framer = Framer::new(65_535);
        framer.feed(&stream);

        let mut errors = 0;
        loop {
            match framer.next_frame() {
                Some(FrameOutcome::Error(FramingError::CrcMismatch { .. })) => errors += 1,
                Some(FrameOutcome::Frame(packet)) => {
                    assert_eq!(packet.payload, b"ok");
                    break;
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert_eq!(errors, 3);
    }

    #[test]
    fn oversize_payload_is_rejected() {
        let mut framer = Framer::new(10);
        let frame = build_frame(0x01, &[0u8; 20]);
        // corrupt nothing; length field alone triggers oversize before CRC check
        framer.feed(&frame);
        match framer.next_frame() {
            Some(FrameOutcome::Error(FramingError::Oversize(20, 10))) => {}
            other => panic!("expected oversize error, got {other:?}"),
        }
    }

    #[rstest]
    fn stream_splitting_invariance(#[values(1, 2, 3, 5, 7, 11, 200)] chunk_size: usize) {
        let mut stream = Vec::new();
        let mut expected = Vec::new();
        for i in 0..5u8 {
            let frame = build_frame(0x15, &vec![i; 4 + i as usize]);
            stream.extend_from_slice(&frame);
            expected.push(frame);
        }

        let mut framer = Framer::new(65_535);
        let mut produced = Vec::new();
        for chunk in stream.chunks(chunk_size) {
            framer.feed(chunk);
            while let Some(FrameOutcome::Frame(packet)) = framer.next_frame() {
                produced.push(packet.raw_frame);
            }
        }

        assert_eq!(produced, expected);
    }
}
