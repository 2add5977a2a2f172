//! CRC-16/IBM (a.k.a. Modbus CRC) framing checksum.
//!
//! Galileosky frames are validated with CRC-16/IBM: init `0xFFFF`, poly
//! `0xA001` applied LSB-first per byte, no final XOR. This is exactly the
//! `crc` crate's [`CRC_16_MODBUS`](crc::CRC_16_MODBUS) catalogue entry (same
//! parameters, different name), so the engine is built on [`crc::Crc`]
//! rather than a hand-rolled bit loop.

use crc::{Crc, CRC_16_MODBUS};

/// CRC-16/IBM algorithm instance, computed once and reused for every frame.
static CRC16_IBM: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Computes CRC-16/IBM over `bytes`, returning the value to compare against
/// the frame's little-endian CRC field.
pub fn crc16_ibm(bytes: &[u8]) -> u16 {
    CRC16_IBM.checksum(bytes)
}
