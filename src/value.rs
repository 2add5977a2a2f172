//! Typed record values and their decoders (§3 `TypedValue`, §4.3).

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{ParseError, ParseResult};

/// The logical shape a dictionary entry decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypedKind {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    /// uint32 LE divided by 100 — Modbus register mirror.
    U32Scaled100,
    /// Fixed-length ASCII/UTF-8; length comes from the dictionary entry.
    StrFixed,
    /// UTC seconds since Unix epoch (uint32 LE).
    DateTime,
    /// Packed lat/lon + satellite/correctness nibbles, 9 bytes, ÷1_000_000.
    Coordinates,
    /// Packed speed + direction, two uint16 LE fields, each ÷10.
    SpeedDirection,
    /// 16-bit device status bitfield.
    Status,
    /// 16-bit digital input bitfield.
    Inputs,
    /// 16-bit digital output bitfield.
    Outputs,
    /// Packed 3-axis acceleration, 4 bytes.
    Acceleration,
}

/// A decoded tag value. `Raw` covers unknown tags and unsupported kinds,
/// carrying whatever bytes the skip heuristic consumed (§4.3).
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    U8(u8),
    U16(u16),
    U32(u32),
    I8(i8),
    I16(i16),
    I32(i32),
    U32Scaled100(u32),
    StrFixed(String),
    DateTime(u32),
    Coordinates {
        lat: f64,
        lon: f64,
        satellites: u8,
        correctness: u8,
    },
    SpeedDirection {
        speed_kmh: f32,
        direction_deg: f32,
    },
    Status(u16),
    Inputs(u16),
    Outputs(u16),
    Acceleration {
        x: i16,
        y: i16,
        z: i16,
        /// The source u32's 4th byte, reserved per §3. Carried through
        /// unmodified purely so `encode` can round-trip the original bytes;
        /// nothing interprets it.
        reserved: u8,
    },
    Raw(Vec<u8>),
}

impl TypedValue {
    /// Decodes a value of `kind` from `cursor`, advancing it past the bytes
    /// consumed. `tag` is only used to annotate errors.
    pub fn decode(
        kind: TypedKind,
        fixed_len: Option<u8>,
        tag: u16,
        cursor: &mut Cursor<&[u8]>,
    ) -> ParseResult<Self> {
        let exhausted = |_| ParseError::BufferExhausted(tag);
        match kind {
            TypedKind::U8 => Ok(Self::U8(cursor.read_u8().map_err(exhausted)?)),
            TypedKind::U16 => Ok(Self::U16(
                cursor.read_u16::<LittleEndian>().map_err(exhausted)?,
            )),
            TypedKind::U32 => Ok(Self::U32(
                cursor.read_u32::<LittleEndian>().map_err(exhausted)?,
            )),
            TypedKind::I8 => Ok(Self::I8(cursor.read_i8().map_err(exhausted)?)),
            TypedKind::I16 => Ok(Self::I16(
                cursor.read_i16::<LittleEndian>().map_err(exhausted)?,
            )),
            TypedKind::I32 => Ok(Self::I32(
                cursor.read_i32::<LittleEndian>().map_err(exhausted)?,
            )),
            TypedKind::U32Scaled100 => {
                let raw = cursor.read_u32::<LittleEndian>().map_err(exhausted)?;
                Ok(Self::U32Scaled100(raw / 100))
            }
            TypedKind::StrFixed => {
                let len = fixed_len.ok_or(ParseError::BufferExhausted(tag))? as usize;
                let mut buf = vec![0u8; len];
                std::io::Read::read_exact(cursor, &mut buf).map_err(exhausted)?;
                Ok(Self::StrFixed(
                    String::from_utf8_lossy(&buf).trim_end_matches('\0').to_string(),
                ))
            }
            TypedKind::DateTime => Ok(Self::DateTime(
                cursor.read_u32::<LittleEndian>().map_err(exhausted)?,
            )),
            TypedKind::Coordinates => {
                let marker = cursor.read_u8().map_err(exhausted)?;
                let satellites = marker & 0x0F;
                let correctness = (marker >> 4) & 0x0F;
                let lat_raw = cursor.read_i32::<LittleEndian>().map_err(exhausted)?;
                let lon_raw = cursor.read_i32::<LittleEndian>().map_err(exhausted)?;
                Ok(Self::Coordinates {
                    lat: lat_raw as f64 / 1_000_000.0,
                    lon: lon_raw as f64 / 1_000_000.0,
                    satellites,
                    correctness,
                })
            }
            TypedKind::SpeedDirection => {
                let speed_raw = cursor.read_u16::<LittleEndian>().map_err(exhausted)?;
                let dir_raw = cursor.read_u16::<LittleEndian>().map_err(exhausted)?;
                Ok(Self::SpeedDirection {
                    speed_kmh: speed_raw as f32 / 10.0,
                    direction_deg: dir_raw as f32 / 10.0,
                })
            }
            TypedKind::Status => Ok(Self::Status(
                cursor.read_u16::<LittleEndian>().map_err(exhausted)?,
            )),
            TypedKind::Inputs => Ok(Self::Inputs(
                cursor.read_u16::<LittleEndian>().map_err(exhausted)?,
            )),
            TypedKind::Outputs => Ok(Self::Outputs(
                cursor.read_u16::<LittleEndian>().map_err(exhausted)?,
            )),
            TypedKind::Acceleration => {
                let raw = cursor.read_u32::<LittleEndian>().map_err(exhausted)?;
                let bytes = raw.to_le_bytes();
                Ok(Self::Acceleration {
                    x: bytes[0] as i16 - 128,
                    y: bytes[1] as i16 - 128,
                    z: bytes[2] as i16 - 128,
                    reserved: bytes[3],
                })
            }
        }
    }

    /// Re-encodes this value back into its TLV wire form (not including the
    /// tag id). Used by the §8 invariant 3 round-trip test; `Raw` values
    /// round-trip to their captured bytes verbatim.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::U8(v) => vec![*v],
            Self::U16(v) => v.to_le_bytes().to_vec(),
            Self::U32(v) => v.to_le_bytes().to_vec(),
            Self::I8(v) => vec![*v as u8],
            Self::I16(v) => v.to_le_bytes().to_vec(),
            Self::I32(v) => v.to_le_bytes().to_vec(),
            Self::U32Scaled100(v) => (v * 100).to_le_bytes().to_vec(),
            Self::StrFixed(s) => s.as_bytes().to_vec(),
            Self::DateTime(v) => v.to_le_bytes().to_vec(),
            Self::Coordinates {
                lat,
                lon,
                satellites,
                correctness,
            } => {
                let mut out = vec![(correctness << 4) | (satellites & 0x0F)];
                out.extend_from_slice(&((lat * 1_000_000.0).round() as i32).to_le_bytes());
                out.extend_from_slice(&((lon * 1_000_000.0).round() as i32).to_le_bytes());
                out
            }
            Self::SpeedDirection {
                speed_kmh,
                direction_deg,
            } => {
                let mut out = ((speed_kmh * 10.0).round() as u16).to_le_bytes().to_vec();
                out.extend_from_slice(&((direction_deg * 10.0).round() as u16).to_le_bytes());
                out
            }
            Self::Status(v) | Self::Inputs(v) | Self::Outputs(v) => v.to_le_bytes().to_vec(),
            Self::Acceleration { x, y, z, reserved } => {
                let raw = (*x as u8).wrapping_add(128) as u32
                    | ((*y as u8).wrapping_add(128) as u32) << 8
                    | ((*z as u8).wrapping_add(128) as u32) << 16
                    | (*reserved as u32) << 24;
                raw.to_le_bytes().to_vec()
            }
            Self::Raw(bytes) => bytes.clone(),
        }
    }
}

/// Bitfield readout of [`TypedValue::Status`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFlags {
    pub power_supply: bool,
    pub gps_valid: bool,
    pub gsm_valid: bool,
    pub alarm: bool,
    pub ignition: bool,
    pub movement: bool,
    pub charging: bool,
    pub low_battery: bool,
    pub gsm_signal: u8,
    pub gps_signal: u8,
    pub gsm_antenna: bool,
    pub gps_antenna: bool,
    pub output1: bool,
    pub output2: bool,
}

impl StatusFlags {
    pub fn from_bits(bits: u16) -> Self {
        Self {
            power_supply: bits & (1 << 0) != 0,
            gps_valid: bits & (1 << 1) != 0,
            gsm_valid: bits & (1 << 2) != 0,
            alarm: bits & (1 << 3) != 0,
            ignition: bits & (1 << 4) != 0,
            movement: bits & (1 << 5) != 0,
            charging: bits & (1 << 6) != 0,
            low_battery: bits & (1 << 7) != 0,
            gsm_signal: ((bits >> 8) & 0b11) as u8,
            gps_signal: ((bits >> 10) & 0b11) as u8,
            gsm_antenna: bits & (1 << 12) != 0,
            gps_antenna: bits & (1 << 13) != 0,
            output1: bits & (1 << 14) != 0,
            output2: bits & (1 << 15) != 0,
        }
    }
}

/// Decodes a 16-bit I/O bitfield into 16 per-channel booleans (§3 `Inputs`/`Outputs`).
pub fn channel_bits(bits: u16) -> [bool; 16] {
    let mut channels = [false; 16];
    for (i, channel) in channels.iter_mut().enumerate() {
        *channel = bits & (1 << i) != 0;
    }
    channels
}
