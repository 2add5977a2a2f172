//! Wire-level packet framing: `Header(1) | Length(2 LE) | Payload | CRC(2 LE)`.

/// The header byte's meaning, dispatching how the payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    /// `0x01` — carries one or more [`crate::record::Record`]s. Requires an ack.
    Main,
    /// `0x15` — no records, acknowledge only.
    Ignorable,
    /// `0x02` — echoed back by the server; devices are not expected to send it.
    Confirmation,
    /// Any other header byte: pass-through with raw bytes, still CRC-checked.
    Extension(u8),
}

impl HeaderKind {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => Self::Main,
            0x15 => Self::Ignorable,
            0x02 => Self::Confirmation,
            other => Self::Extension(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Main => 0x01,
            Self::Ignorable => 0x15,
            Self::Confirmation => 0x02,
            Self::Extension(b) => b,
        }
    }

    /// Whether frames of this kind require a confirmation write-back.
    pub fn requires_ack(self) -> bool {
        matches!(self, Self::Main | Self::Ignorable)
    }
}

/// One fully reconstructed, CRC-validated frame as handed from the [`crate::framer::Framer`]
/// to the Record Parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: HeaderKind,
    /// `Length & 0x7FFF` — the effective payload length.
    pub payload_len: usize,
    pub payload: Vec<u8>,
    /// Bit 15 of the raw length field: device still holds unsent archive data.
    pub has_unsent_data: bool,
    /// The exact bytes received for this frame (header through CRC), needed
    /// verbatim to compute the additive ack checksum in §4.5.
    pub raw_frame: Vec<u8>,
}

impl Packet {
    /// Total wire size of this frame: `3 + payload_len + 2`.
    pub fn wire_len(&self) -> usize {
        3 + self.payload_len + 2
    }
}
