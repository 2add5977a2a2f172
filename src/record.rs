//! [`Record`]: an insertion-ordered tag map, plus the extended-tag block
//! reader shared by every record kind (§3, §4.4).

use byteorder::{LittleEndian, ReadBytesExt};
use indexmap::IndexMap;
use std::io::Cursor;

use crate::dictionary::{self, is_modbus_mirror};
use crate::error::{ParseError, ParseResult};
use crate::value::{TypedKind, TypedValue};

/// Sentinel primary tag introducing an extended-tag block (§3).
pub const EXTENDED_TAG_SENTINEL: u8 = 0xFE;

/// Tag `0x10`: record sequence number, used as the record-boundary marker
/// in multi-record payloads (§3, §4.4).
pub const RECORD_BOUNDARY_TAG: u8 = 0x10;

/// Tag `0x03`: IMEI, inherited across records on a connection (§3, §4.4).
pub const IMEI_TAG: u16 = 0x03;

/// An insertion-ordered mapping from tag id to decoded value. Primary tags
/// are stored under their `u8` value widened to `u16`; extended tags are
/// stored under their full 16-bit id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    tags: IndexMap<u16, TypedValue>,
    /// IMEI resolved for this record, either decoded directly from tag
    /// `0x03` or inherited from the connection's `lastIMEI` (§3, §4.4).
    pub imei: Option<String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: u16, value: TypedValue) {
        self.tags.insert(tag, value);
    }

    pub fn get(&self, tag: u16) -> Option<&TypedValue> {
        self.tags.get(&tag)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u16, &TypedValue)> {
        self.tags.iter()
    }

    /// Tag `0x10`, the record sequence number used for sink idempotency keys
    /// (§6: `persist` is idempotent by `(imei, timestamp, recordNumber)`).
    pub fn record_number(&self) -> Option<u16> {
        match self.tags.get(&(RECORD_BOUNDARY_TAG as u16)) {
            Some(TypedValue::U16(n)) => Some(*n),
            _ => None,
        }
    }

    /// Tag `0x20`, the record timestamp, if present.
    pub fn timestamp(&self) -> Option<u32> {
        match self.tags.get(&0x20) {
            Some(TypedValue::DateTime(ts)) => Some(*ts),
            _ => None,
        }
    }
}

/// Reads one primary-tag value (including a nested extended-tag block if
/// the tag is the `0xFE` sentinel) into `record`, applying the dictionary
/// lookup and unknown-tag skip heuristic from §4.3.
///
/// `emit_raw_unknown_tags` controls whether bytes skipped by the heuristic
/// are kept as a `Raw` value or simply discarded (§6 `parser.emitRawUnknownTags`).
///
/// Returns the tag id actually consumed, so callers can detect the record
/// boundary tag without a second lookup.
pub fn decode_one_tag(
    record: &mut Record,
    cursor: &mut Cursor<&[u8]>,
    emit_raw_unknown_tags: bool,
) -> ParseResult<u16> {
    let tag = cursor
        .read_u8()
        .map_err(|_| ParseError::BufferExhausted(0xFFFF))?;

    if tag == EXTENDED_TAG_SENTINEL {
        decode_extended_block(record, cursor, emit_raw_unknown_tags)?;
        return Ok(tag as u16);
    }

    match dictionary::lookup(tag as u16) {
        Some(entry) => {
            let value = TypedValue::decode(entry.kind, entry.fixed_len, tag as u16, cursor)?;
            record.insert(tag as u16, value);
        }
        None => {
            if let Some(value) = decode_unknown_primary(tag, cursor, emit_raw_unknown_tags)? {
                record.insert(tag as u16, value);
            }
        }
    }
    Ok(tag as u16)
}

/// Unknown-tag skip heuristic (§4.3): conservative byte counts chosen to
/// keep parsing moving when firmware ships a tag newer than the dictionary.
/// This is an intentionally lossy fallback — when `emit_raw_unknown_tags`
/// is set the skipped bytes are kept verbatim in a `Raw` value, never
/// silently discarded; otherwise the bytes are consumed but no tag is
/// recorded.
fn decode_unknown_primary(
    tag: u8,
    cursor: &mut Cursor<&[u8]>,
    emit_raw_unknown_tags: bool,
) -> ParseResult<Option<TypedValue>> {
    let skip = if tag < 0x80 {
        if (0x30..=0x3F).contains(&tag) {
            2
        } else if (0x40..=0x4F).contains(&tag) {
            4
        } else {
            1
        }
    } else {
        4
    };
    let mut buf = vec![0u8; skip];
    std::io::Read::read_exact(cursor, &mut buf)
        .map_err(|_| ParseError::BufferExhausted(tag as u16))?;
    Ok(emit_raw_unknown_tags.then_some(TypedValue::Raw(buf)))
}

/// Reads a `0xFE`-sentinel extended-tag block: `BlockLen(2 LE)` followed by
/// `(TagId16(2 LE) | Value)*` until `BlockLen` bytes are consumed (§3, §4.4).
fn decode_extended_block(
    record: &mut Record,
    cursor: &mut Cursor<&[u8]>,
    emit_raw_unknown_tags: bool,
) -> ParseResult<()> {
    let block_len = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| ParseError::BufferExhausted(EXTENDED_TAG_SENTINEL as u16))? as u64;

    let block_start = cursor.position();
    let block_end = block_start + block_len;

    while cursor.position() < block_end {
        let tag16 = cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| ParseError::BufferExhausted(EXTENDED_TAG_SENTINEL as u16))?;

        // Modbus mirror range takes priority over the dictionary: ids in
        // 0x0001..=0x0031 numerically collide with primary-tag entries
        // (e.g. 0x0003 is also the primary IMEI tag), and those primary
        // entries' kind/length must never be applied to an extended id in
        // this range (§3).
        let value = if is_modbus_mirror(tag16) {
            Some(TypedValue::decode(TypedKind::U32Scaled100, None, tag16, cursor)?)
        } else if let Some(entry) = dictionary::lookup(tag16) {
            Some(TypedValue::decode(entry.kind, entry.fixed_len, tag16, cursor)?)
        } else {
            decode_unknown_extended(tag16, cursor, emit_raw_unknown_tags)?
        };
        if let Some(value) = value {
            record.insert(tag16, value);
        }
    }
    Ok(())
}

fn decode_unknown_extended(
    tag: u16,
    cursor: &mut Cursor<&[u8]>,
    emit_raw_unknown_tags: bool,
) -> ParseResult<Option<TypedValue>> {
    // Conservative default for unknown extended tags: 4 bytes, matching the
    // `id >= 0x80` heuristic for primary tags (§4.3).
    let mut buf = vec![0u8; 4];
    std::io::Read::read_exact(cursor, &mut buf).map_err(|_| ParseError::BufferExhausted(tag))?;
    Ok(emit_raw_unknown_tags.then_some(TypedValue::Raw(buf)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_record_reports_empty() {
        let record = Record::new();
        assert!(record.is_empty());
    }

    #[test]
    fn decode_imei_tag() {
        let mut payload = vec![0x03];
        payload.extend_from_slice(b"864173042101234");
        let mut cursor = Cursor::new(payload.as_slice());
        let mut record = Record::new();
        decode_one_tag(&mut record, &mut cursor, true).unwrap();
        assert_eq!(
            record.get(0x03),
            Some(&TypedValue::StrFixed("864173042101234".to_string()))
        );
    }

    #[test]
    fn extended_block_decodes_modbus_mirror() {
        let mut payload = vec![0xFE];
        // block length 6: 2-byte tag id + 4-byte value
        payload.extend_from_slice(&6u16.to_le_bytes());
        payload.extend_from_slice(&0x0005u16.to_le_bytes());
        payload.extend_from_slice(&12_345u32.to_le_bytes());

        let mut cursor = Cursor::new(payload.as_slice());
        let mut record = Record::new();
        decode_one_tag(&mut record, &mut cursor, true).unwrap();
        assert_eq!(record.get(0x0005), Some(&TypedValue::U32Scaled100(123)));
    }

    #[test]
    fn extended_modbus_mirror_wins_over_colliding_primary_dictionary_entry() {
        // 0x0003 collides with the primary IMEI tag (StrFixed, 15 bytes), but
        // it falls inside the 0x0001..=0x0031 Modbus mirror range, so it must
        // decode as U32Scaled100, not StrFixed.
        let mut payload = vec![0xFE];
        payload.extend_from_slice(&6u16.to_le_bytes());
        payload.extend_from_slice(&0x0003u16.to_le_bytes());
        payload.extend_from_slice(&45_600u32.to_le_bytes());

        let mut cursor = Cursor::new(payload.as_slice());
        let mut record = Record::new();
        decode_one_tag(&mut record, &mut cursor, true).unwrap();
        assert_eq!(record.get(0x0003), Some(&TypedValue::U32Scaled100(456)));
    }

    #[test]
    fn unknown_tag_in_0x30_range_skips_two_bytes() {
        let payload = [0x3A, 0xAB, 0xCD, 0x99];
        let mut cursor = Cursor::new(&payload[..]);
        let mut record = Record::new();
        decode_one_tag(&mut record, &mut cursor, true).unwrap();
        assert_eq!(
            record.get(0x3A),
            Some(&TypedValue::Raw(vec![0xAB, 0xCD]))
        );
        assert_eq!(cursor.position(), 3);
    }

    #[test]
    fn unknown_tag_above_0x80_skips_four_bytes() {
        let payload = [0x90, 1, 2, 3, 4, 0xFF];
        let mut cursor = Cursor::new(&payload[..]);
        let mut record = Record::new();
        decode_one_tag(&mut record, &mut cursor, true).unwrap();
        assert_eq!(
            record.get(0x90),
            Some(&TypedValue::Raw(vec![1, 2, 3, 4]))
        );
        assert_eq!(cursor.position(), 5);
    }

    #[test]
    fn emit_raw_unknown_tags_false_consumes_without_recording() {
        let payload = [0x90, 1, 2, 3, 4, 0xFF];
        let mut cursor = Cursor::new(&payload[..]);
        let mut record = Record::new();
        decode_one_tag(&mut record, &mut cursor, false).unwrap();
        assert_eq!(record.get(0x90), None);
        assert_eq!(cursor.position(), 5);
    }
}
