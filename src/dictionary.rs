//! Static tag dictionary: maps a tag id to {decoded type, length rule,
//! description} (§4.3). Built once from a constant table and looked up by
//! binary search, so dictionary/config state is immutable after startup and
//! safe to share by shared reference across connections (§5).

use std::sync::OnceLock;

use crate::value::TypedKind;

/// One dictionary entry. `fixed_len` is only meaningful for `StrFixed`.
#[derive(Debug, Clone, Copy)]
pub struct DictEntry {
    pub id: u16,
    pub kind: TypedKind,
    pub fixed_len: Option<u8>,
    pub description: &'static str,
}

/// The static table backing the dictionary. Primary tags use ids `0x01..0xFE`;
/// extended tags (introduced by the `0xFE` sentinel) use their full 16-bit id.
const ENTRIES: &[DictEntry] = &[
    DictEntry {
        id: 0x01,
        kind: TypedKind::U16,
        fixed_len: None,
        description: "hardware version",
    },
    DictEntry {
        id: 0x02,
        kind: TypedKind::U16,
        fixed_len: None,
        description: "firmware version",
    },
    DictEntry {
        id: 0x03,
        kind: TypedKind::StrFixed,
        fixed_len: Some(15),
        description: "IMEI",
    },
    DictEntry {
        id: 0x04,
        kind: TypedKind::U16,
        fixed_len: None,
        description: "device identifier",
    },
    DictEntry {
        id: 0x10,
        kind: TypedKind::U16,
        fixed_len: None,
        description: "record sequence number",
    },
    DictEntry {
        id: 0x20,
        kind: TypedKind::DateTime,
        fixed_len: None,
        description: "record timestamp (epoch seconds)",
    },
    DictEntry {
        id: 0x30,
        kind: TypedKind::Coordinates,
        fixed_len: None,
        description: "coordinates with satellite/correctness nibbles",
    },
    DictEntry {
        id: 0x33,
        kind: TypedKind::SpeedDirection,
        fixed_len: None,
        description: "speed and direction",
    },
    DictEntry {
        id: 0x34,
        kind: TypedKind::U8,
        fixed_len: None,
        description: "HDOP",
    },
    DictEntry {
        id: 0x40,
        kind: TypedKind::Status,
        fixed_len: None,
        description: "device status bitfield",
    },
    DictEntry {
        id: 0x41,
        kind: TypedKind::Inputs,
        fixed_len: None,
        description: "digital inputs",
    },
    DictEntry {
        id: 0x42,
        kind: TypedKind::Outputs,
        fixed_len: None,
        description: "digital outputs",
    },
    DictEntry {
        id: 0x45,
        kind: TypedKind::U16,
        fixed_len: None,
        description: "analog input 0",
    },
    DictEntry {
        id: 0x46,
        kind: TypedKind::U16,
        fixed_len: None,
        description: "analog input 1",
    },
    DictEntry {
        id: 0x47,
        kind: TypedKind::U16,
        fixed_len: None,
        description: "analog input 2",
    },
    DictEntry {
        id: 0x48,
        kind: TypedKind::U16,
        fixed_len: None,
        description: "analog input 3",
    },
    DictEntry {
        id: 0x50,
        kind: TypedKind::U8,
        fixed_len: None,
        description: "GSM signal level",
    },
    DictEntry {
        id: 0x5A,
        kind: TypedKind::Acceleration,
        fixed_len: None,
        description: "accelerometer triple",
    },
    DictEntry {
        id: 0x63,
        kind: TypedKind::U16,
        fixed_len: None,
        description: "battery voltage (mV)",
    },
    DictEntry {
        id: 0xC0,
        kind: TypedKind::U32,
        fixed_len: None,
        description: "user data 0",
    },
    DictEntry {
        id: 0xC1,
        kind: TypedKind::U32,
        fixed_len: None,
        description: "user data 1",
    },
    DictEntry {
        id: 0xC2,
        kind: TypedKind::U32,
        fixed_len: None,
        description: "user data 2",
    },
    DictEntry {
        id: 0xC3,
        kind: TypedKind::U32,
        fixed_len: None,
        description: "user data 3",
    },
    DictEntry {
        id: 0xC4,
        kind: TypedKind::U32,
        fixed_len: None,
        description: "user data 4",
    },
];

fn sorted_entries() -> &'static [DictEntry] {
    static SORTED: OnceLock<Vec<DictEntry>> = OnceLock::new();
    SORTED.get_or_init(|| {
        let mut entries = ENTRIES.to_vec();
        entries.sort_by_key(|e| e.id);
        entries
    })
}

/// Looks up a primary (`0x01..0xFE`) or extended (16-bit) tag id.
pub fn lookup(id: u16) -> Option<&'static DictEntry> {
    let entries = sorted_entries();
    entries
        .binary_search_by_key(&id, |e| e.id)
        .ok()
        .map(|idx| &entries[idx])
}

/// Whether `id` falls in the extended-tag Modbus register mirror range
/// (`0x0001..=0x0031`), decoded as uint32-LE ÷ 100 regardless of whether a
/// dedicated dictionary entry exists for it (§3).
pub fn is_modbus_mirror(id: u16) -> bool {
    (0x0001..=0x0031).contains(&id)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn imei_entry_is_fixed_15_bytes() {
        let entry = lookup(0x03).expect("IMEI tag must be in the dictionary");
        assert_eq!(entry.kind, TypedKind::StrFixed);
        assert_eq!(entry.fixed_len, Some(15));
    }

    #[test]
    fn unknown_tag_is_absent() {
        assert!(lookup(0x99).is_none());
    }

    #[test]
    fn modbus_mirror_range() {
        assert!(is_modbus_mirror(0x0001));
        assert!(is_modbus_mirror(0x0031));
        assert!(!is_modbus_mirror(0x0032));
        assert!(!is_modbus_mirror(0x0000));
    }
}
