use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::text::{decode_text, encode_text_into};

pub const PAYLOAD_SIZE: usize = 332;
pub const HEADER_SIZE: usize = 4;
pub const BLOCK_SIZE: usize = PAYLOAD_SIZE + HEADER_SIZE;
pub const TEXT_FIELD_SIZE: usize = 40;
pub const CRC_TABLE_SIZE: usize = 512;

const CRC_SEED: u16 = 0x1121;

mod offsets {
    pub const EVENT_ID: usize = 0x00;
    pub const ICON: usize = 0x02;
    pub const COUNT: usize = 0x04;
    pub const TYPE_COLOR_RESEND: usize = 0x08;
    pub const STAMP_MAX: usize = 0x09;
    pub const TITLE: usize = 0x0A;
    pub const SUBTITLE: usize = 0x32;
    pub const CONTENT: [usize; 4] = [0x5A, 0x82, 0xAA, 0xD2];
    pub const WARNING: [usize; 2] = [0xFA, 0x122];
}

/// Well-known icon species values.
pub mod icons {
    pub const NONE: u16 = 0x0000;
    pub const BULBASAUR: u16 = 0x0001;
    pub const DEOXYS: u16 = 0x00F9;
    pub const QUESTION_MARK: u16 = 0xFFFF;
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("CRC table must be {expected} bytes, got {got}")]
    InvalidCrcTable { expected: usize, got: usize },
}

/// Caller-supplied CRC16 lookup table: 256 little-endian u16 entries.
#[derive(Clone)]
pub struct CrcTable {
    entries: [u16; 256],
}

impl CrcTable {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != CRC_TABLE_SIZE {
            return Err(CodecError::InvalidCrcTable {
                expected: CRC_TABLE_SIZE,
                got: bytes.len(),
            });
        }
        let mut entries = [0u16; 256];
        for (entry, pair) in entries.iter_mut().zip(bytes.chunks_exact(2)) {
            *entry = u16::from_le_bytes([pair[0], pair[1]]);
        }
        Ok(Self { entries })
    }

    pub fn entry(&self, index: u8) -> u16 {
        self.entries[index as usize]
    }
}

impl std::fmt::Debug for CrcTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CrcTable({:#06x}, ..)", self.entries[1])
    }
}

/// CRC16 used by both gift-card and script blocks.
pub fn calculate_crc16(bytes: &[u8], table: &CrcTable) -> u16 {
    let mut crc = CRC_SEED;
    for &b in bytes {
        let idx = ((crc ^ b as u16) & 0xFF) as u8;
        crc = table.entry(idx) ^ (crc >> 8);
    }
    !crc
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum GiftType {
    Event,
    Stamp,
    Counter,
}

impl GiftType {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0x03 {
            0 => Some(GiftType::Event),
            1 => Some(GiftType::Stamp),
            2 => Some(GiftType::Counter),
            _ => None,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            GiftType::Event => 0,
            GiftType::Stamp => 1,
            GiftType::Counter => 2,
        }
    }
}

const TYPE_MASK: u8 = 0x03;
const COLOR_SHIFT: u8 = 2;
const COLOR_MASK: u8 = 0x07 << COLOR_SHIFT;
const RESEND_BIT: u8 = 0x40;

/// Decoded 332-byte gift-card payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GiftCardRecord {
    pub event_id: u16,
    pub icon: u16,
    pub count: u32,
    pub type_color_resend: u8,
    pub stamp_max: u8,
    pub title: String,
    pub subtitle: String,
    pub content: [String; 4],
    pub warning: [String; 2],
}

impl GiftCardRecord {
    pub fn is_empty(&self) -> bool {
        self.event_id == 0 && self.icon == 0
    }

    pub fn icon_hidden(&self) -> bool {
        self.icon == icons::QUESTION_MARK
    }

    pub fn gift_type(&self) -> Option<GiftType> {
        GiftType::from_bits(self.type_color_resend)
    }

    pub fn color(&self) -> u8 {
        (self.type_color_resend & COLOR_MASK) >> COLOR_SHIFT
    }

    pub fn resend(&self) -> bool {
        self.type_color_resend & RESEND_BIT != 0
    }

    pub fn set_gift_type(&mut self, ty: GiftType) {
        self.type_color_resend = (self.type_color_resend & !TYPE_MASK) | ty.bits();
    }

    pub fn set_color(&mut self, color: u8) {
        self.type_color_resend =
            (self.type_color_resend & !COLOR_MASK) | ((color << COLOR_SHIFT) & COLOR_MASK);
    }

    pub fn set_resend(&mut self, resend: bool) {
        if resend {
            self.type_color_resend |= RESEND_BIT;
        } else {
            self.type_color_resend &= !RESEND_BIT;
        }
    }

    /// Encoded payload prefixed with its `crc16 LE, 00, 00` header.
    pub fn header_block(&self, table: &CrcTable) -> [u8; BLOCK_SIZE] {
        let payload = encode_gift_card(self);
        let mut block = [0u8; BLOCK_SIZE];
        block[..2].copy_from_slice(&calculate_crc16(&payload, table).to_le_bytes());
        block[HEADER_SIZE..].copy_from_slice(&payload);
        block
    }
}

fn text_field(payload: &[u8], offset: usize) -> String {
    decode_text(&payload[offset..offset + TEXT_FIELD_SIZE], TEXT_FIELD_SIZE)
}

/// Parses a gift card from a 332-byte payload or a 336-byte headed block.
/// Anything shorter than a payload yields an empty record.
pub fn parse_gift_card(bytes: &[u8]) -> GiftCardRecord {
    let payload = if bytes.len() == BLOCK_SIZE {
        &bytes[HEADER_SIZE..]
    } else {
        bytes
    };
    if payload.len() < PAYLOAD_SIZE {
        return GiftCardRecord::default();
    }

    GiftCardRecord {
        event_id: u16::from_le_bytes([payload[offsets::EVENT_ID], payload[offsets::EVENT_ID + 1]]),
        icon: u16::from_le_bytes([payload[offsets::ICON], payload[offsets::ICON + 1]]),
        count: u32::from_le_bytes([
            payload[offsets::COUNT],
            payload[offsets::COUNT + 1],
            payload[offsets::COUNT + 2],
            payload[offsets::COUNT + 3],
        ]),
        type_color_resend: payload[offsets::TYPE_COLOR_RESEND],
        stamp_max: payload[offsets::STAMP_MAX],
        title: text_field(payload, offsets::TITLE),
        subtitle: text_field(payload, offsets::SUBTITLE),
        content: offsets::CONTENT.map(|off| text_field(payload, off)),
        warning: offsets::WARNING.map(|off| text_field(payload, off)),
    }
}

pub fn encode_gift_card(record: &GiftCardRecord) -> [u8; PAYLOAD_SIZE] {
    let mut out = [0u8; PAYLOAD_SIZE];
    out[offsets::EVENT_ID..offsets::EVENT_ID + 2].copy_from_slice(&record.event_id.to_le_bytes());
    out[offsets::ICON..offsets::ICON + 2].copy_from_slice(&record.icon.to_le_bytes());
    out[offsets::COUNT..offsets::COUNT + 4].copy_from_slice(&record.count.to_le_bytes());
    out[offsets::TYPE_COLOR_RESEND] = record.type_color_resend;
    out[offsets::STAMP_MAX] = record.stamp_max;

    let mut put = |offset: usize, text: &str| {
        encode_text_into(&mut out[offset..offset + TEXT_FIELD_SIZE], text);
    };
    put(offsets::TITLE, &record.title);
    put(offsets::SUBTITLE, &record.subtitle);
    for (off, line) in offsets::CONTENT.iter().zip(&record.content) {
        put(*off, line);
    }
    for (off, line) in offsets::WARNING.iter().zip(&record.warning) {
        put(*off, line);
    }
    out
}

#[cfg(test)]
pub(crate) fn identity_crc_table() -> CrcTable {
    let mut bytes = Vec::with_capacity(CRC_TABLE_SIZE);
    for i in 0u16..256 {
        bytes.extend_from_slice(&i.to_le_bytes());
    }
    CrcTable::from_bytes(&bytes).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::encode_text;

    fn test_payload() -> Vec<u8> {
        let mut p = vec![0u8; PAYLOAD_SIZE];
        p[0..2].copy_from_slice(&0x0123u16.to_le_bytes());
        p[2..4].copy_from_slice(&icons::DEOXYS.to_le_bytes());
        p[4..8].copy_from_slice(&7u32.to_le_bytes());
        p[8] = 0x40 | (5 << 2) | 1;
        p[9] = 3;
        p[0x0A..0x0A + 4].copy_from_slice(&encode_text("TEST", 4));
        p[0x5A..0x5A + 5].copy_from_slice(&encode_text("Hello", 5));
        p
    }

    #[test]
    fn crc_of_empty_input_is_inverted_seed() {
        let table = identity_crc_table();
        assert_eq!(calculate_crc16(&[], &table), !0x1121u16);
        assert_eq!(calculate_crc16(&[], &table), 0xEEDE);
    }

    #[test]
    fn crc_golden_vector() {
        // idx 0x20 -> 0x20 ^ 0x11 = 0x31; idx 0x33 -> 0x33 ^ 0x00 = 0x33
        let table = identity_crc_table();
        assert_eq!(calculate_crc16(&[0x01, 0x02], &table), 0xFFCC);

        let zeros = CrcTable::from_bytes(&[0u8; CRC_TABLE_SIZE]).unwrap();
        assert_eq!(calculate_crc16(&[0x00], &zeros), 0xFFEE);
    }

    #[test]
    fn rejects_short_crc_table() {
        let err = CrcTable::from_bytes(&[0u8; 100]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidCrcTable { got: 100, .. }));
    }

    #[test]
    fn parses_numeric_and_packed_fields() {
        let card = parse_gift_card(&test_payload());
        assert_eq!(card.event_id, 0x0123);
        assert_eq!(card.icon, icons::DEOXYS);
        assert_eq!(card.count, 7);
        assert_eq!(card.gift_type(), Some(GiftType::Stamp));
        assert_eq!(card.color(), 5);
        assert!(card.resend());
        assert_eq!(card.stamp_max, 3);
        assert_eq!(card.title.trim_end(), "TEST");
        assert_eq!(card.content[0].trim_end(), "Hello");
        assert!(!card.is_empty());
    }

    #[test]
    fn gift_card_round_trip_is_byte_exact() {
        let payload = test_payload();
        let card = parse_gift_card(&payload);
        assert_eq!(encode_gift_card(&card).to_vec(), payload);
    }

    #[test]
    fn headed_block_is_accepted_and_short_input_is_empty() {
        let table = identity_crc_table();
        let card = parse_gift_card(&test_payload());
        let block = card.header_block(&table);
        assert_eq!(parse_gift_card(&block), card);
        assert_eq!(
            u16::from_le_bytes([block[0], block[1]]),
            calculate_crc16(&block[HEADER_SIZE..], &table)
        );
        assert!(parse_gift_card(&[1, 2, 3]).is_empty());
    }

    #[test]
    fn setters_only_touch_their_bits() {
        let mut card = GiftCardRecord::default();
        card.set_resend(true);
        card.set_color(7);
        card.set_gift_type(GiftType::Counter);
        assert_eq!(card.type_color_resend, 0x40 | 0x1C | 0x02);
        card.set_color(1);
        assert_eq!(card.type_color_resend, 0x40 | 0x04 | 0x02);
        card.set_resend(false);
        assert_eq!(card.gift_type(), Some(GiftType::Counter));
        assert!(!card.resend());
    }
}
