use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::gift::{self, calculate_crc16, encode_gift_card, parse_gift_card, CrcTable, GiftCardRecord};

pub const SAVE_SIZE: usize = 131_072;
pub const SECTION_SIZE: usize = 0x1000;
pub const SECTIONS_PER_SLOT: usize = 14;
pub const SLOT_SIZE: usize = SECTION_SIZE * SECTIONS_PER_SLOT;

const SECTION_ID_OFFSET: usize = 0xFF4;
const CHECKSUM_OFFSET: usize = 0xFF6;
const SIGNATURE_OFFSET: usize = 0xFF8;
const SAVE_COUNTER_OFFSET: usize = 0xFFC;
pub const SECTION_SIGNATURE: u32 = 0x0801_2025;

const CHECKSUM_LENGTH_DEFAULT: usize = 0xF80;

// Trainer info lives in logical section 0.
const GAME_CODE_OFFSET: usize = 0xAC;
const SECURITY_KEY_OFFSET: usize = 0xB0;

pub const GIFT_SECTION_ID: u16 = 4;
const FLAG_SECTION_ID: u16 = 2;

pub const SCRIPT_PAYLOAD_SIZE: usize = 1000;
pub const SCRIPT_BLOCK_SIZE: usize = SCRIPT_PAYLOAD_SIZE + gift::HEADER_SIZE;
pub const RAM_SCRIPT_MAGIC: u8 = 0x33;

const METADATA_SIZE: usize = 32;
const METADATA_ICON_OFFSET: usize = 6;
const TRAINER_IDS_SIZE: usize = 40;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum GameVariant {
    Unknown,
    FireRedLeafGreen,
    RubySapphire,
    Emerald,
}

impl fmt::Display for GameVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GameVariant::Unknown => "Unknown",
            GameVariant::FireRedLeafGreen => "FireRed/LeafGreen",
            GameVariant::RubySapphire => "Ruby/Sapphire",
            GameVariant::Emerald => "Emerald",
        };
        f.write_str(name)
    }
}

/// Byte offsets of the gift sub-blocks inside the gift section, plus the
/// Mystery Gift enable bit inside logical section 2.
#[derive(Copy, Clone, Debug)]
struct GiftLayout {
    card: usize,
    script: usize,
    metadata: usize,
    trainer_ids: usize,
    flag_offset: usize,
    flag_bit: u8,
}

impl GameVariant {
    fn gift_layout(self) -> Option<GiftLayout> {
        match self {
            GameVariant::FireRedLeafGreen => Some(GiftLayout {
                card: 0x460,
                script: 0x79C,
                metadata: 0x5B4,
                trainer_ids: 0x75C,
                flag_offset: 0x067,
                flag_bit: 0x02,
            }),
            GameVariant::Emerald => Some(GiftLayout {
                card: 0x56C,
                script: 0x8A8,
                metadata: 0x6C0,
                trainer_ids: 0x868,
                flag_offset: 0x40B,
                flag_bit: 0x08,
            }),
            GameVariant::RubySapphire | GameVariant::Unknown => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid save size: {got} bytes (expected {expected})")]
    SizeInvalid { expected: usize, got: usize },

    #[error("section {id} not found in the active slot")]
    SectionNotFound { id: u16 },

    #[error("{action} is not supported for {variant} saves")]
    UnsupportedGame {
        variant: GameVariant,
        action: &'static str,
    },

    #[error(
        "checksum mismatch in section {id} (position {position}): stored {stored:#06x}, computed {computed:#06x}"
    )]
    ChecksumMismatch {
        position: usize,
        id: u16,
        stored: u16,
        computed: u16,
    },

    #[error("{what} must be {expected} bytes, got {got}")]
    InvalidPayloadSize {
        what: &'static str,
        expected: &'static str,
        got: usize,
    },
}

pub type Result<T> = std::result::Result<T, SaveError>;

/// Which parts of the gift section are reset before a new card is written.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionOptions {
    pub clear_metadata: bool,
    pub clear_trainer_ids: bool,
}

impl Default for InjectionOptions {
    fn default() -> Self {
        Self {
            clear_metadata: true,
            clear_trainer_ids: false,
        }
    }
}

/// Result of checking one physical section against its footer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SectionMismatch {
    pub position: usize,
    pub id: u16,
    pub stored: u16,
    pub computed: u16,
}

impl From<SectionMismatch> for SaveError {
    fn from(m: SectionMismatch) -> Self {
        SaveError::ChecksumMismatch {
            position: m.position,
            id: m.id,
            stored: m.stored,
            computed: m.computed,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SlotReport {
    pub slot: usize,
    pub valid: bool,
    pub save_counter: u32,
    pub variant: GameVariant,
    pub mismatches: Vec<SectionMismatch>,
    pub missing_signature: bool,
    pub duplicate_ids: bool,
}

/// Sums little-endian words over `length` bytes and folds the carry once.
pub fn compute_section_checksum(data: &[u8], length: usize) -> u16 {
    let length = length.min(data.len());
    let sum = data[..length]
        .chunks_exact(4)
        .map(LittleEndian::read_u32)
        .fold(0u32, u32::wrapping_add);
    ((sum & 0xFFFF) + (sum >> 16)) as u16
}

/// Number of bytes covered by the checksum of a logical section.
pub fn checksum_length(id: u16, variant: GameVariant) -> usize {
    match (id, variant) {
        (0, GameVariant::Emerald) => 0xF2C,
        (0, GameVariant::FireRedLeafGreen) => 0xF24,
        (0, _) => 0x890,
        (4, GameVariant::Emerald) => 0xF08,
        (4, _) => 0xEE8,
        (13, _) => 0x7D0,
        _ => CHECKSUM_LENGTH_DEFAULT,
    }
}

fn section_id(section: &[u8]) -> u16 {
    LittleEndian::read_u16(&section[SECTION_ID_OFFSET..])
}

fn stored_checksum(section: &[u8]) -> u16 {
    LittleEndian::read_u16(&section[CHECKSUM_OFFSET..])
}

fn slot_sections(bytes: &[u8], slot: usize) -> impl Iterator<Item = &[u8]> {
    bytes[slot * SLOT_SIZE..(slot + 1) * SLOT_SIZE].chunks_exact(SECTION_SIZE)
}

fn detect_variant(bytes: &[u8], slot: usize) -> GameVariant {
    let Some(section0) = slot_sections(bytes, slot).find(|s| section_id(s) == 0) else {
        return GameVariant::Unknown;
    };
    let game_code = LittleEndian::read_u32(&section0[GAME_CODE_OFFSET..]);
    let security_key = LittleEndian::read_u32(&section0[SECURITY_KEY_OFFSET..]);

    if game_code == 1 {
        GameVariant::FireRedLeafGreen
    } else if security_key != 0 {
        GameVariant::Emerald
    } else if game_code == 0 {
        GameVariant::RubySapphire
    } else {
        GameVariant::Unknown
    }
}

/// Validates one slot using the game variant found in its own section 0.
pub fn analyze_slot(bytes: &[u8], slot: usize) -> SlotReport {
    let variant = detect_variant(bytes, slot);
    let mut seen = [false; SECTIONS_PER_SLOT];
    let mut mismatches = Vec::new();
    let mut missing_signature = false;
    let mut duplicate_ids = false;
    let mut save_counter = 0;

    for (position, section) in slot_sections(bytes, slot).enumerate() {
        let id = section_id(section);
        if position == 0 {
            save_counter = LittleEndian::read_u32(&section[SAVE_COUNTER_OFFSET..]);
        }
        if LittleEndian::read_u32(&section[SIGNATURE_OFFSET..]) != SECTION_SIGNATURE {
            missing_signature = true;
        }
        match seen.get_mut(id as usize) {
            Some(flag) if !*flag => *flag = true,
            _ => duplicate_ids = true,
        }

        let stored = stored_checksum(section);
        let computed = compute_section_checksum(section, checksum_length(id, variant));
        if stored != computed {
            mismatches.push(SectionMismatch {
                position,
                id,
                stored,
                computed,
            });
        }
    }

    SlotReport {
        slot,
        valid: mismatches.is_empty() && !missing_signature && !duplicate_ids,
        save_counter,
        variant,
        mismatches,
        missing_signature,
        duplicate_ids,
    }
}

/// A valid slot beats an invalid one; otherwise the higher save counter
/// wins, with ties going to slot 1.
pub fn detect_active_slot(bytes: &[u8]) -> usize {
    let a = analyze_slot(bytes, 0);
    let b = analyze_slot(bytes, 1);
    debug!(
        "slot 0: valid={} counter={}; slot 1: valid={} counter={}",
        a.valid, a.save_counter, b.valid, b.save_counter
    );
    match (a.valid, b.valid) {
        (true, false) => 0,
        (false, true) => 1,
        _ if a.save_counter > b.save_counter => 0,
        _ => 1,
    }
}

/// A 128 KiB flash save with two redundant slots.
///
/// The logical-id index for the active slot is built once at load time.
/// Writes never change a section's footer id, so it stays valid for the
/// lifetime of the container.
#[derive(Clone, Debug)]
pub struct SaveContainer {
    bytes: Vec<u8>,
    active_slot: usize,
    variant: GameVariant,
    index: [Option<usize>; SECTIONS_PER_SLOT],
}

impl SaveContainer {
    pub fn load(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != SAVE_SIZE {
            return Err(SaveError::SizeInvalid {
                expected: SAVE_SIZE,
                got: bytes.len(),
            });
        }

        let active_slot = detect_active_slot(&bytes);
        let variant = detect_variant(&bytes, active_slot);
        let mut index = [None; SECTIONS_PER_SLOT];
        for (position, section) in slot_sections(&bytes, active_slot).enumerate() {
            if let Some(entry) = index.get_mut(section_id(section) as usize) {
                entry.get_or_insert(position);
            }
        }
        info!("save loaded: {variant}, active slot {active_slot}");

        Ok(Self {
            bytes,
            active_slot,
            variant,
            index,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::load(fs::read(path)?)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn active_slot(&self) -> usize {
        self.active_slot
    }

    pub fn variant(&self) -> GameVariant {
        self.variant
    }

    pub fn slot_report(&self, slot: usize) -> SlotReport {
        analyze_slot(&self.bytes, slot.min(1))
    }

    /// Recomputes active-slot selection from the current bytes.
    pub fn detect_active_slot(&self) -> usize {
        detect_active_slot(&self.bytes)
    }

    /// Lists every section of the active slot whose stored checksum differs
    /// from the computed one. Nothing is corrected.
    pub fn validate_active_slot(&self) -> Vec<SectionMismatch> {
        analyze_slot(&self.bytes, self.active_slot).mismatches
    }

    pub fn ensure_valid(&self) -> Result<()> {
        match self.validate_active_slot().into_iter().next() {
            Some(mismatch) => Err(mismatch.into()),
            None => Ok(()),
        }
    }

    pub fn find_section_by_logical_id(&self, id: u16) -> Option<usize> {
        self.index.get(id as usize).copied().flatten()
    }

    fn section_range(&self, id: u16) -> Result<Range<usize>> {
        let position = self
            .find_section_by_logical_id(id)
            .ok_or(SaveError::SectionNotFound { id })?;
        let start = self.active_slot * SLOT_SIZE + position * SECTION_SIZE;
        Ok(start..start + SECTION_SIZE)
    }

    pub fn section(&self, id: u16) -> Result<&[u8]> {
        let range = self.section_range(id)?;
        Ok(&self.bytes[range])
    }

    fn section_mut(&mut self, id: u16) -> Result<&mut [u8]> {
        let range = self.section_range(id)?;
        Ok(&mut self.bytes[range])
    }

    /// Rewrites the footer checksum of a logical section using that
    /// section's own length rule.
    pub fn recompute_section_checksum(&mut self, id: u16) -> Result<u16> {
        let length = checksum_length(id, self.variant);
        let section = self.section_mut(id)?;
        let checksum = compute_section_checksum(section, length);
        LittleEndian::write_u16(&mut section[CHECKSUM_OFFSET..], checksum);
        debug!("section {id}: checksum {checksum:#06x} over {length:#x} bytes");
        Ok(checksum)
    }

    fn layout(&self, action: &'static str) -> Result<GiftLayout> {
        self.variant.gift_layout().ok_or(SaveError::UnsupportedGame {
            variant: self.variant,
            action,
        })
    }

    pub fn has_gift_card(&self) -> bool {
        let Ok(layout) = self.layout("reading a gift card") else {
            return false;
        };
        match self.section(GIFT_SECTION_ID) {
            Ok(section) => LittleEndian::read_u16(&section[layout.card..]) != 0,
            Err(_) => false,
        }
    }

    /// The 336-byte card block, CRC header included.
    pub fn extract_gift_card_raw(&self) -> Result<Vec<u8>> {
        let layout = self.layout("reading a gift card")?;
        let section = self.section(GIFT_SECTION_ID)?;
        Ok(section[layout.card..layout.card + gift::BLOCK_SIZE].to_vec())
    }

    pub fn extract_gift_card(&self) -> Result<GiftCardRecord> {
        let raw = self.extract_gift_card_raw()?;
        Ok(parse_gift_card(&raw[gift::HEADER_SIZE..]))
    }

    /// The 1000-byte script payload, without its CRC header.
    pub fn extract_script(&self) -> Result<Vec<u8>> {
        let layout = self.layout("reading a gift script")?;
        let section = self.section(GIFT_SECTION_ID)?;
        let start = layout.script + gift::HEADER_SIZE;
        Ok(section[start..start + SCRIPT_PAYLOAD_SIZE].to_vec())
    }

    /// Writes a gift card (and optionally its script) into the gift section.
    ///
    /// `raw_card` of 336 or 332 bytes is written verbatim instead of
    /// re-encoding `record`. The section checksum is always the last write.
    pub fn inject_gift_card(
        &mut self,
        record: &GiftCardRecord,
        raw_card: Option<&[u8]>,
        script: Option<&[u8]>,
        crc_table: &CrcTable,
        options: &InjectionOptions,
    ) -> Result<()> {
        let layout = self.layout("injecting a gift card")?;

        let payload: Vec<u8> = match raw_card {
            Some(raw) if raw.len() == gift::BLOCK_SIZE => raw[gift::HEADER_SIZE..].to_vec(),
            Some(raw) if raw.len() == gift::PAYLOAD_SIZE => raw.to_vec(),
            Some(raw) => {
                warn!(
                    "raw gift card has {} bytes; encoding the record instead",
                    raw.len()
                );
                encode_gift_card(record).to_vec()
            }
            None => encode_gift_card(record).to_vec(),
        };

        let script_payload = match script {
            None => None,
            Some(s) if s.len() == SCRIPT_BLOCK_SIZE => Some(s[gift::HEADER_SIZE..].to_vec()),
            Some(s) if s.len() == SCRIPT_PAYLOAD_SIZE => Some(s.to_vec()),
            Some(s) => {
                return Err(SaveError::InvalidPayloadSize {
                    what: "gift script",
                    expected: "1000 or 1004",
                    got: s.len(),
                })
            }
        };

        let section = self.section_mut(GIFT_SECTION_ID)?;

        if options.clear_metadata {
            section[layout.metadata - 4..layout.metadata + METADATA_SIZE].fill(0);
        }
        if options.clear_trainer_ids {
            section[layout.trainer_ids..layout.trainer_ids + TRAINER_IDS_SIZE].fill(0);
        }

        write_block(section, layout.card, &payload, crc_table);

        if let Some(mut script) = script_payload {
            if script[0] != RAM_SCRIPT_MAGIC {
                debug!("forcing RAM script magic (was {:#04x})", script[0]);
                script[0] = RAM_SCRIPT_MAGIC;
            }
            write_block(section, layout.script, &script, crc_table);
        }

        // The card screen reads the icon from the metadata block.
        let icon = LittleEndian::read_u16(&payload[2..4]);
        LittleEndian::write_u16(&mut section[layout.metadata + METADATA_ICON_OFFSET..], icon);

        let checksum = self.recompute_section_checksum(GIFT_SECTION_ID)?;
        info!(
            "injected gift card (event {:#06x}, icon {icon}); section checksum {checksum:#06x}",
            LittleEndian::read_u16(&payload[0..2])
        );
        Ok(())
    }

    pub fn is_mystery_gift_enabled(&self) -> bool {
        let Ok(layout) = self.layout("reading the Mystery Gift flag") else {
            return false;
        };
        match self.section(FLAG_SECTION_ID) {
            Ok(section) => section[layout.flag_offset] & layout.flag_bit != 0,
            Err(_) => false,
        }
    }

    /// Sets or clears the Mystery Gift menu flag. Returns whether the save
    /// was modified.
    pub fn set_mystery_gift_enabled(&mut self, enabled: bool) -> Result<bool> {
        let layout = self.layout("toggling Mystery Gift")?;
        let section = self.section_mut(FLAG_SECTION_ID)?;
        let byte = &mut section[layout.flag_offset];
        let current = *byte & layout.flag_bit != 0;
        if current == enabled {
            return Ok(false);
        }
        if enabled {
            *byte |= layout.flag_bit;
        } else {
            *byte &= !layout.flag_bit;
        }
        self.recompute_section_checksum(FLAG_SECTION_ID)?;
        info!("Mystery Gift {}", if enabled { "enabled" } else { "disabled" });
        Ok(true)
    }

    pub fn enable_mystery_gift(&mut self) -> Result<bool> {
        self.set_mystery_gift_enabled(true)
    }

    /// Writes the save through a temporary file, optionally keeping a
    /// `.bak` copy of the file being replaced.
    pub fn save_to_file(&self, path: &Path, make_backup: bool) -> Result<()> {
        if make_backup && path.exists() {
            let backup = path.with_extension("bak");
            fs::copy(path, &backup)?;
            debug!("backup written to {}", backup.display());
        }

        let mut tmp = PathBuf::from(path);
        tmp.as_mut_os_string().push(".tmp");
        fs::write(&tmp, &self.bytes)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        info!("save written to {}", path.display());
        Ok(())
    }
}

fn write_block(section: &mut [u8], offset: usize, payload: &[u8], table: &CrcTable) {
    let crc = calculate_crc16(payload, table);
    LittleEndian::write_u16(&mut section[offset..], crc);
    section[offset + 2] = 0;
    section[offset + 3] = 0;
    let start = offset + gift::HEADER_SIZE;
    section[start..start + payload.len()].copy_from_slice(payload);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gift::{icons, identity_crc_table};

    fn write_slot(
        bytes: &mut [u8],
        slot: usize,
        variant: GameVariant,
        counter: u32,
        rotation: usize,
    ) {
        for position in 0..SECTIONS_PER_SLOT {
            let id = ((position + rotation) % SECTIONS_PER_SLOT) as u16;
            let start = slot * SLOT_SIZE + position * SECTION_SIZE;
            let section = &mut bytes[start..start + SECTION_SIZE];
            for (i, b) in section[..0xF80].iter_mut().enumerate() {
                *b = (i as u8).wrapping_mul(31).wrapping_add(id as u8);
            }
            if id == 0 {
                let (code, key) = match variant {
                    GameVariant::FireRedLeafGreen => (1u32, 0u32),
                    GameVariant::Emerald => (0x1234_5678, 0x9ABC_DEF0),
                    _ => (0, 0),
                };
                LittleEndian::write_u32(&mut section[GAME_CODE_OFFSET..], code);
                LittleEndian::write_u32(&mut section[SECURITY_KEY_OFFSET..], key);
            }
            LittleEndian::write_u16(&mut section[SECTION_ID_OFFSET..], id);
            LittleEndian::write_u32(&mut section[SIGNATURE_OFFSET..], SECTION_SIGNATURE);
            LittleEndian::write_u32(&mut section[SAVE_COUNTER_OFFSET..], counter);
            let checksum = compute_section_checksum(section, checksum_length(id, variant));
            LittleEndian::write_u16(&mut section[CHECKSUM_OFFSET..], checksum);
        }
    }

    pub(crate) fn synthetic_save(variant: GameVariant, counters: [u32; 2]) -> Vec<u8> {
        let mut bytes = vec![0u8; SAVE_SIZE];
        write_slot(&mut bytes, 0, variant, counters[0], 3);
        write_slot(&mut bytes, 1, variant, counters[1], 9);
        bytes
    }

    #[test]
    fn rejects_wrong_size() {
        let err = SaveContainer::load(vec![0u8; 1000]).unwrap_err();
        assert!(matches!(err, SaveError::SizeInvalid { got: 1000, .. }));
    }

    #[test]
    fn checksum_folds_carry_once() {
        let data = [0x02, 0x00, 0x01, 0x00];
        assert_eq!(compute_section_checksum(&data, 4), 3);
        let data = [0xFF; 8];
        assert_eq!(compute_section_checksum(&data, 8), 0xFFFD);
        // Trailing bytes that do not form a full word are ignored.
        assert_eq!(compute_section_checksum(&[1, 0, 0, 0, 9, 9], 6), 1);
    }

    #[test]
    fn stored_checksums_round_trip() {
        let bytes = synthetic_save(GameVariant::Emerald, [5, 6]);
        let save = SaveContainer::load(bytes).unwrap();
        assert!(save.validate_active_slot().is_empty());
        assert!(save.ensure_valid().is_ok());
        assert!(save.slot_report(0).valid);
        assert_eq!(save.variant(), GameVariant::Emerald);
    }

    #[test]
    fn section_lengths_follow_variant() {
        assert_eq!(checksum_length(0, GameVariant::Emerald), 0xF2C);
        assert_eq!(checksum_length(0, GameVariant::FireRedLeafGreen), 0xF24);
        assert_eq!(checksum_length(0, GameVariant::RubySapphire), 0x890);
        assert_eq!(checksum_length(4, GameVariant::Emerald), 0xF08);
        assert_eq!(checksum_length(4, GameVariant::FireRedLeafGreen), 0xEE8);
        assert_eq!(checksum_length(13, GameVariant::Emerald), 0x7D0);
        assert_eq!(checksum_length(7, GameVariant::FireRedLeafGreen), 0xF80);
    }

    #[test]
    fn valid_slot_beats_higher_counter() {
        let mut bytes = synthetic_save(GameVariant::FireRedLeafGreen, [100, 1]);
        bytes[0x10] ^= 0xFF;
        assert_eq!(detect_active_slot(&bytes), 1);
        let save = SaveContainer::load(bytes).unwrap();
        assert_eq!(save.active_slot(), 1);
        assert!(!save.slot_report(0).valid);
        assert_eq!(save.slot_report(0).mismatches.len(), 1);
    }

    #[test]
    fn higher_counter_wins_between_valid_slots() {
        let bytes = synthetic_save(GameVariant::FireRedLeafGreen, [7, 3]);
        assert_eq!(detect_active_slot(&bytes), 0);
        let bytes = synthetic_save(GameVariant::FireRedLeafGreen, [3, 7]);
        assert_eq!(detect_active_slot(&bytes), 1);
        let bytes = synthetic_save(GameVariant::FireRedLeafGreen, [4, 4]);
        assert_eq!(detect_active_slot(&bytes), 1);
    }

    #[test]
    fn blank_slot_is_not_valid() {
        let mut bytes = vec![0u8; SAVE_SIZE];
        write_slot(&mut bytes, 0, GameVariant::FireRedLeafGreen, 0, 0);
        assert_eq!(detect_active_slot(&bytes), 0);
        assert!(analyze_slot(&bytes, 1).missing_signature);
    }

    #[test]
    fn finds_rotated_sections() {
        let bytes = synthetic_save(GameVariant::FireRedLeafGreen, [9, 1]);
        let save = SaveContainer::load(bytes).unwrap();
        // slot 0 is rotated by 3, so logical id 4 sits at position 1
        assert_eq!(save.find_section_by_logical_id(4), Some(1));
        assert_eq!(save.find_section_by_logical_id(3), Some(0));
        assert_eq!(save.find_section_by_logical_id(14), None);
    }

    fn sample_card() -> GiftCardRecord {
        GiftCardRecord {
            event_id: 0x0042,
            icon: icons::DEOXYS,
            count: 0,
            type_color_resend: 0x04,
            stamp_max: 0,
            title: "TEST".to_string(),
            subtitle: "Sub".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn injects_card_and_script() {
        let bytes = synthetic_save(GameVariant::FireRedLeafGreen, [2, 1]);
        let mut save = SaveContainer::load(bytes).unwrap();
        let table = identity_crc_table();
        let card = sample_card();
        let mut script = vec![0u8; SCRIPT_PAYLOAD_SIZE];
        script[1] = 0x02;

        let trainer_before = save.section(GIFT_SECTION_ID).unwrap()[0x75C..0x75C + 40].to_vec();
        save.inject_gift_card(&card, None, Some(script.as_slice()), &table, &InjectionOptions::default())
            .unwrap();

        assert!(save.has_gift_card());
        let parsed = save.extract_gift_card().unwrap();
        assert_eq!(parsed.event_id, 0x0042);
        assert_eq!(parsed.title.trim_end(), "TEST");

        let section = save.section(GIFT_SECTION_ID).unwrap();
        let payload = &section[0x460 + 4..0x460 + 4 + 332];
        assert_eq!(
            LittleEndian::read_u16(&section[0x460..]),
            calculate_crc16(payload, &table)
        );
        assert_eq!(&section[0x462..0x464], &[0, 0]);

        let stored_script = save.extract_script().unwrap();
        assert_eq!(stored_script[0], RAM_SCRIPT_MAGIC);
        assert_eq!(stored_script[1], 0x02);
        assert_eq!(
            LittleEndian::read_u16(&section[0x79C..]),
            calculate_crc16(&stored_script, &table)
        );

        assert_eq!(LittleEndian::read_u16(&section[0x5B4 + 6..]), icons::DEOXYS);
        assert!(section[0x5B0..0x5B4 + 6].iter().all(|&b| b == 0));
        assert_eq!(&section[0x75C..0x75C + 40], trainer_before.as_slice());

        assert!(save.validate_active_slot().is_empty());
        assert_eq!(save.detect_active_slot(), save.active_slot());
    }

    #[test]
    fn raw_card_bytes_are_preferred() {
        let bytes = synthetic_save(GameVariant::Emerald, [2, 1]);
        let mut save = SaveContainer::load(bytes).unwrap();
        let table = identity_crc_table();

        let mut raw = vec![0u8; gift::BLOCK_SIZE];
        raw[4] = 0x99;
        raw[6] = 0x01;
        raw[300] = 0x7F;
        let options = InjectionOptions {
            clear_metadata: false,
            clear_trainer_ids: true,
        };
        save.inject_gift_card(&sample_card(), Some(raw.as_slice()), None, &table, &options)
            .unwrap();

        let stored = save.extract_gift_card_raw().unwrap();
        assert_eq!(&stored[4..], &raw[4..]);
        let section = save.section(GIFT_SECTION_ID).unwrap();
        assert_eq!(LittleEndian::read_u16(&section[0x6C0 + 6..]), 1);
        assert!(section[0x868..0x868 + 40].iter().all(|&b| b == 0));
        assert!(save.validate_active_slot().is_empty());
    }

    #[test]
    fn rejects_bad_script_size_and_unsupported_games() {
        let table = identity_crc_table();
        let mut save =
            SaveContainer::load(synthetic_save(GameVariant::Emerald, [2, 1])).unwrap();
        let err = save
            .inject_gift_card(
                &sample_card(),
                None,
                Some(&[0u8; 10][..]),
                &table,
                &InjectionOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, SaveError::InvalidPayloadSize { got: 10, .. }));

        let mut rs = SaveContainer::load(synthetic_save(GameVariant::RubySapphire, [2, 1])).unwrap();
        assert_eq!(rs.variant(), GameVariant::RubySapphire);
        let err = rs
            .inject_gift_card(&sample_card(), None, None, &table, &InjectionOptions::default())
            .unwrap_err();
        assert!(matches!(err, SaveError::UnsupportedGame { .. }));
        assert!(!rs.has_gift_card());
        assert!(rs.extract_script().is_err());
    }

    #[test]
    fn toggles_mystery_gift_flag() {
        let mut save =
            SaveContainer::load(synthetic_save(GameVariant::Emerald, [2, 1])).unwrap();
        let before = save.section(FLAG_SECTION_ID).unwrap()[0x40B];
        if before & 0x08 != 0 {
            save.set_mystery_gift_enabled(false).unwrap();
        }
        assert!(!save.is_mystery_gift_enabled());
        assert!(save.enable_mystery_gift().unwrap());
        assert!(save.is_mystery_gift_enabled());
        assert!(!save.enable_mystery_gift().unwrap());
        assert!(save.validate_active_slot().is_empty());
    }

    #[test]
    fn saves_with_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.sav");
        std::fs::write(&path, b"old").unwrap();

        let save = SaveContainer::load(synthetic_save(GameVariant::Emerald, [2, 1])).unwrap();
        save.save_to_file(&path, true).unwrap();

        assert_eq!(std::fs::read(dir.path().join("game.bak")).unwrap(), b"old");
        assert_eq!(std::fs::read(&path).unwrap().len(), SAVE_SIZE);
        assert!(!dir.path().join("game.sav.tmp").exists());
        let reloaded = SaveContainer::from_file(&path).unwrap();
        assert_eq!(reloaded.active_slot(), 0);
    }
}
