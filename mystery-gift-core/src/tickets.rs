//! Pre-built gift tickets: `{NAME}_WonderCard.bin` + `{NAME}_Script.bin`
//! pairs discovered in a folder next to the CRC table.

use crate::gift::{self, parse_gift_card, CodecError, CrcTable, GiftCardRecord};
use crate::save::{GameVariant, SCRIPT_BLOCK_SIZE};
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CRC_TABLE_FILE: &str = "tab.bin";
pub const MANIFEST_FILE: &str = "tickets.json";
const CARD_SUFFIX: &str = "_WonderCard.bin";
const SCRIPT_SUFFIX: &str = "_Script.bin";

// Payload bytes compared when matching a saved card; 4..8 is the counter.
const MATCH_HEAD: std::ops::Range<usize> = 0..4;
const MATCH_TAIL: std::ops::Range<usize> = 8..gift::PAYLOAD_SIZE;

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("tickets folder not found: {0}")]
    FolderNotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bad CRC table {path}: {source}")]
    CrcTable {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
    #[error("no valid ticket pairs found in {0}")]
    NoTickets(PathBuf),
}

pub type Result<T> = std::result::Result<T, TicketError>;

#[derive(Clone, Debug)]
pub struct Ticket {
    pub id: String,
    pub name: String,
    pub description: String,
    pub variant: GameVariant,
    pub language: Option<String>,
    pub wonder_card_path: PathBuf,
    pub script_path: PathBuf,
    /// Full 336-byte block, CRC header included.
    pub wonder_card: Vec<u8>,
    /// Full 1004-byte block, CRC header included.
    pub script: Vec<u8>,
}

impl Ticket {
    pub fn card_record(&self) -> GiftCardRecord {
        parse_gift_card(&self.wonder_card[gift::HEADER_SIZE..])
    }
}

#[derive(Deserialize)]
struct Manifest {
    #[serde(default)]
    tickets: Vec<ManifestEntry>,
}

#[derive(Deserialize)]
struct ManifestEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

fn upper_tokens(base: &str) -> Vec<String> {
    base.to_uppercase().split('_').map(str::to_string).collect()
}

/// Game variant from the name tokens after the first one.
pub fn parse_variant(base: &str) -> GameVariant {
    let tokens = upper_tokens(base);
    let rest = tokens.get(1..).unwrap_or(&[]);
    let has = |t: &str| rest.iter().any(|x| x == t);
    if has("FRLG") {
        GameVariant::FireRedLeafGreen
    } else if has("EMERALD") || has("E") {
        GameVariant::Emerald
    } else if has("RS") {
        GameVariant::RubySapphire
    } else {
        GameVariant::Unknown
    }
}

const LANGUAGES: &[(&str, &str)] = &[
    ("ENGUSA", "USA"),
    ("ENGUK", "UK"),
    ("ENG", "ENG"),
    ("ESP", "Spanish"),
    ("FRE", "French"),
    ("GER", "German"),
    ("ITA", "Italian"),
    ("JAP", "Japanese"),
];

pub fn parse_language(base: &str) -> Option<String> {
    upper_tokens(base)
        .into_iter()
        .skip(1)
        .find(|t| LANGUAGES.iter().any(|&(code, _)| code == t))
}

fn title_case(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// "AURORA_TICKET_2004_FALL_FRLG_ENGUSA" -> "Aurora Ticket - FRLG (USA) [2004 Fall]".
pub fn display_name(base: &str, variant: GameVariant, language: Option<&str>) -> String {
    let upper = base.to_uppercase();
    let tokens = upper_tokens(base);

    let mut name = if upper.contains("AURORA") {
        "Aurora Ticket".to_string()
    } else if upper.contains("MYSTIC") {
        "Mystic Ticket".to_string()
    } else if upper.contains("OLD_SEA") || upper.contains("OLDSEA") {
        "Old Sea Map".to_string()
    } else if upper.contains("EON") {
        "Eon Ticket".to_string()
    } else {
        title_case(tokens.first().map(String::as_str).unwrap_or(base))
    };

    match variant {
        GameVariant::FireRedLeafGreen => name.push_str(" - FRLG"),
        GameVariant::Emerald => name.push_str(" - Emerald"),
        GameVariant::RubySapphire => name.push_str(" - RS"),
        GameVariant::Unknown => {}
    }

    if let Some(code) = language {
        let shown = LANGUAGES
            .iter()
            .find(|&&(c, _)| c == code)
            .map(|&(_, shown)| shown)
            .unwrap_or(code);
        name.push_str(&format!(" ({shown})"));
    }

    if let Some(pos) = tokens.iter().position(|t| t.starts_with("TCGWC")) {
        let inline = tokens[pos].trim_start_matches("TCGWC");
        let year = if inline.len() == 4 && inline.chars().all(|c| c.is_ascii_digit()) {
            Some(inline)
        } else {
            tokens
                .get(pos + 1)
                .map(String::as_str)
                .filter(|t| t.len() == 4 && t.chars().all(|c| c.is_ascii_digit()))
        };
        match year {
            Some(y) => name.push_str(&format!(" [TCGWC {y}]")),
            None => name.push_str(" [TCGWC]"),
        }
    } else if upper.contains("2004") && upper.contains("FALL") {
        name.push_str(" [2004 Fall]");
    }
    name
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| TicketError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug)]
pub struct TicketLibrary {
    folder: PathBuf,
    crc_table: CrcTable,
    tickets: Vec<Ticket>,
}

impl TicketLibrary {
    /// Loads the CRC table and every complete ticket pair in `folder`.
    ///
    /// Pairs with a missing script, a wrong size, or no recognizable game
    /// are skipped with a warning. An optional `tickets.json` overrides
    /// names and descriptions by id.
    pub fn load(folder: &Path) -> Result<Self> {
        if !folder.is_dir() {
            return Err(TicketError::FolderNotFound(folder.to_path_buf()));
        }

        let crc_path = folder.join(CRC_TABLE_FILE);
        let crc_table = CrcTable::from_bytes(&read(&crc_path)?).map_err(|source| TicketError::CrcTable {
            path: crc_path.clone(),
            source,
        })?;

        let entries = fs::read_dir(folder).map_err(|source| TicketError::Io {
            path: folder.to_path_buf(),
            source,
        })?;
        let mut card_files: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| n.ends_with(CARD_SUFFIX))
            .collect();
        card_files.sort();

        let mut tickets = Vec::new();
        for card_file in card_files {
            let base = &card_file[..card_file.len() - CARD_SUFFIX.len()];
            let card_path = folder.join(&card_file);
            let script_path = folder.join(format!("{base}{SCRIPT_SUFFIX}"));

            if !script_path.is_file() {
                warn!("{card_file}: missing {base}{SCRIPT_SUFFIX}, skipping");
                continue;
            }
            let wonder_card = read(&card_path)?;
            if wonder_card.len() != gift::BLOCK_SIZE {
                warn!(
                    "{card_file}: {} bytes, expected {}; skipping",
                    wonder_card.len(),
                    gift::BLOCK_SIZE
                );
                continue;
            }
            let script = read(&script_path)?;
            if script.len() != SCRIPT_BLOCK_SIZE {
                warn!(
                    "{base}{SCRIPT_SUFFIX}: {} bytes, expected {SCRIPT_BLOCK_SIZE}; skipping",
                    script.len()
                );
                continue;
            }

            let variant = parse_variant(base);
            if variant == GameVariant::Unknown {
                warn!("{card_file}: cannot tell which game it is for, skipping");
                continue;
            }
            let language = parse_language(base);
            let ticket = Ticket {
                id: base.to_lowercase().replace(' ', "_"),
                name: display_name(base, variant, language.as_deref()),
                description: String::new(),
                variant,
                language,
                wonder_card_path: card_path,
                script_path,
                wonder_card,
                script,
            };
            info!("discovered ticket {} ({})", ticket.id, ticket.name);
            tickets.push(ticket);
        }

        if tickets.is_empty() {
            return Err(TicketError::NoTickets(folder.to_path_buf()));
        }

        let mut library = Self {
            folder: folder.to_path_buf(),
            crc_table,
            tickets,
        };
        library.apply_manifest();
        Ok(library)
    }

    fn apply_manifest(&mut self) {
        let path = self.folder.join(MANIFEST_FILE);
        let Ok(text) = fs::read_to_string(&path) else {
            return;
        };
        let manifest: Manifest = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                warn!("ignoring {}: {e}", path.display());
                return;
            }
        };
        let overrides: HashMap<String, ManifestEntry> =
            manifest.tickets.into_iter().map(|e| (e.id.clone(), e)).collect();
        for ticket in &mut self.tickets {
            let Some(entry) = overrides.get(&ticket.id) else {
                continue;
            };
            if let Some(name) = entry.name.as_ref().filter(|n| !n.is_empty()) {
                ticket.name = name.clone();
            }
            if let Some(desc) = &entry.description {
                ticket.description = desc.clone();
            }
            debug!("manifest entry applied to {}", ticket.id);
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn crc_table(&self) -> &CrcTable {
        &self.crc_table
    }

    pub fn tickets(&self) -> &[Ticket] {
        &self.tickets
    }

    pub fn tickets_for_game(&self, variant: GameVariant) -> Vec<&Ticket> {
        self.tickets.iter().filter(|t| t.variant == variant).collect()
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Ticket> {
        self.tickets.iter().find(|t| t.id == id)
    }

    /// Finds the ticket a saved 336-byte card came from, ignoring the CRC
    /// header and the distribution counter.
    pub fn find_by_wonder_card(&self, raw: &[u8], variant: GameVariant) -> Option<&Ticket> {
        if raw.len() != gift::BLOCK_SIZE {
            return None;
        }
        let saved = &raw[gift::HEADER_SIZE..];
        self.tickets
            .iter()
            .filter(|t| t.variant == variant)
            .find(|t| {
                let ours = &t.wonder_card[gift::HEADER_SIZE..];
                saved[MATCH_HEAD] == ours[MATCH_HEAD] && saved[MATCH_TAIL] == ours[MATCH_TAIL]
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn crc_bytes() -> Vec<u8> {
        (0u16..256).flat_map(|i| i.to_le_bytes()).collect()
    }

    fn card(event: u16, fill: u8) -> Vec<u8> {
        let mut block = vec![fill; gift::BLOCK_SIZE];
        block[..4].fill(0);
        block[4..6].copy_from_slice(&event.to_le_bytes());
        block
    }

    fn write_pair(dir: &Path, base: &str, card_bytes: &[u8]) {
        fs::write(dir.join(format!("{base}{CARD_SUFFIX}")), card_bytes).unwrap();
        fs::write(dir.join(format!("{base}{SCRIPT_SUFFIX}")), vec![0u8; SCRIPT_BLOCK_SIZE]).unwrap();
    }

    fn library_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CRC_TABLE_FILE), crc_bytes()).unwrap();
        write_pair(dir.path(), "AURORA_TICKET_2004_FALL_FRLG_ENGUSA", &card(0x10, 0x22));
        write_pair(dir.path(), "MYSTIC_TICKET_EMERALD_ENGUK", &card(0x20, 0x33));
        write_pair(dir.path(), "OLD_SEA_MAP_E_TCGWC_2005", &card(0x30, 0x44));
        // Orphan card, short script, unknown game.
        fs::write(dir.path().join(format!("ORPHAN_FRLG{CARD_SUFFIX}")), card(1, 1)).unwrap();
        fs::write(dir.path().join(format!("SHORT_RS{CARD_SUFFIX}")), card(2, 2)).unwrap();
        fs::write(dir.path().join(format!("SHORT_RS{SCRIPT_SUFFIX}")), [0u8; 10]).unwrap();
        write_pair(dir.path(), "MYSTERY_GBA", &card(3, 3));
        dir
    }

    #[test]
    fn discovers_valid_pairs_only() {
        let dir = library_dir();
        let lib = TicketLibrary::load(dir.path()).unwrap();
        let ids: Vec<&str> = lib.tickets().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "aurora_ticket_2004_fall_frlg_engusa",
                "mystic_ticket_emerald_enguk",
                "old_sea_map_e_tcgwc_2005",
            ]
        );
        let names: Vec<&str> = lib.tickets().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Aurora Ticket - FRLG (USA) [2004 Fall]",
                "Mystic Ticket - Emerald (UK)",
                "Old Sea Map - Emerald [TCGWC 2005]",
            ]
        );
        assert_eq!(lib.tickets_for_game(GameVariant::Emerald).len(), 2);
        assert_eq!(lib.find_by_id("mystic_ticket_emerald_enguk").unwrap().language.as_deref(), Some("ENGUK"));
        assert_eq!(lib.crc_table().entry(7), 7);
    }

    #[test]
    fn matches_saved_card_ignoring_counter_and_crc() {
        let dir = library_dir();
        let lib = TicketLibrary::load(dir.path()).unwrap();

        let mut saved = card(0x20, 0x33);
        saved[0] = 0xAB; // CRC
        saved[4 + 4..4 + 8].copy_from_slice(&[9, 9, 9, 9]); // counter
        let found = lib.find_by_wonder_card(&saved, GameVariant::Emerald).unwrap();
        assert_eq!(found.id, "mystic_ticket_emerald_enguk");
        assert_eq!(found.card_record().event_id, 0x20);

        assert!(lib.find_by_wonder_card(&saved, GameVariant::FireRedLeafGreen).is_none());
        saved[4 + 20] ^= 0xFF;
        assert!(lib.find_by_wonder_card(&saved, GameVariant::Emerald).is_none());
        assert!(lib.find_by_wonder_card(&saved[..100], GameVariant::Emerald).is_none());
    }

    #[test]
    fn manifest_overrides_names() {
        let dir = library_dir();
        fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"tickets":[{"id":"mystic_ticket_emerald_enguk","name":"Mystic (UK)","description":"Navel Rock"}]}"#,
        )
        .unwrap();
        let lib = TicketLibrary::load(dir.path()).unwrap();
        let t = lib.find_by_id("mystic_ticket_emerald_enguk").unwrap();
        assert_eq!(t.name, "Mystic (UK)");
        assert_eq!(t.description, "Navel Rock");
    }

    #[test]
    fn load_failures() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            TicketLibrary::load(&dir.path().join("nope")),
            Err(TicketError::FolderNotFound(_))
        ));
        assert!(matches!(TicketLibrary::load(dir.path()), Err(TicketError::Io { .. })));

        fs::write(dir.path().join(CRC_TABLE_FILE), [0u8; 10]).unwrap();
        assert!(matches!(TicketLibrary::load(dir.path()), Err(TicketError::CrcTable { .. })));

        fs::write(dir.path().join(CRC_TABLE_FILE), crc_bytes()).unwrap();
        assert!(matches!(TicketLibrary::load(dir.path()), Err(TicketError::NoTickets(_))));
    }

    #[test]
    fn name_parsing() {
        assert_eq!(parse_variant("EON_TICKET_RS"), GameVariant::RubySapphire);
        assert_eq!(parse_variant("FRLG_ONLY"), GameVariant::Unknown);
        assert_eq!(parse_language("MYSTIC_FRLG_esp"), Some("ESP".to_string()));
        assert_eq!(parse_language("ESP_FRLG"), None);
        assert_eq!(
            display_name("EON_TICKET_E_GER", GameVariant::Emerald, Some("GER")),
            "Eon Ticket - Emerald (German)"
        );
        assert_eq!(
            display_name("SPECIAL_GIFT_FRLG", GameVariant::FireRedLeafGreen, None),
            "Special - FRLG"
        );
    }
}
