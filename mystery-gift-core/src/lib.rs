use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod disasm;
pub mod gift;
pub mod image;
pub mod loader;
pub mod lz77;
pub mod rom;
pub mod save;
pub mod symbols;
pub mod text;
pub mod tickets;
pub mod version_db;

use disasm::RenderOptions;
use log::info;
use rom::RomAccessor;
use save::{InjectionOptions, SaveContainer};
use symbols::SymbolTable;
use tickets::TicketLibrary;
use version_db::VersionDatabase;

/// Front-end configuration. Every field has a default, so `{}` is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    /// Version database (YAML or JSON).
    pub database: Option<PathBuf>,
    /// Symbol overlay for the disassembler; the built-in table when unset.
    pub symbols: Option<PathBuf>,
    pub tickets_dir: PathBuf,
    /// Where to look for a ROM when none is given explicitly.
    pub rom_dir: Option<PathBuf>,
    pub backup: bool,
    pub injection: InjectionOptions,
    pub disassembly: RenderOptions,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            database: None,
            symbols: None,
            tickets_dir: PathBuf::from("Tickets"),
            rom_dir: None,
            backup: true,
            injection: InjectionOptions::default(),
            disassembly: RenderOptions::default(),
        }
    }
}

impl ToolSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Like `load`, but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[derive(Debug, Error)]
pub enum MysteryGiftError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Rom(#[from] rom::RomError),
    #[error(transparent)]
    Save(#[from] save::SaveError),
    #[error(transparent)]
    Database(#[from] version_db::DatabaseError),
    #[error(transparent)]
    Symbol(#[from] symbols::SymbolError),
    #[error(transparent)]
    Ticket(#[from] tickets::TicketError),
    #[error(transparent)]
    Codec(#[from] gift::CodecError),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("settings error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MysteryGiftError>;

pub(crate) fn join_candidate(base: &Path, candidate: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    for part in candidate.split(['/', '\\']) {
        if !part.is_empty() {
            path.push(part);
        }
    }
    path
}

pub(crate) fn find_first_existing(base: &Path, candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|candidate| join_candidate(base, candidate))
        .find(|path| path.is_file())
}

pub fn load_database(settings: &ToolSettings) -> Result<VersionDatabase> {
    let path = settings
        .database
        .as_ref()
        .ok_or_else(|| MysteryGiftError::Config("no version database configured".to_string()))?;
    let db = VersionDatabase::load(path)?;
    if db.is_empty() {
        return Err(MysteryGiftError::Config(format!(
            "version database {} lists no ROM versions",
            path.display()
        )));
    }
    Ok(db)
}

pub fn load_symbols(settings: &ToolSettings) -> Result<SymbolTable> {
    match &settings.symbols {
        Some(path) => Ok(SymbolTable::load(path)?),
        None => Ok(SymbolTable::builtin()),
    }
}

/// Opens `explicit` when given, otherwise searches `rom_dir`.
pub fn open_rom(settings: &ToolSettings, db: &VersionDatabase, explicit: Option<&Path>) -> Result<RomAccessor> {
    if let Some(path) = explicit {
        let bytes = loader::read_rom_file(path)?;
        return Ok(RomAccessor::load(bytes, db)?);
    }
    let dir = settings
        .rom_dir
        .as_ref()
        .ok_or_else(|| MysteryGiftError::Config("no ROM given and no rom_dir configured".to_string()))?;
    let found = loader::find_rom(dir, db)?.ok_or_else(|| {
        MysteryGiftError::Config(format!("no supported ROM found under {}", dir.display()))
    })?;
    Ok(RomAccessor::load(found.bytes, db)?)
}

/// Writes a ticket's card and script into the save at `save_path` and
/// turns Mystery Gift on.
pub fn inject_ticket(settings: &ToolSettings, save_path: &Path, ticket_id: &str) -> Result<()> {
    if !save_path.exists() {
        return Err(MysteryGiftError::Config(format!(
            "Save file does not exist: {}",
            save_path.display()
        )));
    }

    let library = TicketLibrary::load(&settings.tickets_dir)?;
    let ticket = library
        .find_by_id(ticket_id)
        .ok_or_else(|| MysteryGiftError::Config(format!("unknown ticket id: {ticket_id}")))?;

    let mut save = SaveContainer::from_file(save_path)?;
    save.ensure_valid()?;
    if save.variant() != ticket.variant {
        return Err(MysteryGiftError::Config(format!(
            "ticket {} is for {} but the save is {}",
            ticket.id,
            ticket.variant,
            save.variant()
        )));
    }

    save.inject_gift_card(
        &ticket.card_record(),
        Some(&ticket.wonder_card),
        Some(&ticket.script),
        library.crc_table(),
        &settings.injection,
    )?;
    save.enable_mystery_gift()?;
    save.save_to_file(save_path, settings.backup)?;
    info!("injected {} into {}", ticket.name, save_path.display());
    Ok(())
}
