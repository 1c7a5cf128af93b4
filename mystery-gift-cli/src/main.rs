use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use mystery_gift_core::disasm::{RenderOptions, ScriptDisassembler};
use mystery_gift_core::image::IndexedImage;
use mystery_gift_core::save::SaveContainer;
use mystery_gift_core::tickets::TicketLibrary;
use mystery_gift_core::{
    gift, inject_ticket, load_database, load_symbols, loader, open_rom, MysteryGiftError, Result,
    ToolSettings,
};

#[derive(Debug, Parser)]
#[command(name = "mystery-gift", version, about = "Gen3 Mystery Gift ROM and save toolkit")]
struct Args {
    /// Settings file; defaults to <config dir>/mystery-gift/settings.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Version database, overriding the settings file.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Identify a ROM and print its version details.
    Identify { rom: Option<PathBuf> },
    /// Search a directory for a supported ROM.
    FindRom { dir: PathBuf },
    /// List the tickets in the configured tickets folder.
    Tickets,
    /// Print the gift card stored in a save.
    ShowCard { save: PathBuf },
    /// Write a ticket into a save and enable Mystery Gift.
    Inject {
        save: PathBuf,
        #[arg(long)]
        ticket: String,
        #[arg(long, default_value_t = false)]
        no_backup: bool,
    },
    /// Turn the Mystery Gift menu on in a save.
    EnableGift {
        save: PathBuf,
        #[arg(long, default_value_t = false)]
        no_backup: bool,
    },
    /// Disassemble event-script bytecode.
    Disasm {
        input: PathBuf,
        /// Input is a 4-byte-headed RAM script.
        #[arg(long, default_value_t = false)]
        ram: bool,
        /// Input is a save file; its stored script is disassembled.
        #[arg(long, default_value_t = false, conflicts_with = "ram")]
        from_save: bool,
        /// ROM used to name items, species and moves.
        #[arg(long)]
        rom: Option<PathBuf>,
        #[arg(long)]
        symbols: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        no_comments: bool,
        #[arg(long, default_value_t = false)]
        no_bytes: bool,
        #[arg(long, default_value_t = false)]
        no_offsets: bool,
    },
    /// Export ROM graphics as PNG.
    Export {
        #[arg(long)]
        rom: Option<PathBuf>,
        #[arg(long, short)]
        out: PathBuf,
        #[command(subcommand)]
        what: ExportKind,
    },
}

#[derive(Debug, Subcommand)]
enum ExportKind {
    /// A font sheet, 32 glyphs per row.
    Font { index: u32 },
    /// A Pokemon menu icon, given the raw card icon value.
    Icon { species: u16 },
    /// A gift-card background.
    Card { index: usize },
}

fn init_logging(debug: bool) -> std::result::Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(if debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    let mut base = dirs::config_dir().or_else(dirs::data_dir)?;
    base.push("mystery-gift");
    base.push("settings.json");
    Some(base)
}

fn load_settings(args: &Args) -> Result<ToolSettings> {
    let mut settings = match (&args.config, default_config_path()) {
        (Some(path), _) => ToolSettings::load(path)?,
        (None, Some(path)) => {
            debug!("settings from {}", path.display());
            ToolSettings::load_or_default(&path)?
        }
        (None, None) => ToolSettings::default(),
    };
    if let Some(db) = &args.database {
        settings.database = Some(db.clone());
    }
    Ok(settings)
}

fn write_png(img: &IndexedImage, out: &Path) -> Result<()> {
    let rgba = image::RgbaImage::from_raw(img.width as u32, img.height as u32, img.to_rgba())
        .ok_or_else(|| MysteryGiftError::Config("image buffer does not match its size".to_string()))?;
    rgba.save(out)
        .map_err(|e| MysteryGiftError::Config(format!("failed to write {}: {e}", out.display())))?;
    info!("wrote {}x{} image to {}", img.width, img.height, out.display());
    Ok(())
}

fn show_card(settings: &ToolSettings, path: &Path) -> Result<()> {
    let save = SaveContainer::from_file(path)?;
    let report = save.slot_report(save.active_slot());
    println!("Active slot:   {} (counter {})", report.slot + 1, report.save_counter);
    println!("Game:          {}", save.variant());
    println!("Mystery Gift:  {}", if save.is_mystery_gift_enabled() { "enabled" } else { "disabled" });
    for m in save.validate_active_slot() {
        warn!(
            "section {} at position {}: checksum {:#06x}, expected {:#06x}",
            m.id, m.position, m.stored, m.computed
        );
    }

    if !save.has_gift_card() {
        println!("No gift card stored.");
        return Ok(());
    }
    let card = save.extract_gift_card()?;
    println!("Event ID:      {:#06x}", card.event_id);
    println!("Icon:          {}", card.icon);
    println!("Type:          {:?}", card.gift_type());
    println!("Color:         {}", card.color());
    println!("Resend:        {}", card.resend());
    println!("Stamps:        {}", card.stamp_max);
    println!("Title:         {}", card.title.trim_end());
    println!("Subtitle:      {}", card.subtitle.trim_end());
    for line in card.content.iter().chain(card.warning.iter()) {
        if !line.trim().is_empty() {
            println!("               {}", line.trim_end());
        }
    }

    match TicketLibrary::load(&settings.tickets_dir) {
        Ok(library) => {
            let raw = save.extract_gift_card_raw()?;
            match library.find_by_wonder_card(&raw, save.variant()) {
                Some(ticket) => println!("Ticket:        {} ({})", ticket.name, ticket.id),
                None => println!("Ticket:        no match in {}", library.folder().display()),
            }
        }
        Err(e) => debug!("tickets unavailable: {e}"),
    }
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let mut settings = load_settings(&args)?;

    match args.command {
        Command::Identify { rom } => {
            let db = load_database(&settings)?;
            let rom = open_rom(&settings, &db, rom.as_deref())?;
            let v = rom.version();
            println!("Version:  {}", v.name);
            println!("Family:   {}", v.family);
            println!("Code:     {} (header {})", v.code, rom.game_code());
            println!("Title:    {}", rom.game_title());
            println!("MD5:      {}", rom.md5());
            println!("Size:     {:#x}", rom.size());
            println!("Fonts:    {:?}", rom.font_indices());
            println!("Names:    {}", if rom.has_name_tables() { "yes" } else { "no" });
        }
        Command::FindRom { dir } => {
            let db = load_database(&settings)?;
            match loader::find_rom(&dir, &db)? {
                Some(found) => {
                    let name = db.identify(&found.md5).map(|v| v.name.as_str()).unwrap_or("?");
                    match &found.archive_entry {
                        Some(entry) => println!("{} [{}]: {}", found.path.display(), entry, name),
                        None => println!("{}: {}", found.path.display(), name),
                    }
                }
                None => {
                    return Err(MysteryGiftError::Config(format!(
                        "no supported ROM under {}",
                        dir.display()
                    )))
                }
            }
        }
        Command::Tickets => {
            let library = TicketLibrary::load(&settings.tickets_dir)?;
            for t in library.tickets() {
                println!("{:<44} {:<18} {}", t.id, t.variant.to_string(), t.name);
                if !t.description.is_empty() {
                    println!("{:<44} {:<18} {}", "", "", t.description);
                }
            }
        }
        Command::ShowCard { save } => show_card(&settings, &save)?,
        Command::Inject {
            save,
            ticket,
            no_backup,
        } => {
            settings.backup &= !no_backup;
            inject_ticket(&settings, &save, &ticket)?;
            println!("Injected {ticket} into {}", save.display());
        }
        Command::EnableGift { save: path, no_backup } => {
            let mut save = SaveContainer::from_file(&path)?;
            save.ensure_valid()?;
            if save.enable_mystery_gift()? {
                save.save_to_file(&path, settings.backup && !no_backup)?;
                println!("Mystery Gift enabled.");
            } else {
                println!("Mystery Gift was already enabled.");
            }
        }
        Command::Disasm {
            input,
            ram,
            from_save,
            rom,
            symbols,
            no_comments,
            no_bytes,
            no_offsets,
        } => {
            if symbols.is_some() {
                settings.symbols = symbols;
            }
            let table = load_symbols(&settings)?;
            let options = RenderOptions {
                comments: settings.disassembly.comments && !no_comments,
                bytes: settings.disassembly.bytes && !no_bytes,
                offsets: settings.disassembly.offsets && !no_offsets,
            };

            let rom = match rom {
                Some(path) => {
                    let db = load_database(&settings)?;
                    Some(open_rom(&settings, &db, Some(&path))?)
                }
                None => None,
            };
            let mut dis = ScriptDisassembler::new(&table).with_options(options);
            if let Some(rom) = &rom {
                dis = dis.with_rom(rom);
            }

            let listing = if from_save {
                let save = SaveContainer::from_file(&input)?;
                dis.disassemble_ram_script(&save.extract_script()?)
            } else {
                let mut data = std::fs::read(&input)?;
                // Script files carry the 4-byte CRC header of the save block.
                if data.len() == gift::HEADER_SIZE + mystery_gift_core::save::SCRIPT_PAYLOAD_SIZE {
                    data.drain(..gift::HEADER_SIZE);
                }
                if ram {
                    dis.disassemble_ram_script(&data)
                } else {
                    dis.disassemble(&data)
                }
            };
            println!("{listing}");
        }
        Command::Export { rom, out, what } => {
            let db = load_database(&settings)?;
            let rom = open_rom(&settings, &db, rom.as_deref())?;
            let img = match what {
                ExportKind::Font { index } => rom.extract_font(index)?,
                ExportKind::Icon { species } => {
                    let shown = rom.display_icon_species(species).ok_or_else(|| {
                        MysteryGiftError::Config(format!("icon value {species} shows no icon"))
                    })?;
                    rom.extract_pokemon_icon(shown)?
                }
                ExportKind::Card { index } => rom.extract_wonder_card_background(index)?,
            };
            write_png(&img, &out)?;
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(err) = init_logging(args.debug) {
        eprintln!("Failed to set up logging: {err}");
    }

    if let Err(err) = run(args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
