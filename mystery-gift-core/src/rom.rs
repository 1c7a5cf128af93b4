//! Read-only access to an identified Gen3 ROM image.
//!
//! Primitive reads are tolerant and yield zero past the end of the buffer.
//! Structured extraction (tiles, fonts, icons, compressed blocks) is strict
//! and reports `RomError` instead.

use crate::image::{IndexedImage, Rgba};
use crate::loader::content_hash;
use crate::lz77;
use crate::text::{decode_name, EOS};
use crate::version_db::{GameFamily, NameTableInfo, RomVersion, VersionDatabase};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

pub const MIN_ROM_SIZE: usize = 1024 * 1024;
pub const ROM_BASE: u32 = 0x0800_0000;
pub const ROM_LAST: u32 = 0x09FF_FFFF;

const TITLE_OFFSET: usize = 0xA0;
const TITLE_LEN: usize = 12;
const CODE_OFFSET: usize = 0xAC;
const CODE_LEN: usize = 4;

const TILE_4BPP_SIZE: usize = 32;
const TILE_2BPP_SIZE: usize = 16;
const DEFAULT_TILES_PER_ROW: usize = 16;

pub const ICON_SIZE: usize = 32;
const ICON_PALETTE_COUNT: u8 = 3;
const ICON_PALETTE_STRIDE: usize = 32;

/// Emerald: short font for card text; FRLG: normal font for everything.
pub const MAIN_FONT_INDEX: u32 = 3;
/// Emerald only: normal font used for the card's ID number.
pub const ID_FONT_INDEX: u32 = 1;
pub const FONT_CHAR_COUNT: usize = 512;
pub const FONT_CHAR_WIDTH: usize = 8;
pub const FONT_CHAR_HEIGHT: usize = 16;
pub const FONT_SOURCE_TILE_COLUMNS: usize = 2;
const FONT_SHEET_COLUMNS: usize = 32;
const GLYPH_WIDTHS_SIZE: usize = 0x200;
const DEFAULT_GLYPH_WIDTH: u8 = 6;

const WONDER_CARD_ENTRY_SIZE: usize = 16;
pub const CARD_TILES_WIDE: usize = 30;
pub const CARD_TILES_TALL: usize = 20;
/// Palette slot used for pixels no tile covers.
const TRANSPARENT_INDEX: u8 = 16;

#[derive(Debug, Error)]
pub enum RomError {
    #[error("ROM is {size} bytes, at least {min} required")]
    SizeTooSmall { size: usize, min: usize },

    #[error("unknown ROM (md5 {md5})")]
    IdentificationFailed { md5: String },

    #[error("read of {len} bytes at {offset:#x} runs past the end of the ROM ({size:#x})")]
    OffsetOutOfRange { offset: usize, len: usize, size: usize },

    #[error("bad LZ77 header at {offset:#x}: expected 0x10, found {found:#04x}")]
    BadCompressionHeader { offset: usize, found: u8 },

    #[error("LZ77 stream at {offset:#x} declares invalid size {size:#x}")]
    InvalidDecompressedSize { offset: usize, size: usize },

    #[error("LZ77 stream at {offset:#x}: displacement {displacement} at output position {position}")]
    InvalidDisplacement {
        offset: usize,
        position: usize,
        displacement: usize,
    },

    #[error("LZ77 stream at {offset:#x} ended after {got} of {expected} bytes")]
    TruncatedStream {
        offset: usize,
        expected: usize,
        got: usize,
    },

    #[error("pointer {pointer:#010x} read at {location:#x} is outside the ROM window")]
    InvalidPointer { location: usize, pointer: u32 },

    #[error("invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("font {index} is not loaded for this ROM")]
    FontNotLoaded { index: u32 },

    #[error("{what} index {index} out of range (count {count})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        count: usize,
    },
}

pub type Result<T> = std::result::Result<T, RomError>;

/// BGR555 to 8-bit RGB by bit replication (`c << 3 | c >> 2`).
pub fn gba_color_to_rgb(color: u16) -> (u8, u8, u8) {
    let expand = |c: u16| -> u8 {
        let c = (c & 0x1F) as u8;
        (c << 3) | (c >> 2)
    };
    (expand(color), expand(color >> 5), expand(color >> 10))
}

/// Converts a GBA bus address into a file offset.
pub fn rebase_pointer(pointer: u32) -> Option<usize> {
    if (ROM_BASE..=ROM_LAST).contains(&pointer) {
        Some((pointer - ROM_BASE) as usize)
    } else {
        None
    }
}

fn font_palette() -> Vec<Rgba> {
    vec![
        [144, 200, 255, 0],
        [56, 56, 56, 255],
        [216, 216, 216, 255],
        [255, 255, 255, 0],
    ]
}

#[derive(Copy, Clone, Debug)]
struct LoadedFont {
    glyphs: u32,
    widths: Option<u32>,
}

/// One row of the gift-card graphics table, already rebased to file offsets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WonderCardEntry {
    pub tileset: usize,
    pub tilemap: usize,
    pub palette: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TilemapEntry {
    pub tile: u16,
    pub h_flip: bool,
    pub v_flip: bool,
    pub palette: u8,
}

impl TilemapEntry {
    pub fn from_raw(value: u16) -> Self {
        Self {
            tile: value & 0x3FF,
            h_flip: value & 0x400 != 0,
            v_flip: value & 0x800 != 0,
            palette: (value >> 12) as u8,
        }
    }
}

#[derive(Copy, Clone)]
enum NameKind {
    Item,
    Species,
    Move,
}

pub struct RomAccessor {
    data: Vec<u8>,
    md5: String,
    version: RomVersion,
    family: GameFamily,
    fonts: BTreeMap<u32, LoadedFont>,
    item_names: RefCell<HashMap<u16, String>>,
    species_names: RefCell<HashMap<u16, String>>,
    move_names: RefCell<HashMap<u16, String>>,
}

impl RomAccessor {
    pub fn load(data: Vec<u8>, db: &VersionDatabase) -> Result<Self> {
        if data.len() < MIN_ROM_SIZE {
            return Err(RomError::SizeTooSmall {
                size: data.len(),
                min: MIN_ROM_SIZE,
            });
        }

        let md5 = content_hash(&data);
        let version = db
            .identify(&md5)
            .ok_or_else(|| RomError::IdentificationFailed { md5: md5.clone() })?
            .clone();
        let family = db.family_of(&version).cloned().unwrap_or_else(|| GameFamily {
            name: version.family.clone(),
            ..GameFamily::default()
        });

        let font_indices: &[u32] = if version.is_emerald() {
            &[MAIN_FONT_INDEX, ID_FONT_INDEX]
        } else {
            &[MAIN_FONT_INDEX]
        };
        let mut fonts = BTreeMap::new();
        for &index in font_indices {
            let Some(glyphs) = db.resolve_glyph_offset(&version, index) else {
                warn!("{}: no glyph table for font {}", version.name, index);
                continue;
            };
            let widths = db.resolve_font_width_offset(&version, index);
            debug!(
                "font {}: glyphs at {:#x}, widths at {:?}",
                index, glyphs, widths
            );
            fonts.insert(index, LoadedFont { glyphs, widths });
        }

        info!("identified ROM {} ({}) md5 {}", version.name, version.code, md5);

        Ok(Self {
            data,
            md5,
            version,
            family,
            fonts,
            item_names: RefCell::new(HashMap::new()),
            species_names: RefCell::new(HashMap::new()),
            move_names: RefCell::new(HashMap::new()),
        })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn md5(&self) -> &str {
        &self.md5
    }

    pub fn version(&self) -> &RomVersion {
        &self.version
    }

    pub fn family(&self) -> &GameFamily {
        &self.family
    }

    pub fn is_emerald(&self) -> bool {
        self.version.is_emerald()
    }

    pub fn game_title(&self) -> String {
        let raw = self.read_bytes(TITLE_OFFSET, TITLE_LEN);
        String::from_utf8_lossy(raw)
            .trim_matches(|c: char| c == '\0' || c.is_whitespace())
            .to_string()
    }

    pub fn game_code(&self) -> String {
        String::from_utf8_lossy(self.read_bytes(CODE_OFFSET, CODE_LEN)).to_string()
    }

    pub fn read_u8(&self, offset: usize) -> u8 {
        self.data.get(offset).copied().unwrap_or(0)
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        match self.data.get(offset..offset.saturating_add(2)) {
            Some(b) => LittleEndian::read_u16(b),
            None => 0,
        }
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        match self.data.get(offset..offset.saturating_add(4)) {
            Some(b) => LittleEndian::read_u32(b),
            None => 0,
        }
    }

    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        self.data
            .get(offset..offset.saturating_add(len))
            .unwrap_or(&[])
    }

    fn checked_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data
            .get(offset..offset.saturating_add(len))
            .ok_or(RomError::OffsetOutOfRange {
                offset,
                len,
                size: self.data.len(),
            })
    }

    /// Reads a bus pointer at `location` and rebases it.
    pub fn read_pointer(&self, location: usize) -> Result<usize> {
        let pointer = self.read_u32(location);
        rebase_pointer(pointer).ok_or(RomError::InvalidPointer { location, pointer })
    }

    pub fn extract_palette(&self, offset: usize, count: usize) -> Vec<Rgba> {
        (0..count)
            .map(|i| {
                let (r, g, b) = gba_color_to_rgb(self.read_u16(offset + i * 2));
                [r, g, b, 255]
            })
            .collect()
    }

    /// One of the version's standard 16-color palettes.
    pub fn standard_palette(&self, index: usize) -> Option<Vec<Rgba>> {
        let offset = *self.version.palettes.stdpal.get(index)?;
        Some(self.extract_palette(offset as usize, 16))
    }

    pub fn extract_tile_4bpp(
        &self,
        offset: usize,
        palette: &[Rgba],
        width: usize,
        height: usize,
    ) -> Result<IndexedImage> {
        if width == 0 || height == 0 || width % 8 != 0 || height % 8 != 0 {
            return Err(RomError::InvalidDimensions { width, height });
        }
        let tiles_x = width / 8;
        let tiles_y = height / 8;
        let data = self.checked_slice(offset, tiles_x * tiles_y * TILE_4BPP_SIZE)?;

        let mut img = IndexedImage::new(width, height, palette.to_vec());
        for (i, tile) in data.chunks_exact(TILE_4BPP_SIZE).enumerate() {
            let tx = i % tiles_x;
            let ty = i / tiles_x;
            blit_tile_4bpp(&mut img, tile, tx * 8, ty * 8, false, false);
        }
        Ok(img)
    }

    pub fn extract_tileset_4bpp(
        &self,
        offset: usize,
        tile_count: usize,
        palette: &[Rgba],
        tiles_per_row: Option<usize>,
    ) -> Result<IndexedImage> {
        let per_row = tiles_per_row.unwrap_or(DEFAULT_TILES_PER_ROW).max(1);
        let rows = (tile_count + per_row - 1) / per_row;
        self.extract_tile_4bpp(offset, palette, per_row * 8, rows * 8)
    }

    pub fn decompress_lz77(&self, offset: usize) -> Result<Vec<u8>> {
        lz77::decompress(&self.data, offset)
    }

    /// Decodes a 2bpp glyph sheet and re-tiles it 32 characters per row.
    ///
    /// Index 3 is folded into 0 since both are background.
    pub fn extract_font_2bpp(
        &self,
        offset: usize,
        num_chars: usize,
        char_width: usize,
        char_height: usize,
        source_tile_columns: usize,
    ) -> Result<IndexedImage> {
        if num_chars == 0
            || char_width == 0
            || char_height == 0
            || char_width % 8 != 0
            || char_height % 8 != 0
            || source_tile_columns == 0
        {
            return Err(RomError::InvalidDimensions {
                width: char_width,
                height: char_height,
            });
        }

        let tiles_per_char = (char_width / 8) * (char_height / 8);
        let total_tiles = num_chars * tiles_per_char;
        let tile_rows = total_tiles / source_tile_columns;
        let data = self.checked_slice(offset, total_tiles * TILE_2BPP_SIZE)?;

        let source_width = source_tile_columns * 8;
        let source_height = tile_rows * 8;
        let mut source = vec![0u8; source_width * source_height];
        for y_tile in 0..tile_rows {
            for x_tile in 0..source_tile_columns {
                let start = (y_tile * source_tile_columns + x_tile) * TILE_2BPP_SIZE;
                for i in 0..TILE_2BPP_SIZE {
                    let raw = data[start + i];
                    let xx = 1 - (i % 2);
                    let y = y_tile * 8 + i / 2;
                    for k in 0..4 {
                        let x = x_tile * 8 + xx * 4 + k;
                        source[y * source_width + x] = (raw >> (6 - 2 * k)) & 3;
                    }
                }
            }
        }

        let rows = (num_chars + FONT_SHEET_COLUMNS - 1) / FONT_SHEET_COLUMNS;
        let mut img = IndexedImage::new(
            FONT_SHEET_COLUMNS * char_width,
            rows * char_height,
            font_palette(),
        );
        let source_chars_per_row = (source_width / char_width).max(1);
        for c in 0..num_chars {
            let sx = (c % source_chars_per_row) * char_width;
            let sy = (c / source_chars_per_row) * char_height;
            let dx = (c % FONT_SHEET_COLUMNS) * char_width;
            let dy = (c / FONT_SHEET_COLUMNS) * char_height;
            for py in 0..char_height {
                for px in 0..char_width {
                    let (x, y) = (sx + px, sy + py);
                    if x >= source_width || y >= source_height {
                        continue;
                    }
                    let v = match source[y * source_width + x] {
                        3 => 0,
                        v => v,
                    };
                    img.set_index(dx + px, dy + py, v);
                }
            }
        }

        debug!(
            "extracted 2bpp font at {:#x}: {} chars, {}x{}",
            offset, num_chars, img.width, img.height
        );
        Ok(img)
    }

    pub fn font_indices(&self) -> Vec<u32> {
        self.fonts.keys().copied().collect()
    }

    /// Full 512-glyph sheet of a loaded font.
    pub fn extract_font(&self, font_index: u32) -> Result<IndexedImage> {
        let font = self
            .fonts
            .get(&font_index)
            .ok_or(RomError::FontNotLoaded { index: font_index })?;
        self.extract_font_2bpp(
            font.glyphs as usize,
            FONT_CHAR_COUNT,
            FONT_CHAR_WIDTH,
            FONT_CHAR_HEIGHT,
            FONT_SOURCE_TILE_COLUMNS,
        )
    }

    /// Per-character advance widths, indexed by character code.
    pub fn glyph_widths(&self, font_index: u32) -> Vec<u8> {
        match self.fonts.get(&font_index).and_then(|f| f.widths) {
            Some(offset) => (0..GLYPH_WIDTHS_SIZE)
                .map(|i| self.read_u8(offset as usize + i))
                .collect(),
            None => {
                warn!("no glyph widths for font {font_index}, using {DEFAULT_GLYPH_WIDTH}px");
                vec![DEFAULT_GLYPH_WIDTH; GLYPH_WIDTHS_SIZE]
            }
        }
    }

    /// Pixel width of an encoded string, up to its terminator.
    pub fn text_width(&self, encoded: &[u8], font_index: u32) -> u32 {
        let widths = self.glyph_widths(font_index);
        encoded
            .iter()
            .take_while(|&&b| b != EOS)
            .map(|&b| widths.get(b as usize).copied().unwrap_or(DEFAULT_GLYPH_WIDTH) as u32)
            .sum()
    }

    /// Icon species actually drawn for a card's raw icon field.
    ///
    /// Returns `None` for 0 and 0xFFFF (no icon / hidden). Values above the
    /// family's species limit are replaced by its invalid-icon species.
    pub fn display_icon_species(&self, raw: u16) -> Option<u16> {
        if raw == 0 || raw == 0xFFFF {
            return None;
        }
        let fallback = self.family.icon_fallback();
        if raw > fallback.species_limit {
            Some(fallback.invalid_icon)
        } else {
            Some(raw)
        }
    }

    /// First 32x32 frame of a species' menu icon.
    pub fn extract_pokemon_icon(&self, species: u16) -> Result<IndexedImage> {
        let count = self.family.pokemon_count as usize;
        if species as usize >= count {
            return Err(RomError::IndexOutOfRange {
                what: "icon",
                index: species as usize,
                count,
            });
        }
        let sprites = &self.version.pokemon_sprites;
        let icon = self.read_pointer(sprites.icon_sprites as usize + species as usize * 4)?;

        let mut palette_index = self.read_u8(sprites.icon_palette_indices as usize + species as usize);
        if palette_index >= ICON_PALETTE_COUNT {
            palette_index = 0;
        }
        let palette = self.extract_palette(
            sprites.icon_palettes as usize + palette_index as usize * ICON_PALETTE_STRIDE,
            16,
        );
        debug!(
            "icon {}: data {:#x}, palette {}",
            species, icon, palette_index
        );
        self.extract_tile_4bpp(icon, &palette, ICON_SIZE, ICON_SIZE)
    }

    pub fn wonder_card_entry(&self, index: usize) -> Result<WonderCardEntry> {
        let count = self.version.wondercard_count as usize;
        if index >= count {
            return Err(RomError::IndexOutOfRange {
                what: "wonder card graphics",
                index,
                count,
            });
        }
        let base = self.version.wondercard_table as usize + index * WONDER_CARD_ENTRY_SIZE;
        Ok(WonderCardEntry {
            tileset: self.read_pointer(base)?,
            tilemap: self.read_pointer(base + 4)?,
            palette: self.read_pointer(base + 8)?,
        })
    }

    /// Renders the 240x160 card background for a graphics table entry.
    ///
    /// The image palette has the entry's 16 colors plus a transparent slot
    /// at index 16 for cells the tilemap leaves empty.
    pub fn extract_wonder_card_background(&self, index: usize) -> Result<IndexedImage> {
        let entry = self.wonder_card_entry(index)?;
        let tileset = self.decompress_lz77(entry.tileset)?;
        let tilemap_raw = self.decompress_lz77(entry.tilemap)?;
        let mut palette = self.extract_palette(entry.palette, 16);
        palette.push([0, 0, 0, 0]);

        let tilemap: Vec<TilemapEntry> = tilemap_raw
            .chunks_exact(2)
            .map(|b| TilemapEntry::from_raw(LittleEndian::read_u16(b)))
            .collect();
        let num_tiles = tileset.len() / TILE_4BPP_SIZE;

        let mut img = IndexedImage::new(CARD_TILES_WIDE * 8, CARD_TILES_TALL * 8, palette);
        img.pixels.fill(TRANSPARENT_INDEX);
        for ty in 0..CARD_TILES_TALL {
            for tx in 0..CARD_TILES_WIDE {
                let Some(cell) = tilemap.get(ty * CARD_TILES_WIDE + tx) else {
                    continue;
                };
                let tile = cell.tile as usize;
                if tile >= num_tiles {
                    continue;
                }
                let bytes = &tileset[tile * TILE_4BPP_SIZE..(tile + 1) * TILE_4BPP_SIZE];
                blit_tile_4bpp(&mut img, bytes, tx * 8, ty * 8, cell.h_flip, cell.v_flip);
            }
        }
        debug!(
            "card background {}: {} tiles, {} map cells",
            index,
            num_tiles,
            tilemap.len()
        );
        Ok(img)
    }

    pub fn has_name_tables(&self) -> bool {
        self.version.name_tables.is_some()
    }

    fn name_table(&self, kind: NameKind) -> Option<&NameTableInfo> {
        let tables = self.version.name_tables.as_ref()?;
        Some(match kind {
            NameKind::Item => &tables.items,
            NameKind::Species => &tables.pokemon,
            NameKind::Move => &tables.moves,
        })
    }

    fn lookup_name(&self, kind: NameKind, id: u16) -> String {
        let Some(table) = self.name_table(kind) else {
            return String::new();
        };
        if id as u32 >= table.count {
            return String::new();
        }
        let cache = match kind {
            NameKind::Item => &self.item_names,
            NameKind::Species => &self.species_names,
            NameKind::Move => &self.move_names,
        };
        if let Some(name) = cache.borrow().get(&id) {
            return name.clone();
        }

        let offset = table.offset as usize + id as usize * table.entry_size as usize;
        let len = match kind {
            NameKind::Item => table.name_length,
            _ => table.entry_size,
        } as usize;
        let Some(raw) = self.data.get(offset..offset.saturating_add(len)) else {
            return String::new();
        };
        let mut name = decode_name(raw);
        if let NameKind::Item = kind {
            name = name
                .to_uppercase()
                .chars()
                .filter(|&c| c != ' ' && c != '.')
                .collect();
        }
        cache.borrow_mut().insert(id, name.clone());
        name
    }

    /// Upper-cased item name with spaces and dots removed.
    pub fn item_name(&self, id: u16) -> String {
        self.lookup_name(NameKind::Item, id)
    }

    pub fn species_name(&self, id: u16) -> String {
        self.lookup_name(NameKind::Species, id)
    }

    pub fn move_name(&self, id: u16) -> String {
        self.lookup_name(NameKind::Move, id)
    }

    pub fn all_item_names(&self) -> Vec<String> {
        let Some(table) = self.name_table(NameKind::Item) else {
            return Vec::new();
        };
        (0..table.count.min(u16::MAX as u32 + 1))
            .map(|i| {
                let name = self.item_name(i as u16);
                if name.is_empty() {
                    format!("ITEM_{i:04X}")
                } else {
                    name
                }
            })
            .collect()
    }
}

// Low nibble is the left pixel of each pair.
fn blit_tile_4bpp(
    img: &mut IndexedImage,
    tile: &[u8],
    dx: usize,
    dy: usize,
    h_flip: bool,
    v_flip: bool,
) {
    for y in 0..8 {
        for x in 0..8 {
            let byte = tile[y * 4 + x / 2];
            let v = if x % 2 == 0 { byte & 0x0F } else { byte >> 4 };
            let px = if h_flip { 7 - x } else { x };
            let py = if v_flip { 7 - y } else { y };
            img.set_index(dx + px, dy + py, v);
        }
    }
}
