//! ROM version database: content hash to per-version offsets.
//!
//! The database is a YAML (or JSON) document shaped like:
//!
//! ```yaml
//! games:
//!   FRLG:
//!     bpp: 2
//!     glyphs:
//!       3: { latin: { offset: 0x207F88, size: 0x4000, width: normal } }
//!     glyph_widths:
//!       normal: { offset: 0x20BF88, size: 0x200 }
//!     versions:
//!       FireRed_1.0:
//!         code: BPRE
//!         md5: e26ee0d44e809351c8ce2f093c5f22a4
//!         offset_delta: 0
//! ```
//!
//! Offsets may be plain integers or `0x`-prefixed strings; `offset_delta`
//! may be negative.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid number '{token}'")]
    InvalidNumber { token: String },

    #[error("hash {md5} is listed for both {first} and {second}")]
    DuplicateHash {
        md5: String,
        first: String,
        second: String,
    },
}

mod hex {
    use serde::{de, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }

    pub(super) fn parse(token: &str) -> Option<i64> {
        let t = token.trim();
        let (negative, t) = match t.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, t),
        };
        let value = match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
            Some(hex) => i64::from_str_radix(hex, 16).ok()?,
            None => t.parse::<i64>().ok()?,
        };
        Some(if negative { -value } else { value })
    }

    fn to_i64<E: de::Error>(raw: Raw) -> Result<i64, E> {
        match raw {
            Raw::Int(v) => Ok(v),
            Raw::Text(s) => parse(&s).ok_or_else(|| E::custom(format!("invalid number '{s}'"))),
        }
    }

    pub(crate) fn u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
        let v = to_i64(Raw::deserialize(d)?)?;
        u32::try_from(v).map_err(|_| de::Error::custom(format!("{v} does not fit in u32")))
    }

    pub(crate) fn i32<'de, D: Deserializer<'de>>(d: D) -> Result<i32, D::Error> {
        let v = to_i64(Raw::deserialize(d)?)?;
        i32::try_from(v).map_err(|_| de::Error::custom(format!("{v} does not fit in i32")))
    }

    pub(crate) fn u32_vec<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u32>, D::Error> {
        let raw = Vec::<Raw>::deserialize(d)?;
        raw.into_iter()
            .map(|r| {
                let v = to_i64(r)?;
                u32::try_from(v).map_err(|_| de::Error::custom(format!("{v} does not fit in u32")))
            })
            .collect()
    }
}

/// Parses a decimal or `0x` hex token, allowing a leading minus sign.
pub fn parse_number(token: &str) -> Result<i64, DatabaseError> {
    hex::parse(token).ok_or_else(|| DatabaseError::InvalidNumber {
        token: token.to_string(),
    })
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlyphInfo {
    #[serde(deserialize_with = "hex::u32")]
    pub offset: u32,
    #[serde(deserialize_with = "hex::u32")]
    pub size: u32,
    /// Width and height in tiles.
    pub dimensions: [u32; 2],
    /// Width and height in pixels.
    pub char_size: [u32; 2],
    pub source_tile_columns: u32,
    /// Name of the glyph-width table, when widths are proportional.
    pub width: Option<String>,
    pub fixed_width: Option<u32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FontEntry {
    pub name: Option<String>,
    pub latin: Option<GlyphInfo>,
    pub japanese: Option<GlyphInfo>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlyphWidthTable {
    #[serde(deserialize_with = "hex::u32")]
    pub offset: u32,
    #[serde(deserialize_with = "hex::u32")]
    pub size: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NameTableInfo {
    #[serde(deserialize_with = "hex::u32")]
    pub offset: u32,
    pub entry_size: u32,
    /// Bytes of the entry holding the name; items store other data after it.
    pub name_length: u32,
    pub count: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NameTables {
    pub items: NameTableInfo,
    pub pokemon: NameTableInfo,
    pub moves: NameTableInfo,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaletteOffsets {
    #[serde(deserialize_with = "hex::u32_vec")]
    pub stdpal: Vec<u32>,
    #[serde(deserialize_with = "hex::u32_vec")]
    pub wondercard: Vec<u32>,
    #[serde(deserialize_with = "hex::u32_vec")]
    pub stamp_shadow: Vec<u32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpriteOffsets {
    #[serde(deserialize_with = "hex::u32")]
    pub front_sprites: u32,
    #[serde(deserialize_with = "hex::u32")]
    pub back_sprites: u32,
    #[serde(deserialize_with = "hex::u32")]
    pub front_palettes: u32,
    #[serde(deserialize_with = "hex::u32")]
    pub back_palettes: u32,
    #[serde(deserialize_with = "hex::u32")]
    pub shiny_palettes: u32,
    #[serde(deserialize_with = "hex::u32")]
    pub icon_sprites: u32,
    #[serde(deserialize_with = "hex::u32")]
    pub icon_palettes: u32,
    #[serde(deserialize_with = "hex::u32")]
    pub icon_palette_indices: u32,
}

fn default_wondercard_count() -> u32 {
    8
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RomVersion {
    #[serde(skip)]
    pub name: String,
    #[serde(skip)]
    pub family: String,
    pub code: String,
    pub md5: String,
    #[serde(deserialize_with = "hex::i32")]
    pub offset_delta: i32,
    pub palettes: PaletteOffsets,
    pub pokemon_sprites: SpriteOffsets,
    #[serde(deserialize_with = "hex::u32")]
    pub wondercard_table: u32,
    #[serde(default = "default_wondercard_count")]
    pub wondercard_count: u32,
    pub name_tables: Option<NameTables>,
}

impl Default for RomVersion {
    fn default() -> Self {
        Self {
            name: String::new(),
            family: String::new(),
            code: String::new(),
            md5: String::new(),
            offset_delta: 0,
            palettes: PaletteOffsets::default(),
            pokemon_sprites: SpriteOffsets::default(),
            wondercard_table: 0,
            wondercard_count: default_wondercard_count(),
            name_tables: None,
        }
    }
}

impl RomVersion {
    pub fn is_emerald(&self) -> bool {
        self.family.eq_ignore_ascii_case("emerald")
    }

    /// Applies this version's delta to a family-shared offset.
    pub fn apply_delta(&self, base: u32) -> Option<u32> {
        u32::try_from(base as i64 + self.offset_delta as i64).ok()
    }
}

/// Replacement icon for out-of-range species values.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct IconFallback {
    pub species_limit: u16,
    pub invalid_icon: u16,
}

fn default_bpp() -> u32 {
    2
}

fn default_pokemon_count() -> u32 {
    440
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameFamily {
    #[serde(skip)]
    pub name: String,
    pub bpp: u32,
    pub pokemon_count: u32,
    pub icon_fallback: Option<IconFallback>,
    pub glyphs: BTreeMap<u32, FontEntry>,
    pub glyph_widths: BTreeMap<String, GlyphWidthTable>,
    pub versions: BTreeMap<String, RomVersion>,
}

impl Default for GameFamily {
    fn default() -> Self {
        Self {
            name: String::new(),
            bpp: default_bpp(),
            pokemon_count: default_pokemon_count(),
            icon_fallback: None,
            glyphs: BTreeMap::new(),
            glyph_widths: BTreeMap::new(),
            versions: BTreeMap::new(),
        }
    }
}

impl GameFamily {
    /// Configured icon fallback, or the family default: species above 412
    /// show icon 0 on FRLG and icon 260 (the question mark) on Emerald.
    pub fn icon_fallback(&self) -> IconFallback {
        self.icon_fallback.unwrap_or(IconFallback {
            species_limit: 412,
            invalid_icon: if self.name.eq_ignore_ascii_case("emerald") {
                260
            } else {
                0
            },
        })
    }

    pub fn latin_glyph(&self, font_index: u32) -> Option<&GlyphInfo> {
        self.glyphs.get(&font_index)?.latin.as_ref()
    }

    pub fn japanese_glyph(&self, font_index: u32) -> Option<&GlyphInfo> {
        self.glyphs.get(&font_index)?.japanese.as_ref()
    }
}

#[derive(Debug, Default, Deserialize)]
struct Document {
    #[serde(default)]
    games: BTreeMap<String, GameFamily>,
}

/// Read-only lookup service built once from a database document.
#[derive(Clone, Debug, Default)]
pub struct VersionDatabase {
    families: BTreeMap<String, GameFamily>,
    by_md5: HashMap<String, (String, String)>,
}

impl VersionDatabase {
    fn from_document(doc: Document) -> Result<Self, DatabaseError> {
        let mut families = doc.games;
        let mut by_md5: HashMap<String, (String, String)> = HashMap::new();

        for (family_name, family) in families.iter_mut() {
            family.name = family_name.clone();
            for (version_name, version) in family.versions.iter_mut() {
                version.name = version_name.clone();
                version.family = family_name.clone();
                version.md5 = version.md5.trim().to_ascii_lowercase();
                if version.md5.is_empty() {
                    continue;
                }
                let key = (family_name.clone(), version_name.clone());
                if let Some((_, first)) = by_md5.insert(version.md5.clone(), key) {
                    return Err(DatabaseError::DuplicateHash {
                        md5: version.md5.clone(),
                        first,
                        second: version_name.clone(),
                    });
                }
            }
        }

        debug!(
            "version database: {} families, {} hashes",
            families.len(),
            by_md5.len()
        );
        Ok(Self { families, by_md5 })
    }

    pub fn from_yaml_str(src: &str) -> Result<Self, DatabaseError> {
        Self::from_document(serde_yaml::from_str(src)?)
    }

    pub fn from_json_str(src: &str) -> Result<Self, DatabaseError> {
        Self::from_document(serde_json::from_str(src)?)
    }

    /// Loads a `.json` file as JSON and anything else as YAML.
    pub fn load(path: &Path) -> Result<Self, DatabaseError> {
        let src = fs::read_to_string(path).map_err(|source| DatabaseError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let is_json = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json_str(&src)
        } else {
            Self::from_yaml_str(&src)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_md5.is_empty()
    }

    pub fn identify(&self, content_hash: &str) -> Option<&RomVersion> {
        let key = content_hash.trim().to_ascii_lowercase();
        let (family, version) = self.by_md5.get(&key)?;
        self.families.get(family)?.versions.get(version)
    }

    pub fn version_by_name(&self, name: &str) -> Option<&RomVersion> {
        self.families
            .values()
            .find_map(|family| family.versions.get(name))
    }

    pub fn family(&self, name: &str) -> Option<&GameFamily> {
        self.families.get(name)
    }

    pub fn family_of(&self, version: &RomVersion) -> Option<&GameFamily> {
        self.families.get(&version.family)
    }

    pub fn supported_hashes(&self) -> Vec<&str> {
        let mut hashes: Vec<&str> = self.by_md5.keys().map(String::as_str).collect();
        hashes.sort_unstable();
        hashes
    }

    /// Latin glyph sheet offset for a font index, with the version delta applied.
    pub fn resolve_glyph_offset(&self, version: &RomVersion, font_index: u32) -> Option<u32> {
        let glyph = self.family_of(version)?.latin_glyph(font_index)?;
        version.apply_delta(glyph.offset)
    }

    pub fn resolve_width_table_offset(&self, version: &RomVersion, table_name: &str) -> Option<u32> {
        let table = self.family_of(version)?.glyph_widths.get(table_name)?;
        version.apply_delta(table.offset)
    }

    /// Width-table offset for the table named by a font's glyph entry.
    pub fn resolve_font_width_offset(&self, version: &RomVersion, font_index: u32) -> Option<u32> {
        let glyph = self.family_of(version)?.latin_glyph(font_index)?;
        let name = glyph.width.as_deref()?;
        self.resolve_width_table_offset(version, name)
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_DB: &str = r#"
games:
  FRLG:
    glyphs:
      3:
        name: FONT_NORMAL_COPY_2
        latin:
          offset: 0x1000
          size: 0x4000
          dimensions: [1, 2]
          char_size: [8, 16]
          source_tile_columns: 2
          width: normal
        japanese: null
    glyph_widths:
      normal: { offset: "0x2000", size: 0x200 }
    versions:
      FireRed_1.0:
        code: BPRE
        md5: E26EE0D44E809351C8CE2F093C5F22A4
        offset_delta: 0
      FireRed_1.1:
        code: BPRE
        md5: 51901a6e40661b3914aa333c802e24e8
        offset_delta: "-0x10"
  Emerald:
    glyphs:
      1:
        latin: { offset: 0x10000, size: 0x4000, width: normal }
      3:
        latin: { offset: 0x14000, size: 0x4000, width: short }
    glyph_widths:
      normal: { offset: 0x18000, size: 0x200 }
      short: { offset: 0x18200, size: 0x200 }
    versions:
      Emerald:
        code: BPEE
        md5: "{EMERALD_MD5}"
        offset_delta: 0x0
        palettes:
          stdpal: [0x100, "0x120"]
        pokemon_sprites:
          icon_sprites: 0x19000
          icon_palettes: 0x19800
          icon_palette_indices: 0x19900
        wondercard_table: 0x1A000
        wondercard_count: 2
        name_tables:
          items: { offset: 0x1B000, entry_size: 44, name_length: 14, count: 4 }
          pokemon: { offset: 0x1C000, entry_size: 11, count: 4 }
          moves: { offset: 0x1C100, entry_size: 13, count: 4 }
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VersionDatabase {
        VersionDatabase::from_yaml_str(&SAMPLE_DB.replace("{EMERALD_MD5}", "605b89b67018abcea91e693a4dd25be3"))
            .unwrap()
    }

    #[test]
    fn identifies_by_hash_case_insensitively() {
        let db = sample();
        let v = db.identify("e26ee0d44e809351c8ce2f093c5f22a4").unwrap();
        assert_eq!(v.name, "FireRed_1.0");
        assert_eq!(v.family, "FRLG");
        assert!(db.identify("605B89B67018ABCEA91E693A4DD25BE3").unwrap().is_emerald());
        assert!(db.identify("00000000000000000000000000000000").is_none());
        assert_eq!(db.supported_hashes().len(), 3);
    }

    #[test]
    fn applies_offset_delta() {
        let db = sample();
        let v10 = db.version_by_name("FireRed_1.0").unwrap();
        let v11 = db.version_by_name("FireRed_1.1").unwrap();
        assert_eq!(v11.offset_delta, -0x10);
        assert_eq!(db.resolve_glyph_offset(v10, 3), Some(0x1000));
        assert_eq!(db.resolve_glyph_offset(v11, 3), Some(0x0FF0));
        assert_eq!(db.resolve_width_table_offset(v11, "normal"), Some(0x1FF0));
        assert_eq!(db.resolve_font_width_offset(v10, 3), Some(0x2000));
        assert_eq!(db.resolve_glyph_offset(v10, 1), None);
        assert_eq!(db.resolve_width_table_offset(v10, "short"), None);
    }

    #[test]
    fn fills_defaults_and_nested_tables() {
        let db = sample();
        let frlg = db.family("FRLG").unwrap();
        assert_eq!(frlg.bpp, 2);
        assert_eq!(frlg.pokemon_count, 440);
        assert!(frlg.japanese_glyph(3).is_none());
        assert_eq!(frlg.icon_fallback().invalid_icon, 0);
        assert_eq!(db.family("Emerald").unwrap().icon_fallback().invalid_icon, 260);

        let em = db.version_by_name("Emerald").unwrap();
        assert_eq!(em.palettes.stdpal, vec![0x100, 0x120]);
        assert_eq!(em.wondercard_count, 2);
        assert_eq!(db.version_by_name("FireRed_1.0").unwrap().wondercard_count, 8);
        let names = em.name_tables.as_ref().unwrap();
        assert_eq!(names.items.name_length, 14);
        assert_eq!(names.moves.offset, 0x1C100);
    }

    #[test]
    fn rejects_duplicate_hashes() {
        let src = SAMPLE_DB.replace("{EMERALD_MD5}", "51901a6e40661b3914aa333c802e24e8");
        let err = VersionDatabase::from_yaml_str(&src).unwrap_err();
        assert!(matches!(err, DatabaseError::DuplicateHash { .. }));
    }

    #[test]
    fn loads_json_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(
            &path,
            r#"{"games":{"FRLG":{"versions":{"LeafGreen_1.0":{"code":"BPGE","md5":"abc","offset_delta":"0x20"}}}}}"#,
        )
        .unwrap();
        let db = VersionDatabase::load(&path).unwrap();
        assert_eq!(db.identify("ABC").unwrap().offset_delta, 0x20);
    }

    #[test]
    fn parses_numbers() {
        assert_eq!(parse_number("0x1F").unwrap(), 31);
        assert_eq!(parse_number("-0x10").unwrap(), -16);
        assert_eq!(parse_number("42").unwrap(), 42);
        assert!(parse_number("zz").is_err());
    }
}
