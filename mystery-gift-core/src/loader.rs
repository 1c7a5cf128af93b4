//! Locating a supported ROM on disk.

use crate::rom::MIN_ROM_SIZE;
use crate::version_db::VersionDatabase;
use crate::{find_first_existing, Result};
use log::{debug, info};
use md5::{Digest, Md5};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File names tried before walking the directory tree.
const STANDARD_ROM_NAMES: &[&str] = &[
    "rom.gba",
    "emerald.gba",
    "firered.gba",
    "leafgreen.gba",
    "roms/emerald.gba",
    "roms/firered.gba",
    "roms/leafgreen.gba",
    "Pokemon - Emerald Version (USA, Europe).gba",
    "Pokemon - FireRed Version (USA).gba",
    "Pokemon - LeafGreen Version (USA).gba",
];

const SKIP_DIRS: &[&str] = &["build", ".git", "node_modules", "__pycache__", ".cache"];
const MAX_SEARCH_DEPTH: usize = 3;

/// Lower-case hex MD5 of a buffer, the key of the version database.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct FoundRom {
    pub path: PathBuf,
    /// Entry name when the ROM came out of a zip archive.
    pub archive_entry: Option<String>,
    pub md5: String,
    pub bytes: Vec<u8>,
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// `.gba` images inside a zip archive that are large enough to be a ROM.
fn zip_rom_candidates(path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)?;
    let mut out = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if !entry.is_file()
            || !entry.name().to_ascii_lowercase().ends_with(".gba")
            || (entry.size() as usize) < MIN_ROM_SIZE
        {
            continue;
        }
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        out.push((entry.name().to_string(), bytes));
    }
    Ok(out)
}

/// Reads a ROM from a `.gba` file or the first ROM-sized `.gba` in a `.zip`.
pub fn read_rom_file(path: &Path) -> Result<Vec<u8>> {
    if has_extension(path, "zip") {
        if let Some((name, bytes)) = zip_rom_candidates(path)?.into_iter().next() {
            debug!("using {} from {}", name, path.display());
            return Ok(bytes);
        }
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no .gba image in {}", path.display()),
        )
        .into());
    }
    Ok(fs::read(path)?)
}

fn identify_file(path: &Path, db: &VersionDatabase) -> Result<Option<FoundRom>> {
    if has_extension(path, "zip") {
        for (name, bytes) in zip_rom_candidates(path)? {
            let md5 = content_hash(&bytes);
            if db.identify(&md5).is_some() {
                return Ok(Some(FoundRom {
                    path: path.to_path_buf(),
                    archive_entry: Some(name),
                    md5,
                    bytes,
                }));
            }
        }
        return Ok(None);
    }

    if fs::metadata(path)?.len() < MIN_ROM_SIZE as u64 {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    let md5 = content_hash(&bytes);
    if db.identify(&md5).is_none() {
        debug!("{}: unknown md5 {}", path.display(), md5);
        return Ok(None);
    }
    Ok(Some(FoundRom {
        path: path.to_path_buf(),
        archive_entry: None,
        md5,
        bytes,
    }))
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|n| SKIP_DIRS.contains(&n))
            .unwrap_or(false)
}

/// Finds the first supported ROM under `base`.
///
/// Standard file names are tried first, then `.gba` and `.zip` files up to
/// three levels deep, closest first.
pub fn find_rom(base: &Path, db: &VersionDatabase) -> Result<Option<FoundRom>> {
    if let Some(path) = find_first_existing(base, STANDARD_ROM_NAMES) {
        if let Some(found) = identify_file(&path, db)? {
            info!("found ROM at {}", path.display());
            return Ok(Some(found));
        }
    }

    let mut candidates: Vec<PathBuf> = WalkDir::new(base)
        .max_depth(MAX_SEARCH_DEPTH)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| has_extension(p, "gba") || has_extension(p, "zip"))
        .collect();
    candidates.sort_by(|a, b| {
        a.components()
            .count()
            .cmp(&b.components().count())
            .then_with(|| a.cmp(b))
    });

    for path in candidates {
        match identify_file(&path, db) {
            Ok(Some(found)) => {
                info!("found ROM at {}", path.display());
                return Ok(Some(found));
            }
            Ok(None) => {}
            Err(e) => debug!("skipping {}: {}", path.display(), e),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::tests::{sample_db_for, synthetic_rom};
    use std::io::Write;

    #[test]
    fn hashes_to_lower_hex_md5() {
        assert_eq!(content_hash(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(content_hash(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn finds_nested_rom_and_skips_build_dirs() {
        let rom = synthetic_rom();
        let db = sample_db_for(&rom);
        let dir = tempfile::tempdir().unwrap();

        fs::create_dir_all(dir.path().join("build")).unwrap();
        fs::write(dir.path().join("build/a.gba"), &rom).unwrap();
        assert!(find_rom(dir.path(), &db).unwrap().is_none());

        fs::create_dir_all(dir.path().join("games/gba")).unwrap();
        fs::write(dir.path().join("games/gba/my.GBA"), &rom).unwrap();
        fs::write(dir.path().join("small.gba"), b"tiny").unwrap();
        let found = find_rom(dir.path(), &db).unwrap().unwrap();
        assert!(found.path.ends_with("games/gba/my.GBA"));
        assert_eq!(found.md5, content_hash(&rom));
    }

    #[test]
    fn finds_rom_inside_zip() {
        let rom = synthetic_rom();
        let db = sample_db_for(&rom);
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("pack.zip");

        let mut writer = zip::ZipWriter::new(File::create(&zip_path).unwrap());
        let options =
            zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("readme.txt", options).unwrap();
        writer.write_all(b"hello").unwrap();
        writer.start_file("Emerald.gba", options).unwrap();
        writer.write_all(&rom).unwrap();
        writer.finish().unwrap();

        let found = find_rom(dir.path(), &db).unwrap().unwrap();
        assert_eq!(found.archive_entry.as_deref(), Some("Emerald.gba"));
        assert_eq!(read_rom_file(&zip_path).unwrap().len(), rom.len());
    }

    #[test]
    fn standard_names_win() {
        let rom = synthetic_rom();
        let db = sample_db_for(&rom);
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("roms")).unwrap();
        fs::write(dir.path().join("roms/emerald.gba"), &rom).unwrap();
        fs::write(dir.path().join("aaa.gba"), &rom).unwrap();
        let found = find_rom(dir.path(), &db).unwrap().unwrap();
        assert!(found.path.ends_with("roms/emerald.gba"));
    }
}
