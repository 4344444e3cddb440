use crate::Compression;
use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use zip::read::ZipArchive;

// Enough for the longest magic sequence we recognise.
const SNIFF_LEN: usize = 4;

impl Compression {
    /// Detect the format of a file on disk from its leading bytes.
    pub fn sniff(path: &Path) -> Result<Self> {
        let mut header = [0u8; SNIFF_LEN];
        let mut file = File::open(path).or_raise(|| ErrorKind::Io)?;
        let mut filled = 0;
        while filled < SNIFF_LEN {
            let n = file.read(&mut header[filled..]).or_raise(|| ErrorKind::Io)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(Self::from_magic_bytes(&header[..filled]))
    }

    /// Unpack `source` into the directory `dest` and return every file written.
    ///
    /// - `Zip` writes each file entry at its (sanitised) relative path.
    ///   Entries that would escape `dest` are rejected.
    /// - `Gzip` writes a single file named after `source` with any `.gz`
    ///   suffix removed.
    /// - `None` copies `source` into `dest` unchanged.
    ///
    /// `dest` is created if missing and must not be the directory holding
    /// `source` for the gzip and raw cases.
    #[tracing::instrument(skip_all, fields(source = %source.display(), format = %self))]
    pub fn extract(&self, source: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dest).or_raise(|| ErrorKind::Io)?;
        let files = match self {
            Compression::Zip => extract_zip(source, dest)?,
            Compression::Gzip => vec![extract_gzip(source, dest)?],
            Compression::None => vec![copy_raw(source, dest)?],
        };
        tracing::debug!(count = files.len(), "extracted archive");
        Ok(files)
    }
}

fn extract_zip(source: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(source).or_raise(|| ErrorKind::Io)?;
    let mut archive = ZipArchive::new(BufReader::new(file)).or_raise(|| ErrorKind::InvalidData)?;
    let mut written = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).or_raise(|| ErrorKind::InvalidData)?;
        let relative = entry.enclosed_name().ok_or_raise(|| ErrorKind::UnsafeEntry(entry.name().to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).or_raise(|| ErrorKind::Io)?;
        }
        let mut out = File::create(&target).or_raise(|| ErrorKind::Io)?;
        io::copy(&mut entry, &mut out).or_raise(|| ErrorKind::InvalidData)?;
        written.push(target);
    }
    Ok(written)
}

fn extract_gzip(source: &Path, dest: &Path) -> Result<PathBuf> {
    let name = match source.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("gz") => source.file_stem(),
        _ => source.file_name(),
    }
    .ok_or_raise(|| ErrorKind::UnsupportedFormat(source.display().to_string()))?;
    let target = dest.join(name);
    let file = File::open(source).or_raise(|| ErrorKind::Io)?;
    let mut decoder = GzDecoder::new(BufReader::new(file));
    let mut out = File::create(&target).or_raise(|| ErrorKind::Io)?;
    io::copy(&mut decoder, &mut out).or_raise(|| ErrorKind::InvalidData)?;
    Ok(target)
}

fn copy_raw(source: &Path, dest: &Path) -> Result<PathBuf> {
    let name = source.file_name().ok_or_raise(|| ErrorKind::UnsupportedFormat(source.display().to_string()))?;
    let target = dest.join(name);
    fs::copy(source, &target).or_raise(|| ErrorKind::Io)?;
    Ok(target)
}
