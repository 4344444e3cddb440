//! Archive detection and extraction with automatic format detection.
//!
//! Compute providers hand finished rasters back either as the raw file, as a
//! gzip stream, or as a zip archive holding one file per band. This crate
//! wraps those formats behind a unified [`Compression`] enum, providing:
//!
//! - **Format detection** from a file's leading bytes ([`Compression::sniff`],
//!   [`Compression::from_magic_bytes`])
//! - **Extraction** into a destination directory ([`Compression::extract`]),
//!   returning every file written
//!
//! Extraction is synchronous; async callers should run it inside
//! `spawn_blocking`.

pub mod error;
mod construct;
mod extract;
mod util;

/// A supported artifact container format. Defaults to
/// [`None`](Self::None) (the raw raster).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Uncompressed
    #[default]
    None,
    /// Gzip compression (.gz), a single file.
    Gzip,
    /// Zip archive (.zip), any number of files.
    Zip,
}
