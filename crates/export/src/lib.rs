//! Cache-backed export of remote raster artifacts.
//!
//! [`Exporter::export_if_needed`] is the entry point: it answers from the
//! local cache when it can and otherwise drives the provider, through an
//! async job on the shared mount or a direct download, publishing the
//! result atomically before returning its path.
//!
//! ```no_run
//! use terracache_config::Config;
//! use terracache_descriptor::products::{DateRange, ndvi, study_area};
//! use terracache_export::Exporter;
//!
//! # async fn run() {
//! let exporter = Exporter::init(&Config::load().unwrap(), None).unwrap();
//! let range = DateRange::parse("2023-01-01", "2023-12-31").unwrap();
//! let descriptor = ndvi(&range, study_area()).unwrap();
//! let path = exporter.export_if_needed(&descriptor).await.unwrap();
//! println!("{}", path.display());
//! # }
//! ```

pub mod error;
mod exporter;
mod flight;

pub use crate::exporter::{ExportOptions, Exporter};
pub use terracache_remote::{CancellationToken, ExportStrategy};
