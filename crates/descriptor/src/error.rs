//! Descriptor Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A descriptor error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for descriptor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq)]
pub enum ErrorKind {
    /// The logical export name is empty or only whitespace.
    #[display("invalid artifact name: {_0:?}")]
    InvalidName(#[error(not(source))] String),
    /// Pixel scale must be a finite, positive number of metres.
    #[display("invalid scale: {_0}")]
    InvalidScale(#[error(not(source))] f64),
    /// Bounding box is inverted or a polygon has fewer than three vertices.
    #[display("invalid region: {_0}")]
    InvalidRegion(#[error(not(source))] String),
    /// The coordinate reference system string is empty.
    #[display("invalid crs: {_0:?}")]
    InvalidCrs(#[error(not(source))] String),
    /// Date could not be parsed, or the range ends before it starts.
    #[display("invalid date range: {_0}")]
    InvalidDateRange(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
