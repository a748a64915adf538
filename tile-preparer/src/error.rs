use std::path::PathBuf;

use thiserror::Error;

/// Failure modes of the tile-index builder.
///
/// Cancellation is deliberately absent: a cancelled build is a normal
/// outcome that surfaces as a dirty [`TileSource`](crate::store::TileSource),
/// not as an error.
#[derive(Debug, Error)]
pub enum Error {
    /// The extent's coordinate range cannot be represented in 32-bit
    /// fixed point at any usable scale. Raised before any I/O begins.
    #[error("axis {axis} range {range} is too large for 32-bit quantization at any usable scale")]
    Precision { axis: char, range: f64 },

    /// A computed segment or region would read past the declared end of
    /// the source, or a region does not fit the working buffer.
    #[error("source consistency: {0}")]
    SourceConsistency(String),

    /// A tile store header that cannot be parsed.
    #[error("invalid tile store {path}: {reason}")]
    InvalidStore { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
