//! Out-of-core spatial tiling of very large point clouds.
//!
//! Reorganizes billions of unordered 3-D samples into an on-disk tile
//! store: a regular grid over the dataset extent, every point relocated
//! so that each grid cell's points are stored contiguously in row-major
//! cell order, with per-tile counts in the header. Datasets far larger
//! than memory are handled with fixed-size pooled buffers, one density
//! scan, and an in-place bucket partition per sparse region.

pub mod buffer;
pub mod config;
pub mod density;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod ingest;
pub mod progress;
pub mod quantization;
pub mod source;
pub mod statistics;
pub mod store;
pub mod stream;
pub mod tiler;

pub use buffer::BufferPool;
pub use config::TilingConfig;
pub use error::{Error, Result};
pub use geometry::{Extent3D, Point3D};
pub use progress::ProgressManager;
pub use quantization::{QuantVariant, Quantization};
pub use source::PointCloudBinarySource;
pub use store::TileSource;
pub use tiler::TileIndexBuilder;
