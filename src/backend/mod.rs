//! Imaging engine abstraction.
//!
//! The pipeline core touches an engine through the [`ImageBackend`]
//! capability set (open, save, dimensions) plus eager source
//! verification and access to the engine's processor registry. Processors
//! themselves operate on the engine's native image type (the associated
//! `Image`), so everything between open and save is engine-specific while
//! the driver stays engine-agnostic.
//!
//! Two engines exist:
//!
//! | Engine | Native image | Availability |
//! |---|---|---|
//! | [`RustBackend`] | decoded pixels + captured metadata (`image` crate) | always |
//! | `VipsBackend` | `libvips` image handle | `vips` cargo feature |
//!
//! Which engine a process uses is decided once, from
//! [`Settings`](crate::settings::Settings), at startup. Nothing in the core
//! branches on the active engine per call.

pub mod calculations;
pub mod raster;
#[cfg(feature = "vips")]
pub mod vips;

pub use raster::RustBackend;
#[cfg(feature = "vips")]
pub use vips::VipsBackend;

use thiserror::Error;

use crate::chain::Registry;
use crate::context::{OutputFormat, SaveOptions};

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("processing failed: {0}")]
    ProcessingFailed(String),
}

/// Capability set implemented once per imaging engine.
pub trait ImageBackend {
    /// The engine's native image type, owned by the chain for one run.
    type Image;

    /// Engine identifier as used in configuration (`"rust"`, `"vips"`).
    fn name(&self) -> &'static str;

    /// Decode source bytes into a native image. Fails on unreadable or
    /// unsupported data; this is where source errors surface eagerly.
    fn open(&self, data: &[u8]) -> Result<Self::Image, BackendError>;

    /// Encode a native image per the accumulated save options, returning
    /// the bytes to hand to storage.
    fn save(&self, image: &Self::Image, options: &SaveOptions) -> Result<Vec<u8>, BackendError>;

    /// (width, height) in pixels.
    fn dimensions(&self, image: &Self::Image) -> (u32, u32);

    /// Format the source bytes were decoded from.
    fn source_format(&self, image: &Self::Image) -> OutputFormat;

    /// Exercise the engine's machinery on the image (tiny re-encode) so a
    /// subtly broken source fails at validation time, not at render time.
    fn verify(&self, image: &Self::Image) -> Result<(), BackendError>;

    /// The engine's processor registry. Populated at construction and
    /// read-only once pipeline runs begin.
    fn registry(&self) -> &Registry<Self::Image>;
}
