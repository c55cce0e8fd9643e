//! Processing context: the evolvable bag of parameters a pipeline run
//! carries alongside the image.
//!
//! A [`Context`] goes through two phases. While it is being resolved
//! (static spec copied in, dynamic spec callable run, output name derived)
//! every field is writable. Once [`Context::seal`] is called, the
//! identity-defining fields (`processors`, `name`, `extension`, `ppoi`)
//! are frozen and any further write fails with [`SealedError`]. Only
//! [`SaveOptions`] stays writable for the whole run, so late processors can
//! still influence the final encode (quality or format overrides).
//!
//! Sealing exists to catch a specific defect class: a custom processor
//! mutating fields that already determined the output path. That write
//! would silently produce a rendition under a name computed from the old
//! values, so it is always an error, never a fallback.

use std::fmt;
use thiserror::Error;

use crate::spec::ProcessorSpec;

/// Write to a sealed [`Context`] attribute.
///
/// Kept as its own error type so callers and tests can assert on the
/// violation specifically rather than pattern-matching a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("attribute `{attribute}` is sealed and can no longer be modified")]
pub struct SealedError {
    /// Name of the attribute the write targeted.
    pub attribute: &'static str,
}

/// Primary point of interest: relative (x, y) coordinates in [0, 1].
///
/// (0.5, 0.5) is the image center; (0.0, 0.0) the top-left corner. Crop
/// windows are centered on this point (clamped to the image bounds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ppoi {
    pub x: f64,
    pub y: f64,
}

impl Ppoi {
    /// The default point of interest: the image center.
    pub const CENTER: Ppoi = Ppoi { x: 0.5, y: 0.5 };

    /// Build a PPOI, clamping both coordinates into [0, 1].
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x: x.clamp(0.0, 1.0),
            y: y.clamp(0.0, 1.0),
        }
    }

    /// Parse the `"0.25x0.75"` interchange form used by point-of-interest
    /// form fields. Anything unparsable yields [`Ppoi::CENTER`]: a stored
    /// garbage value must degrade to a center crop, not abort the save.
    pub fn parse(value: &str) -> Self {
        let mut parts = value.splitn(2, 'x');
        match (
            parts.next().and_then(|p| p.trim().parse::<f64>().ok()),
            parts.next().and_then(|p| p.trim().parse::<f64>().ok()),
        ) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Self::new(x, y),
            _ => Self::CENTER,
        }
    }
}

impl Default for Ppoi {
    fn default() -> Self {
        Self::CENTER
    }
}

impl fmt::Display for Ppoi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.x, self.y)
    }
}

/// Output image formats the engines can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Gif,
    Tiff,
    Webp,
    Bmp,
}

impl OutputFormat {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Gif => "gif",
            OutputFormat::Tiff => "tif",
            OutputFormat::Webp => "webp",
            OutputFormat::Bmp => "bmp",
        }
    }

    /// Map a file extension (with or without the leading dot, any case)
    /// to a format. Returns `None` for extensions no engine can write.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            "png" => Some(OutputFormat::Png),
            "gif" => Some(OutputFormat::Gif),
            "tif" | "tiff" => Some(OutputFormat::Tiff),
            "webp" => Some(OutputFormat::Webp),
            "bmp" => Some(OutputFormat::Bmp),
            _ => None,
        }
    }
}

/// Save-time options, the one part of a [`Context`] that stays writable
/// after sealing.
///
/// Processors fill this in as the chain runs (`process_jpeg` sets quality
/// and the progressive flag, `preserve_icc_profile` copies the profile,
/// `force_webp` rewrites the format) and the engine's save operation
/// consumes it. Options a given engine cannot honor are ignored there and
/// noted in the engine's docs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveOptions {
    /// Target encode format. Seeded by the driver from the context
    /// extension (falling back to the source format) before the chain runs.
    pub format: Option<OutputFormat>,
    /// Lossy encode quality, 1-100.
    pub quality: Option<u8>,
    /// Progressive/interlaced encoding for formats that support it.
    pub progressive: bool,
    /// ICC color profile to embed in the output.
    pub icc_profile: Option<Vec<u8>>,
    /// Prefer lossless encoding where the format offers both.
    pub lossless: bool,
}

/// Parameters and output directives for a single pipeline run.
///
/// Owned by exactly one run; never shared across concurrent renditions.
#[derive(Debug, Clone, Default)]
pub struct Context {
    processors: Vec<ProcessorSpec>,
    name: Option<String>,
    extension: Option<String>,
    ppoi: Ppoi,
    save_options: SaveOptions,
    sealed: bool,
}

impl Context {
    pub fn new(processors: Vec<ProcessorSpec>) -> Self {
        Self {
            processors,
            ..Self::default()
        }
    }

    pub fn processors(&self) -> &[ProcessorSpec] {
        &self.processors
    }

    /// Output path relative to the storage root, once assigned.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Output file extension including the leading dot, if overridden.
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    pub fn ppoi(&self) -> Ppoi {
        self.ppoi
    }

    pub fn set_processors(&mut self, processors: Vec<ProcessorSpec>) -> Result<(), SealedError> {
        self.check_unsealed("processors")?;
        self.processors = processors;
        Ok(())
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<(), SealedError> {
        self.check_unsealed("name")?;
        self.name = Some(name.into());
        Ok(())
    }

    pub fn set_extension(&mut self, extension: impl Into<String>) -> Result<(), SealedError> {
        self.check_unsealed("extension")?;
        self.extension = Some(extension.into());
        Ok(())
    }

    pub fn set_ppoi(&mut self, ppoi: Ppoi) -> Result<(), SealedError> {
        self.check_unsealed("ppoi")?;
        self.ppoi = ppoi;
        Ok(())
    }

    pub fn save_options(&self) -> &SaveOptions {
        &self.save_options
    }

    /// Mutable access to the save options. Allowed at any time, sealed or
    /// not: late processors adjust quality and format through this.
    pub fn save_options_mut(&mut self) -> &mut SaveOptions {
        &mut self.save_options
    }

    /// Freeze `processors`, `name`, `extension` and `ppoi`. Idempotent and
    /// irreversible.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn check_unsealed(&self, attribute: &'static str) -> Result<(), SealedError> {
        if self.sealed {
            Err(SealedError { attribute })
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context(sealed={})", self.sealed)
    }
}
