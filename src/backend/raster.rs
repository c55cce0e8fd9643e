//! Pure-Rust imaging engine, zero system dependencies.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, TIFF, WebP, BMP) | `image` crate (pure Rust decoders) |
//! | Orientation / ICC capture | `ImageDecoder::orientation` / `icc_profile` |
//! | Resize | `image::imageops` with `Lanczos3` filter |
//! | Crop | `DynamicImage::crop_imm` |
//! | Encode | `image` codecs, quality/ICC via the encoder APIs |
//!
//! Engine-specific behavior (vs. the vips engine): JPEG output is baseline
//! (the encoder has no progressive mode; the flag set by `process_jpeg` is
//! recorded but not honored here), and WebP output is always lossless.

use std::io::Cursor;

use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{ColorType, DynamicImage, ImageDecoder, ImageEncoder, ImageFormat, ImageReader};

use crate::backend::calculations::{crop_box, fit_within};
use crate::backend::{BackendError, ImageBackend};
use crate::chain::{Next, Processor, Registry, StepError};
use crate::context::{Context, OutputFormat, SaveOptions};
use crate::spec::{Arg, SpecError};

/// A decoded image plus the source metadata the pipeline cares about.
///
/// `DynamicImage` alone drops orientation and color profile on the floor at
/// decode time, so the engine carries them alongside the pixels for the
/// `autorotate` and `preserve_icc_profile` processors to consume.
pub struct RasterImage {
    pixels: DynamicImage,
    format: OutputFormat,
    orientation: Orientation,
    icc_profile: Option<Vec<u8>>,
}

impl RasterImage {
    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Pure Rust backend using the `image` crate ecosystem.
pub struct RustBackend {
    registry: Registry<RasterImage>,
}

impl RustBackend {
    pub fn new() -> Self {
        Self {
            registry: builtin_registry(),
        }
    }

    /// Mutable registry access for registering custom processors.
    ///
    /// Registration is an initialization-time activity; doing it after
    /// pipeline runs have begun is not supported.
    pub fn registry_mut(&mut self) -> &mut Registry<RasterImage> {
        &mut self.registry
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn output_format(format: ImageFormat) -> Option<OutputFormat> {
    match format {
        ImageFormat::Jpeg => Some(OutputFormat::Jpeg),
        ImageFormat::Png => Some(OutputFormat::Png),
        ImageFormat::Gif => Some(OutputFormat::Gif),
        ImageFormat::Tiff => Some(OutputFormat::Tiff),
        ImageFormat::WebP => Some(OutputFormat::Webp),
        ImageFormat::Bmp => Some(OutputFormat::Bmp),
        _ => None,
    }
}

impl ImageBackend for RustBackend {
    type Image = RasterImage;

    fn name(&self) -> &'static str {
        "rust"
    }

    fn open(&self, data: &[u8]) -> Result<RasterImage, BackendError> {
        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let format = reader
            .format()
            .ok_or_else(|| BackendError::Decode("unrecognized image format".into()))?;
        let format = output_format(format)
            .ok_or_else(|| BackendError::Decode(format!("unsupported input format {format:?}")))?;

        let mut decoder = reader
            .into_decoder()
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
        let icc_profile = decoder.icc_profile().ok().flatten();
        let pixels =
            DynamicImage::from_decoder(decoder).map_err(|e| BackendError::Decode(e.to_string()))?;

        Ok(RasterImage {
            pixels,
            format,
            orientation,
            icc_profile,
        })
    }

    fn save(&self, image: &RasterImage, options: &SaveOptions) -> Result<Vec<u8>, BackendError> {
        let format = options.format.unwrap_or(image.format);
        let quality = options.quality.unwrap_or(90);
        let mut buf = Cursor::new(Vec::new());

        match format {
            OutputFormat::Jpeg => {
                let mut encoder =
                    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
                if let Some(profile) = &options.icc_profile {
                    let _ = encoder.set_icc_profile(profile.clone());
                }
                image
                    .pixels
                    .write_with_encoder(encoder)
                    .map_err(|e| BackendError::Encode(e.to_string()))?;
            }
            OutputFormat::Png => {
                let mut encoder = image::codecs::png::PngEncoder::new(&mut buf);
                if let Some(profile) = &options.icc_profile {
                    let _ = encoder.set_icc_profile(profile.clone());
                }
                image
                    .pixels
                    .write_with_encoder(encoder)
                    .map_err(|e| BackendError::Encode(e.to_string()))?;
            }
            OutputFormat::Webp => {
                // The image crate only ships a lossless WebP encoder, which
                // also limits the color types it accepts.
                let encoder = image::codecs::webp::WebPEncoder::new_lossless(&mut buf);
                let pixels = match image.pixels.color() {
                    ColorType::Rgb8 | ColorType::Rgba8 => image.pixels.clone(),
                    _ => DynamicImage::ImageRgba8(image.pixels.to_rgba8()),
                };
                pixels
                    .write_with_encoder(encoder)
                    .map_err(|e| BackendError::Encode(e.to_string()))?;
            }
            OutputFormat::Gif => {
                image
                    .pixels
                    .write_to(&mut buf, ImageFormat::Gif)
                    .map_err(|e| BackendError::Encode(e.to_string()))?;
            }
            OutputFormat::Tiff => {
                image
                    .pixels
                    .write_to(&mut buf, ImageFormat::Tiff)
                    .map_err(|e| BackendError::Encode(e.to_string()))?;
            }
            OutputFormat::Bmp => {
                image
                    .pixels
                    .write_to(&mut buf, ImageFormat::Bmp)
                    .map_err(|e| BackendError::Encode(e.to_string()))?;
            }
        }

        Ok(buf.into_inner())
    }

    fn dimensions(&self, image: &RasterImage) -> (u32, u32) {
        (image.pixels.width(), image.pixels.height())
    }

    fn source_format(&self, image: &RasterImage) -> OutputFormat {
        image.format
    }

    fn verify(&self, image: &RasterImage) -> Result<(), BackendError> {
        // Anything which exercises the machinery so that we find out
        // whether the image works at all.
        let probe = image.pixels.thumbnail(16, 16);
        let mut sink = Cursor::new(Vec::new());
        probe
            .write_to(&mut sink, ImageFormat::Png)
            .map_err(|e| BackendError::Decode(format!("image failed validation: {e}")))?;
        Ok(())
    }

    fn registry(&self) -> &Registry<RasterImage> {
        &self.registry
    }
}

// =============================================================================
// Built-in processors
// =============================================================================

fn builtin_registry() -> Registry<RasterImage> {
    let mut registry = Registry::new();
    registry.add("autorotate", |args| {
        no_args("autorotate", args)?;
        Ok(Box::new(Autorotate))
    });
    registry.add("process_jpeg", |args| {
        no_args("process_jpeg", args)?;
        Ok(Box::new(ProcessJpeg))
    });
    registry.add("process_png", |args| {
        no_args("process_png", args)?;
        Ok(Box::new(ProcessPng))
    });
    registry.add("process_gif", |args| {
        no_args("process_gif", args)?;
        Ok(Box::new(ProcessGif))
    });
    registry.add("preserve_icc_profile", |args| {
        no_args("preserve_icc_profile", args)?;
        Ok(Box::new(PreserveIccProfile))
    });
    registry.add("thumbnail", |args| {
        let (width, height) = size_arg("thumbnail", args)?;
        Ok(Box::new(Thumbnail { width, height }))
    });
    registry.add("crop", |args| {
        let (width, height) = size_arg("crop", args)?;
        Ok(Box::new(Crop { width, height }))
    });
    crate::websafe::register_into(&mut registry);
    registry
}

pub(crate) fn no_args(processor: &str, args: &[Arg]) -> Result<(), SpecError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(SpecError::BadArgs {
            processor: processor.to_owned(),
            reason: "takes no arguments".into(),
        })
    }
}

pub(crate) fn size_arg(processor: &str, args: &[Arg]) -> Result<(u32, u32), SpecError> {
    match args {
        [Arg::Size(w, h)] if *w > 0 && *h > 0 => Ok((*w, *h)),
        [Arg::Size(..)] => Err(SpecError::BadArgs {
            processor: processor.to_owned(),
            reason: "width and height must be positive".into(),
        }),
        _ => Err(SpecError::BadArgs {
            processor: processor.to_owned(),
            reason: "expected a single (width, height) size".into(),
        }),
    }
}

/// Apply EXIF orientation to the pixel data, then clear it so the save
/// step does not carry a now-wrong orientation tag.
struct Autorotate;

impl Processor<RasterImage> for Autorotate {
    fn apply(
        &self,
        mut image: RasterImage,
        context: &mut Context,
        next: Next<'_, RasterImage>,
    ) -> Result<RasterImage, StepError> {
        if image.orientation != Orientation::NoTransforms {
            image.pixels.apply_orientation(image.orientation);
            image.orientation = Orientation::NoTransforms;
        }
        Ok(next.get_image(image, context)?)
    }
}

/// JPEG normalization: quality 90, progressive flag, and everything
/// (grayscale and CMYK-ish modes included) converted to RGB.
struct ProcessJpeg;

impl Processor<RasterImage> for ProcessJpeg {
    fn apply(
        &self,
        mut image: RasterImage,
        context: &mut Context,
        next: Next<'_, RasterImage>,
    ) -> Result<RasterImage, StepError> {
        if context.save_options().format == Some(OutputFormat::Jpeg) {
            let options = context.save_options_mut();
            options.quality = Some(90);
            options.progressive = true;
            if image.pixels.color() != ColorType::Rgb8 {
                image.pixels = DynamicImage::ImageRgb8(image.pixels.to_rgb8());
            }
        }
        Ok(next.get_image(image, context)?)
    }
}

/// PNG normalization, keyed on channel count: sub-3-channel images are
/// promoted to RGBA so transparency survives. Palette sources are already
/// expanded by the decoder.
struct ProcessPng;

impl Processor<RasterImage> for ProcessPng {
    fn apply(
        &self,
        mut image: RasterImage,
        context: &mut Context,
        next: Next<'_, RasterImage>,
    ) -> Result<RasterImage, StepError> {
        if context.save_options().format == Some(OutputFormat::Png)
            && image.pixels.color().channel_count() < 3
        {
            image.pixels = DynamicImage::ImageRgba8(image.pixels.to_rgba8());
        }
        Ok(next.get_image(image, context)?)
    }
}

/// GIF handling: make sure an alpha channel exists before downstream
/// resizes so transparency is carried through; the palette is re-derived
/// at encode time.
struct ProcessGif;

impl Processor<RasterImage> for ProcessGif {
    fn apply(
        &self,
        mut image: RasterImage,
        context: &mut Context,
        next: Next<'_, RasterImage>,
    ) -> Result<RasterImage, StepError> {
        if context.save_options().format == Some(OutputFormat::Gif)
            && !image.pixels.color().has_alpha()
        {
            image.pixels = DynamicImage::ImageRgba8(image.pixels.to_rgba8());
        }
        Ok(next.get_image(image, context)?)
    }
}

/// Copy the decoded ICC profile into the save options so the encoder
/// embeds it in the output.
struct PreserveIccProfile;

impl Processor<RasterImage> for PreserveIccProfile {
    fn apply(
        &self,
        image: RasterImage,
        context: &mut Context,
        next: Next<'_, RasterImage>,
    ) -> Result<RasterImage, StepError> {
        if let Some(profile) = &image.icc_profile {
            context.save_options_mut().icc_profile = Some(profile.clone());
        }
        Ok(next.get_image(image, context)?)
    }
}

/// Bounding-box resize: fit within width×height, keep aspect, never
/// upscale, never crop.
struct Thumbnail {
    width: u32,
    height: u32,
}

impl Processor<RasterImage> for Thumbnail {
    fn apply(
        &self,
        image: RasterImage,
        context: &mut Context,
        next: Next<'_, RasterImage>,
    ) -> Result<RasterImage, StepError> {
        let mut image = next.get_image(image, context)?;
        let current = (image.pixels.width(), image.pixels.height());
        let (w, h) = fit_within(current, (self.width, self.height));
        if (w, h) != current {
            image.pixels = image.pixels.resize_exact(w, h, FilterType::Lanczos3);
        }
        Ok(image)
    }
}

/// PPOI-aware exact-size crop: trim the largest window with the target
/// aspect around the point of interest, then scale to exactly
/// width×height.
struct Crop {
    width: u32,
    height: u32,
}

impl Processor<RasterImage> for Crop {
    fn apply(
        &self,
        image: RasterImage,
        context: &mut Context,
        next: Next<'_, RasterImage>,
    ) -> Result<RasterImage, StepError> {
        let mut image = next.get_image(image, context)?;
        let b = crop_box(
            (image.pixels.width(), image.pixels.height()),
            (self.width, self.height),
            context.ppoi(),
        );
        let window = image.pixels.crop_imm(b.left, b.top, b.width, b.height);
        image.pixels = window.resize_exact(self.width, self.height, FilterType::Lanczos3);
        Ok(image)
    }
}
