//! Shared synthetic-image builders for unit tests.
//!
//! Images are generated in memory through the `image` crate so tests never
//! depend on fixture files.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Luma, Rgb, RgbImage, Rgba, RgbaImage};

fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

/// RGB JPEG with a simple two-axis gradient.
pub(crate) fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
}

/// RGBA PNG with a simple two-axis gradient, fully opaque.
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
    });
    encode(DynamicImage::ImageRgba8(img), ImageFormat::Png)
}

/// Single-channel grayscale PNG.
pub(crate) fn gray_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::GrayImage::from_pixel(width, height, Luma([7]));
    encode(DynamicImage::ImageLuma8(img), ImageFormat::Png)
}

/// RGB TIFF, for exercising non-web-safe source handling.
pub(crate) fn tiff_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([10, 20, 30]));
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Tiff)
}

/// PNG with a horizontal brightness gradient: dark at x=0, bright at the
/// right edge. Lets PPOI tests read off which side a crop kept.
pub(crate) fn gradient_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, _| {
        Rgb([(x as f32 / width as f32 * 255.0) as u8; 3])
    });
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Png)
}
