//! Pure dimension math shared by both engines.
//!
//! All functions here are pure and testable without any I/O or images.

use crate::context::Ppoi;

/// A crop window inside a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Compute the largest window with the target aspect ratio, centered on
/// the PPOI and clamped so it never leaves the image bounds.
///
/// One axis always spans the full source; the other is trimmed around the
/// point of interest. A PPOI of (0.5, 0.5) yields a plain center crop;
/// (0.0, 0.0) anchors the window at the top-left.
pub fn crop_box(source: (u32, u32), target: (u32, u32), ppoi: Ppoi) -> CropBox {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    let src_aspect = src_w as f64 / src_h as f64;
    let tgt_aspect = tgt_w as f64 / tgt_h as f64;

    if src_aspect > tgt_aspect {
        // Source is wider: full height, trim the width around ppoi.x.
        let width = ((src_h as f64 * tgt_aspect).round() as u32).clamp(1, src_w);
        CropBox {
            left: window_offset(src_w, width, ppoi.x),
            top: 0,
            width,
            height: src_h,
        }
    } else {
        // Source is taller (or matches): full width, trim the height.
        let height = ((src_w as f64 / tgt_aspect).round() as u32).clamp(1, src_h);
        CropBox {
            left: 0,
            top: window_offset(src_h, height, ppoi.y),
            width: src_w,
            height,
        }
    }
}

/// Offset of a `window`-sized span centered on `ppoi` within `extent`,
/// clamped to keep the span inside [0, extent].
fn window_offset(extent: u32, window: u32, ppoi: f64) -> u32 {
    let center = ppoi * extent as f64;
    let offset = (center - window as f64 / 2.0).round();
    offset.clamp(0.0, (extent - window) as f64) as u32
}

/// Scale a source down so it fits inside `bounds`, preserving aspect
/// ratio. Never upscales: a source already inside the box is returned
/// unchanged.
pub fn fit_within(source: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let factor = 1.0_f64
        .min(bounds.0 as f64 / src_w as f64)
        .min(bounds.1 as f64 / src_h as f64);
    if factor >= 1.0 {
        return source;
    }
    (
        ((src_w as f64 * factor) as u32).max(1),
        ((src_h as f64 * factor) as u32).max(1),
    )
}
