//! Deterministic rendition path derivation.
//!
//! Renditions live under a dedicated prefix, bucketed to keep any one
//! directory small, and carry a spec fingerprint in the filename:
//!
//! ```text
//! __processed__/3fa/python-logo-6e3df744dc82.png
//! ^ prefix      ^ bucket (source hash)  ^ fingerprint (spec hash)
//! ```
//!
//! The fingerprint covers everything that determines the output's identity:
//! the source name, the PPOI, the output extension, and every processor
//! descriptor in order. Same inputs always map to the same path; changing
//! any spec detail maps to a fresh path, which is what makes the URLs
//! cache-free: a CDN can never serve a stale rendition for a changed spec
//! because the path itself changed.
//!
//! Paths are derived with string math only. No storage I/O happens here:
//! the read path must stay cheap enough to call per request.

use sha2::{Digest, Sha256};

use crate::context::Context;
use crate::spec::Arg;

/// Directory prefix all renditions are written under.
pub const PROCESSED_DIR: &str = "__processed__";

/// Derive the storage-relative output path for one rendition run.
///
/// The context's extension (set by the spec, or pre-seeded from the
/// source) wins; a source with no extension at all produces a bare
/// fingerprinted name.
pub fn rendition_path(source_name: &str, context: &Context) -> String {
    let file_name = source_name.rsplit('/').next().unwrap_or(source_name);
    let (stem, source_ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    };

    let extension = context
        .extension()
        .map(|e| e.trim_start_matches('.').to_owned())
        .or_else(|| source_ext.map(str::to_owned))
        .unwrap_or_default();

    let source_digest = format!("{:x}", Sha256::digest(source_name.as_bytes()));
    let bucket = &source_digest[..3];
    let fingerprint = spec_fingerprint(source_name, context, &extension);

    if extension.is_empty() {
        format!("{PROCESSED_DIR}/{bucket}/{stem}-{fingerprint}")
    } else {
        format!("{PROCESSED_DIR}/{bucket}/{stem}-{fingerprint}.{extension}")
    }
}

/// First 12 hex chars of a SHA-256 over the rendition's identity inputs.
fn spec_fingerprint(source_name: &str, context: &Context, extension: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"rendition\0");
    hasher.update(source_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(context.ppoi().x.to_le_bytes());
    hasher.update(context.ppoi().y.to_le_bytes());
    hasher.update(extension.as_bytes());
    hasher.update(b"\0");
    for spec in context.processors() {
        hasher.update(spec.name.as_bytes());
        for arg in &spec.args {
            match arg {
                Arg::Size(w, h) => {
                    hasher.update(b"s");
                    hasher.update(w.to_le_bytes());
                    hasher.update(h.to_le_bytes());
                }
                Arg::Int(i) => {
                    hasher.update(b"i");
                    hasher.update(i.to_le_bytes());
                }
                Arg::Float(f) => {
                    hasher.update(b"f");
                    hasher.update(f.to_le_bytes());
                }
                Arg::Text(t) => {
                    hasher.update(b"t");
                    hasher.update(t.as_bytes());
                }
            }
        }
        hasher.update(b"\0");
    }
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(12);
    hex
}
