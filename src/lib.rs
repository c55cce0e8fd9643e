//! # Darkroom
//!
//! A declarative image rendition pipeline. Given a source image in a blob
//! store and a per-format specification, darkroom derives processed
//! renditions (thumbnails, PPOI-aware crops, format conversions) and
//! exposes them at deterministic, cache-free URLs.
//!
//! # Architecture: Spec → Sealed Context → Chain → Storage
//!
//! ```text
//! FormatSpec ──resolve──▶ Context (sealed) ──build──▶ ProcessorChain
//!                                                          │
//! Storage ──open──▶ engine Image ──run chain──▶ Image ──save──▶ Storage
//! ```
//!
//! Every run follows the same four steps, and each step can only fail in
//! its own way: spec resolution raises configuration errors (before any
//! image bytes are touched), open raises source errors, the chain raises
//! processing errors tagged with the failing processor, and storage errors
//! pass through unchanged.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`context`] | Sealable per-run parameter bag: processors, output name/extension, PPOI, save options |
//! | [`spec`] | Declarative processor and format specs, including dynamic (callable) specs |
//! | [`chain`] | Processor registry and the explicit-cursor chain executor |
//! | [`backend`] | `ImageBackend` capability trait, the pure-Rust engine, the optional vips engine |
//! | [`driver`] | Orchestrates runs; read-side URL derivation, force regeneration, failure policy |
//! | [`naming`] | Deterministic `__processed__/<bucket>/<stem>-<fingerprint>.<ext>` paths |
//! | [`storage`] | Blob-store boundary with filesystem and in-memory implementations |
//! | [`settings`] | Process-wide configuration: engine selection, failure and validation toggles |
//! | [`websafe`] | Dynamic specs forcing browser-friendly output formats |
//!
//! # Design Decisions
//!
//! ## Chains Are Middleware, Executed With a Cursor
//!
//! A processor receives the image and a [`chain::Next`] continuation for
//! the rest of the chain, so it can act before, after, or instead of its
//! successors. The executor walks an explicit step list instead of nesting
//! closures: stack depth stays proportional to the chain length and every
//! failure is attributed to a named step.
//!
//! ## Sealed Contexts
//!
//! Output identity (processor list, name, extension, PPOI) is frozen the
//! moment the output path has been derived. A custom processor that tries
//! to change these mid-run gets a hard [`context::SealedError`] rather
//! than silently producing a rendition under a stale path. Save options
//! deliberately stay writable so late processors can adjust quality or
//! format.
//!
//! ## Two Engines, One Spec Language
//!
//! The same format specs run against the pure-Rust engine (`image` crate,
//! zero system dependencies) or libvips (`vips` cargo feature). Each
//! engine registers its own implementations of the built-in processors
//! over its native image type; outputs are behaviorally equivalent, not
//! bit-identical. The engine is chosen once per process from
//! [`settings::Settings`].
//!
//! ## Renditions Are Never Probed
//!
//! URL accessors are pure string math over the source path and the spec
//! fingerprint. Whether the file exists is an invariant maintained by the
//! save/delete lifecycle; only the explicit
//! [`force`](driver::RenditionDriver::force) operation regenerates on
//! demand.

pub mod backend;
pub mod chain;
pub mod context;
pub mod driver;
pub mod naming;
pub mod settings;
pub mod spec;
pub mod storage;
pub mod websafe;

#[cfg(test)]
pub(crate) mod test_helpers;

#[cfg(feature = "vips")]
pub use backend::VipsBackend;
pub use backend::{BackendError, ImageBackend, RustBackend};
pub use chain::{ChainError, Next, Processor, ProcessorChain, Registry, StepError};
pub use context::{Context, OutputFormat, Ppoi, SaveOptions, SealedError};
pub use driver::{Rendition, RenditionDriver, RenditionError, SourceFile};
pub use settings::{Engine, Settings, SettingsError};
pub use spec::{Arg, FormatMap, FormatSpec, ProcessorSpec, SpecError};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};
