//! Rendition driver: one run = spec → sealed context → chain → storage.
//!
//! The driver is the only place where the pipeline pieces meet: it resolves
//! a format spec into a [`Context`], seals it, builds the chain against the
//! engine's registry (configuration errors surface *here*, before any image
//! bytes are opened), runs the chain, and writes the encoded result through
//! the storage collaborator at a deterministic path.
//!
//! Two distinct entry classes exist:
//!
//! - **Read side**: [`RenditionDriver::rendition_path`] /
//!   [`rendition_url`](RenditionDriver::rendition_url) derive the
//!   deterministic output location with string math only. They never probe
//!   storage: a rendition's existence is an invariant upheld by the
//!   save/delete lifecycle, not something checked per read.
//! - **Write side**: [`process`](RenditionDriver::process) runs the
//!   pipeline and writes the result. The save lifecycle calls it when a
//!   source changes; [`force`](RenditionDriver::force) is the explicit
//!   regenerate-now operation that bypasses the existence invariant.
//!
//! Failure policy: configuration and storage errors always propagate. With
//! `silent_failure` enabled, source and processing failures are logged and
//! the unprocessed source stands in for that format only; a defective
//! processor degrades one rendition, not the whole save.

use thiserror::Error;
use tracing::{debug, error};

use crate::backend::{BackendError, ImageBackend};
use crate::context::{Context, OutputFormat, Ppoi, SealedError};
use crate::naming;
use crate::settings::Settings;
use crate::spec::{FormatMap, FormatSpec, SpecError};
use crate::storage::{Storage, StorageError};

#[derive(Error, Debug)]
pub enum RenditionError {
    #[error("configuration error: {0}")]
    Spec(#[from] SpecError),
    #[error("configuration error in format `{format}`: {source}")]
    Config {
        format: String,
        #[source]
        source: SpecError,
    },
    #[error("unreadable source `{path}`: {source}")]
    Source {
        path: String,
        #[source]
        source: BackendError,
    },
    #[error("processing format `{format}` failed in `{processor}`: {source}")]
    Processing {
        format: String,
        processor: String,
        #[source]
        source: BackendError,
    },
    #[error("saving format `{format}` failed: {source}")]
    Save {
        format: String,
        #[source]
        source: BackendError,
    },
    #[error(transparent)]
    Sealed(#[from] SealedError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl RenditionError {
    /// Whether silent-failure mode may swallow this error. Configuration
    /// and storage errors are never swallowed: they indicate a broken
    /// setup, not a broken image.
    fn recoverable(&self) -> bool {
        matches!(
            self,
            RenditionError::Source { .. }
                | RenditionError::Processing { .. }
                | RenditionError::Save { .. }
        )
    }
}

/// A source image as the field collaborator hands it over: a storage path
/// plus the record's point of interest.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub path: String,
    pub ppoi: Ppoi,
}

impl SourceFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ppoi: Ppoi::CENTER,
        }
    }

    pub fn with_ppoi(path: impl Into<String>, ppoi: Ppoi) -> Self {
        Self {
            path: path.into(),
            ppoi,
        }
    }

    /// The source's extension including the leading dot, if it has one.
    fn extension(&self) -> Option<&str> {
        let file_name = self.path.rsplit('/').next().unwrap_or(&self.path);
        match file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => Some(&file_name[stem.len()..]),
            _ => None,
        }
    }
}

/// A written (or substituted) rendition.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendition {
    /// Storage-relative path of the artifact.
    pub path: String,
    /// Final pixel dimensions. `None` only on a silent-failure fallback
    /// whose source could not even be decoded.
    pub dimensions: Option<(u32, u32)>,
}

/// Orchestrates rendition runs for one backend + storage + settings triple.
///
/// The driver borrows its collaborators and holds no mutable state: each
/// run owns its own context and chain, so independent runs cannot observe
/// each other.
pub struct RenditionDriver<'a, B: ImageBackend, S: Storage> {
    backend: &'a B,
    storage: &'a S,
    settings: &'a Settings,
}

impl<'a, B: ImageBackend, S: Storage> RenditionDriver<'a, B, S> {
    pub fn new(backend: &'a B, storage: &'a S, settings: &'a Settings) -> Self {
        Self {
            backend,
            storage,
            settings,
        }
    }

    /// Resolve a spec into a sealed context plus the derived output path.
    fn resolve_context(
        &self,
        source: &SourceFile,
        format_name: &str,
        spec: &FormatSpec,
    ) -> Result<(Context, String), RenditionError> {
        let mut ctx = Context::default();
        ctx.set_ppoi(source.ppoi)?;
        if let Some(ext) = source.extension() {
            ctx.set_extension(ext)?;
        }
        match spec {
            FormatSpec::Pipeline(processors) => ctx.set_processors(processors.clone())?,
            FormatSpec::Dynamic(resolve) => resolve.as_ref()(&source.path, &mut ctx)
                .map_err(|err| RenditionError::Config {
                    format: format_name.to_owned(),
                    source: err,
                })?,
        }
        let path = naming::rendition_path(&source.path, &ctx);
        ctx.set_name(path.clone())?;
        ctx.seal();
        Ok((ctx, path))
    }

    /// Deterministic output path for a format. String math only; storage
    /// is never touched.
    pub fn rendition_path(
        &self,
        source: &SourceFile,
        format_name: &str,
        formats: &FormatMap,
    ) -> Result<String, RenditionError> {
        let spec = formats.get(format_name)?;
        let (_, path) = self.resolve_context(source, format_name, spec)?;
        Ok(path)
    }

    /// Public URL for a format's rendition. Storage is only asked to map
    /// the path to a URL, never to check that the file exists.
    pub fn rendition_url(
        &self,
        source: &SourceFile,
        format_name: &str,
        formats: &FormatMap,
    ) -> Result<String, RenditionError> {
        Ok(self
            .storage
            .url(&self.rendition_path(source, format_name, formats)?))
    }

    /// Generate one rendition: the save-lifecycle entry point.
    pub fn process(
        &self,
        source: &SourceFile,
        format_name: &str,
        formats: &FormatMap,
    ) -> Result<Rendition, RenditionError> {
        let spec = formats.get(format_name)?;
        let (mut ctx, output_path) = self.resolve_context(source, format_name, spec)?;

        // Build the chain before any bytes are opened so a bad processor
        // name fails the run without decode work.
        let chain = self
            .backend
            .registry()
            .build_chain(ctx.processors())
            .map_err(|err| RenditionError::Config {
                format: format_name.to_owned(),
                source: err,
            })?;
        let data = self.storage.open(&source.path)?;

        match self.run_chain(&mut ctx, &chain, &data, format_name, source) {
            Ok((bytes, dimensions)) => {
                let path = self.storage.save(&output_path, &bytes)?;
                debug!(format_name, path = %path, "rendition written");
                Ok(Rendition {
                    path,
                    dimensions: Some(dimensions),
                })
            }
            Err(err) if self.settings.silent_failure && err.recoverable() => {
                error!(
                    format_name,
                    source = %source.path,
                    error = %err,
                    "processing failed; substituting the unprocessed source"
                );
                let dimensions = self
                    .backend
                    .open(&data)
                    .ok()
                    .map(|image| self.backend.dimensions(&image));
                Ok(Rendition {
                    path: source.path.clone(),
                    dimensions,
                })
            }
            Err(err) => Err(err),
        }
    }

    fn run_chain(
        &self,
        ctx: &mut Context,
        chain: &crate::chain::ProcessorChain<B::Image>,
        data: &[u8],
        format_name: &str,
        source: &SourceFile,
    ) -> Result<(Vec<u8>, (u32, u32)), RenditionError> {
        let image = self
            .backend
            .open(data)
            .map_err(|source_err| RenditionError::Source {
                path: source.path.clone(),
                source: source_err,
            })?;
        if self.settings.validate_on_open {
            self.backend
                .verify(&image)
                .map_err(|source_err| RenditionError::Source {
                    path: source.path.clone(),
                    source: source_err,
                })?;
        }

        // Seed the target format from the context's extension; a spec that
        // didn't override it encodes back to the source format. Happens
        // after sealing on purpose: save options stay writable.
        let target = ctx
            .extension()
            .and_then(OutputFormat::from_extension)
            .unwrap_or_else(|| self.backend.source_format(&image));
        ctx.save_options_mut().format = Some(target);

        let processed = chain
            .run(image, ctx)
            .map_err(|err| RenditionError::Processing {
                format: format_name.to_owned(),
                processor: err.processor,
                source: err.source,
            })?;
        let dimensions = self.backend.dimensions(&processed);
        let bytes = self
            .backend
            .save(&processed, ctx.save_options())
            .map_err(|err| RenditionError::Save {
                format: format_name.to_owned(),
                source: err,
            })?;
        Ok((bytes, dimensions))
    }

    /// Synchronously (re)generate a format, bypassing the existence
    /// invariant, and return the fresh rendition.
    pub fn force(
        &self,
        source: &SourceFile,
        format_name: &str,
        formats: &FormatMap,
    ) -> Result<Rendition, RenditionError> {
        self.process(source, format_name, formats)
    }

    /// Generate every configured format, in name order.
    pub fn process_all(
        &self,
        source: &SourceFile,
        formats: &FormatMap,
    ) -> Result<Vec<Rendition>, RenditionError> {
        formats
            .names()
            .map(|name| self.process(source, name, formats))
            .collect()
    }

    /// Delete every rendition for a source: the delete-lifecycle
    /// counterpart that keeps the existence invariant true.
    pub fn delete_renditions(
        &self,
        source: &SourceFile,
        formats: &FormatMap,
    ) -> Result<(), RenditionError> {
        for name in formats.names() {
            let path = self.rendition_path(source, name, formats)?;
            self.storage.delete(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RustBackend;
    use crate::chain::{Next, Processor, StepError};
    use crate::spec::{Arg, ProcessorSpec};
    use crate::storage::MemoryStorage;
    use crate::test_helpers::{jpeg_bytes, png_bytes, tiff_bytes};

    fn formats() -> FormatMap {
        FormatMap::new()
            .with(
                "thumb",
                FormatSpec::Pipeline(vec![
                    ProcessorSpec::named("default"),
                    ProcessorSpec::with_size("crop", 200, 200),
                ]),
            )
            .with(
                "desktop",
                FormatSpec::Pipeline(vec![
                    ProcessorSpec::named("default"),
                    ProcessorSpec::with_size("thumbnail", 300, 225),
                ]),
            )
    }

    fn seeded_storage() -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage.put("albums/pic.jpg", jpeg_bytes(400, 300));
        storage
    }

    // =========================================================================
    // Read side: no storage I/O
    // =========================================================================

    #[test]
    fn rendition_url_needs_no_stored_source() {
        let backend = RustBackend::new();
        let storage = MemoryStorage::new(); // deliberately empty
        let settings = Settings::default();
        let driver = RenditionDriver::new(&backend, &storage, &settings);

        let url = driver
            .rendition_url(&SourceFile::new("albums/pic.jpg"), "thumb", &formats())
            .unwrap();
        assert!(url.starts_with("/media/__processed__/"), "{url}");
        assert!(url.ends_with(".jpg"), "{url}");
    }

    #[test]
    fn rendition_path_is_stable_across_calls() {
        let backend = RustBackend::new();
        let storage = MemoryStorage::new();
        let settings = Settings::default();
        let driver = RenditionDriver::new(&backend, &storage, &settings);
        let source = SourceFile::new("albums/pic.jpg");

        let a = driver.rendition_path(&source, "thumb", &formats()).unwrap();
        let b = driver.rendition_path(&source, "thumb", &formats()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_format_name_is_a_spec_error() {
        let backend = RustBackend::new();
        let storage = MemoryStorage::new();
        let settings = Settings::default();
        let driver = RenditionDriver::new(&backend, &storage, &settings);

        match driver.rendition_path(&SourceFile::new("p.jpg"), "mobile", &formats()) {
            Err(RenditionError::Spec(SpecError::UnknownFormat { name })) => {
                assert_eq!(name, "mobile");
            }
            other => panic!("expected UnknownFormat, got {other:?}"),
        }
    }

    // =========================================================================
    // Write side
    // =========================================================================

    #[test]
    fn process_writes_rendition_at_derived_path() {
        let backend = RustBackend::new();
        let storage = seeded_storage();
        let settings = Settings::default();
        let driver = RenditionDriver::new(&backend, &storage, &settings);
        let source = SourceFile::new("albums/pic.jpg");

        let rendition = driver.process(&source, "thumb", &formats()).unwrap();

        assert_eq!(rendition.dimensions, Some((200, 200)));
        assert!(rendition.path.starts_with("__processed__/"));
        assert!(storage.contains(&rendition.path));
        assert_eq!(
            rendition.path,
            driver.rendition_path(&source, "thumb", &formats()).unwrap()
        );
    }

    #[test]
    fn unknown_processor_fails_before_bytes_are_opened() {
        let backend = RustBackend::new();
        // Source deliberately missing: if the driver opened storage first,
        // we would see a NotFound storage error instead.
        let storage = MemoryStorage::new();
        let settings = Settings::default();
        let driver = RenditionDriver::new(&backend, &storage, &settings);
        let bad = FormatMap::new().with("thumb", FormatSpec::pipeline(["sharpen_v2"]));

        match driver.process(&SourceFile::new("pic.jpg"), "thumb", &bad) {
            Err(RenditionError::Config {
                format,
                source: SpecError::UnknownProcessor { name },
            }) => {
                assert_eq!(format, "thumb");
                assert_eq!(name, "sharpen_v2");
            }
            other => panic!("expected UnknownProcessor, got {other:?}"),
        }
    }

    #[test]
    fn unreadable_source_is_a_source_error() {
        let backend = RustBackend::new();
        let storage = MemoryStorage::new();
        storage.put("broken.png", b"not an image".to_vec());
        let settings = Settings::default();
        let driver = RenditionDriver::new(&backend, &storage, &settings);

        match driver.process(&SourceFile::new("broken.png"), "thumb", &formats()) {
            Err(RenditionError::Source { path, .. }) => assert_eq!(path, "broken.png"),
            other => panic!("expected Source error, got {other:?}"),
        }
    }

    // A processor that always fails, for exercising the failure policy.
    struct Explode;

    impl Processor<crate::backend::raster::RasterImage> for Explode {
        fn apply(
            &self,
            _image: crate::backend::raster::RasterImage,
            _context: &mut Context,
            _next: Next<'_, crate::backend::raster::RasterImage>,
        ) -> Result<crate::backend::raster::RasterImage, StepError> {
            Err(BackendError::ProcessingFailed("boom".into()).into())
        }
    }

    fn explode_factory(
        _args: &[Arg],
    ) -> Result<Box<dyn Processor<crate::backend::raster::RasterImage>>, SpecError> {
        Ok(Box::new(Explode))
    }

    fn exploding_backend() -> RustBackend {
        let mut backend = RustBackend::new();
        backend.registry_mut().add("explode", explode_factory);
        backend
    }

    #[test]
    fn processing_failure_is_tagged_and_writes_nothing() {
        let backend = exploding_backend();
        let storage = seeded_storage();
        let settings = Settings::default();
        let driver = RenditionDriver::new(&backend, &storage, &settings);
        let bad = FormatMap::new().with("thumb", FormatSpec::pipeline(["explode"]));

        match driver.process(&SourceFile::new("albums/pic.jpg"), "thumb", &bad) {
            Err(RenditionError::Processing {
                format, processor, ..
            }) => {
                assert_eq!(format, "thumb");
                assert_eq!(processor, "explode");
            }
            other => panic!("expected Processing error, got {other:?}"),
        }
        // The aborted format produced no partial output.
        assert!(storage.paths_under("__processed__/").is_empty());
    }

    #[test]
    fn silent_failure_substitutes_the_source() {
        let backend = exploding_backend();
        let storage = seeded_storage();
        let settings = Settings {
            silent_failure: true,
            ..Settings::default()
        };
        let driver = RenditionDriver::new(&backend, &storage, &settings);
        let bad = FormatMap::new().with("thumb", FormatSpec::pipeline(["explode"]));

        let rendition = driver
            .process(&SourceFile::new("albums/pic.jpg"), "thumb", &bad)
            .unwrap();
        assert_eq!(rendition.path, "albums/pic.jpg");
        assert_eq!(rendition.dimensions, Some((400, 300)));
        assert!(storage.paths_under("__processed__/").is_empty());
    }

    #[test]
    fn silent_failure_never_swallows_configuration_errors() {
        let backend = RustBackend::new();
        let storage = seeded_storage();
        let settings = Settings {
            silent_failure: true,
            ..Settings::default()
        };
        let driver = RenditionDriver::new(&backend, &storage, &settings);
        let bad = FormatMap::new().with("thumb", FormatSpec::pipeline(["no_such"]));

        assert!(matches!(
            driver.process(&SourceFile::new("albums/pic.jpg"), "thumb", &bad),
            Err(RenditionError::Config { .. })
        ));
    }

    #[test]
    fn process_all_generates_every_format() {
        let backend = RustBackend::new();
        let storage = seeded_storage();
        let settings = Settings::default();
        let driver = RenditionDriver::new(&backend, &storage, &settings);

        let renditions = driver
            .process_all(&SourceFile::new("albums/pic.jpg"), &formats())
            .unwrap();
        assert_eq!(renditions.len(), 2);
        assert_eq!(storage.paths_under("__processed__/").len(), 2);
    }

    #[test]
    fn force_regenerates_the_same_path() {
        let backend = RustBackend::new();
        let storage = seeded_storage();
        let settings = Settings::default();
        let driver = RenditionDriver::new(&backend, &storage, &settings);
        let source = SourceFile::new("albums/pic.jpg");

        let first = driver.process(&source, "thumb", &formats()).unwrap();
        let second = driver.force(&source, "thumb", &formats()).unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(storage.paths_under("__processed__/").len(), 1);
    }

    #[test]
    fn delete_renditions_removes_generated_files() {
        let backend = RustBackend::new();
        let storage = seeded_storage();
        let settings = Settings::default();
        let driver = RenditionDriver::new(&backend, &storage, &settings);
        let source = SourceFile::new("albums/pic.jpg");

        driver.process_all(&source, &formats()).unwrap();
        assert_eq!(storage.paths_under("__processed__/").len(), 2);

        driver.delete_renditions(&source, &formats()).unwrap();
        assert!(storage.paths_under("__processed__/").is_empty());
        // The source itself is untouched.
        assert!(storage.contains("albums/pic.jpg"));
    }

    // =========================================================================
    // Dynamic specs and ppoi plumbing
    // =========================================================================

    #[test]
    fn websafe_rewrites_tiff_to_jpeg() {
        let backend = RustBackend::new();
        let storage = MemoryStorage::new();
        storage.put("scans/page.tiff", tiff_bytes(120, 90));
        let settings = Settings::default();
        let driver = RenditionDriver::new(&backend, &storage, &settings);
        let map = FormatMap::new().with(
            "web",
            crate::websafe::websafe(vec![ProcessorSpec::named("default")]),
        );

        let rendition = driver
            .process(&SourceFile::new("scans/page.tiff"), "web", &map)
            .unwrap();
        assert!(rendition.path.ends_with(".jpg"), "{}", rendition.path);

        // Output really is a JPEG.
        let bytes = storage.open(&rendition.path).unwrap();
        let image = backend.open(&bytes).unwrap();
        assert_eq!(backend.source_format(&image), OutputFormat::Jpeg);
    }

    #[test]
    fn ppoi_changes_the_rendition_identity() {
        let backend = RustBackend::new();
        let storage = MemoryStorage::new();
        storage.put("pic.png", png_bytes(300, 200));
        let settings = Settings::default();
        let driver = RenditionDriver::new(&backend, &storage, &settings);

        let centered = driver
            .rendition_path(&SourceFile::new("pic.png"), "thumb", &formats())
            .unwrap();
        let anchored = driver
            .rendition_path(
                &SourceFile::with_ppoi("pic.png", Ppoi::new(0.0, 0.0)),
                "thumb",
                &formats(),
            )
            .unwrap();
        assert_ne!(centered, anchored);
    }

    #[test]
    fn independent_runs_do_not_interfere() {
        let backend = RustBackend::new();
        let storage = MemoryStorage::new();
        storage.put("a.jpg", jpeg_bytes(400, 300));
        storage.put("b.jpg", jpeg_bytes(350, 500));
        let settings = Settings::default();
        let driver = RenditionDriver::new(&backend, &storage, &settings);

        // Interleaved order must not matter: each run owns its context.
        let b1 = driver
            .process(&SourceFile::new("b.jpg"), "thumb", &formats())
            .unwrap();
        let a1 = driver
            .process(&SourceFile::new("a.jpg"), "thumb", &formats())
            .unwrap();
        let a2 = driver
            .process(&SourceFile::new("a.jpg"), "thumb", &formats())
            .unwrap();

        assert_eq!(a1, a2);
        assert_ne!(a1.path, b1.path);
        assert_eq!(a1.dimensions, Some((200, 200)));
        assert_eq!(b1.dimensions, Some((200, 200)));
    }
}
