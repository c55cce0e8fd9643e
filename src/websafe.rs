//! Dynamic format specs that force browser-friendly output formats.
//!
//! [`websafe`] keeps web-native sources (PNG, GIF, JPEG) as they are and
//! re-encodes everything else (TIFF, BMP, ...) to JPEG. [`webp`] re-encodes
//! everything to WebP. Both work by rewriting the context's extension and
//! prepending a format-forcing processor, so the rest of the pipeline is
//! untouched.
//!
//! `force_jpeg` and `force_webp` only manipulate the context, never the
//! pixels, so a single generic implementation is registered with every
//! engine. They set the target format *before* delegating (the `process_*`
//! normalizers downstream key on it) and bump the quality to 95 *after*,
//! overriding `process_jpeg`'s default of 90.

use crate::chain::{Next, Processor, Registry, StepError};
use crate::context::{Context, OutputFormat};
use crate::spec::{FormatSpec, ProcessorSpec, SpecError};

/// Extensions served to browsers without conversion.
const WEBSAFE_EXTENSIONS: &[&str] = &[".png", ".gif", ".jpg", ".jpeg"];

struct ForceFormat {
    format: OutputFormat,
    quality: u8,
}

impl<I> Processor<I> for ForceFormat {
    fn apply(&self, image: I, context: &mut Context, next: Next<'_, I>) -> Result<I, StepError> {
        context.save_options_mut().format = Some(self.format);
        let image = next.get_image(image, context)?;
        context.save_options_mut().quality = Some(self.quality);
        Ok(image)
    }
}

/// Register `force_jpeg` and `force_webp` into an engine registry. Called
/// from every engine constructor.
pub(crate) fn register_into<I: 'static>(registry: &mut Registry<I>) {
    registry.add("force_jpeg", |args| {
        crate::backend::raster::no_args("force_jpeg", args)?;
        Ok(Box::new(ForceFormat {
            format: OutputFormat::Jpeg,
            quality: 95,
        }))
    });
    registry.add("force_webp", |args| {
        crate::backend::raster::no_args("force_webp", args)?;
        Ok(Box::new(ForceFormat {
            format: OutputFormat::Webp,
            quality: 95,
        }))
    });
}

fn sealed(err: crate::context::SealedError) -> SpecError {
    SpecError::Dynamic(err.to_string())
}

/// A spec that passes web-safe sources through `processors` unchanged and
/// re-encodes everything else to JPEG via `force_jpeg`.
pub fn websafe(processors: Vec<ProcessorSpec>) -> FormatSpec {
    FormatSpec::dynamic(move |_source: &str, ctx: &mut Context| {
        let ext = ctx.extension().unwrap_or("").to_ascii_lowercase();
        if WEBSAFE_EXTENSIONS.contains(&ext.as_str()) {
            ctx.set_processors(processors.clone()).map_err(sealed)
        } else {
            ctx.set_extension(".jpg").map_err(sealed)?;
            let mut list = vec![ProcessorSpec::named("force_jpeg")];
            list.extend(processors.iter().cloned());
            ctx.set_processors(list).map_err(sealed)
        }
    })
}

/// A spec that re-encodes every source to WebP via `force_webp`.
pub fn webp(processors: Vec<ProcessorSpec>) -> FormatSpec {
    FormatSpec::dynamic(move |_source: &str, ctx: &mut Context| {
        ctx.set_extension(".webp").map_err(sealed)?;
        let mut list = vec![ProcessorSpec::named("force_webp")];
        list.extend(processors.iter().cloned());
        ctx.set_processors(list).map_err(sealed)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(spec: &FormatSpec, extension: &str) -> Context {
        let mut ctx = Context::default();
        ctx.set_extension(extension).unwrap();
        match spec {
            FormatSpec::Dynamic(f) => f.as_ref()("pic", &mut ctx).unwrap(),
            FormatSpec::Pipeline(_) => panic!("expected dynamic spec"),
        }
        ctx
    }

    fn names(ctx: &Context) -> Vec<&str> {
        ctx.processors().iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn websafe_keeps_safe_extensions() {
        let spec = websafe(vec![ProcessorSpec::named("default")]);
        let ctx = resolve(&spec, ".png");
        assert_eq!(names(&ctx), vec!["default"]);
        assert_eq!(ctx.extension(), Some(".png"));
    }

    #[test]
    fn websafe_extension_check_is_case_insensitive() {
        let spec = websafe(vec![ProcessorSpec::named("default")]);
        let ctx = resolve(&spec, ".JPEG");
        assert_eq!(names(&ctx), vec!["default"]);
    }

    #[test]
    fn websafe_forces_jpeg_for_other_extensions() {
        let spec = websafe(vec![ProcessorSpec::named("default")]);
        let ctx = resolve(&spec, ".tiff");
        assert_eq!(names(&ctx), vec!["force_jpeg", "default"]);
        assert_eq!(ctx.extension(), Some(".jpg"));
    }

    #[test]
    fn webp_always_rewrites() {
        let spec = webp(vec![ProcessorSpec::with_size("thumbnail", 20, 20)]);
        let ctx = resolve(&spec, ".jpg");
        assert_eq!(names(&ctx), vec!["force_webp", "thumbnail"]);
        assert_eq!(ctx.extension(), Some(".webp"));
    }

    #[test]
    fn dynamic_spec_on_sealed_context_reports_spec_error() {
        let spec = webp(vec![]);
        let mut ctx = Context::default();
        ctx.seal();
        let err = match &spec {
            FormatSpec::Dynamic(f) => f.as_ref()("pic", &mut ctx).unwrap_err(),
            FormatSpec::Pipeline(_) => unreachable!(),
        };
        assert!(matches!(err, SpecError::Dynamic(_)));
    }
}
