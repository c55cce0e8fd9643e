//! Declarative processor and format specifications.
//!
//! A format is described either by a static ordered list of
//! [`ProcessorSpec`]s or by a dynamic callable that fills in the
//! [`Context`](crate::context::Context) at run time (used when the pipeline
//! depends on the source itself, e.g. [`websafe`](crate::websafe::websafe)
//! re-encoding non-web formats to JPEG). Specs are plain data; they are
//! resolved against a processor registry on every run, never cached.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::context::Context;

/// Spec-resolution and chain-construction failures.
///
/// These are configuration errors: they surface before any image bytes are
/// opened, so a typo in a processor name fails the run eagerly with the
/// offending name instead of half-way through an encode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("unknown processor `{name}`")]
    UnknownProcessor { name: String },
    #[error("bad arguments for processor `{processor}`: {reason}")]
    BadArgs { processor: String, reason: String },
    #[error("unknown format `{name}`")]
    UnknownFormat { name: String },
    #[error("dynamic format spec failed: {0}")]
    Dynamic(String),
}

/// A positional processor argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// A (width, height) pair, the common case for thumbnail/crop.
    Size(u32, u32),
    Int(i64),
    Float(f64),
    Text(String),
}

/// A single unit of work in a pipeline: a processor name plus its
/// positional arguments (possibly empty).
///
/// The name `"default"` is special: it is never registered as a processor
/// itself but expanded by the chain builder into the fixed normalization
/// bundle. See [`crate::chain::DEFAULT_PIPELINE`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorSpec {
    pub name: String,
    pub args: Vec<Arg>,
}

impl ProcessorSpec {
    /// A bare processor with no arguments.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// A processor taking a single (width, height) argument.
    pub fn with_size(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            args: vec![Arg::Size(width, height)],
        }
    }
}

impl From<&str> for ProcessorSpec {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

/// Dynamic format spec: inspects the source path and mutates the context
/// (processor list, extension) before the chain is built.
pub type DynamicSpec = Arc<dyn Fn(&str, &mut Context) -> Result<(), SpecError> + Send + Sync>;

/// How to derive one named rendition from a source image.
#[derive(Clone)]
pub enum FormatSpec {
    /// A fixed, ordered pipeline.
    Pipeline(Vec<ProcessorSpec>),
    /// A callable resolved per run against the concrete source.
    Dynamic(DynamicSpec),
}

impl FormatSpec {
    /// Convenience constructor for the static form from anything
    /// spec-like, e.g. `FormatSpec::pipeline(["default"])`.
    pub fn pipeline<I, P>(specs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ProcessorSpec>,
    {
        FormatSpec::Pipeline(specs.into_iter().map(Into::into).collect())
    }

    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&str, &mut Context) -> Result<(), SpecError> + Send + Sync + 'static,
    {
        FormatSpec::Dynamic(Arc::new(f))
    }
}

impl fmt::Debug for FormatSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatSpec::Pipeline(specs) => f.debug_tuple("Pipeline").field(specs).finish(),
            FormatSpec::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// The per-field mapping from format name to spec, e.g.
/// `{"thumb": ["default", ("crop", (300, 300))]}`.
#[derive(Debug, Clone, Default)]
pub struct FormatMap {
    formats: BTreeMap<String, FormatSpec>,
}

impl FormatMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    pub fn with(mut self, name: impl Into<String>, spec: FormatSpec) -> Self {
        self.formats.insert(name.into(), spec);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: FormatSpec) {
        self.formats.insert(name.into(), spec);
    }

    /// Look up a format, failing with the unresolved name.
    pub fn get(&self, name: &str) -> Result<&FormatSpec, SpecError> {
        self.formats.get(name).ok_or_else(|| SpecError::UnknownFormat {
            name: name.to_owned(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.formats.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormatSpec)> {
        self.formats.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_spec_has_no_args() {
        let spec = ProcessorSpec::named("autorotate");
        assert_eq!(spec.name, "autorotate");
        assert!(spec.args.is_empty());
    }

    #[test]
    fn with_size_carries_dimensions() {
        let spec = ProcessorSpec::with_size("crop", 300, 200);
        assert_eq!(spec.args, vec![Arg::Size(300, 200)]);
    }

    #[test]
    fn str_conversion_builds_bare_spec() {
        let spec: ProcessorSpec = "default".into();
        assert_eq!(spec, ProcessorSpec::named("default"));
    }

    #[test]
    fn pipeline_constructor_accepts_mixed_specs() {
        let spec = FormatSpec::pipeline(["default", "autorotate"]);
        match spec {
            FormatSpec::Pipeline(specs) => {
                assert_eq!(specs.len(), 2);
                assert_eq!(specs[0].name, "default");
            }
            FormatSpec::Dynamic(_) => panic!("expected static pipeline"),
        }
    }

    #[test]
    fn format_map_lookup_failure_names_the_format() {
        let map = FormatMap::new().with("thumb", FormatSpec::pipeline(["default"]));
        assert!(map.get("thumb").is_ok());
        match map.get("desktop") {
            Err(SpecError::UnknownFormat { name }) => assert_eq!(name, "desktop"),
            other => panic!("expected UnknownFormat, got {other:?}"),
        }
    }

    #[test]
    fn format_map_names_are_sorted() {
        let map = FormatMap::new()
            .with("thumb", FormatSpec::pipeline(["default"]))
            .with("desktop", FormatSpec::pipeline(["default"]));
        let names: Vec<_> = map.names().collect();
        assert_eq!(names, vec!["desktop", "thumb"]);
    }

    #[test]
    fn dynamic_spec_mutates_context() {
        let spec = FormatSpec::dynamic(|_source: &str, ctx: &mut Context| {
            ctx.set_processors(vec![ProcessorSpec::named("autorotate")])
                .map_err(|e| SpecError::Dynamic(e.to_string()))
        });
        let mut ctx = Context::default();
        match &spec {
            FormatSpec::Dynamic(f) => f.as_ref()("pic.jpg", &mut ctx).unwrap(),
            FormatSpec::Pipeline(_) => panic!("expected dynamic spec"),
        }
        assert_eq!(ctx.processors().len(), 1);
    }
}
