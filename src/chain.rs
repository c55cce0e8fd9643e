//! Processor registry and chain execution.
//!
//! A pipeline is compiled from an ordered list of
//! [`ProcessorSpec`](crate::spec::ProcessorSpec)s into a [`ProcessorChain`]
//! by resolving each name against a [`Registry`] and instantiating the
//! factory with the spec's arguments. Execution uses an explicit cursor
//! rather than nested closures: step `i` is invoked with a [`Next`] handle
//! covering steps `i+1..`, so a processor can act before, after, or instead
//! of the rest of the chain by choosing when (or whether) to call
//! [`Next::get_image`]. The chain bottoms out at identity.
//!
//! Chains are rebuilt, and names re-resolved, on every run. Formats may be
//! computed dynamically per source, so a resolved chain is never valid
//! beyond the run that built it.
//!
//! Each imaging engine owns one `Registry` over its native image type,
//! populated in the engine's constructor and read-only once runs begin.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::backend::BackendError;
use crate::context::Context;
use crate::spec::{Arg, ProcessorSpec, SpecError};

/// Expansion of the `"default"` macro token, in execution order: visual
/// orientation first, then per-format normalization, then profile carry.
pub const DEFAULT_PIPELINE: &[&str] = &[
    "autorotate",
    "process_jpeg",
    "process_png",
    "process_gif",
    "preserve_icc_profile",
];

/// A chain run failed inside a named processor.
#[derive(Error, Debug)]
#[error("processor `{processor}` failed: {source}")]
pub struct ChainError {
    pub processor: String,
    #[source]
    pub source: BackendError,
}

/// Error surface of a single [`Processor::apply`] call: either the step's
/// own failure, or an already-attributed failure bubbling up from deeper in
/// the chain. The executor attributes `Backend` errors to the step that
/// raised them and passes `Chain` errors through untouched.
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// One step in a processor chain, operating on an engine-native image.
pub trait Processor<I>: Send + Sync {
    fn apply(&self, image: I, context: &mut Context, next: Next<'_, I>) -> Result<I, StepError>;
}

/// Builds a processor from its spec arguments. Argument arity and types
/// are checked here, at chain-build time, so misconfiguration fails before
/// any image bytes are opened.
pub type Factory<I> = fn(&[Arg]) -> Result<Box<dyn Processor<I>>, SpecError>;

/// Name → factory mapping for one imaging engine.
pub struct Registry<I> {
    entries: HashMap<&'static str, Factory<I>>,
}

impl<I> Default for Registry<I> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<I> Registry<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a name. Later registrations shadow earlier
    /// ones, which is how the constituents of `"default"` can be replaced
    /// individually.
    pub fn add(&mut self, name: &'static str, factory: Factory<I>) {
        self.entries.insert(name, factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> Result<Factory<I>, SpecError> {
        self.entries
            .get(name)
            .copied()
            .ok_or_else(|| SpecError::UnknownProcessor {
                name: name.to_owned(),
            })
    }

    /// Compile a descriptor list into an executable chain.
    ///
    /// `"default"` expands here, not in the registry: each constituent is
    /// resolved independently so a shadowed constituent takes effect.
    pub fn build_chain(&self, specs: &[ProcessorSpec]) -> Result<ProcessorChain<I>, SpecError> {
        let mut steps = Vec::new();
        for spec in specs {
            if spec.name == "default" {
                if !spec.args.is_empty() {
                    return Err(SpecError::BadArgs {
                        processor: "default".into(),
                        reason: "takes no arguments".into(),
                    });
                }
                for name in DEFAULT_PIPELINE {
                    let factory = self.resolve(name)?;
                    steps.push(((*name).to_owned(), factory(&[])?));
                }
            } else {
                let factory = self.resolve(&spec.name)?;
                steps.push((spec.name.clone(), factory(&spec.args)?));
            }
        }
        Ok(ProcessorChain { steps })
    }
}

/// An executable, single-run pipeline over an engine-native image type.
pub struct ProcessorChain<I> {
    steps: Vec<(String, Box<dyn Processor<I>>)>,
}

impl<I> fmt::Debug for ProcessorChain<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorChain")
            .field(
                "steps",
                &self.steps.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<I> ProcessorChain<I> {
    /// Run the full chain. An empty chain is the identity.
    pub fn run(&self, image: I, context: &mut Context) -> Result<I, ChainError> {
        self.call(0, image, context)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn call(&self, index: usize, image: I, context: &mut Context) -> Result<I, ChainError> {
        let Some((name, step)) = self.steps.get(index) else {
            return Ok(image);
        };
        step.apply(
            image,
            context,
            Next {
                chain: self,
                index: index + 1,
            },
        )
        .map_err(|err| match err {
            StepError::Backend(source) => ChainError {
                processor: name.clone(),
                source,
            },
            StepError::Chain(inner) => inner,
        })
    }
}

/// Continuation handle: "apply the rest of the chain".
///
/// A processor that never calls [`get_image`](Next::get_image)
/// short-circuits everything after it.
pub struct Next<'a, I> {
    chain: &'a ProcessorChain<I>,
    index: usize,
}

impl<I> Next<'_, I> {
    pub fn get_image(&self, image: I, context: &mut Context) -> Result<I, ChainError> {
        self.chain.call(self.index, image, context)
    }
}
