//! Programs, their declarations, and the values exchanged with them.

use lineage_core::{
    CallArgs, CallResult, CallValue, CapturedVar, InvocationId, ProgramHash, TrackedValue, Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::marker::PhantomData;

// ============================================================================
// METADATA AND DIRECTIVES
// ============================================================================

/// Identity and model settings of a tracked program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramMetadata {
    /// Qualified name; versions are numbered per name.
    pub name: String,
    /// Whether the program wraps a language-model call.
    pub is_lm_program: bool,
    /// Model parameters of an LM program.
    pub lm_kwargs: Option<Value>,
}

impl ProgramMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_lm_program: false,
            lm_kwargs: None,
        }
    }

    /// Metadata of a language-model program.
    pub fn lm(name: impl Into<String>, lm_kwargs: Value) -> Self {
        Self {
            name: name.into(),
            is_lm_program: true,
            lm_kwargs: Some(lm_kwargs),
        }
    }
}

/// Per-program caching directive, set by the layer that wraps the program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDirective {
    pub use_cache: bool,
}

impl CacheDirective {
    pub fn cached() -> Self {
        Self { use_cache: true }
    }

    pub fn uncached() -> Self {
        Self { use_cache: false }
    }
}

// ============================================================================
// PROGRAM SOURCE
// ============================================================================

/// Explicit declaration of what defines a program version.
///
/// Stands in for reflection: the program states its own source, the source
/// of its helpers, the variables it captures and the tracked programs it calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramSource {
    pub source: String,
    pub dependencies: String,
    pub global_vars: BTreeMap<String, CapturedVar>,
    pub free_vars: BTreeMap<String, CapturedVar>,
    pub uses: BTreeSet<ProgramHash>,
}

impl ProgramSource {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn with_dependencies(mut self, dependencies: impl Into<String>) -> Self {
        self.dependencies = dependencies.into();
        self
    }

    pub fn with_global(mut self, name: impl Into<String>, var: CapturedVar) -> Self {
        self.global_vars.insert(name.into(), var);
        self
    }

    pub fn with_free(mut self, name: impl Into<String>, var: CapturedVar) -> Self {
        self.free_vars.insert(name.into(), var);
        self
    }

    /// Declare a call into another tracked program.
    pub fn with_use(mut self, program_hash: ProgramHash) -> Self {
        self.uses.insert(program_hash);
        self
    }
}

// ============================================================================
// INVOCATION CONTEXT AND OUTPUT
// ============================================================================

/// Passed to every program call; carries the causal origin tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    invocation_id: InvocationId,
}

impl InvocationContext {
    pub fn new(invocation_id: InvocationId) -> Self {
        Self { invocation_id }
    }

    pub fn invocation_id(&self) -> &InvocationId {
        &self.invocation_id
    }

    /// Wrap `content` as a value produced by this invocation.
    pub fn track(&self, content: impl Into<String>) -> TrackedValue {
        TrackedValue::from_origin(content, &self.invocation_id)
    }
}

/// What a program returns: its result plus optional call metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramOutput {
    pub result: CallResult,
    /// Parameters actually used for the call (e.g. resolved model settings).
    pub invocation_kwargs: Option<Value>,
    pub usage: Option<Usage>,
}

impl ProgramOutput {
    pub fn new(result: impl Into<CallResult>) -> Self {
        Self {
            result: result.into(),
            invocation_kwargs: None,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_invocation_kwargs(mut self, kwargs: Value) -> Self {
        self.invocation_kwargs = Some(kwargs);
        self
    }
}

impl From<CallValue> for ProgramOutput {
    fn from(value: CallValue) -> Self {
        Self::new(value)
    }
}

impl From<CallResult> for ProgramOutput {
    fn from(result: CallResult) -> Self {
        Self::new(result)
    }
}

// ============================================================================
// PROGRAM TRAIT
// ============================================================================

/// A callable whose versions and invocations can be tracked.
pub trait Program: Send + Sync {
    /// Error raised by the program itself; passed through untouched.
    type Error;

    fn metadata(&self) -> ProgramMetadata;

    fn source(&self) -> ProgramSource;

    fn call(&self, args: &CallArgs, ctx: &InvocationContext)
        -> Result<ProgramOutput, Self::Error>;
}

/// Program built from a closure plus its declaration.
pub struct FnProgram<F, E> {
    metadata: ProgramMetadata,
    source: ProgramSource,
    func: F,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> FnProgram<F, E>
where
    F: Fn(&CallArgs, &InvocationContext) -> Result<ProgramOutput, E> + Send + Sync,
{
    pub fn new(metadata: ProgramMetadata, source: ProgramSource, func: F) -> Self {
        Self {
            metadata,
            source,
            func,
            _error: PhantomData,
        }
    }
}

impl<F, E> fmt::Debug for FnProgram<F, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProgram")
            .field("metadata", &self.metadata)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl<F, E> Program for FnProgram<F, E>
where
    F: Fn(&CallArgs, &InvocationContext) -> Result<ProgramOutput, E> + Send + Sync,
{
    type Error = E;

    fn metadata(&self) -> ProgramMetadata {
        self.metadata.clone()
    }

    fn source(&self) -> ProgramSource {
        self.source.clone()
    }

    fn call(&self, args: &CallArgs, ctx: &InvocationContext) -> Result<ProgramOutput, E> {
        (self.func)(args, ctx)
    }
}
