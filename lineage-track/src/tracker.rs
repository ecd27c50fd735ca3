//! Invocation orchestration.
//!
//! Per call, a tracked program moves through:
//!
//! ```text
//! START -> BYPASS                                       (no store configured)
//! START -> HASH_INPUTS -> CACHE_CHECK -> RETURN         (cache hit)
//!                      -> EXECUTE -> VERSION_CHECK -> RECORD -> RETURN
//! ```
//!
//! `CACHE_CHECK` only runs for programs carrying a cache directive. A program
//! error ends the call at `EXECUTE`: nothing is versioned or recorded.

use crate::cache::CacheLookup;
use crate::program::{CacheDirective, InvocationContext, Program, ProgramMetadata, ProgramSource};
use crate::recorder::{InvocationDraft, InvocationRecorder};
use crate::resolver::{ClosureResolver, DeclaredClosureResolver};
use crate::version::VersionManager;
use lineage_core::{
    canonical_results, CallArgs, CallResult, Canonicalizer, CommitMessageWriter, ConfigError,
    ImmutableClassifier, InvocationId, LineageError, LineageResult, ProgramHash, ResolvedClosure,
    TrackingPolicy, VariableClassifier,
};
use lineage_storage::Store;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

// ============================================================================
// ERRORS
// ============================================================================

/// Failure of a tracked call.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError<E> {
    /// The wrapped program failed; its error is passed through unmodified.
    #[error("program error: {0}")]
    Program(E),

    /// Tracking failed (canonicalization, closure resolution, storage).
    #[error(transparent)]
    Tracking(#[from] LineageError),
}

impl<E> InvocationError<E> {
    pub fn is_program(&self) -> bool {
        matches!(self, InvocationError::Program(_))
    }

    /// The program's own error, if that is what failed.
    pub fn into_program(self) -> Option<E> {
        match self {
            InvocationError::Program(e) => Some(e),
            InvocationError::Tracking(_) => None,
        }
    }

    pub fn as_tracking(&self) -> Option<&LineageError> {
        match self {
            InvocationError::Tracking(e) => Some(e),
            InvocationError::Program(_) => None,
        }
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Everything a [`Tracker`] needs, passed once at construction.
#[derive(Clone)]
pub struct TrackerConfig {
    /// Persistence backend; `None` turns tracking into a passthrough.
    pub store: Option<Arc<dyn Store>>,
    pub policy: TrackingPolicy,
    pub classifier: Arc<dyn VariableClassifier>,
    /// Required when `policy.autocommit` is set.
    pub commit_writer: Option<Arc<dyn CommitMessageWriter>>,
    pub resolver: Arc<dyn ClosureResolver>,
}

impl TrackerConfig {
    /// Track into `store` with the default policy.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store: Some(store),
            ..Self::disabled()
        }
    }

    /// No store: every tracked call bypasses tracking.
    pub fn disabled() -> Self {
        let classifier: Arc<dyn VariableClassifier> = Arc::new(ImmutableClassifier);
        Self {
            store: None,
            policy: TrackingPolicy::default(),
            resolver: Arc::new(DeclaredClosureResolver::new(Arc::clone(&classifier))),
            classifier,
            commit_writer: None,
        }
    }

    pub fn with_policy(mut self, policy: TrackingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_commit_writer(mut self, writer: Arc<dyn CommitMessageWriter>) -> Self {
        self.commit_writer = Some(writer);
        self
    }

    /// Replace the classifier. The default resolver is rebuilt around it.
    pub fn with_classifier(mut self, classifier: Arc<dyn VariableClassifier>) -> Self {
        self.resolver = Arc::new(DeclaredClosureResolver::new(Arc::clone(&classifier)));
        self.classifier = classifier;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ClosureResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policy.autocommit && self.commit_writer.is_none() {
            return Err(ConfigError::MissingRequired {
                field: "commit_writer".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for TrackerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerConfig")
            .field("store", &self.store.is_some())
            .field("policy", &self.policy)
            .field("commit_writer", &self.commit_writer.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TRACKER
// ============================================================================

struct Backend {
    store: Arc<dyn Store>,
    cache: CacheLookup,
    versions: VersionManager,
    recorder: InvocationRecorder,
}

struct TrackerInner {
    backend: Option<Backend>,
    policy: TrackingPolicy,
    classifier: Arc<dyn VariableClassifier>,
    resolver: Arc<dyn ClosureResolver>,
}

/// Owns tracking configuration and wraps programs for tracking.
///
/// Cheap to clone. Tracked programs keep the backend alive, so the store is
/// released once the tracker and every program it wrapped are dropped.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> LineageResult<Self> {
        config.validate()?;

        let writer = if config.policy.autocommit {
            config.commit_writer.clone()
        } else {
            None
        };

        let backend = config.store.map(|store| Backend {
            cache: CacheLookup::new(Arc::clone(&store)),
            versions: VersionManager::new(
                Arc::clone(&store),
                Arc::clone(&config.classifier),
                writer,
            ),
            recorder: InvocationRecorder::new(Arc::clone(&store)),
            store,
        });

        Ok(Self {
            inner: Arc::new(TrackerInner {
                backend,
                policy: config.policy,
                classifier: config.classifier,
                resolver: config.resolver,
            }),
        })
    }

    /// A tracker with no store.
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                backend: None,
                policy: TrackingPolicy::default(),
                classifier: Arc::new(ImmutableClassifier),
                resolver: Arc::new(DeclaredClosureResolver::default()),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.backend.is_some()
    }

    pub fn policy(&self) -> TrackingPolicy {
        self.inner.policy
    }

    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        self.inner.backend.as_ref().map(|b| &b.store)
    }

    /// Wrap `program` without a cache directive.
    pub fn track<P: Program>(&self, program: P) -> LineageResult<TrackedProgram<P>> {
        self.track_with(program, CacheDirective::default())
    }

    /// Wrap `program` with an explicit cache directive.
    ///
    /// Without lazy versioning, the closure is resolved here; otherwise on
    /// first use.
    pub fn track_with<P: Program>(
        &self,
        program: P,
        directive: CacheDirective,
    ) -> LineageResult<TrackedProgram<P>> {
        let tracked = TrackedProgram {
            metadata: program.metadata(),
            source: program.source(),
            program,
            directive,
            closure: OnceCell::new(),
            inner: Arc::clone(&self.inner),
        };
        if !self.inner.policy.lazy_versioning {
            tracked.closure()?;
        }
        Ok(tracked)
    }

    /// Flush the store and release this handle.
    pub fn close(self) -> LineageResult<()> {
        if let Some(backend) = &self.inner.backend {
            backend.store.flush()?;
            tracing::debug!("tracker closed, store flushed");
        }
        Ok(())
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("enabled", &self.is_enabled())
            .field("policy", &self.inner.policy)
            .finish()
    }
}

// ============================================================================
// TRACKED PROGRAM
// ============================================================================

/// A program wrapped for tracking.
pub struct TrackedProgram<P> {
    program: P,
    metadata: ProgramMetadata,
    source: ProgramSource,
    directive: CacheDirective,
    closure: OnceCell<ResolvedClosure>,
    inner: Arc<TrackerInner>,
}

impl<P: Program> TrackedProgram<P> {
    pub fn metadata(&self) -> &ProgramMetadata {
        &self.metadata
    }

    pub fn directive(&self) -> CacheDirective {
        self.directive
    }

    pub fn with_directive(mut self, directive: CacheDirective) -> Self {
        self.directive = directive;
        self
    }

    pub fn inner(&self) -> &P {
        &self.program
    }

    /// Content hash of this program, resolving the closure if needed.
    pub fn program_hash(&self) -> LineageResult<ProgramHash> {
        Ok(self.closure()?.program_hash.clone())
    }

    fn closure(&self) -> LineageResult<&ResolvedClosure> {
        self.closure.get_or_try_init(|| {
            self.inner
                .resolver
                .resolve(&self.metadata.name, &self.source)
                .map_err(LineageError::from)
        })
    }

    /// Call the program, consulting the cache and recording the invocation.
    ///
    /// Returns the program's result as produced (or as restored from cache).
    pub fn call(&self, args: &CallArgs) -> Result<CallResult, InvocationError<P::Error>> {
        let invocation_id = InvocationId::generate();
        let ctx = InvocationContext::new(invocation_id.clone());

        let backend = match &self.inner.backend {
            Some(backend) => backend,
            None => {
                tracing::debug!(program = %self.metadata.name, "no store configured, bypassing tracking");
                return self
                    .program
                    .call(args, &ctx)
                    .map(|output| output.result)
                    .map_err(InvocationError::Program);
            }
        };

        let params = Canonicalizer::canonicalize(args).map_err(LineageError::from)?;
        let input_hash = params.input_hash();

        if self.directive.use_cache {
            let closure = self.closure()?;
            if let Some(cached) = backend.cache.lookup(&closure.program_hash, &input_hash)? {
                return Ok(cached);
            }
            tracing::info!(
                program = %self.metadata.name,
                input_hash = %input_hash,
                "no cached invocation found, refreshing cache"
            );
        }

        let started = Instant::now();
        let output = self
            .program
            .call(args, &ctx)
            .map_err(InvocationError::Program)?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        // An unserializable result must not leave a version behind.
        let results = canonical_results(&output.result).map_err(LineageError::from)?;

        let closure = self.closure()?;
        backend.versions.ensure_version(&self.metadata, closure)?;
        backend.recorder.record(InvocationDraft {
            invocation_id,
            program_hash: closure.program_hash.clone(),
            latency_ms,
            usage: output.usage.unwrap_or_default(),
            params,
            input_hash,
            invocation_kwargs: output.invocation_kwargs,
            results,
            global_vars: closure.global_snapshot(self.inner.classifier.as_ref()),
            free_vars: closure.free_snapshot(self.inner.classifier.as_ref()),
        })?;

        Ok(output.result)
    }
}

impl<P> fmt::Debug for TrackedProgram<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedProgram")
            .field("metadata", &self.metadata)
            .field("directive", &self.directive)
            .field("program_hash", &self.closure.get().map(|c| &c.program_hash))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{FnProgram, ProgramOutput};
    use lineage_core::CallValue;
    use lineage_storage::InMemoryStore;

    fn echo() -> FnProgram<
        impl Fn(&CallArgs, &InvocationContext) -> Result<ProgramOutput, String> + Send + Sync,
        String,
    > {
        FnProgram::new(
            ProgramMetadata::new("echo"),
            ProgramSource::new("fn echo(x) { x }"),
            |args: &CallArgs, _: &InvocationContext| {
                Ok(ProgramOutput::new(args.get(0).cloned().unwrap_or(CallValue::Null)))
            },
        )
    }

    #[test]
    fn test_autocommit_without_writer_rejected() {
        let config = TrackerConfig::new(Arc::new(InMemoryStore::new())).with_policy(TrackingPolicy {
            lazy_versioning: true,
            autocommit: true,
        });
        assert!(matches!(
            Tracker::new(config),
            Err(LineageError::Config(ConfigError::MissingRequired { .. }))
        ));
    }

    #[test]
    fn test_disabled_tracker_passes_through() {
        let tracker = Tracker::disabled();
        assert!(!tracker.is_enabled());
        let echo = tracker.track(echo()).unwrap();
        let result = echo.call(&CallArgs::new().arg(3)).unwrap();
        assert_eq!(result, CallResult::One(CallValue::Int(3)));
        assert!(tracker.close().is_ok());
    }

    #[test]
    fn test_eager_resolution_happens_at_track_time() {
        let tracker = Tracker::new(
            TrackerConfig::new(Arc::new(InMemoryStore::new())).with_policy(TrackingPolicy {
                lazy_versioning: false,
                autocommit: false,
            }),
        )
        .unwrap();
        let bad = FnProgram::new(
            ProgramMetadata::new("empty"),
            ProgramSource::new(""),
            |_: &CallArgs, _: &InvocationContext| -> Result<ProgramOutput, String> {
                Ok(ProgramOutput::new(CallValue::Null))
            },
        );
        assert!(matches!(
            tracker.track(bad),
            Err(LineageError::Closure(_))
        ));
    }

    #[test]
    fn test_invocation_error_accessors() {
        let err: InvocationError<String> = InvocationError::Program("boom".to_string());
        assert!(err.is_program());
        assert_eq!(err.into_program(), Some("boom".to_string()));

        let err: InvocationError<String> =
            InvocationError::from(LineageError::CommitMessage { reason: "x".to_string() });
        assert!(err.as_tracking().is_some());
    }

    #[test]
    fn test_unserializable_result_commits_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = Tracker::new(TrackerConfig::new(store.clone())).unwrap();
        let nan = FnProgram::new(
            ProgramMetadata::new("nan"),
            ProgramSource::new("fn nan() { f64::NAN }"),
            |_: &CallArgs, _: &InvocationContext| -> Result<ProgramOutput, String> {
                Ok(ProgramOutput::new(CallValue::Float(f64::NAN)))
            },
        );
        let result = tracker.track(nan).unwrap().call(&CallArgs::new());

        assert!(matches!(
            result,
            Err(InvocationError::Tracking(LineageError::Canonicalization(
                lineage_core::CanonicalizationError::NonFiniteFloat { .. }
            )))
        ));
        assert_eq!(store.version_count().unwrap(), 0);
        assert_eq!(store.invocation_count().unwrap(), 0);
    }
}
