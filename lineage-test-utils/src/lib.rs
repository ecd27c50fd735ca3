//! LINEAGE Test Utilities
//!
//! Centralized test infrastructure for the LINEAGE workspace:
//! - Instrumented collaborators (counting store, recording commit writers)
//! - Proptest generators for call values, ids and policies
//! - Test fixtures: programs with observable side effects
//! - Custom assertions for LINEAGE-specific validation

pub use lineage_storage::{InMemoryStore, Store, WriteOutcome};

pub use lineage_core::{
    CallArgs, CallResult, CallValue, CanonicalizationError, CapturedVar, ClosureError,
    CommitMessageWriter, ConfigError, InputHash, Invocation, InvocationId, LineageError,
    LineageResult, NdArray, ProgramHash, ProgramVersion, StorageError, TrackedValue,
    TrackingPolicy, Usage,
};

pub use lineage_track::{
    CacheDirective, FnProgram, InvocationContext, InvocationError, Program, ProgramMetadata,
    ProgramOutput, ProgramSource, TrackedProgram, Tracker, TrackerConfig,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// INSTRUMENTED COLLABORATORS
// ============================================================================

/// Store wrapper that counts every call made to the inner store.
pub struct CountingStore {
    inner: Arc<dyn Store>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Counting wrapper over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.reads() + self.writes()
    }

    fn read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }

    fn write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Store for CountingStore {
    fn write_version(&self, version: &ProgramVersion) -> LineageResult<WriteOutcome> {
        self.write();
        self.inner.write_version(version)
    }

    fn get_versions(&self, name: &str) -> LineageResult<Vec<ProgramVersion>> {
        self.read();
        self.inner.get_versions(name)
    }

    fn get_version(
        &self,
        name: &str,
        program_hash: &ProgramHash,
    ) -> LineageResult<Option<ProgramVersion>> {
        self.read();
        self.inner.get_version(name, program_hash)
    }

    fn write_invocation(&self, invocation: &Invocation) -> LineageResult<()> {
        self.write();
        self.inner.write_invocation(invocation)
    }

    fn get_invocations(
        &self,
        program_hash: &ProgramHash,
        input_hash: &InputHash,
    ) -> LineageResult<Vec<Invocation>> {
        self.read();
        self.inner.get_invocations(program_hash, input_hash)
    }

    fn get_invocation(&self, id: &InvocationId) -> LineageResult<Option<Invocation>> {
        self.read();
        self.inner.get_invocation(id)
    }

    fn invocations_consuming(&self, id: &InvocationId) -> LineageResult<Vec<Invocation>> {
        self.read();
        self.inner.invocations_consuming(id)
    }

    fn flush(&self) -> LineageResult<()> {
        self.inner.flush()
    }
}

/// Commit writer that records its inputs and returns a fixed message.
#[derive(Debug, Default)]
pub struct RecordingCommitWriter {
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingCommitWriter {
    pub const MESSAGE: &'static str = "recorded change";

    pub fn new() -> Self {
        Self::default()
    }

    /// `(old_text, new_text)` pairs seen so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl CommitMessageWriter for RecordingCommitWriter {
    fn write_commit_message(&self, old_text: &str, new_text: &str) -> LineageResult<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((old_text.to_string(), new_text.to_string()));
        }
        Ok(Self::MESSAGE.to_string())
    }
}

/// Commit writer that always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingCommitWriter;

impl CommitMessageWriter for FailingCommitWriter {
    fn write_commit_message(&self, _old_text: &str, _new_text: &str) -> LineageResult<String> {
        Err(LineageError::CommitMessage {
            reason: "writer unavailable".to_string(),
        })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating LINEAGE values.

    use super::*;
    use proptest::prelude::*;

    /// Generate a well-formed invocation id.
    pub fn arb_invocation_id() -> impl Strategy<Value = InvocationId> {
        "[0-9a-f]{32}".prop_map(|token| InvocationId::from_string(format!("invocation-{}", token)))
    }

    /// Generate a 64-char hex program hash.
    pub fn arb_program_hash() -> impl Strategy<Value = ProgramHash> {
        "[0-9a-f]{64}".prop_map(ProgramHash::new)
    }

    /// Generate a scalar call value (finite floats only).
    pub fn arb_leaf_value() -> impl Strategy<Value = CallValue> {
        prop_oneof![
            Just(CallValue::Null),
            any::<bool>().prop_map(CallValue::Bool),
            any::<i64>().prop_map(CallValue::Int),
            (-1.0e9f64..1.0e9f64).prop_map(CallValue::Float),
            "[a-zA-Z0-9 ]{0,16}".prop_map(CallValue::Str),
        ]
    }

    /// Generate a tracked value with 0-3 origins.
    pub fn arb_tracked_value() -> impl Strategy<Value = TrackedValue> {
        (
            "[a-z ]{0,24}",
            prop::collection::btree_set(arb_invocation_id(), 0..4),
        )
            .prop_map(|(content, origin_trace)| TrackedValue {
                content,
                origin_trace,
                attributes: Default::default(),
            })
    }

    /// Generate a small numeric array with a consistent shape.
    pub fn arb_nd_array() -> impl Strategy<Value = NdArray> {
        (1usize..4, 1usize..4).prop_flat_map(|(rows, cols)| {
            prop::collection::vec(-1000i64..1000, rows * cols)
                .prop_map(move |data| NdArray::from_i64(vec![rows, cols], data))
        })
    }

    /// Generate a nested, fully serializable call value.
    pub fn arb_call_value() -> impl Strategy<Value = CallValue> {
        let leaf = prop_oneof![
            4 => arb_leaf_value(),
            1 => arb_tracked_value().prop_map(CallValue::Tracked),
            1 => arb_nd_array().prop_map(CallValue::NdArray),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(CallValue::List),
                prop::collection::vec(arb_leaf_value(), 0..5).prop_map(CallValue::Set),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| CallValue::Map(m.into_iter().collect())),
            ]
        })
    }

    /// Generate call arguments.
    pub fn arb_call_args() -> impl Strategy<Value = CallArgs> {
        (
            prop::collection::vec(arb_call_value(), 0..3),
            prop::collection::btree_map("[a-z]{1,6}", arb_call_value(), 0..3),
        )
            .prop_map(|(args, kwargs)| CallArgs { args, kwargs })
    }

    /// Generate a tracking policy.
    pub fn arb_policy() -> impl Strategy<Value = TrackingPolicy> {
        (any::<bool>(), any::<bool>()).prop_map(|(lazy_versioning, autocommit)| TrackingPolicy {
            lazy_versioning,
            autocommit,
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Programs, sources and trackers for common scenarios.

    use super::*;

    /// Source declaration of `add_one`.
    pub fn add_one_source() -> ProgramSource {
        ProgramSource::new("fn add_one(x: i64) -> i64 { x + 1 }")
    }

    /// Source declaration of the `n`-th edit of an `add` program.
    pub fn add_n_source(n: i64) -> ProgramSource {
        ProgramSource::new(format!("fn add(x: i64) -> i64 {{ x + {} }}", n))
            .with_global("STEP", CapturedVar::immutable(n))
    }

    fn first_int(args: &CallArgs) -> Result<i64, String> {
        args.get(0)
            .or_else(|| args.get_kwarg("x"))
            .and_then(CallValue::as_i64)
            .ok_or_else(|| "expected an integer argument".to_string())
    }

    /// `add_one(x) = x + 1`, counting each execution.
    pub fn add_one(counter: Arc<AtomicUsize>) -> impl Program<Error = String> {
        FnProgram::new(
            ProgramMetadata::new("add_one"),
            add_one_source(),
            move |args: &CallArgs, _ctx: &InvocationContext| -> Result<ProgramOutput, String> {
                counter.fetch_add(1, Ordering::SeqCst);
                let x = first_int(args)?;
                Ok(ProgramOutput::new(CallValue::Int(x + 1)))
            },
        )
    }

    /// `add(x) = x + n` under the shared name `add`, counting executions.
    pub fn add_n(n: i64, counter: Arc<AtomicUsize>) -> impl Program<Error = String> {
        FnProgram::new(
            ProgramMetadata::new("add"),
            add_n_source(n),
            move |args: &CallArgs, _ctx: &InvocationContext| -> Result<ProgramOutput, String> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(ProgramOutput::new(CallValue::Int(first_int(args)? + n)))
            },
        )
    }

    /// A program that always fails after counting the attempt.
    pub fn failing(counter: Arc<AtomicUsize>) -> impl Program<Error = String> {
        FnProgram::new(
            ProgramMetadata::new("failing"),
            ProgramSource::new("fn failing() { panic!() }"),
            move |_: &CallArgs, _: &InvocationContext| -> Result<ProgramOutput, String> {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("boom".to_string())
            },
        )
    }

    /// LM-style program returning a tracked greeting with usage counters.
    pub fn greeter() -> impl Program<Error = String> {
        FnProgram::new(
            ProgramMetadata::lm("greeter", serde_json::json!({"model": "test-model"})),
            ProgramSource::new("fn greeter(name) { format!(\"Hello, {}!\", name) }"),
            |args: &CallArgs, ctx: &InvocationContext| -> Result<ProgramOutput, String> {
                let name = args
                    .get(0)
                    .and_then(CallValue::as_str)
                    .ok_or_else(|| "expected a name".to_string())?;
                Ok(
                    ProgramOutput::new(CallValue::Tracked(ctx.track(format!("Hello, {}!", name))))
                        .with_usage(Usage::new(12, 5))
                        .with_invocation_kwargs(serde_json::json!({"temperature": 0.0})),
                )
            },
        )
    }

    /// Program that shouts a tracked input, producing a new tracked value.
    pub fn shouter() -> impl Program<Error = String> {
        FnProgram::new(
            ProgramMetadata::new("shouter"),
            ProgramSource::new("fn shouter(text) { text.to_uppercase() }"),
            |args: &CallArgs, ctx: &InvocationContext| -> Result<ProgramOutput, String> {
                let text = args
                    .get(0)
                    .and_then(CallValue::as_str)
                    .ok_or_else(|| "expected text".to_string())?;
                Ok(ProgramOutput::new(CallValue::Tracked(
                    ctx.track(text.to_uppercase()),
                )))
            },
        )
    }

    /// Program returning `n` tracked values.
    pub fn splitter() -> impl Program<Error = String> {
        FnProgram::new(
            ProgramMetadata::new("splitter"),
            ProgramSource::new("fn splitter(text) { text.split_whitespace() }"),
            |args: &CallArgs, ctx: &InvocationContext| -> Result<ProgramOutput, String> {
                let text = args
                    .get(0)
                    .and_then(CallValue::as_str)
                    .ok_or_else(|| "expected text".to_string())?;
                let parts = text
                    .split_whitespace()
                    .map(|word| CallValue::Tracked(ctx.track(word)))
                    .collect();
                Ok(ProgramOutput::new(CallResult::Many(parts)))
            },
        )
    }

    /// Tracker over a fresh in-memory store with the given policy.
    pub fn in_memory_tracker(policy: TrackingPolicy) -> (Arc<InMemoryStore>, Tracker) {
        let store = Arc::new(InMemoryStore::new());
        let config = TrackerConfig::new(store.clone()).with_policy(policy);
        match Tracker::new(config) {
            Ok(tracker) => (store, tracker),
            Err(e) => panic!("fixture tracker rejected: {}", e),
        }
    }

    /// Policy with eager resolution and no autocommit.
    pub fn eager_policy() -> TrackingPolicy {
        TrackingPolicy {
            lazy_versioning: false,
            autocommit: false,
        }
    }

    pub fn new_counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    pub fn count(counter: &Arc<AtomicUsize>) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for LINEAGE-specific validation.

    use super::*;
    use std::fmt::Debug;

    /// Assert that a LineageResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: Debug>(result: &LineageResult<T>) {
        match result {
            Err(LineageError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a LineageResult is a Canonicalization error.
    #[track_caller]
    pub fn assert_canonicalization_error<T: Debug>(result: &LineageResult<T>) {
        match result {
            Err(LineageError::Canonicalization(_)) => {}
            other => panic!("Expected Canonicalization error, got: {:?}", other),
        }
    }

    /// Assert that a LineageResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: Debug>(result: &LineageResult<T>) {
        match result {
            Err(LineageError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a LineageResult is a Closure error.
    #[track_caller]
    pub fn assert_closure_error<T: Debug>(result: &LineageResult<T>) {
        match result {
            Err(LineageError::Closure(_)) => {}
            other => panic!("Expected Closure error, got: {:?}", other),
        }
    }

    /// Assert that a tracked call failed inside the program with `expected`.
    #[track_caller]
    pub fn assert_program_error<T: Debug, E: Debug + PartialEq>(
        result: &Result<T, InvocationError<E>>,
        expected: &E,
    ) {
        match result {
            Err(InvocationError::Program(e)) => assert_eq!(e, expected, "Wrong program error"),
            other => panic!("Expected Program error {:?}, got: {:?}", expected, other),
        }
    }

    /// Assert that a tracked call failed in canonicalization.
    #[track_caller]
    pub fn assert_tracking_canonicalization_error<T: Debug, E: Debug>(
        result: &Result<T, InvocationError<E>>,
    ) {
        match result {
            Err(InvocationError::Tracking(LineageError::Canonicalization(_))) => {}
            other => panic!("Expected Canonicalization tracking error, got: {:?}", other),
        }
    }

    /// Assert that an invocation consumed `upstream`.
    #[track_caller]
    pub fn assert_consumes(invocation: &Invocation, upstream: &InvocationId) {
        assert!(
            invocation.consumes.contains(upstream),
            "Invocation {} does not consume {}; consumes = {:?}",
            invocation.invocation_id,
            upstream,
            invocation.consumes
        );
    }

    /// Assert the version numbers of `versions`, in order.
    #[track_caller]
    pub fn assert_version_numbers(versions: &[ProgramVersion], expected: &[u32]) {
        let numbers: Vec<u32> = versions.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, expected, "Version numbers mismatch");
    }

    /// Assert that a result is a single tracked value with the given content.
    #[track_caller]
    pub fn assert_tracked_content(result: &CallResult, expected: &str) -> TrackedValue {
        match result.as_one().and_then(CallValue::as_tracked) {
            Some(tracked) => {
                assert_eq!(tracked.content(), expected, "Tracked content mismatch");
                tracked.clone()
            }
            None => panic!("Expected a single tracked value, got: {:?}", result),
        }
    }
}
