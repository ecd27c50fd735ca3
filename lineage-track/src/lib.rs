//! LINEAGE Track - Versioned, Memoized Program Invocations
//!
//! Wraps programs so every call is:
//! - keyed by a canonical hash of its inputs
//! - optionally answered from earlier invocations of the same program version
//! - recorded with timing, token usage and the invocations it consumed
//!
//! and every distinct program closure is committed once as a numbered version.

pub mod cache;
pub mod program;
pub mod recorder;
pub mod resolver;
pub mod telemetry;
pub mod tracker;
pub mod version;

pub use cache::CacheLookup;
pub use program::{
    CacheDirective, FnProgram, InvocationContext, Program, ProgramMetadata, ProgramOutput,
    ProgramSource,
};
pub use recorder::{InvocationDraft, InvocationRecorder};
pub use resolver::{ClosureResolver, DeclaredClosureResolver};
pub use telemetry::{init_tracing, TelemetryInitError, DEFAULT_FILTER};
pub use tracker::{InvocationError, TrackedProgram, Tracker, TrackerConfig};
pub use version::VersionManager;
