//! LINEAGE Core - Data Types, Canonicalization and Hashing
//!
//! Pure data structures and the deterministic leaves of the tracking engine:
//! identities, call values, canonical forms, content hashes, persisted
//! records and the collaborator traits the engine consumes.
//! Storage and orchestration live in `lineage-storage` and `lineage-track`.

pub mod canonical;
pub mod closure;
pub mod config;
pub mod entities;
pub mod error;
pub mod hash;
pub mod identity;
pub mod value;

pub use canonical::{
    canonical_order, canonical_results, decode_result_item, decode_results, CanonicalParams,
    Canonicalizer, TRACKED_TAG,
};
pub use closure::{
    snapshot, CapturedVar, CommitMessageWriter, ImmutableClassifier, LineDiffCommitWriter,
    ResolvedClosure, VariableClassifier,
};
pub use config::{TrackingPolicy, ENV_AUTOCOMMIT, ENV_LAZY_VERSIONING};
pub use entities::{Invocation, ProgramVersion, Usage, VarSnapshot};
pub use error::{
    CanonicalizationError, ClosureError, ConfigError, LineageError, LineageResult, RecordKind,
    StorageError,
};
pub use hash::{canonical_json, hash_canonical, input_hash};
pub use identity::{
    sha256_hex, InputHash, InvocationId, ProgramHash, Timestamp, INVOCATION_ID_PREFIX,
    INVOCATION_ID_RANDOM_BYTES,
};
pub use value::{CallArgs, CallResult, CallValue, NdArray, NdData, TrackedValue};
