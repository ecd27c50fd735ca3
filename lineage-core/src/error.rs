//! Error types for LINEAGE operations

use crate::{InvocationId, ProgramHash};
use thiserror::Error;

/// Kind of record a storage error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    ProgramVersion,
    Invocation,
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Record not found: {kind:?} with key {key}")]
    NotFound { kind: RecordKind, key: String },

    #[error("Insert failed for {kind:?}: {reason}")]
    InsertFailed { kind: RecordKind, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed for {kind:?}: {reason}")]
    Serialization { kind: RecordKind, reason: String },

    #[error("Invalid key for {kind:?}: {reason}")]
    InvalidKey { kind: RecordKind, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Failures while turning call arguments or results into canonical form.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CanonicalizationError {
    #[error("Value of type {type_name} at {path} is not serializable")]
    Unserializable { type_name: String, path: String },

    #[error("Non-finite float at {path} cannot be canonicalized")]
    NonFiniteFloat { path: String },

    #[error("Mapping at {path} repeats key {key:?}")]
    DuplicateKey { path: String, key: String },

    #[error("Array at {path} has shape {shape:?} but {len} elements")]
    ShapeMismatch {
        path: String,
        shape: Vec<usize>,
        len: usize,
    },

    #[error("Structural serialization failed at {path}: {reason}")]
    Structural { path: String, reason: String },

    #[error("Stored result item is malformed: {reason}")]
    MalformedResult { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Closure resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClosureError {
    #[error("Closure of {program} could not be resolved: {reason}")]
    Unresolvable { program: String, reason: String },

    #[error("Program {program} uses unknown program {dependency}")]
    UnknownDependency {
        program: String,
        dependency: ProgramHash,
    },
}

/// Master error type for all LINEAGE errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LineageError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Canonicalization error: {0}")]
    Canonicalization(#[from] CanonicalizationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Closure error: {0}")]
    Closure(#[from] ClosureError),

    #[error("Commit message generation failed: {reason}")]
    CommitMessage { reason: String },

    #[error("Duplicate invocation id {0}")]
    DuplicateInvocation(InvocationId),
}

/// Result type alias for LINEAGE operations.
pub type LineageResult<T> = Result<T, LineageError>;

// =============================================================================
// TESTS
// =============================================================================
