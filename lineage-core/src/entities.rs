//! Persisted record structures

use crate::hash::input_hash;
use crate::{CanonicalParams, InputHash, InvocationId, ProgramHash, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Captured variables that passed the snapshot classifier, by name.
pub type VarSnapshot = BTreeMap<String, Value>;

/// Token counters reported by a program. Absent counters are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }
}

/// ProgramVersion - one committed version of a named program.
/// Created at most once per `(name, program_hash)` and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramVersion {
    pub program_hash: ProgramHash,
    pub name: String,
    pub created_at: Timestamp,
    pub source: String,
    /// Source of everything the program transitively references.
    pub dependencies: String,
    pub commit_message: Option<String>,
    pub global_vars: VarSnapshot,
    pub free_vars: VarSnapshot,
    pub is_lm_program: bool,
    pub lm_kwargs: Option<Value>,
    pub version_number: u32,
    pub uses: BTreeSet<ProgramHash>,
}

impl ProgramVersion {
    /// Text compared when summarizing changes between versions.
    pub fn diff_text(&self) -> String {
        format!("{}\n\n{}", self.dependencies, self.source)
    }
}

/// Invocation - the full record of one executed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub invocation_id: InvocationId,
    pub program_hash: ProgramHash,
    pub created_at: Timestamp,
    pub global_vars: VarSnapshot,
    pub free_vars: VarSnapshot,
    pub latency_ms: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub input_hash: InputHash,
    /// Canonical positional arguments.
    pub args: Vec<Value>,
    /// Canonical keyword arguments.
    pub kwargs: Map<String, Value>,
    pub invocation_kwargs: Option<Value>,
    pub consumes: BTreeSet<InvocationId>,
    /// Serialized result items; a single-valued result is one item.
    pub results: Vec<Value>,
}

impl Invocation {
    /// Recompute the input hash from the stored canonical arguments.
    pub fn recomputed_input_hash(&self) -> InputHash {
        input_hash(&CanonicalParams {
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            consumes: BTreeSet::new(),
        })
    }

    pub fn usage(&self) -> Usage {
        Usage::new(self.prompt_tokens, self.completion_tokens)
    }
}
