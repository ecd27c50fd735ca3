//! Invocation recording.

use chrono::Utc;
use lineage_core::{
    CanonicalParams, InputHash, Invocation, InvocationId, LineageResult, ProgramHash, Usage,
    VarSnapshot,
};
use lineage_storage::Store;
use serde_json::Value;
use std::sync::Arc;

/// Everything known about one executed call, before it is stored.
#[derive(Debug, Clone)]
pub struct InvocationDraft {
    pub invocation_id: InvocationId,
    pub program_hash: ProgramHash,
    pub latency_ms: f64,
    pub usage: Usage,
    pub params: CanonicalParams,
    pub input_hash: InputHash,
    pub invocation_kwargs: Option<Value>,
    pub results: Vec<Value>,
    pub global_vars: VarSnapshot,
    pub free_vars: VarSnapshot,
}

impl InvocationDraft {
    pub fn into_invocation(self) -> Invocation {
        Invocation {
            invocation_id: self.invocation_id,
            program_hash: self.program_hash,
            created_at: Utc::now(),
            global_vars: self.global_vars,
            free_vars: self.free_vars,
            latency_ms: self.latency_ms.max(0.0),
            prompt_tokens: self.usage.prompt_tokens,
            completion_tokens: self.usage.completion_tokens,
            input_hash: self.input_hash,
            args: self.params.args,
            kwargs: self.params.kwargs,
            invocation_kwargs: self.invocation_kwargs,
            consumes: self.params.consumes,
            results: self.results,
        }
    }
}

/// Writes one invocation record per executed call.
#[derive(Clone)]
pub struct InvocationRecorder {
    store: Arc<dyn Store>,
}

impl InvocationRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Persist the draft and return the stored record.
    pub fn record(&self, draft: InvocationDraft) -> LineageResult<Invocation> {
        let invocation = draft.into_invocation();
        self.store.write_invocation(&invocation)?;
        tracing::debug!(
            invocation_id = %invocation.invocation_id,
            program_hash = %invocation.program_hash,
            latency_ms = invocation.latency_ms,
            consumes = invocation.consumes.len(),
            "recorded invocation"
        );
        Ok(invocation)
    }
}
