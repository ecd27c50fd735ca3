//! Cache lookup against recorded invocations.

use lineage_core::{decode_results, CallResult, InputHash, LineageResult, ProgramHash};
use lineage_storage::Store;
use std::sync::Arc;

/// Reuses results of earlier invocations with the same program and inputs.
///
/// Keyed by program hash, never by name, so a hit always comes from the
/// exact program version being called.
#[derive(Clone)]
pub struct CacheLookup {
    store: Arc<dyn Store>,
}

impl CacheLookup {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Results of the most recent matching invocation, or `None` on a miss.
    pub fn lookup(
        &self,
        program_hash: &ProgramHash,
        input_hash: &InputHash,
    ) -> LineageResult<Option<CallResult>> {
        let invocations = self.store.get_invocations(program_hash, input_hash)?;
        match invocations.first() {
            Some(latest) => {
                tracing::debug!(
                    program_hash = %program_hash,
                    invocation_id = %latest.invocation_id,
                    "cache hit"
                );
                Ok(Some(decode_results(&latest.results)?))
            }
            None => Ok(None),
        }
    }
}
