//! LINEAGE Storage - Store Trait and Implementations
//!
//! Defines the persistence contract the tracking engine consumes, plus two
//! implementations: an in-memory store for tests and embedding, and an
//! LMDB-backed store for durable local use.

pub mod lmdb;

pub use lmdb::{LmdbStore, DEFAULT_MAP_SIZE_MB};

use lineage_core::{
    InputHash, Invocation, InvocationId, LineageError, LineageResult, ProgramHash,
    ProgramVersion, StorageError,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Outcome of an idempotent write. Both variants are success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    /// A record with the same identity already existed; nothing was written.
    AlreadyPresent,
}

impl WriteOutcome {
    pub fn is_inserted(self) -> bool {
        matches!(self, WriteOutcome::Inserted)
    }
}

/// Persistence backend for program versions and invocations.
///
/// Implementations must make `write_version` insert-or-ignore on
/// `(name, program_hash)`, and must never overwrite an invocation.
pub trait Store: Send + Sync {
    // === Program Versions ===

    /// Insert a version unless one with the same `(name, program_hash)` exists.
    fn write_version(&self, version: &ProgramVersion) -> LineageResult<WriteOutcome>;

    /// All versions recorded under `name`, ordered by version number.
    fn get_versions(&self, name: &str) -> LineageResult<Vec<ProgramVersion>>;

    /// The version of `name` with the given hash, if any.
    fn get_version(
        &self,
        name: &str,
        program_hash: &ProgramHash,
    ) -> LineageResult<Option<ProgramVersion>>;

    // === Invocations ===

    /// Insert an invocation. A second record with the same id is rejected
    /// with `LineageError::DuplicateInvocation`.
    fn write_invocation(&self, invocation: &Invocation) -> LineageResult<()>;

    /// Invocations of `program_hash` with `input_hash`, most recent first.
    fn get_invocations(
        &self,
        program_hash: &ProgramHash,
        input_hash: &InputHash,
    ) -> LineageResult<Vec<Invocation>>;

    /// Get an invocation by id.
    fn get_invocation(&self, id: &InvocationId) -> LineageResult<Option<Invocation>>;

    /// Invocations whose `consumes` set contains `id`.
    fn invocations_consuming(&self, id: &InvocationId) -> LineageResult<Vec<Invocation>>;

    // === Lifecycle ===

    /// Push buffered writes to durable storage.
    fn flush(&self) -> LineageResult<()> {
        Ok(())
    }
}

fn newest_first(invocations: &mut [Invocation]) {
    invocations.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.invocation_id.cmp(&b.invocation_id))
    });
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

type VersionKey = (String, ProgramHash);

/// In-memory store. Cloning shares the underlying maps.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    versions: Arc<RwLock<HashMap<VersionKey, ProgramVersion>>>,
    invocations: Arc<RwLock<HashMap<InvocationId, Invocation>>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StorageError> {
    lock.read().map_err(|_| StorageError::LockPoisoned)
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StorageError> {
    lock.write().map_err(|_| StorageError::LockPoisoned)
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all stored records.
    pub fn clear(&self) -> LineageResult<()> {
        write(&self.versions)?.clear();
        write(&self.invocations)?.clear();
        Ok(())
    }

    /// Get count of stored versions.
    pub fn version_count(&self) -> LineageResult<usize> {
        Ok(read(&self.versions)?.len())
    }

    /// Get count of stored invocations.
    pub fn invocation_count(&self) -> LineageResult<usize> {
        Ok(read(&self.invocations)?.len())
    }

    /// Snapshot of every stored invocation, most recent first.
    pub fn all_invocations(&self) -> LineageResult<Vec<Invocation>> {
        let mut out: Vec<Invocation> = read(&self.invocations)?.values().cloned().collect();
        newest_first(&mut out);
        Ok(out)
    }
}

impl Store for InMemoryStore {
    fn write_version(&self, version: &ProgramVersion) -> LineageResult<WriteOutcome> {
        let mut versions = write(&self.versions)?;
        let key = (version.name.clone(), version.program_hash.clone());
        if versions.contains_key(&key) {
            tracing::debug!(
                program = %version.name,
                program_hash = %version.program_hash,
                "version already stored"
            );
            return Ok(WriteOutcome::AlreadyPresent);
        }
        versions.insert(key, version.clone());
        Ok(WriteOutcome::Inserted)
    }

    fn get_versions(&self, name: &str) -> LineageResult<Vec<ProgramVersion>> {
        let versions = read(&self.versions)?;
        let mut out: Vec<ProgramVersion> = versions
            .values()
            .filter(|v| v.name == name)
            .cloned()
            .collect();
        out.sort_by_key(|v| v.version_number);
        Ok(out)
    }

    fn get_version(
        &self,
        name: &str,
        program_hash: &ProgramHash,
    ) -> LineageResult<Option<ProgramVersion>> {
        let versions = read(&self.versions)?;
        Ok(versions
            .get(&(name.to_string(), program_hash.clone()))
            .cloned())
    }

    fn write_invocation(&self, invocation: &Invocation) -> LineageResult<()> {
        let mut invocations = write(&self.invocations)?;
        if invocations.contains_key(&invocation.invocation_id) {
            return Err(LineageError::DuplicateInvocation(
                invocation.invocation_id.clone(),
            ));
        }
        invocations.insert(invocation.invocation_id.clone(), invocation.clone());
        Ok(())
    }

    fn get_invocations(
        &self,
        program_hash: &ProgramHash,
        input_hash: &InputHash,
    ) -> LineageResult<Vec<Invocation>> {
        let invocations = read(&self.invocations)?;
        let mut out: Vec<Invocation> = invocations
            .values()
            .filter(|i| &i.program_hash == program_hash && &i.input_hash == input_hash)
            .cloned()
            .collect();
        newest_first(&mut out);
        Ok(out)
    }

    fn get_invocation(&self, id: &InvocationId) -> LineageResult<Option<Invocation>> {
        Ok(read(&self.invocations)?.get(id).cloned())
    }

    fn invocations_consuming(&self, id: &InvocationId) -> LineageResult<Vec<Invocation>> {
        let invocations = read(&self.invocations)?;
        let mut out: Vec<Invocation> = invocations
            .values()
            .filter(|i| i.consumes.contains(id))
            .cloned()
            .collect();
        newest_first(&mut out);
        Ok(out)
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod tests {
    use super::test_records::{invocation, version};
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_write_version_is_insert_or_ignore() {
        let store = InMemoryStore::new();
        let first = version("add_one", "h1", 0);
        assert_eq!(store.write_version(&first).unwrap(), WriteOutcome::Inserted);

        let mut again = first.clone();
        again.version_number = 7;
        assert_eq!(
            store.write_version(&again).unwrap(),
            WriteOutcome::AlreadyPresent
        );

        let stored = store
            .get_version("add_one", &ProgramHash::new("h1"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.version_number, 0);
        assert_eq!(store.version_count().unwrap(), 1);
    }

    #[test]
    fn test_same_hash_under_different_names() {
        let store = InMemoryStore::new();
        store.write_version(&version("a", "h1", 0)).unwrap();
        assert!(store
            .write_version(&version("b", "h1", 0))
            .unwrap()
            .is_inserted());
        assert_eq!(store.version_count().unwrap(), 2);
    }

    #[test]
    fn test_get_versions_filters_and_orders() {
        let store = InMemoryStore::new();
        store.write_version(&version("f", "h2", 1)).unwrap();
        store.write_version(&version("g", "hx", 0)).unwrap();
        store.write_version(&version("f", "h1", 0)).unwrap();

        let versions = store.get_versions("f").unwrap();
        let numbers: Vec<u32> = versions.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![0, 1]);
        assert!(store.get_versions("missing").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_invocation_id_rejected() {
        let store = InMemoryStore::new();
        let record = invocation("h1", "i1");
        store.write_invocation(&record).unwrap();
        let err = store.write_invocation(&record).unwrap_err();
        assert_eq!(
            err,
            LineageError::DuplicateInvocation(record.invocation_id.clone())
        );
    }

    #[test]
    fn test_get_invocations_newest_first() {
        let store = InMemoryStore::new();
        let older = invocation("h1", "i1");
        let mut newer = invocation("h1", "i1");
        newer.created_at = older.created_at + Duration::seconds(1);
        let other_input = invocation("h1", "i2");
        let other_program = invocation("h2", "i1");

        for record in [&older, &newer, &other_input, &other_program] {
            store.write_invocation(record).unwrap();
        }

        let found = store
            .get_invocations(&ProgramHash::new("h1"), &InputHash::new("i1"))
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].invocation_id, newer.invocation_id);
        assert_eq!(found[1].invocation_id, older.invocation_id);
    }

    #[test]
    fn test_invocations_consuming() {
        let store = InMemoryStore::new();
        let upstream = invocation("h1", "i1");
        let mut downstream = invocation("h2", "i2");
        downstream.consumes.insert(upstream.invocation_id.clone());
        store.write_invocation(&upstream).unwrap();
        store.write_invocation(&downstream).unwrap();

        let consumers = store.invocations_consuming(&upstream.invocation_id).unwrap();
        assert_eq!(consumers.len(), 1);
        assert_eq!(consumers[0].invocation_id, downstream.invocation_id);
        assert!(store
            .invocations_consuming(&downstream.invocation_id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_clones_share_state_and_clear() {
        let store = InMemoryStore::new();
        let view = store.clone();
        store.write_invocation(&invocation("h1", "i1")).unwrap();
        assert_eq!(view.invocation_count().unwrap(), 1);
        view.clear().unwrap();
        assert_eq!(store.invocation_count().unwrap(), 0);
        assert!(store.flush().is_ok());
    }
}
