//! LMDB-backed store.
//!
//! Uses the heed crate (Rust bindings for LMDB). Three named databases:
//!
//! - `versions`: `name \0 program_hash` -> JSON `ProgramVersion`
//! - `invocations`: `invocation_id` -> JSON `Invocation`
//! - `invocations_by_input`: `program_hash \0 input_hash \0 invocation_id` -> `invocation_id`
//!
//! Names and hashes containing NUL are rejected with `StorageError::InvalidKey`.
//!
//! Version inserts run check-and-put inside one write transaction. LMDB
//! allows a single writer per environment, so concurrent first-time
//! commits of the same hash collapse to one record, across processes too.

use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use lineage_core::{
    InputHash, Invocation, InvocationId, LineageError, LineageResult, ProgramHash,
    ProgramVersion, RecordKind, StorageError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{newest_first, Store, WriteOutcome};

/// Default maximum size of the memory map, in megabytes.
pub const DEFAULT_MAP_SIZE_MB: usize = 256;

const KEY_SEPARATOR: u8 = 0;

fn txn_error(e: heed::Error) -> StorageError {
    StorageError::TransactionFailed {
        reason: e.to_string(),
    }
}

fn encode<T: Serialize>(kind: RecordKind, value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|e| StorageError::Serialization {
        kind,
        reason: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(kind: RecordKind, bytes: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization {
        kind,
        reason: e.to_string(),
    })
}

/// Join key parts with a NUL separator. A trailing separator is added when
/// `open_ended` is set so the key can be used as a prefix. Parts may not
/// contain NUL themselves.
fn composite_key(
    kind: RecordKind,
    parts: &[&str],
    open_ended: bool,
) -> Result<Vec<u8>, StorageError> {
    let mut key = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        if part.as_bytes().contains(&KEY_SEPARATOR) {
            return Err(StorageError::InvalidKey {
                kind,
                reason: format!("key part {:?} contains NUL", part),
            });
        }
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.extend_from_slice(part.as_bytes());
    }
    if open_ended {
        key.push(KEY_SEPARATOR);
    }
    Ok(key)
}

/// Durable store over a local LMDB environment.
///
/// # Example
///
/// ```ignore
/// use lineage_storage::{LmdbStore, DEFAULT_MAP_SIZE_MB};
///
/// let store = LmdbStore::open("/var/lib/lineage", DEFAULT_MAP_SIZE_MB)?;
/// let versions = store.get_versions("add_one")?;
/// ```
pub struct LmdbStore {
    env: Env,
    versions: Database<Bytes, Bytes>,
    invocations: Database<Bytes, Bytes>,
    by_input: Database<Bytes, Bytes>,
}

impl std::fmt::Debug for LmdbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbStore")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbStore {
    /// Open (or create) a store in `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - The named databases cannot be created
    pub fn open<P: AsRef<Path>>(path: P, map_size_mb: usize) -> LineageResult<Self> {
        std::fs::create_dir_all(&path).map_err(|e| StorageError::TransactionFailed {
            reason: format!("cannot create {}: {}", path.as_ref().display(), e),
        })?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs(3)
                .open(path.as_ref())
        }
        .map_err(txn_error)?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let versions: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("versions"))
            .map_err(txn_error)?;
        let invocations: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("invocations"))
            .map_err(txn_error)?;
        let by_input: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("invocations_by_input"))
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        tracing::debug!(path = %path.as_ref().display(), "opened lmdb store");

        Ok(Self {
            env,
            versions,
            invocations,
            by_input,
        })
    }

    fn collect_prefix<T: DeserializeOwned>(
        &self,
        rtxn: &RoTxn<'_>,
        db: Database<Bytes, Bytes>,
        prefix: &[u8],
        kind: RecordKind,
    ) -> Result<Vec<T>, StorageError> {
        let mut out = Vec::new();
        for entry in db.prefix_iter(rtxn, prefix).map_err(txn_error)? {
            let (_, bytes) = entry.map_err(txn_error)?;
            out.push(decode(kind, bytes)?);
        }
        Ok(out)
    }

    fn read_invocation(
        &self,
        rtxn: &RoTxn<'_>,
        id: &[u8],
    ) -> Result<Option<Invocation>, StorageError> {
        match self.invocations.get(rtxn, id).map_err(txn_error)? {
            Some(bytes) => Ok(Some(decode(RecordKind::Invocation, bytes)?)),
            None => Ok(None),
        }
    }
}

impl Store for LmdbStore {
    fn write_version(&self, version: &ProgramVersion) -> LineageResult<WriteOutcome> {
        let key = composite_key(
            RecordKind::ProgramVersion,
            &[&version.name, version.program_hash.as_str()],
            false,
        )?;
        let value = encode(RecordKind::ProgramVersion, version)?;

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        if self.versions.get(&wtxn, &key).map_err(txn_error)?.is_some() {
            tracing::debug!(
                program = %version.name,
                program_hash = %version.program_hash,
                "version already stored"
            );
            return Ok(WriteOutcome::AlreadyPresent);
        }
        self.versions
            .put(&mut wtxn, &key, &value)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(WriteOutcome::Inserted)
    }

    fn get_versions(&self, name: &str) -> LineageResult<Vec<ProgramVersion>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let prefix = composite_key(RecordKind::ProgramVersion, &[name], true)?;
        let mut out: Vec<ProgramVersion> =
            self.collect_prefix(&rtxn, self.versions, &prefix, RecordKind::ProgramVersion)?;
        out.sort_by_key(|v| v.version_number);
        Ok(out)
    }

    fn get_version(
        &self,
        name: &str,
        program_hash: &ProgramHash,
    ) -> LineageResult<Option<ProgramVersion>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let key = composite_key(
            RecordKind::ProgramVersion,
            &[name, program_hash.as_str()],
            false,
        )?;
        match self.versions.get(&rtxn, &key).map_err(txn_error)? {
            Some(bytes) => Ok(Some(decode(RecordKind::ProgramVersion, bytes)?)),
            None => Ok(None),
        }
    }

    fn write_invocation(&self, invocation: &Invocation) -> LineageResult<()> {
        let id = invocation.invocation_id.as_str().as_bytes();
        let index_key = composite_key(
            RecordKind::Invocation,
            &[
                invocation.program_hash.as_str(),
                invocation.input_hash.as_str(),
                invocation.invocation_id.as_str(),
            ],
            false,
        )?;
        let value = encode(RecordKind::Invocation, invocation)?;

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        if self.invocations.get(&wtxn, id).map_err(txn_error)?.is_some() {
            return Err(LineageError::DuplicateInvocation(
                invocation.invocation_id.clone(),
            ));
        }
        self.invocations
            .put(&mut wtxn, id, &value)
            .map_err(txn_error)?;
        self.by_input
            .put(&mut wtxn, &index_key, id)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    fn get_invocations(
        &self,
        program_hash: &ProgramHash,
        input_hash: &InputHash,
    ) -> LineageResult<Vec<Invocation>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let prefix = composite_key(
            RecordKind::Invocation,
            &[program_hash.as_str(), input_hash.as_str()],
            true,
        )?;

        let mut out = Vec::new();
        for entry in self
            .by_input
            .prefix_iter(&rtxn, &prefix)
            .map_err(txn_error)?
        {
            let (_, id) = entry.map_err(txn_error)?;
            match self.read_invocation(&rtxn, id)? {
                Some(invocation) => out.push(invocation),
                None => {
                    return Err(StorageError::NotFound {
                        kind: RecordKind::Invocation,
                        key: String::from_utf8_lossy(id).into_owned(),
                    }
                    .into())
                }
            }
        }
        newest_first(&mut out);
        Ok(out)
    }

    fn get_invocation(&self, id: &InvocationId) -> LineageResult<Option<Invocation>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        Ok(self.read_invocation(&rtxn, id.as_str().as_bytes())?)
    }

    fn invocations_consuming(&self, id: &InvocationId) -> LineageResult<Vec<Invocation>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let mut out = Vec::new();
        for entry in self.invocations.iter(&rtxn).map_err(txn_error)? {
            let (_, bytes) = entry.map_err(txn_error)?;
            let invocation: Invocation = decode(RecordKind::Invocation, bytes)?;
            if invocation.consumes.contains(id) {
                out.push(invocation);
            }
        }
        newest_first(&mut out);
        Ok(out)
    }

    fn flush(&self) -> LineageResult<()> {
        self.env.force_sync().map_err(txn_error)?;
        Ok(())
    }
}
