//! Program version management.
//!
//! A version is committed the first time a `(name, program_hash)` pair is
//! seen. Version numbers count up per name from 0. Within one process each
//! pair is checked against the store until one check succeeds; across
//! processes the store's insert-or-ignore write absorbs duplicate commits.

use crate::program::ProgramMetadata;
use chrono::Utc;
use lineage_core::{
    CommitMessageWriter, LineageError, LineageResult, ProgramHash, ProgramVersion,
    ResolvedClosure, StorageError, VariableClassifier,
};
use lineage_storage::{Store, WriteOutcome};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type CommitKey = (String, ProgramHash);

/// Assigns version numbers and commits version records.
pub struct VersionManager {
    store: Arc<dyn Store>,
    classifier: Arc<dyn VariableClassifier>,
    /// Present only when autocommit is enabled.
    commit_writer: Option<Arc<dyn CommitMessageWriter>>,
    /// One slot per key; the map lock is only held to look a slot up.
    committed: Mutex<HashMap<CommitKey, Arc<OnceCell<u32>>>>,
}

impl VersionManager {
    pub fn new(
        store: Arc<dyn Store>,
        classifier: Arc<dyn VariableClassifier>,
        commit_writer: Option<Arc<dyn CommitMessageWriter>>,
    ) -> Self {
        Self {
            store,
            classifier,
            commit_writer,
            committed: Mutex::new(HashMap::new()),
        }
    }

    /// Make sure a version record exists for this closure.
    ///
    /// Returns the version number and whether this call committed it.
    /// Concurrent callers for the same `(name, program_hash)` wait for one
    /// another; other programs never wait on this one's store I/O.
    pub fn ensure_version(
        &self,
        metadata: &ProgramMetadata,
        closure: &ResolvedClosure,
    ) -> LineageResult<(u32, bool)> {
        let key = (metadata.name.clone(), closure.program_hash.clone());
        let slot = {
            let mut committed = self
                .committed
                .lock()
                .map_err(|_| StorageError::LockPoisoned)?;
            Arc::clone(committed.entry(key).or_default())
        };

        let mut committed_here = false;
        let number = *slot.get_or_try_init(|| {
            let (number, inserted) = self.commit(metadata, closure)?;
            committed_here = inserted;
            Ok::<u32, LineageError>(number)
        })?;
        Ok((number, committed_here))
    }

    fn commit(
        &self,
        metadata: &ProgramMetadata,
        closure: &ResolvedClosure,
    ) -> LineageResult<(u32, bool)> {
        let versions = self.store.get_versions(&metadata.name)?;
        if let Some(existing) = versions
            .iter()
            .find(|v| v.program_hash == closure.program_hash)
        {
            tracing::debug!(
                program = %metadata.name,
                version = existing.version_number,
                "version already committed"
            );
            return Ok((existing.version_number, false));
        }

        let latest = versions
            .iter()
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then(a.version_number.cmp(&b.version_number))
            });
        let version_number = latest.map_or(0, |v| v.version_number + 1);
        let commit_message = latest.and_then(|prior| self.commit_message(metadata, prior, closure));

        let record = ProgramVersion {
            program_hash: closure.program_hash.clone(),
            name: metadata.name.clone(),
            created_at: Utc::now(),
            source: closure.source.clone(),
            dependencies: closure.dependencies.clone(),
            commit_message,
            global_vars: closure.global_snapshot(self.classifier.as_ref()),
            free_vars: closure.free_snapshot(self.classifier.as_ref()),
            is_lm_program: metadata.is_lm_program,
            lm_kwargs: metadata.lm_kwargs.clone(),
            version_number,
            uses: closure.uses.clone(),
        };

        match self.store.write_version(&record)? {
            WriteOutcome::Inserted => {
                tracing::info!(
                    program = %metadata.name,
                    program_hash = %closure.program_hash,
                    version = version_number,
                    "committed new program version"
                );
                Ok((version_number, true))
            }
            WriteOutcome::AlreadyPresent => {
                // Another process won the race; report its number.
                let stored = self
                    .store
                    .get_version(&metadata.name, &closure.program_hash)?
                    .map_or(version_number, |v| v.version_number);
                tracing::debug!(
                    program = %metadata.name,
                    version = stored,
                    "version committed concurrently"
                );
                Ok((stored, false))
            }
        }
    }

    fn commit_message(
        &self,
        metadata: &ProgramMetadata,
        prior: &ProgramVersion,
        closure: &ResolvedClosure,
    ) -> Option<String> {
        let writer = self.commit_writer.as_ref()?;
        match writer.write_commit_message(&prior.diff_text(), &closure.diff_text()) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(
                    program = %metadata.name,
                    error = %e,
                    "commit message generation failed, committing without one"
                );
                None
            }
        }
    }
}
