//! Closure resolution: from a program declaration to a content hash.

use crate::program::ProgramSource;
use lineage_core::{
    canonical_json, sha256_hex, CapturedVar, ClosureError, ImmutableClassifier, ProgramHash,
    ResolvedClosure, VariableClassifier,
};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

/// Turns a program declaration into a resolved closure with a stable hash.
pub trait ClosureResolver: Send + Sync {
    fn resolve(&self, name: &str, source: &ProgramSource) -> Result<ResolvedClosure, ClosureError>;
}

/// Resolver over explicit [`ProgramSource`] declarations.
///
/// The hash covers the source, the dependency source, the used program
/// hashes, snapshot-safe captured values, and the names of every other
/// captured variable. The program name is not part of the hash.
///
/// In strict mode, declaring a use of a program this resolver has never
/// resolved is an error.
pub struct DeclaredClosureResolver {
    classifier: Arc<dyn VariableClassifier>,
    strict: bool,
    resolved: RwLock<BTreeSet<ProgramHash>>,
}

impl Default for DeclaredClosureResolver {
    fn default() -> Self {
        Self::new(Arc::new(ImmutableClassifier))
    }
}

impl DeclaredClosureResolver {
    pub fn new(classifier: Arc<dyn VariableClassifier>) -> Self {
        Self {
            classifier,
            strict: false,
            resolved: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    fn hashed_vars(&self, vars: &BTreeMap<String, CapturedVar>) -> Value {
        let mut out = Map::new();
        for (name, var) in vars {
            let entry = match var.snapshot_value() {
                Some(value) if self.classifier.is_snapshot_safe(var) => value.clone(),
                _ => json!({ "__unsnapshotted": true }),
            };
            out.insert(name.clone(), entry);
        }
        Value::Object(out)
    }

    fn closure_hash(&self, source: &ProgramSource) -> ProgramHash {
        let uses: Vec<&str> = source.uses.iter().map(ProgramHash::as_str).collect();
        let document = json!({
            "source": source.source,
            "dependencies": source.dependencies,
            "global_vars": self.hashed_vars(&source.global_vars),
            "free_vars": self.hashed_vars(&source.free_vars),
            "uses": uses,
        });
        ProgramHash::new(sha256_hex(canonical_json(&document).as_bytes()))
    }
}

fn poisoned(program: &str) -> ClosureError {
    ClosureError::Unresolvable {
        program: program.to_string(),
        reason: "resolver registry lock poisoned".to_string(),
    }
}

impl ClosureResolver for DeclaredClosureResolver {
    fn resolve(&self, name: &str, source: &ProgramSource) -> Result<ResolvedClosure, ClosureError> {
        if source.source.trim().is_empty() {
            return Err(ClosureError::Unresolvable {
                program: name.to_string(),
                reason: "program declares no source text".to_string(),
            });
        }

        if self.strict {
            let resolved = self.resolved.read().map_err(|_| poisoned(name))?;
            if let Some(unknown) = source.uses.iter().find(|h| !resolved.contains(*h)) {
                return Err(ClosureError::UnknownDependency {
                    program: name.to_string(),
                    dependency: unknown.clone(),
                });
            }
        }

        let program_hash = self.closure_hash(source);
        self.resolved
            .write()
            .map_err(|_| poisoned(name))?
            .insert(program_hash.clone());

        tracing::debug!(program = %name, program_hash = %program_hash, "resolved closure");

        Ok(ResolvedClosure {
            program_hash,
            source: source.source.clone(),
            dependencies: source.dependencies.clone(),
            global_vars: source.global_vars.clone(),
            free_vars: source.free_vars.clone(),
            uses: source.uses.clone(),
        })
    }
}
