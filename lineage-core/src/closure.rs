//! Resolved program closures and the collaborators that consume them.
//!
//! A closure is everything that defines a program version: its source, the
//! source of what it references, captured variables and the tracked
//! programs it calls. The resolver that produces one lives in the behavior
//! crate; this module holds the data and the two leaf collaborators
//! (variable classification and commit messages).

use crate::{LineageResult, ProgramHash, VarSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

// ============================================================================
// CAPTURED VARIABLES
// ============================================================================

/// A global or free variable captured by a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CapturedVar {
    /// Plain data that cannot change after capture.
    Immutable(Value),
    /// Data that may be mutated after capture; its current value is known.
    Mutable(Value),
    /// A whole module or namespace, identified by path.
    Module(String),
    /// A handle with no data representation.
    Opaque { type_name: String },
}

impl CapturedVar {
    pub fn immutable(value: impl Into<Value>) -> Self {
        CapturedVar::Immutable(value.into())
    }

    /// The data a snapshot would hold, if this variable has any.
    pub fn snapshot_value(&self) -> Option<&Value> {
        match self {
            CapturedVar::Immutable(v) | CapturedVar::Mutable(v) => Some(v),
            CapturedVar::Module(_) | CapturedVar::Opaque { .. } => None,
        }
    }
}

/// Decides which captured variables may be persisted with a record.
pub trait VariableClassifier: Send + Sync {
    fn is_snapshot_safe(&self, var: &CapturedVar) -> bool;
}

/// Accepts immutable data only; mutable values, modules and handles are excluded.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmutableClassifier;

impl VariableClassifier for ImmutableClassifier {
    fn is_snapshot_safe(&self, var: &CapturedVar) -> bool {
        matches!(var, CapturedVar::Immutable(_))
    }
}

/// Filter captured variables down to the snapshot-safe ones.
pub fn snapshot(
    vars: &BTreeMap<String, CapturedVar>,
    classifier: &dyn VariableClassifier,
) -> VarSnapshot {
    vars.iter()
        .filter(|(_, var)| classifier.is_snapshot_safe(var))
        .filter_map(|(name, var)| var.snapshot_value().map(|v| (name.clone(), v.clone())))
        .collect()
}

// ============================================================================
// RESOLVED CLOSURE
// ============================================================================

/// Output of closure resolution for one program.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedClosure {
    pub program_hash: ProgramHash,
    pub source: String,
    pub dependencies: String,
    pub global_vars: BTreeMap<String, CapturedVar>,
    pub free_vars: BTreeMap<String, CapturedVar>,
    /// Hashes of tracked programs this one calls.
    pub uses: BTreeSet<ProgramHash>,
}

impl ResolvedClosure {
    /// Text compared when summarizing changes between versions.
    pub fn diff_text(&self) -> String {
        format!("{}\n\n{}", self.dependencies, self.source)
    }

    pub fn global_snapshot(&self, classifier: &dyn VariableClassifier) -> VarSnapshot {
        snapshot(&self.global_vars, classifier)
    }

    pub fn free_snapshot(&self, classifier: &dyn VariableClassifier) -> VarSnapshot {
        snapshot(&self.free_vars, classifier)
    }
}

// ============================================================================
// COMMIT MESSAGES
// ============================================================================

/// Summarizes the change between two program texts.
pub trait CommitMessageWriter: Send + Sync {
    fn write_commit_message(&self, old_text: &str, new_text: &str) -> LineageResult<String>;
}

/// Offline writer listing added and removed lines.
///
/// Lines are compared as a multiset, so moving a line is not a change.
/// Output starts with a `+N -M` header.
#[derive(Debug, Clone)]
pub struct LineDiffCommitWriter {
    pub max_listed: usize,
}

impl Default for LineDiffCommitWriter {
    fn default() -> Self {
        Self { max_listed: 20 }
    }
}

impl LineDiffCommitWriter {
    fn significant_lines(text: &str) -> Vec<&str> {
        text.lines()
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
            .collect()
    }

    fn push_listed(&self, out: &mut Vec<String>, marker: char, lines: &[&str]) {
        for line in lines.iter().take(self.max_listed) {
            out.push(format!("{} {}", marker, line.trim()));
        }
        if lines.len() > self.max_listed {
            out.push(format!("{} ... {} more", marker, lines.len() - self.max_listed));
        }
    }
}

impl CommitMessageWriter for LineDiffCommitWriter {
    fn write_commit_message(&self, old_text: &str, new_text: &str) -> LineageResult<String> {
        let old_lines = Self::significant_lines(old_text);
        let new_lines = Self::significant_lines(new_text);

        let mut remaining: HashMap<&str, usize> = HashMap::new();
        for line in &old_lines {
            *remaining.entry(*line).or_insert(0) += 1;
        }

        let mut added = Vec::new();
        for line in &new_lines {
            match remaining.get_mut(line) {
                Some(count) if *count > 0 => *count -= 1,
                _ => added.push(*line),
            }
        }

        let mut removed = Vec::new();
        for line in &old_lines {
            if let Some(count) = remaining.get_mut(line) {
                if *count > 0 {
                    *count -= 1;
                    removed.push(*line);
                }
            }
        }

        if added.is_empty() && removed.is_empty() {
            return Ok("No source changes".to_string());
        }

        let mut out = vec![format!("+{} -{}", added.len(), removed.len())];
        self.push_listed(&mut out, '+', &added);
        self.push_listed(&mut out, '-', &removed);
        Ok(out.join("\n"))
    }
}

// ============================================================================
// TESTS
// ============================================================================
