use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Which class of findings an exception entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    Advisories,
    Licenses,
    DependencyBans,
}

/// One documented suppression: a finding identifier that is intentionally
/// ignored, with the rationale on record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionEntry {
    pub id: String,
    pub scope: Scope,
    pub rationale: String,
    /// Owning document (ticket, ADR, review thread) for the suppression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// The versioned, human-edited table of suppressed finding identifiers.
///
/// Read-only for the lifetime of a pipeline run; concurrent runs share it
/// behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct ExceptionPolicy {
    entries: Vec<ExceptionEntry>,
}

impl ExceptionPolicy {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a policy document. Pure parsing, no side effects.
    ///
    /// Duplicate `(id, scope)` pairs are rejected so that a suppressed
    /// finding always resolves to exactly one entry.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let entries: Vec<ExceptionEntry> =
            serde_yaml::from_str(text).context("failed to parse exception policy")?;

        let mut seen: HashSet<(&str, Scope)> = HashSet::new();
        for entry in &entries {
            if !seen.insert((entry.id.as_str(), entry.scope)) {
                bail!(
                    "duplicate exception entry: id '{}' appears twice in scope {:?}",
                    entry.id,
                    entry.scope
                );
            }
        }

        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read policy file {}", path.display()))?;
        Self::from_yaml(&text)
    }

    /// Exact-match lookup of a finding identifier within one scope.
    pub fn lookup(&self, id: &str, scope: Scope) -> Option<&ExceptionEntry> {
        self.entries
            .iter()
            .find(|e| e.scope == scope && e.id == id)
    }

    /// Identifiers for one scope, in document order. This is what gets
    /// handed to the tool invocation boundary as its ignore-list.
    pub fn ignore_list(&self, scope: Scope) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.scope == scope)
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn entries(&self) -> &[ExceptionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
