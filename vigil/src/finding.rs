use std::fmt;

use serde::{Deserialize, Serialize};

use crate::policy::Scope;

/// Severity of a single finding, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Informational => "informational",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Identity of a scan stage in the audit pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageId {
    Vulnerability,
    DependencyHygiene,
    SupplyChain,
}

impl StageId {
    pub const ALL: [StageId; 3] = [
        StageId::Vulnerability,
        StageId::DependencyHygiene,
        StageId::SupplyChain,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageId::Vulnerability => "vulnerability",
            StageId::DependencyHygiene => "dependency-hygiene",
            StageId::SupplyChain => "supply-chain",
        }
    }

    /// The exception-policy scope whose entries apply to this stage's findings.
    pub fn scope(&self) -> Scope {
        match self {
            StageId::Vulnerability => Scope::Advisories,
            StageId::DependencyHygiene => Scope::DependencyBans,
            StageId::SupplyChain => Scope::Licenses,
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A single reported issue from one scan stage.
///
/// Suppression never removes a finding from its set; it only flips
/// `suppressed` so the audit trail of what was ignored survives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub severity: Severity,
    pub stage: StageId,
    pub description: String,
    #[serde(default)]
    pub suppressed: bool,
}

/// Terminal outcome of one scan stage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageOutcome {
    /// Tool ran, zero un-suppressed findings at or above threshold.
    Success,
    /// Tool ran and caught something: at least one un-suppressed finding
    /// at or above threshold.
    Failure,
    /// The tool could not be invoked, timed out, or produced unreadable
    /// output. An infrastructure problem, never a clean result.
    Error,
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageOutcome::Success => "success",
            StageOutcome::Failure => "failure",
            StageOutcome::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Key into the external artifact store for one stage's raw tool output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub stage: StageId,
    pub run_id: String,
}

/// Everything one scan stage run produced. Immutable once the stage
/// reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingSet {
    pub stage: StageId,
    pub outcome: StageOutcome,
    pub findings: Vec<Finding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FindingSet {
    /// A terminal `error` result with no findings, used both for stage
    /// failures and for stages that never reported at all.
    pub fn error(stage: StageId, message: impl Into<String>) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Error,
            findings: vec![],
            artifact: None,
            error: Some(message.into()),
        }
    }

    /// Un-suppressed findings at or above `threshold`. These are the
    /// findings that decide the stage outcome.
    pub fn actionable(&self, threshold: Severity) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(move |f| !f.suppressed && f.severity >= threshold)
    }

    pub fn suppressed_count(&self) -> usize {
        self.findings.iter().filter(|f| f.suppressed).count()
    }
}
