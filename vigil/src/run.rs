use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::finding::{FindingSet, StageId, StageOutcome};

/// The event category that started a pipeline run. Scheduled runs are the
/// steady-state health signal; manual runs are developers experimenting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Scheduled,
    Push,
    Manual,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerKind::Scheduled => "scheduled",
            TriggerKind::Push => "push",
            TriggerKind::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// How much of the pipeline to run. Selects stages only; aggregation and
/// alerting never consult it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Minimal,
    Standard,
    Comprehensive,
}

impl AuditLevel {
    pub fn stages(&self) -> &'static [StageId] {
        match self {
            AuditLevel::Minimal => &[StageId::Vulnerability],
            AuditLevel::Standard => &[StageId::Vulnerability, StageId::DependencyHygiene],
            AuditLevel::Comprehensive => &StageId::ALL,
        }
    }
}

/// Overall outcome of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// Every stage reached `success`.
    Success,
    /// At least one stage failed or errored.
    Degraded,
}

/// One trigger event's worth of scan results: exactly one FindingSet per
/// expected stage, plus the derived overall outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub trigger: TriggerKind,
    pub outcome: RunOutcome,
    pub stages: Vec<FindingSet>,
}

impl PipelineRun {
    pub fn finding_set(&self, stage: StageId) -> Option<&FindingSet> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Stages whose outcome is not `success`, in pipeline order.
    pub fn unhealthy_stages(&self) -> Vec<StageId> {
        self.stages
            .iter()
            .filter(|s| s.outcome != StageOutcome::Success)
            .map(|s| s.stage)
            .collect()
    }

    pub fn has_error_stage(&self) -> bool {
        self.stages
            .iter()
            .any(|s| s.outcome == StageOutcome::Error)
    }
}

/// Total join over stage results: one entry per expected stage, never
/// fewer. A stage that never reported is recorded as an `error` with an
/// empty finding list; omitting it would hide a coverage gap.
pub fn aggregate(
    run_id: &str,
    trigger: TriggerKind,
    expected: &[StageId],
    mut results: HashMap<StageId, FindingSet>,
) -> PipelineRun {
    let stages: Vec<FindingSet> = expected
        .iter()
        .map(|&id| {
            results
                .remove(&id)
                .unwrap_or_else(|| FindingSet::error(id, "stage never reported a result"))
        })
        .collect();

    let outcome = if stages.iter().all(|s| s.outcome == StageOutcome::Success) {
        RunOutcome::Success
    } else {
        RunOutcome::Degraded
    };

    PipelineRun {
        run_id: run_id.to_string(),
        trigger,
        outcome,
        stages,
    }
}
