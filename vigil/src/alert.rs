use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::run::{PipelineRun, RunOutcome, TriggerKind};

/// Label attached to every alert this orchestrator raises.
pub const AUDIT_LABEL: &str = "security-audit";

/// Deterministic identifier grouping alerts by which stages are
/// unhealthy. Distinct failure combinations get distinct keys, so a
/// long-open alert never hides visibility into an unrelated new failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncidentKey(String);

impl IncidentKey {
    pub fn from_run(run: &PipelineRun) -> Self {
        let mut names: Vec<&str> = run
            .unhealthy_stages()
            .iter()
            .map(|s| s.name())
            .collect();
        names.sort_unstable();
        Self(format!("audit/{}", names.join("+")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IncidentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An alert as the external sink reports it. Only ever mutated by a human
/// closing it; this core never updates or closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub number: u64,
    pub title: String,
    pub open: bool,
    pub labels: Vec<String>,
}

impl Alert {
    /// The incident key this alert tracks, carried as a label.
    pub fn incident_key(&self) -> Option<IncidentKey> {
        self.labels
            .iter()
            .find(|l| l.starts_with("audit/"))
            .map(|l| IncidentKey(l.clone()))
    }
}

/// The external alert sink (an issue tracker). `find_open`/`create` is all
/// this core ever calls; closing is a human action elsewhere.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn find_open(&self, key: &IncidentKey) -> Result<Option<Alert>>;
    async fn create(&self, title: &str, body: &str, labels: &[String]) -> Result<Alert>;
}

/// Decides whether a finished run warrants an alert, and enforces
/// at-most-one-open-alert per incident key by checking the sink before
/// creating.
///
/// The sink offers no atomic compare-and-create, so two runs completing
/// at the same instant can both see "no open alert" and both create one.
/// Deduplication is best effort, not linearizable.
pub struct AlertManager {
    sink: Arc<dyn AlertSink>,
}

impl AlertManager {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self { sink }
    }

    /// Alerting rules, in precedence order:
    /// 1. any stage errored: alert on every trigger kind, because an
    ///    infrastructure failure must never pass for a clean run;
    /// 2. degraded on a scheduled trigger: alert;
    /// 3. anything else (including failures on manual or push triggers):
    ///    no alert.
    pub fn should_alert(run: &PipelineRun) -> bool {
        if run.has_error_stage() {
            return true;
        }
        run.outcome == RunOutcome::Degraded && run.trigger == TriggerKind::Scheduled
    }

    /// Evaluate a finished run. Returns the newly created alert, or `None`
    /// when no alert is warranted or one is already open for this key.
    #[instrument(skip(self, run), fields(run_id = %run.run_id, trigger = %run.trigger))]
    pub async fn evaluate(&self, run: &PipelineRun) -> Result<Option<Alert>> {
        if !Self::should_alert(run) {
            debug!(outcome = ?run.outcome, "run does not warrant an alert");
            return Ok(None);
        }

        let key = IncidentKey::from_run(run);
        if let Some(existing) = self.sink.find_open(&key).await? {
            info!(key = %key, number = existing.number, "open alert already tracks this incident");
            return Ok(None);
        }

        let title = title_for(run);
        let body = body_for(run);
        let labels = vec![AUDIT_LABEL.to_string(), key.as_str().to_string()];
        let alert = self.sink.create(&title, &body, &labels).await?;
        info!(key = %key, number = alert.number, "alert created");
        Ok(Some(alert))
    }
}

fn title_for(run: &PipelineRun) -> String {
    let names: Vec<&str> = run
        .unhealthy_stages()
        .iter()
        .map(|s| s.name())
        .collect();
    format!("Security audit degraded: {}", names.join(", "))
}

fn body_for(run: &PipelineRun) -> String {
    use std::fmt::Write;

    let mut body = format!(
        "Pipeline run `{}` ({} trigger) finished degraded.\n\nStage outcomes:\n",
        run.run_id, run.trigger
    );
    for set in &run.stages {
        let _ = write!(body, "- {}: {}", set.stage, set.outcome);
        let actionable = set.findings.iter().filter(|f| !f.suppressed).count();
        if actionable > 0 {
            let _ = write!(body, " ({actionable} finding(s)");
            let suppressed = set.suppressed_count();
            if suppressed > 0 {
                let _ = write!(body, ", {suppressed} suppressed");
            }
            let _ = write!(body, ")");
        }
        if let Some(err) = &set.error {
            let _ = write!(body, " ({err})");
        }
        body.push('\n');
    }
    body
}
