use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::artifact::ArtifactStore;
use crate::finding::{ArtifactRef, Finding, FindingSet, Severity, StageId, StageOutcome};
use crate::invoke::ToolInvoker;
use crate::policy::ExceptionPolicy;

/// Why a stage ended in an `error` outcome. A policy violation is not in
/// this taxonomy: a tool that caught something produced an ordinary
/// `failure` outcome, not an error.
#[derive(Debug, thiserror::Error)]
pub enum StageFailure {
    #[error("tool invocation failed: {0}")]
    ToolInvocation(String),
    #[error("tool timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("unreadable tool output: {0}")]
    Parse(String),
}

/// What the tool invocation boundary hands back per finding. Normalized
/// upstream; this core only understands this shape.
#[derive(Deserialize)]
struct RawFinding {
    id: String,
    severity: Severity,
    description: String,
}

fn parse_findings(stage: StageId, raw: &str) -> Result<Vec<Finding>, StageFailure> {
    let records: Vec<RawFinding> =
        serde_json::from_str(raw).map_err(|e| StageFailure::Parse(e.to_string()))?;
    Ok(records
        .into_iter()
        .map(|r| Finding {
            id: r.id,
            severity: r.severity,
            stage,
            description: r.description,
            suppressed: false,
        })
        .collect())
}

/// One scan stage: invokes its external tool, persists the raw artifact,
/// parses findings, applies exception-policy suppression, and computes a
/// terminal outcome. Never fails its siblings; every failure mode becomes
/// an `error` FindingSet.
pub struct ScanStage {
    id: StageId,
    threshold: Severity,
    timeout: Duration,
    invoker: Arc<dyn ToolInvoker>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl ScanStage {
    pub fn new(
        id: StageId,
        threshold: Severity,
        timeout: Duration,
        invoker: Arc<dyn ToolInvoker>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            id,
            threshold,
            timeout,
            invoker,
            artifacts,
        }
    }

    pub fn id(&self) -> StageId {
        self.id
    }

    pub fn threshold(&self) -> Severity {
        self.threshold
    }

    #[instrument(skip(self, policy), fields(stage = %self.id))]
    pub async fn run(&self, run_id: &str, policy: &ExceptionPolicy) -> FindingSet {
        let ignore = policy.ignore_list(self.id.scope());

        let invoked =
            tokio::time::timeout(self.timeout, self.invoker.invoke(self.id, &ignore, self.timeout))
                .await;

        let output = match invoked {
            Err(_) => {
                let failure = StageFailure::Timeout(self.timeout);
                warn!(stage = %self.id, error = %failure, "stage timed out");
                return FindingSet::error(self.id, failure.to_string());
            }
            Ok(Err(e)) => {
                let failure = StageFailure::ToolInvocation(e.to_string());
                warn!(stage = %self.id, error = %failure, "stage could not invoke tool");
                return FindingSet::error(self.id, failure.to_string());
            }
            Ok(Ok(output)) => output,
        };

        // Persist before parsing: the raw output is the primary forensic
        // record and must survive failure and error outcomes alike.
        let artifact = match self
            .artifacts
            .put(self.id, run_id, output.raw.as_bytes())
            .await
        {
            Ok(()) => Some(ArtifactRef {
                stage: self.id,
                run_id: run_id.to_string(),
            }),
            Err(e) => {
                warn!(stage = %self.id, error = %e, "failed to persist raw artifact");
                None
            }
        };

        let mut findings = match parse_findings(self.id, &output.raw) {
            Ok(findings) => findings,
            Err(failure) => {
                warn!(stage = %self.id, error = %failure, exit_status = output.exit_status, "stage output unreadable");
                return FindingSet {
                    stage: self.id,
                    outcome: StageOutcome::Error,
                    findings: vec![],
                    artifact,
                    error: Some(failure.to_string()),
                };
            }
        };

        for finding in &mut findings {
            if let Some(entry) = policy.lookup(&finding.id, self.id.scope()) {
                debug!(stage = %self.id, id = %finding.id, rationale = %entry.rationale, "finding suppressed by exception policy");
                finding.suppressed = true;
            }
        }

        let set = FindingSet {
            stage: self.id,
            outcome: StageOutcome::Success,
            findings,
            artifact,
            error: None,
        };
        let actionable = set.actionable(self.threshold).count();
        let outcome = if actionable == 0 {
            StageOutcome::Success
        } else {
            StageOutcome::Failure
        };
        debug!(
            stage = %self.id,
            outcome = %outcome,
            findings = set.findings.len(),
            actionable,
            suppressed = set.suppressed_count(),
            "stage complete"
        );
        FindingSet { outcome, ..set }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;

    use crate::invoke::ToolOutput;

    struct FakeInvoker {
        result: Result<ToolOutput, String>,
        delay: Option<Duration>,
    }

    impl FakeInvoker {
        fn ok(raw: &str) -> Self {
            Self {
                result: Ok(ToolOutput {
                    raw: raw.to_string(),
                    exit_status: 0,
                }),
                delay: None,
            }
        }

        fn err(message: &str) -> Self {
            Self {
                result: Err(message.to_string()),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl ToolInvoker for FakeInvoker {
        async fn invoke(
            &self,
            _stage: StageId,
            _ignore: &[String],
            _timeout: Duration,
        ) -> Result<ToolOutput> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.result
                .clone()
                .map_err(|e| anyhow::anyhow!(e))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        blobs: Mutex<HashMap<(StageId, String), Vec<u8>>>,
    }

    #[async_trait]
    impl ArtifactStore for MemoryStore {
        async fn put(&self, stage: StageId, run_id: &str, blob: &[u8]) -> Result<()> {
            self.blobs
                .lock()
                .unwrap()
                .insert((stage, run_id.to_string()), blob.to_vec());
            Ok(())
        }

        async fn get(&self, stage: StageId, run_id: &str) -> Result<Option<Vec<u8>>> {
            Ok(self
                .blobs
                .lock()
                .unwrap()
                .get(&(stage, run_id.to_string()))
                .cloned())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl ArtifactStore for FailingStore {
        async fn put(&self, _stage: StageId, _run_id: &str, _blob: &[u8]) -> Result<()> {
            anyhow::bail!("store unavailable")
        }
        async fn get(&self, _stage: StageId, _run_id: &str) -> Result<Option<Vec<u8>>> {
            anyhow::bail!("store unavailable")
        }
    }

    fn stage_with(invoker: FakeInvoker, store: Arc<dyn ArtifactStore>) -> ScanStage {
        ScanStage::new(
            StageId::Vulnerability,
            Severity::Medium,
            Duration::from_secs(5),
            Arc::new(invoker),
            store,
        )
    }

    fn policy_suppressing(id: &str) -> ExceptionPolicy {
        ExceptionPolicy::from_yaml(&format!(
            "- id: {id}\n  scope: advisories\n  rationale: documented\n"
        ))
        .unwrap()
    }

    const ONE_MEDIUM: &str =
        r#"[{"id": "ADV-1", "severity": "medium", "description": "bad dep"}]"#;

    #[tokio::test]
    async fn clean_output_is_success() {
        let stage = stage_with(FakeInvoker::ok("[]"), Arc::new(MemoryStore::default()));
        let set = stage.run("run-1", &ExceptionPolicy::empty()).await;
        assert_eq!(set.outcome, StageOutcome::Success);
        assert!(set.findings.is_empty());
        assert!(set.error.is_none());
    }

    #[tokio::test]
    async fn finding_at_threshold_is_failure() {
        let stage = stage_with(FakeInvoker::ok(ONE_MEDIUM), Arc::new(MemoryStore::default()));
        let set = stage.run("run-1", &ExceptionPolicy::empty()).await;
        assert_eq!(set.outcome, StageOutcome::Failure);
        assert_eq!(set.findings.len(), 1);
        assert!(!set.findings[0].suppressed);
    }

    #[tokio::test]
    async fn finding_below_threshold_is_success() {
        let raw = r#"[{"id": "ADV-1", "severity": "low", "description": "minor"}]"#;
        let stage = stage_with(FakeInvoker::ok(raw), Arc::new(MemoryStore::default()));
        let set = stage.run("run-1", &ExceptionPolicy::empty()).await;
        assert_eq!(set.outcome, StageOutcome::Success);
        // the finding stays in the set for the record
        assert_eq!(set.findings.len(), 1);
    }

    #[tokio::test]
    async fn suppressed_finding_flips_outcome_to_success() {
        let stage = stage_with(FakeInvoker::ok(ONE_MEDIUM), Arc::new(MemoryStore::default()));
        let set = stage.run("run-1", &policy_suppressing("ADV-1")).await;
        assert_eq!(set.outcome, StageOutcome::Success);
        assert_eq!(set.findings.len(), 1);
        assert!(set.findings[0].suppressed);
    }

    #[tokio::test]
    async fn suppression_only_applies_in_matching_scope() {
        let policy = ExceptionPolicy::from_yaml(
            "- id: ADV-1\n  scope: licenses\n  rationale: wrong scope\n",
        )
        .unwrap();
        let stage = stage_with(FakeInvoker::ok(ONE_MEDIUM), Arc::new(MemoryStore::default()));
        let set = stage.run("run-1", &policy).await;
        assert_eq!(set.outcome, StageOutcome::Failure);
        assert!(!set.findings[0].suppressed);
    }

    #[tokio::test]
    async fn invocation_failure_is_error_not_failure() {
        let stage = stage_with(
            FakeInvoker::err("scanner binary not found"),
            Arc::new(MemoryStore::default()),
        );
        let set = stage.run("run-1", &ExceptionPolicy::empty()).await;
        assert_eq!(set.outcome, StageOutcome::Error);
        assert!(set.error.as_deref().unwrap().contains("tool invocation failed"));
        assert!(set.artifact.is_none());
    }

    #[tokio::test]
    async fn timeout_is_error() {
        let invoker = FakeInvoker {
            result: Ok(ToolOutput {
                raw: "[]".to_string(),
                exit_status: 0,
            }),
            delay: Some(Duration::from_secs(60)),
        };
        let stage = ScanStage::new(
            StageId::Vulnerability,
            Severity::Medium,
            Duration::from_millis(20),
            Arc::new(invoker),
            Arc::new(MemoryStore::default()),
        );
        let set = stage.run("run-1", &ExceptionPolicy::empty()).await;
        assert_eq!(set.outcome, StageOutcome::Error);
        assert!(set.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn unparseable_output_is_error_with_artifact_kept() {
        let store = Arc::new(MemoryStore::default());
        let stage = stage_with(FakeInvoker::ok("segfault: core dumped"), store.clone());
        let set = stage.run("run-1", &ExceptionPolicy::empty()).await;
        assert_eq!(set.outcome, StageOutcome::Error);
        assert!(set.error.as_deref().unwrap().contains("unreadable tool output"));
        // the raw artifact was persisted before parsing was attempted
        assert!(set.artifact.is_some());
        let blob = store.get(StageId::Vulnerability, "run-1").await.unwrap();
        assert_eq!(blob.as_deref(), Some(b"segfault: core dumped".as_ref()));
    }

    #[tokio::test]
    async fn artifact_persisted_on_failure_outcome() {
        let store = Arc::new(MemoryStore::default());
        let stage = stage_with(FakeInvoker::ok(ONE_MEDIUM), store.clone());
        let set = stage.run("run-7", &ExceptionPolicy::empty()).await;
        assert_eq!(set.outcome, StageOutcome::Failure);
        let artifact = set.artifact.unwrap();
        assert_eq!(artifact.run_id, "run-7");
        let blob = store.get(StageId::Vulnerability, "run-7").await.unwrap();
        assert_eq!(blob.as_deref(), Some(ONE_MEDIUM.as_bytes()));
    }

    #[tokio::test]
    async fn store_failure_does_not_change_outcome() {
        let stage = stage_with(FakeInvoker::ok("[]"), Arc::new(FailingStore));
        let set = stage.run("run-1", &ExceptionPolicy::empty()).await;
        assert_eq!(set.outcome, StageOutcome::Success);
        assert!(set.artifact.is_none());
    }

    #[tokio::test]
    async fn ignore_list_is_threaded_to_invoker() {
        struct CapturingInvoker {
            seen: Mutex<Vec<String>>,
        }

        #[async_trait]
        impl ToolInvoker for CapturingInvoker {
            async fn invoke(
                &self,
                _stage: StageId,
                ignore: &[String],
                _timeout: Duration,
            ) -> Result<ToolOutput> {
                *self.seen.lock().unwrap() = ignore.to_vec();
                Ok(ToolOutput {
                    raw: "[]".to_string(),
                    exit_status: 0,
                })
            }
        }

        let invoker = Arc::new(CapturingInvoker {
            seen: Mutex::new(vec![]),
        });
        let stage = ScanStage::new(
            StageId::Vulnerability,
            Severity::Medium,
            Duration::from_secs(5),
            invoker.clone(),
            Arc::new(MemoryStore::default()),
        );
        stage.run("run-1", &policy_suppressing("ADV-1")).await;
        assert_eq!(*invoker.seen.lock().unwrap(), vec!["ADV-1".to_string()]);
    }
}
