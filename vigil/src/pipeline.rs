use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use crate::finding::{FindingSet, StageId};
use crate::policy::ExceptionPolicy;
use crate::run::{AuditLevel, PipelineRun, TriggerKind, aggregate};
use crate::stage::ScanStage;

/// The orchestrator: runs every expected scan stage as an independent
/// task, barrier-joins them all, and aggregates into a PipelineRun.
/// Stages share no mutable state; the policy is read-only for the whole
/// run.
pub struct Pipeline {
    stages: Vec<Arc<ScanStage>>,
    policy: Arc<ExceptionPolicy>,
    max_concurrency: usize,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    fn spawn_stages(
        &self,
        run_id: &str,
        expected: &[StageId],
    ) -> Vec<(StageId, JoinHandle<FindingSet>)> {
        let sem = Arc::new(Semaphore::new(self.max_concurrency));
        self.stages
            .iter()
            .filter(|s| expected.contains(&s.id()))
            .map(|stage| {
                let stage = stage.clone();
                let policy = self.policy.clone();
                let run_id = run_id.to_string();
                let sem = sem.clone();
                let id = stage.id();
                let handle = tokio::spawn(async move {
                    let _permit = sem.acquire_owned().await.expect("semaphore closed");
                    stage.run(&run_id, &policy).await
                });
                (id, handle)
            })
            .collect()
    }

    async fn join_stages(
        handles: Vec<(StageId, JoinHandle<FindingSet>)>,
    ) -> HashMap<StageId, FindingSet> {
        let (ids, tasks): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let joined = join_all(tasks).await;

        let mut results = HashMap::new();
        for (id, outcome) in ids.into_iter().zip(joined) {
            match outcome {
                Ok(set) => {
                    results.insert(id, set);
                }
                Err(e) => {
                    // Panicked or aborted stage: leave the gap for the
                    // aggregator to record, never drop it silently.
                    warn!(stage = %id, error = %e, "stage task was lost");
                }
            }
        }
        results
    }

    /// Run the pipeline to completion and aggregate. Stages expected at
    /// this audit level but not configured are recorded as `error` by the
    /// aggregator, surfacing the coverage gap.
    #[instrument(skip(self), fields(trigger = %trigger))]
    pub async fn run(
        &self,
        run_id: &str,
        trigger: TriggerKind,
        level: AuditLevel,
    ) -> PipelineRun {
        let expected = level.stages();
        let handles = self.spawn_stages(run_id, expected);
        let results = Self::join_stages(handles).await;
        aggregate(run_id, trigger, expected, results)
    }

    /// Like [`run`](Self::run), but aborts every in-flight stage and
    /// returns `None` when the cancel signal fires. A cancelled run
    /// produces no PipelineRun, so nothing downstream (aggregation,
    /// interchange document, alerts) happens either.
    #[instrument(skip(self, cancel), fields(trigger = %trigger))]
    pub async fn run_until_cancelled(
        &self,
        run_id: &str,
        trigger: TriggerKind,
        level: AuditLevel,
        mut cancel: watch::Receiver<()>,
    ) -> Option<PipelineRun> {
        let expected = level.stages();
        let handles = self.spawn_stages(run_id, expected);
        let abort_handles: Vec<_> = handles.iter().map(|(_, h)| h.abort_handle()).collect();

        tokio::select! {
            results = Self::join_stages(handles) => {
                Some(aggregate(run_id, trigger, expected, results))
            }
            Ok(()) = cancel.changed() => {
                warn!(run_id, "pipeline run cancelled");
                for handle in abort_handles {
                    handle.abort();
                }
                None
            }
        }
    }
}

pub struct PipelineBuilder {
    stages: Vec<Arc<ScanStage>>,
    policy: Arc<ExceptionPolicy>,
    max_concurrency: usize,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            stages: vec![],
            policy: Arc::new(ExceptionPolicy::empty()),
            max_concurrency: 4,
        }
    }

    pub fn stage(mut self, stage: ScanStage) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn policy(mut self, policy: Arc<ExceptionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
            policy: self.policy,
            max_concurrency: self.max_concurrency,
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
