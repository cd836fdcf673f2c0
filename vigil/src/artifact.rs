use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::instrument;

use crate::finding::StageId;

/// External store for raw tool output. Retention is the store's problem;
/// this core only puts and gets.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, stage: StageId, run_id: &str, blob: &[u8]) -> Result<()>;
    async fn get(&self, stage: StageId, run_id: &str) -> Result<Option<Vec<u8>>>;
}

/// Filesystem-backed artifact store: one file per stage under a run
/// directory, `<root>/<run_id>/<stage>.raw`.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, stage: StageId, run_id: &str) -> PathBuf {
        self.root.join(run_id).join(format!("{}.raw", stage.name()))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    #[instrument(skip(self, blob), fields(stage = %stage, bytes = blob.len()))]
    async fn put(&self, stage: StageId, run_id: &str, blob: &[u8]) -> Result<()> {
        let path = self.path_for(stage, run_id);
        let dir = path.parent().expect("artifact path has a parent");
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create artifact dir {}", dir.display()))?;
        tokio::fs::write(&path, blob)
            .await
            .with_context(|| format!("failed to write artifact {}", path.display()))
    }

    async fn get(&self, stage: StageId, run_id: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(stage, run_id);
        match tokio::fs::read(&path).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("failed to read artifact {}", path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        store
            .put(StageId::Vulnerability, "run-1", b"raw scanner output")
            .await
            .unwrap();

        let blob = store.get(StageId::Vulnerability, "run-1").await.unwrap();
        assert_eq!(blob.as_deref(), Some(b"raw scanner output".as_ref()));
    }

    #[tokio::test]
    async fn get_missing_artifact_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let blob = store.get(StageId::SupplyChain, "run-404").await.unwrap();
        assert!(blob.is_none());
    }

    #[tokio::test]
    async fn stages_do_not_collide_within_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        store.put(StageId::Vulnerability, "run-1", b"vuln").await.unwrap();
        store.put(StageId::SupplyChain, "run-1", b"chain").await.unwrap();

        let vuln = store.get(StageId::Vulnerability, "run-1").await.unwrap();
        let chain = store.get(StageId::SupplyChain, "run-1").await.unwrap();
        assert_eq!(vuln.as_deref(), Some(b"vuln".as_ref()));
        assert_eq!(chain.as_deref(), Some(b"chain".as_ref()));
    }
}
