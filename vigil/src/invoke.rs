use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::instrument;

use crate::finding::StageId;

/// Raw output of one external tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub raw: String,
    pub exit_status: i32,
}

/// Boundary to the external analysis tools. The orchestrator never knows
/// how a scanner detects anything; it only hands over the stage identity,
/// the ignore-list derived from the exception policy, and a timeout.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        stage: StageId,
        ignore: &[String],
        timeout: Duration,
    ) -> Result<ToolOutput>;
}

/// One configured external command for a stage.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Invoker that shells out to a configured command per stage, passing the
/// ignore-list as repeated `--ignore <id>` arguments and capturing stdout.
pub struct ProcessInvoker {
    commands: HashMap<StageId, ToolCommand>,
}

impl ProcessInvoker {
    pub fn new(commands: HashMap<StageId, ToolCommand>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl ToolInvoker for ProcessInvoker {
    #[instrument(skip(self, ignore), fields(stage = %stage))]
    async fn invoke(
        &self,
        stage: StageId,
        ignore: &[String],
        _timeout: Duration,
    ) -> Result<ToolOutput> {
        let Some(tool) = self.commands.get(&stage) else {
            bail!("no tool command configured for stage {stage}");
        };

        let mut cmd = tokio::process::Command::new(&tool.program);
        cmd.args(&tool.args);
        for id in ignore {
            cmd.arg("--ignore").arg(id);
        }
        // The stage engine enforces the timeout by dropping this future;
        // make sure the child dies with it.
        cmd.kill_on_drop(true);
        cmd.stdin(std::process::Stdio::null());

        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to spawn {} for stage {stage}", tool.program))?;

        Ok(ToolOutput {
            raw: String::from_utf8_lossy(&output.stdout).into_owned(),
            exit_status: output.status.code().unwrap_or(-1),
        })
    }
}
