mod cli;
mod config;

use std::collections::HashMap;
use std::process;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use vigil::{
    AlertManager, ArtifactStore, ExceptionPolicy, FindingSet, Pipeline, ProcessInvoker,
    ScanStage, StageId, ToolCommand, ToolInvoker, TrackerSink, interchange,
    run::RunOutcome,
};

use cli::{Cli, Command};
use config::RunConfig;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.verbosity.tracing_level_filter())
        .with_writer(std::io::stderr)
        .init();

    let code = match execute(args.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            2
        }
    };
    process::exit(code);
}

async fn execute(command: Command) -> Result<i32> {
    match command {
        Command::CheckPolicy { policy } => {
            let policy = ExceptionPolicy::load(&policy)?;
            println!("policy ok: {} entries", policy.len());
            for entry in policy.entries() {
                println!("  {} [{:?}]: {}", entry.id, entry.scope, entry.rationale);
            }
            Ok(0)
        }

        Command::Report { findings } => {
            let text = std::fs::read_to_string(&findings)
                .with_context(|| format!("failed to read {}", findings.display()))?;
            let set: FindingSet =
                serde_json::from_str(&text).context("failed to parse finding set")?;
            println!("{}", interchange::report(Some(&set)).to_json());
            Ok(0)
        }

        Command::Run {
            config,
            trigger,
            level,
            output,
        } => {
            let config = RunConfig::load(&config)?;
            let policy = Arc::new(ExceptionPolicy::load(&config.policy)?);

            let store: Arc<dyn ArtifactStore> =
                Arc::new(vigil::FsArtifactStore::new(&config.artifacts));
            let commands: HashMap<StageId, ToolCommand> = config
                .stages
                .iter()
                .map(|s| {
                    (
                        s.stage,
                        ToolCommand {
                            program: s.command.clone(),
                            args: s.args.clone(),
                        },
                    )
                })
                .collect();
            let invoker: Arc<dyn ToolInvoker> = Arc::new(ProcessInvoker::new(commands));

            let mut builder = Pipeline::builder()
                .policy(policy)
                .max_concurrency(config.max_concurrency);
            for stage in &config.stages {
                builder = builder.stage(ScanStage::new(
                    stage.stage,
                    stage.threshold,
                    Duration::from_secs(stage.timeout_secs),
                    invoker.clone(),
                    store.clone(),
                ));
            }
            let pipeline = builder.build();

            let run_id = new_run_id();
            let run = pipeline.run(&run_id, trigger.into(), level.into()).await;
            info!(run_id, outcome = ?run.outcome, "pipeline finished");

            let doc = interchange::report(run.finding_set(StageId::Vulnerability));
            match output {
                Some(path) => std::fs::write(&path, doc.to_json())
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => println!("{}", doc.to_json()),
            }

            if let Some(tracker) = &config.tracker {
                let sink = TrackerSink::new(tracker.base_url.clone(), tracker.token.clone());
                let manager = AlertManager::new(Arc::new(sink));
                if let Some(alert) = manager.evaluate(&run).await? {
                    eprintln!("alert #{} created: {}", alert.number, alert.title);
                }
            }

            Ok(match run.outcome {
                RunOutcome::Success => 0,
                RunOutcome::Degraded => 1,
            })
        }
    }
}

fn new_run_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before unix epoch")
        .as_millis();
    format!("run-{millis}")
}
