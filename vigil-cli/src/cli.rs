use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use vigil::{AuditLevel, TriggerKind};

/// Orchestrate security-audit scan stages over a project's dependencies
#[derive(Parser)]
#[command(name = "vigil", version)]
pub struct Cli {
    #[command(flatten)]
    pub verbosity: clap_verbosity_flag::Verbosity,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the audit pipeline described by a configuration file
    Run {
        /// Path to the run configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// What kind of event triggered this run; affects alerting only
        #[arg(long, value_enum, default_value_t = TriggerArg::Manual)]
        trigger: TriggerArg,

        /// How much of the pipeline to run
        #[arg(long, value_enum, default_value_t = LevelArg::Comprehensive)]
        level: LevelArg,

        /// Write the interchange document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate an exception policy document and list its entries
    CheckPolicy {
        /// Path to the exception policy (YAML)
        #[arg(short, long)]
        policy: PathBuf,
    },

    /// Re-render the interchange document from a saved finding set
    Report {
        /// Path to a finding set (JSON)
        #[arg(short, long)]
        findings: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TriggerArg {
    Scheduled,
    Push,
    Manual,
}

impl From<TriggerArg> for TriggerKind {
    fn from(arg: TriggerArg) -> Self {
        match arg {
            TriggerArg::Scheduled => TriggerKind::Scheduled,
            TriggerArg::Push => TriggerKind::Push,
            TriggerArg::Manual => TriggerKind::Manual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LevelArg {
    Minimal,
    Standard,
    Comprehensive,
}

impl From<LevelArg> for AuditLevel {
    fn from(arg: LevelArg) -> Self {
        match arg {
            LevelArg::Minimal => AuditLevel::Minimal,
            LevelArg::Standard => AuditLevel::Standard,
            LevelArg::Comprehensive => AuditLevel::Comprehensive,
        }
    }
}
