//! Multi-stage security-audit pipeline orchestrator.
//!
//! Three independent scan stages (vulnerability, dependency-hygiene,
//! supply-chain) run concurrently against external analysis tools, apply
//! a documented exception policy to their findings, and post immutable
//! [`FindingSet`]s. The pipeline barrier-joins them into a
//! [`PipelineRun`], renders the vulnerability stage as a tool-agnostic
//! interchange document, and raises deduplicated alerts when scheduled
//! runs regress or any stage hits an infrastructure error.

pub mod alert;
pub mod artifact;
pub mod finding;
pub mod interchange;
pub mod invoke;
pub mod pipeline;
pub mod policy;
pub mod run;
pub mod stage;
pub mod tracker;

pub use alert::{Alert, AlertManager, AlertSink, IncidentKey};
pub use artifact::{ArtifactStore, FsArtifactStore};
pub use finding::{ArtifactRef, Finding, FindingSet, Severity, StageId, StageOutcome};
pub use interchange::InterchangeReport;
pub use invoke::{ProcessInvoker, ToolCommand, ToolInvoker, ToolOutput};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use policy::{ExceptionEntry, ExceptionPolicy, Scope};
pub use run::{AuditLevel, PipelineRun, RunOutcome, TriggerKind};
pub use stage::{ScanStage, StageFailure};
pub use tracker::TrackerSink;
