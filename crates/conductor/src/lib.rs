//! The Stratoflow Conductor
//!
//! One-shot orchestrator driving an architecture from source to running
//! services: preflight and config generation, Director IAM and deployment,
//! remote resource setup over the command bus, capability application with
//! visibility polling, and dependency-ordered service deployment.

pub mod applier;
pub mod conductor;
pub mod correlations;
pub mod preflight;

pub use applier::{apply_plan, BackoffPolicy};
pub use conductor::{
    Conductor, ConductorError, ConductorOptions, ConductorPorts, DeployedService, Phase,
    PhaseOutcome, PhaseStatus, RunSummary,
};
pub use correlations::CompletionWaiter;
pub use preflight::{run_preflight, MANIFEST_FILE};
