//! The Stratoflow Director
//!
//! A long-lived control service that owns cloud resources on behalf of an
//! architecture's dataflows: idempotent setup and teardown through the
//! per-kind provisioners, an axum control surface, and a command-bus
//! consumer answering the Conductor with correlated completions.

pub mod commands;
pub mod config;
pub mod director;
pub mod manager;
pub mod server;

pub use commands::CommandConsumer;
pub use config::{ConfigError, DirectorConfig};
pub use director::{Director, DirectorState};
pub use manager::ServiceManager;
pub use server::{director_routes, start_server, DirectorApiState, OrchestrateRequest};
