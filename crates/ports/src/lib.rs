//! Port contracts for Stratoflow
//!
//! Concrete cloud provider APIs (message bus, object store, warehouse,
//! identity, build, run) stay outside the core; each is expressed here as an
//! interface contract with the semantics the core relies on. The in-memory
//! adapters implement every port for local runs and the verification
//! harness; provider-backed adapters slot in behind the same traits.

pub mod deployment;
pub mod iam;
pub mod messaging;
pub mod provisioner;
pub mod stores;

pub use deployment::{ImageBuilder, ImageRef, ServiceDeployer, ServiceEndpoint};
pub use iam::IamClient;
pub use messaging::{AckOutcome, AckToken, Delivery, MessageSource, SubscriberPort, TopicPublisher};
pub use provisioner::ResourceProvisioner;
pub use stores::{KeyedStore, ObjectStore, RowResult, WarehouseWriter};
