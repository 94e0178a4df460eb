//! In-memory adapters for the Stratoflow ports
//!
//! One [`cloud::InMemoryCloud`] stands in for the provider during local
//! runs, emulation and the verification harness: the provisioners, the
//! pub/sub transport, IAM, build/deploy and the storage handles all share
//! its state, so provisioning genuinely gates runtime I/O. Provider-backed
//! adapters implement the same ports and slot in without touching the core.

pub mod cloud;
pub mod config;
pub mod deploy;
pub mod docstore;
pub mod iam;
pub mod pubsub;
pub mod storage;
pub mod warehouse;

pub use cloud::{
    BucketProvisioner, CacheProvisioner, CollectionProvisioner, DatasetProvisioner,
    InMemoryCloud, SubscriptionProvisioner, TableProvisioner, TopicProvisioner,
};
pub use config::{ConfigError, ServiceRuntimeConfig};
pub use deploy::{InMemoryBuilder, InMemoryDeployer};
pub use docstore::{DocumentStore, RemoteCache};
pub use iam::InMemoryIam;
pub use pubsub::InMemoryPubSub;
pub use storage::InMemoryObjectStore;
pub use warehouse::InMemoryWarehouse;
