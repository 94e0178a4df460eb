//! The Director service core
//!
//! A long-lived control service owning cloud resources on behalf of an
//! architecture's dataflows. Work on one dataflow is serialized through a
//! dedicated actor; different dataflows proceed in parallel. Every
//! operation is idempotent and retries are safe: the Director never mutates
//! a resource whose observed shape disagrees with the desired spec.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use stratoflow_core::architecture::{Architecture, Dataflow};
use stratoflow_core::command::DataflowSelector;
use stratoflow_core::error::{DomainError, Result};
use stratoflow_core::provisioning::ProvisionReport;

use crate::manager::ServiceManager;

/// Externally visible state, derived from the in-flight operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectorState {
    Init,
    Ready,
    SettingUp,
    TearingDown,
    Shutdown,
}

impl std::fmt::Display for DirectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "INIT",
            Self::Ready => "READY",
            Self::SettingUp => "SETTING_UP",
            Self::TearingDown => "TEARING_DOWN",
            Self::Shutdown => "SHUTDOWN",
        };
        f.write_str(s)
    }
}

enum DataflowOp {
    Setup {
        reply: oneshot::Sender<Result<ProvisionReport>>,
    },
    Teardown {
        reply: oneshot::Sender<Result<ProvisionReport>>,
    },
}

pub struct Director {
    architecture: Architecture,
    actors: DashMap<String, mpsc::Sender<DataflowOp>>,
    initialized: AtomicBool,
    shut_down: AtomicBool,
    active_setups: AtomicUsize,
    active_teardowns: AtomicUsize,
}

impl Director {
    /// Build the Director and spawn one actor per dataflow.
    pub fn new(architecture: Architecture, manager: Arc<ServiceManager>) -> Arc<Self> {
        let director = Arc::new(Self {
            architecture,
            actors: DashMap::new(),
            initialized: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            active_setups: AtomicUsize::new(0),
            active_teardowns: AtomicUsize::new(0),
        });

        for (name, flow) in &director.architecture.dataflows {
            let (tx, rx) = mpsc::channel::<DataflowOp>(16);
            director.actors.insert(name.clone(), tx);
            tokio::spawn(dataflow_actor(flow.clone(), Arc::clone(&manager), rx));
        }
        director
    }

    /// Idempotent startup: provision the command/completion channel pair.
    pub async fn init(&self, manager: &ServiceManager) -> Result<()> {
        let report = manager
            .ensure_command_channels(&self.architecture.service_manager_spec)
            .await?;
        if let Some(blocker) = report.first_failure() {
            return Err(DomainError::Precondition(format!(
                "command channel {} {}: {}",
                blocker.kind, blocker.name, blocker.outcome
            )));
        }
        self.initialized.store(true, Ordering::SeqCst);
        info!("director initialized, command channels ready");
        Ok(())
    }

    pub fn architecture(&self) -> &Architecture {
        &self.architecture
    }

    pub fn state(&self) -> DirectorState {
        if self.shut_down.load(Ordering::SeqCst) {
            DirectorState::Shutdown
        } else if self.active_setups.load(Ordering::SeqCst) > 0 {
            DirectorState::SettingUp
        } else if self.active_teardowns.load(Ordering::SeqCst) > 0 {
            DirectorState::TearingDown
        } else if self.initialized.load(Ordering::SeqCst) {
            DirectorState::Ready
        } else {
            DirectorState::Init
        }
    }

    /// Provision every resource of the selected dataflows.
    pub async fn setup(&self, selector: &DataflowSelector) -> Result<ProvisionReport> {
        self.active_setups.fetch_add(1, Ordering::SeqCst);
        let result = self.dispatch(selector, true).await;
        self.active_setups.fetch_sub(1, Ordering::SeqCst);
        result
    }

    /// Tear down the selected dataflows, honoring lifecycle policy.
    pub async fn teardown(&self, selector: &DataflowSelector) -> Result<ProvisionReport> {
        self.active_teardowns.fetch_add(1, Ordering::SeqCst);
        let result = self.dispatch(selector, false).await;
        self.active_teardowns.fetch_sub(1, Ordering::SeqCst);
        result
    }

    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        // Dropping the senders stops the actors once queued work drains.
        self.actors.clear();
        info!("director shut down");
    }

    async fn dispatch(&self, selector: &DataflowSelector, setup: bool) -> Result<ProvisionReport> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(DomainError::Precondition("director is shut down".into()));
        }
        let selected: Vec<String> = self
            .architecture
            .dataflows
            .keys()
            .filter(|name| selector.matches(name))
            .cloned()
            .collect();
        if selected.is_empty() {
            return Err(DomainError::NotFound(format!("dataflow {selector}")));
        }

        // One reply channel per dataflow; actors work in parallel while each
        // dataflow stays serialized.
        let mut replies = Vec::with_capacity(selected.len());
        for name in &selected {
            let actor = self
                .actors
                .get(name)
                .map(|sender| sender.clone())
                .ok_or_else(|| DomainError::NotFound(format!("dataflow {name}")))?;
            let (reply, rx) = oneshot::channel();
            let op = if setup {
                DataflowOp::Setup { reply }
            } else {
                DataflowOp::Teardown { reply }
            };
            actor
                .send(op)
                .await
                .map_err(|_| DomainError::Infrastructure(format!("actor for {name} stopped")))?;
            replies.push((name.clone(), rx));
        }

        let mut merged = ProvisionReport::new(selector.to_string());
        for (name, rx) in replies {
            let report = rx.await.map_err(|_| {
                DomainError::Infrastructure(format!("actor for {name} dropped its reply"))
            })??;
            merged.merge(report);
        }
        Ok(merged)
    }
}

async fn dataflow_actor(
    flow: Dataflow,
    manager: Arc<ServiceManager>,
    mut rx: mpsc::Receiver<DataflowOp>,
) {
    info!(dataflow = %flow.name, "dataflow actor started");
    while let Some(op) = rx.recv().await {
        match op {
            DataflowOp::Setup { reply } => {
                let result = manager.setup_dataflow(&flow).await;
                if let Err(e) = &result {
                    error!(dataflow = %flow.name, error = %e, "setup pass failed");
                }
                if reply.send(result).is_err() {
                    warn!(dataflow = %flow.name, "setup caller went away");
                }
            }
            DataflowOp::Teardown { reply } => {
                let result = manager.teardown_dataflow(&flow).await;
                if let Err(e) = &result {
                    error!(dataflow = %flow.name, error = %e, "teardown pass failed");
                }
                if reply.send(result).is_err() {
                    warn!(dataflow = %flow.name, "teardown caller went away");
                }
            }
        }
    }
    info!(dataflow = %flow.name, "dataflow actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use stratoflow_adapters::{InMemoryCloud, InMemoryPubSub};
    use stratoflow_core::architecture::*;
    use stratoflow_core::hydration::hydrate;
    use stratoflow_core::provisioning::ItemOutcome;

    fn test_architecture() -> Architecture {
        let flow = Dataflow {
            name: "telemetry".into(),
            lifecycle: LifecyclePolicy::default(),
            services: BTreeMap::new(),
            resources: CloudResourcesSpec {
                topics: vec![TopicConfig {
                    name: "readings".into(),
                }],
                subscriptions: vec![SubscriptionConfig {
                    name: String::new(),
                    topic: "readings".into(),
                }],
                ..Default::default()
            },
        };
        let arch = Architecture {
            project_id: "demo".into(),
            region: "europe-west1".into(),
            location: "US".into(),
            image_repo: "imgs".into(),
            service_manager_spec: DirectorSpec {
                name: "director".into(),
                service_account: "director-sa".into(),
                project_id: String::new(),
                deployment: DeploymentSpec::default(),
                command_topic: String::new(),
                completion_topic: String::new(),
                command_subscription: String::new(),
                completion_subscription: String::new(),
            },
            dataflows: BTreeMap::from([("telemetry".to_string(), flow)]),
        };
        hydrate(&arch, Some("t0")).unwrap()
    }

    async fn started_director() -> (Arc<InMemoryCloud>, Arc<Director>) {
        let cloud = InMemoryCloud::new(Arc::new(InMemoryPubSub::new()));
        let manager = Arc::new(ServiceManager::in_memory(&cloud));
        let director = Director::new(test_architecture(), Arc::clone(&manager));
        director.init(&manager).await.unwrap();
        (cloud, director)
    }

    #[tokio::test]
    async fn init_brings_director_ready_with_command_channels() {
        let (cloud, director) = started_director().await;
        assert_eq!(director.state(), DirectorState::Ready);
        assert!(cloud.pubsub().topic_exists("director-commands"));
        assert!(cloud
            .pubsub()
            .subscription_topic("director-commands-sub")
            .is_some());
    }

    #[tokio::test]
    async fn second_setup_reports_no_creations() {
        let (_, director) = started_director().await;
        let first = director.setup(&DataflowSelector::All).await.unwrap();
        assert!(first.first_failure().is_none());
        assert!(first.created_count() > 0);

        let second = director.setup(&DataflowSelector::All).await.unwrap();
        assert!(second.first_failure().is_none());
        assert_eq!(second.created_count(), 0);
    }

    #[tokio::test]
    async fn unknown_dataflow_is_not_found() {
        let (_, director) = started_director().await;
        let err = director
            .setup(&DataflowSelector::Named("missing".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[tokio::test]
    async fn teardown_after_setup_removes_resources() {
        let (cloud, director) = started_director().await;
        director.setup(&DataflowSelector::All).await.unwrap();
        assert!(cloud.pubsub().topic_exists("readings"));

        let report = director.teardown(&DataflowSelector::All).await.unwrap();
        assert!(report
            .items
            .iter()
            .all(|i| !matches!(i.outcome, ItemOutcome::Failed(_))));
        assert!(!cloud.pubsub().topic_exists("readings"));
    }

    #[tokio::test]
    async fn shutdown_refuses_further_work() {
        let (_, director) = started_director().await;
        director.shutdown();
        assert_eq!(director.state(), DirectorState::Shutdown);
        assert!(director.setup(&DataflowSelector::All).await.is_err());
    }
}
