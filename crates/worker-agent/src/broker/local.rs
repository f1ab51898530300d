//! In-process broker.
//!
//! [`LocalBroker`] is a hub shared by any number of [`LocalBrokerLink`]s in
//! one process. Servers register under an identity, clients call by
//! identity, and monitor events fan out to every link holding the monitor
//! role.
//!
//! It backs the worker binary when no external broker transport is wired
//! in, and lets several nodes talk to each other inside a single test.

use super::rpc::{RpcApi, RpcClient, RpcError};
use super::{
    BrokerCredentials, BrokerError, BrokerLink, BrokerRole, LinkState, MonitorEvent,
    MonitorHandler,
};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default time a call waits for the server's answer.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Monitor events buffered per subscriber before it starts lagging.
const MONITOR_CHANNEL_CAPACITY: usize = 256;

struct Hub {
    servers: RwLock<HashMap<String, Arc<dyn RpcApi>>>,
    monitor: broadcast::Sender<MonitorEvent>,
    call_timeout: Duration,
    open: AtomicBool,
}

impl Hub {
    fn server(&self, identity: &str) -> Option<Arc<dyn RpcApi>> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }
}

/// Shared in-process broker.
#[derive(Clone)]
pub struct LocalBroker {
    hub: Arc<Hub>,
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::with_call_timeout(DEFAULT_CALL_TIMEOUT)
    }

    #[must_use]
    pub fn with_call_timeout(call_timeout: Duration) -> Self {
        let (monitor, _) = broadcast::channel(MONITOR_CHANNEL_CAPACITY);
        Self {
            hub: Arc::new(Hub {
                servers: RwLock::new(HashMap::new()),
                monitor,
                call_timeout,
                open: AtomicBool::new(true),
            }),
        }
    }

    /// A new, disconnected link to this broker.
    #[must_use]
    pub fn link(&self) -> LocalBrokerLink {
        LocalBrokerLink {
            hub: Arc::clone(&self.hub),
            state: LinkState::Disconnected,
            roles: Vec::new(),
            served: Vec::new(),
            monitor_task: None,
        }
    }

    /// Publish a monitor event to every link holding the monitor role.
    ///
    /// Returns the number of subscribers it reached.
    pub fn publish_monitor(&self, event: MonitorEvent) -> usize {
        self.hub.monitor.send(event).unwrap_or(0)
    }

    /// Whether some link currently serves `identity`.
    #[must_use]
    pub fn is_serving(&self, identity: &str) -> bool {
        self.hub.server(identity).is_some()
    }

    /// Refuse new connections. Existing links keep working.
    pub fn close(&self) {
        self.hub.open.store(false, Ordering::SeqCst);
    }
}

/// One connection to a [`LocalBroker`].
pub struct LocalBrokerLink {
    hub: Arc<Hub>,
    state: LinkState,
    roles: Vec<BrokerRole>,
    served: Vec<String>,
    monitor_task: Option<JoinHandle<()>>,
}

impl LocalBrokerLink {
    fn hold(&mut self, role: BrokerRole) {
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
    }

    fn require_connected(&self, role: BrokerRole) -> Result<(), BrokerError> {
        match self.state {
            LinkState::Connected => Ok(()),
            LinkState::Closed => Err(BrokerError::Closed),
            LinkState::Disconnected | LinkState::Connecting => {
                debug!(
                    target: "worker.broker.local",
                    role = %role,
                    "Role requested before connect"
                );
                Err(BrokerError::NotConnected)
            }
        }
    }
}

#[async_trait::async_trait]
impl BrokerLink for LocalBrokerLink {
    async fn connect(&mut self, credentials: &BrokerCredentials) -> Result<(), BrokerError> {
        if self.state == LinkState::Closed {
            return Err(BrokerError::Closed);
        }
        self.state = LinkState::Connecting;

        if !self.hub.open.load(Ordering::SeqCst) {
            self.state = LinkState::Disconnected;
            warn!(
                target: "worker.broker.local",
                address = %credentials.address(),
                "Broker refused connection"
            );
            return Err(BrokerError::Connect(format!(
                "broker at {} is not accepting connections",
                credentials.address()
            )));
        }

        self.state = LinkState::Connected;
        info!(
            target: "worker.broker.local",
            address = %credentials.address(),
            "Broker link connected"
        );
        Ok(())
    }

    async fn as_rpc_client(&mut self) -> Result<Arc<dyn RpcClient>, BrokerError> {
        self.require_connected(BrokerRole::Client)?;
        self.hold(BrokerRole::Client);
        Ok(Arc::new(LocalRpcClient {
            hub: Arc::clone(&self.hub),
        }))
    }

    async fn as_rpc_server(
        &mut self,
        identity: &str,
        api: Arc<dyn RpcApi>,
    ) -> Result<(), BrokerError> {
        self.require_connected(BrokerRole::Server)?;

        let mut servers = self
            .hub
            .servers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if servers.contains_key(identity) {
            return Err(BrokerError::RoleUnavailable {
                role: BrokerRole::Server,
                reason: format!("identity {identity} is already served"),
            });
        }
        servers.insert(identity.to_string(), api);
        drop(servers);
        self.served.push(identity.to_string());
        self.hold(BrokerRole::Server);

        debug!(target: "worker.broker.local", identity = %identity, "Serving RPC");
        Ok(())
    }

    async fn as_monitor(&mut self, on_event: MonitorHandler) -> Result<(), BrokerError> {
        self.require_connected(BrokerRole::Monitor)?;
        if self.monitor_task.is_some() {
            return Err(BrokerError::RoleUnavailable {
                role: BrokerRole::Monitor,
                reason: "monitor role already held by this link".to_string(),
            });
        }

        let mut events = self.hub.monitor.subscribe();
        self.monitor_task = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let reason = event.reason;
                        if std::panic::catch_unwind(AssertUnwindSafe(|| on_event(event))).is_err()
                        {
                            warn!(
                                target: "worker.broker.local",
                                reason = reason.as_str(),
                                "Monitor handler panicked"
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            target: "worker.broker.local",
                            skipped = skipped,
                            "Monitor subscriber lagged, events dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
        self.hold(BrokerRole::Monitor);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.state == LinkState::Closed {
            return;
        }

        if !self.served.is_empty() {
            let mut servers = self
                .hub
                .servers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for identity in self.served.drain(..) {
                servers.remove(&identity);
            }
        }
        if let Some(task) = self.monitor_task.take() {
            task.abort();
        }

        self.roles.clear();
        self.state = LinkState::Closed;
        info!(target: "worker.broker.local", "Broker link disconnected");
    }

    fn state(&self) -> LinkState {
        self.state
    }

    fn roles(&self) -> &[BrokerRole] {
        &self.roles
    }
}

struct LocalRpcClient {
    hub: Arc<Hub>,
}

#[async_trait::async_trait]
impl RpcClient for LocalRpcClient {
    async fn call(
        &self,
        target: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, RpcError> {
        let api = self
            .hub
            .server(target)
            .ok_or_else(|| RpcError::UnknownTarget(target.to_string()))?;

        let method_name = method.to_string();
        let mut task = tokio::spawn(async move { api.handle(&method_name, args).await });

        match tokio::time::timeout(self.hub.call_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                warn!(
                    target: "worker.broker.local",
                    target_id = %target,
                    method = %method,
                    error = %join_error,
                    "RPC handler failed"
                );
                Err(RpcError::Remote(format!("handler for {method} failed")))
            }
            Err(_) => {
                task.abort();
                Err(RpcError::Timeout)
            }
        }
    }
}
