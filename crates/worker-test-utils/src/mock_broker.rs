//! Mock broker link.
//!
//! [`MockBroker`] is the test-side handle; [`MockBroker::link`] produces the
//! [`BrokerLink`] handed to the supervisor. Both share state, so the test
//! can script failures up front and inspect calls afterwards.
//!
//! # Example
//!
//! ```rust,ignore
//! let broker = MockBroker::builder()
//!     .fail_connect("connection refused")
//!     .build();
//! let link = broker.link();
//! // ... run the supervisor with `link` ...
//! assert_eq!(broker.disconnect_count(), 1);
//! ```

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use worker_agent::broker::{
    BrokerCredentials, BrokerError, BrokerLink, BrokerRole, LinkState, MonitorEvent,
    MonitorHandler, RpcApi, RpcClient, RpcError,
};

/// One operation performed on the link, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    Connect { host: String, port: u16 },
    RpcClient,
    RpcServer { identity: String },
    Monitor,
    Disconnect,
}

#[derive(Default)]
struct Shared {
    connect_failure: Option<String>,
    role_failures: HashMap<BrokerRole, String>,
    stall_connect: bool,
    connect_gate: Notify,
    calls: Mutex<Vec<BrokerCall>>,
    disconnects: AtomicUsize,
    server_api: Mutex<Option<Arc<dyn RpcApi>>>,
    monitor: Mutex<Option<MonitorHandler>>,
    held: Mutex<Vec<BrokerRole>>,
}

impl Shared {
    fn record(&self, call: BrokerCall) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Builder for [`MockBroker`].
#[derive(Default)]
pub struct MockBrokerBuilder {
    connect_failure: Option<String>,
    role_failures: HashMap<BrokerRole, String>,
    stall_connect: bool,
}

impl MockBrokerBuilder {
    /// Fail the handshake with `reason`.
    #[must_use]
    pub fn fail_connect(mut self, reason: &str) -> Self {
        self.connect_failure = Some(reason.to_string());
        self
    }

    /// Refuse `role` with `reason`.
    #[must_use]
    pub fn fail_role(mut self, role: BrokerRole, reason: &str) -> Self {
        self.role_failures.insert(role, reason.to_string());
        self
    }

    /// Hold `connect` until [`MockBroker::release_connect`].
    #[must_use]
    pub fn stall_connect(mut self) -> Self {
        self.stall_connect = true;
        self
    }

    #[must_use]
    pub fn build(self) -> MockBroker {
        MockBroker {
            shared: Arc::new(Shared {
                connect_failure: self.connect_failure,
                role_failures: self.role_failures,
                stall_connect: self.stall_connect,
                ..Shared::default()
            }),
        }
    }
}

/// Test-side view of a mock broker.
#[derive(Clone)]
pub struct MockBroker {
    shared: Arc<Shared>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MockBroker {
    #[must_use]
    pub fn builder() -> MockBrokerBuilder {
        MockBrokerBuilder::default()
    }

    /// A broker on which every operation succeeds.
    #[must_use]
    pub fn accepting() -> Self {
        Self::default()
    }

    /// The link to hand to the code under test.
    #[must_use]
    pub fn link(&self) -> MockBrokerLink {
        MockBrokerLink {
            shared: Arc::clone(&self.shared),
            state: LinkState::Disconnected,
            roles: Vec::new(),
        }
    }

    /// Let a stalled `connect` proceed.
    pub fn release_connect(&self) {
        self.shared.connect_gate.notify_one();
    }

    /// Every call made on the link so far.
    #[must_use]
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.shared.calls.lock().unwrap().clone()
    }

    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.shared.disconnects.load(Ordering::SeqCst)
    }

    /// Roles the link currently holds, in acquisition order.
    #[must_use]
    pub fn held_roles(&self) -> Vec<BrokerRole> {
        self.shared.held.lock().unwrap().clone()
    }

    /// Identity registered for the RPC-server role, if any.
    #[must_use]
    pub fn served_identity(&self) -> Option<String> {
        self.calls().into_iter().find_map(|call| match call {
            BrokerCall::RpcServer { identity } => Some(identity),
            _ => None,
        })
    }

    /// Call a method on the registered RPC server.
    ///
    /// # Panics
    ///
    /// Panics if no server was registered.
    pub async fn call_server(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        let api = self
            .shared
            .server_api
            .lock()
            .unwrap()
            .clone()
            .expect("no RPC server registered");
        api.handle(method, args).await
    }

    /// Deliver a monitor event to the registered handler.
    ///
    /// Returns `false` if the monitor role was never acquired.
    pub fn emit(&self, event: MonitorEvent) -> bool {
        let handler = self.shared.monitor.lock().unwrap().clone();
        match handler {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }
}

/// [`BrokerLink`] backed by a [`MockBroker`].
pub struct MockBrokerLink {
    shared: Arc<Shared>,
    state: LinkState,
    roles: Vec<BrokerRole>,
}

impl MockBrokerLink {
    fn acquire(&mut self, role: BrokerRole) -> Result<(), BrokerError> {
        if self.state != LinkState::Connected {
            return Err(BrokerError::NotConnected);
        }
        if let Some(reason) = self.shared.role_failures.get(&role) {
            return Err(BrokerError::RoleUnavailable {
                role,
                reason: reason.clone(),
            });
        }
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
        self.shared.held.lock().unwrap().clone_from(&self.roles);
        Ok(())
    }
}

#[async_trait::async_trait]
impl BrokerLink for MockBrokerLink {
    async fn connect(&mut self, credentials: &BrokerCredentials) -> Result<(), BrokerError> {
        self.shared.record(BrokerCall::Connect {
            host: credentials.host.clone(),
            port: credentials.port,
        });
        self.state = LinkState::Connecting;

        if self.shared.stall_connect {
            self.shared.connect_gate.notified().await;
        }

        if let Some(reason) = &self.shared.connect_failure {
            self.state = LinkState::Disconnected;
            return Err(BrokerError::Connect(reason.clone()));
        }
        self.state = LinkState::Connected;
        Ok(())
    }

    async fn as_rpc_client(&mut self) -> Result<Arc<dyn RpcClient>, BrokerError> {
        self.shared.record(BrokerCall::RpcClient);
        self.acquire(BrokerRole::Client)?;
        Ok(Arc::new(UnroutedClient))
    }

    async fn as_rpc_server(
        &mut self,
        identity: &str,
        api: Arc<dyn RpcApi>,
    ) -> Result<(), BrokerError> {
        self.shared.record(BrokerCall::RpcServer {
            identity: identity.to_string(),
        });
        self.acquire(BrokerRole::Server)?;
        *self.shared.server_api.lock().unwrap() = Some(api);
        Ok(())
    }

    async fn as_monitor(&mut self, on_event: MonitorHandler) -> Result<(), BrokerError> {
        self.shared.record(BrokerCall::Monitor);
        self.acquire(BrokerRole::Monitor)?;
        *self.shared.monitor.lock().unwrap() = Some(on_event);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.shared.record(BrokerCall::Disconnect);
        self.shared.disconnects.fetch_add(1, Ordering::SeqCst);
        self.roles.clear();
        self.shared.held.lock().unwrap().clear();
        self.state = LinkState::Closed;
    }

    fn state(&self) -> LinkState {
        self.state
    }

    fn roles(&self) -> &[BrokerRole] {
        &self.roles
    }
}

/// Client whose calls never reach a server.
struct UnroutedClient;

#[async_trait::async_trait]
impl RpcClient for UnroutedClient {
    async fn call(&self, target: &str, _method: &str, _args: Vec<Value>) -> Result<Value, RpcError> {
        Err(RpcError::UnknownTarget(target.to_string()))
    }
}
