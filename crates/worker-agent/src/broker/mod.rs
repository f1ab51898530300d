//! Control-plane broker link.
//!
//! A [`BrokerLink`] owns one connection to the broker and hands out three
//! independent roles over it:
//!
//! - RPC client: outbound calls to other nodes
//! - RPC server: inbound calls addressed to this node's `rpc_id`
//! - Monitor: cluster fault/lifecycle events
//!
//! A role is either fully acquired or not acquired; there is no partial
//! state. Nothing in this layer retries. Failures are returned to the
//! supervisor, which treats them as fatal for the process.
//!
//! # Link states
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Closed
//!                     |
//!                     +-> Disconnected (connect failed)
//! ```
//!
//! While `Connected`, [`BrokerLink::roles`] reports which of the client,
//! server and monitor roles are held. Disconnect releases them all.

pub mod local;
pub mod rpc;

pub use local::{LocalBroker, LocalBrokerLink};
pub use rpc::{RpcApi, RpcClient, RpcError};

use crate::config::RabbitConfig;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Connection state of a broker link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

/// A role acquirable over a connected link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerRole {
    Client,
    Server,
    Monitor,
}

impl BrokerRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            BrokerRole::Client => "rpc_client",
            BrokerRole::Server => "rpc_server",
            BrokerRole::Monitor => "monitor",
        }
    }
}

impl fmt::Display for BrokerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker handshake failed.
    #[error("Broker connect failed: {0}")]
    Connect(String),

    /// A role was requested before the link connected.
    #[error("Broker link is not connected")]
    NotConnected,

    /// The broker refused a role.
    #[error("Failed to acquire {role} role: {reason}")]
    RoleUnavailable { role: BrokerRole, reason: String },

    /// The link was already disconnected.
    #[error("Broker link is closed")]
    Closed,
}

/// Credentials for the broker handshake. The password is redacted in
/// Debug output.
#[derive(Debug, Clone)]
pub struct BrokerCredentials {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
}

impl BrokerCredentials {
    /// `host:port` for logging.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&RabbitConfig> for BrokerCredentials {
    fn from(rabbit: &RabbitConfig) -> Self {
        Self {
            host: rabbit.host.clone(),
            port: rabbit.port,
            username: rabbit.username.clone(),
            password: rabbit.password.clone(),
        }
    }
}

/// Why a monitored node reported an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorReason {
    Abnormal,
    Error,
    Quit,
    #[serde(other)]
    Other,
}

impl MonitorReason {
    /// `abnormal`, `error` and `quit` indicate a fault worth forwarding.
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        matches!(
            self,
            MonitorReason::Abnormal | MonitorReason::Error | MonitorReason::Quit
        )
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MonitorReason::Abnormal => "abnormal",
            MonitorReason::Error => "error",
            MonitorReason::Quit => "quit",
            MonitorReason::Other => "other",
        }
    }
}

/// One event from the monitoring channel. Delivery may repeat; handlers
/// must tolerate duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub reason: MonitorReason,
    #[serde(default)]
    pub message: Value,
}

impl MonitorEvent {
    #[must_use]
    pub fn new(reason: MonitorReason, message: impl Into<Value>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// Callback invoked once per inbound monitor event.
pub type MonitorHandler = Arc<dyn Fn(MonitorEvent) + Send + Sync>;

/// Connection to the control-plane broker.
///
/// Role acquisitions are expected once each per process lifetime, strictly
/// in client, server, monitor order. Implementations must not retry.
#[async_trait::async_trait]
pub trait BrokerLink: Send + Sync {
    /// Complete the broker handshake.
    async fn connect(&mut self, credentials: &BrokerCredentials) -> Result<(), BrokerError>;

    /// Acquire the RPC-client role.
    async fn as_rpc_client(&mut self) -> Result<Arc<dyn RpcClient>, BrokerError>;

    /// Acquire the RPC-server role, serving `api` under `identity`.
    async fn as_rpc_server(
        &mut self,
        identity: &str,
        api: Arc<dyn RpcApi>,
    ) -> Result<(), BrokerError>;

    /// Acquire the monitor role; `on_event` runs once per inbound event.
    async fn as_monitor(&mut self, on_event: MonitorHandler) -> Result<(), BrokerError>;

    /// Best-effort synchronous teardown.
    fn disconnect(&mut self);

    fn state(&self) -> LinkState;

    /// Roles held over the current connection, in acquisition order.
    fn roles(&self) -> &[BrokerRole];
}
