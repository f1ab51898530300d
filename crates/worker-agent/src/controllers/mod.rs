//! Purpose-specific controllers.
//!
//! A worker runs exactly one controller, chosen by the `purpose` in its node
//! configuration. The supervisor only relies on the [`Controller`] contract:
//! every capability has a default, so a controller implements only what it
//! supports.

pub mod dispatch;
pub mod node;

pub use dispatch::{
    dispatch, BuildContext, ControllerConstructor, ControllerFactories, Dispatched,
};
pub use node::NodeController;

use crate::broker::{RpcApi, RpcError};
use crate::identity::NetworkInterface;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The declared purpose matches no controller variant.
    #[error("Ambiguous purpose: {0}")]
    AmbiguousPurpose(String),
}

/// Controller variant selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    Conference,
    Audio,
    Video,
    Webrtc,
    Streaming,
    Recording,
    Sip,
}

impl Purpose {
    pub const ALL: [Purpose; 7] = [
        Purpose::Conference,
        Purpose::Audio,
        Purpose::Video,
        Purpose::Webrtc,
        Purpose::Streaming,
        Purpose::Recording,
        Purpose::Sip,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Purpose::Conference => "conference",
            Purpose::Audio => "audio",
            Purpose::Video => "video",
            Purpose::Webrtc => "webrtc",
            Purpose::Streaming => "streaming",
            Purpose::Recording => "recording",
            Purpose::Sip => "sip",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Purpose::ALL
            .into_iter()
            .find(|purpose| purpose.as_str() == s)
            .ok_or_else(|| DispatchError::AmbiguousPurpose(s.to_string()))
    }
}

/// Identity and network facts known only to the supervisor, attached to the
/// controller after construction.
#[derive(Debug, Clone, Default)]
pub struct NodeMetadata {
    /// Interfaces with their `ip_address` filters compiled.
    pub network_interfaces: Vec<NetworkInterface>,
    pub cluster_ip: String,
    /// Identity of the parent agent.
    pub agent_id: String,
}

/// Lifecycle contract between the supervisor and a controller.
#[async_trait::async_trait]
pub trait Controller: Send + Sync {
    fn purpose(&self) -> Purpose;

    /// Receive node metadata. Called once, right after construction.
    fn attach_metadata(&self, _metadata: Arc<NodeMetadata>) {}

    /// Surface registered for the RPC-server role.
    ///
    /// `None` exposes the controller itself through [`Controller::handle_rpc`].
    fn rpc_api(&self) -> Option<Arc<dyn RpcApi>> {
        None
    }

    /// Handle an inbound call when no dedicated [`Controller::rpc_api`] is
    /// exposed.
    async fn handle_rpc(&self, method: &str, _args: Vec<Value>) -> Result<Value, RpcError> {
        Err(RpcError::MethodNotFound(method.to_string()))
    }

    /// A monitored node reported a fault. May be called more than once for
    /// the same fault.
    fn on_fault_detected(&self, _message: &Value) {}

    /// Release controller resources. Called once, on shutdown.
    fn close(&self) {}
}

/// Serves a controller's own methods as an [`RpcApi`].
pub struct ControllerApi {
    controller: Arc<dyn Controller>,
}

impl ControllerApi {
    #[must_use]
    pub fn new(controller: Arc<dyn Controller>) -> Self {
        Self { controller }
    }
}

#[async_trait::async_trait]
impl RpcApi for ControllerApi {
    async fn handle(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        self.controller.handle_rpc(method, args).await
    }
}

/// The surface to register under the worker's RPC identity.
#[must_use]
pub fn exposed_api(controller: &Arc<dyn Controller>) -> Arc<dyn RpcApi> {
    match controller.rpc_api() {
        Some(api) => api,
        None => Arc::new(ControllerApi::new(Arc::clone(controller))),
    }
}
